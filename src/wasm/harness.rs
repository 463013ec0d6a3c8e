//! WasmHarness: load a module, link host imports, run one export.
//!
//! Every run walks the same line: acquire bytes, compile, instantiate,
//! call the entry point. Each step's failure is caught on its own and comes
//! back as a `RunResult::Failure` tagged with the stage that broke. Nothing
//! is retried and the host process is never taken down by a guest.

use std::fmt;
use std::path::Path;
use std::sync::Arc;

use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::Instrument;
use uuid::Uuid;

use super::error::WasmError;
use super::imports::{DiagnosticSink, ImportsSpec, StdoutSink};
use super::runtime::{RuntimeOptions, WasmRuntime};
use super::source::{fetch_streaming, read_file, ModuleSource};
use super::value::Value;
use crate::config::HarnessConfig;

/// The step of a run that failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    /// Reading the file or fetching the URL.
    Load,
    Compile,
    Instantiate,
    Execute,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Stage::Load => "load",
            Stage::Compile => "compile",
            Stage::Instantiate => "instantiate",
            Stage::Execute => "execute",
        })
    }
}

/// Outcome of one harness run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum RunResult {
    /// The entry point returned; `results` is empty for a void export.
    Success { results: Vec<Value> },
    Failure { stage: Stage, cause: String },
}

impl RunResult {
    pub fn is_success(&self) -> bool {
        matches!(self, RunResult::Success { .. })
    }

    /// The single returned value, if the entry point returned exactly one.
    pub fn value(&self) -> Option<Value> {
        match self {
            RunResult::Success { results } if results.len() == 1 => Some(results[0]),
            _ => None,
        }
    }

    /// The failed stage, if any.
    pub fn stage(&self) -> Option<Stage> {
        match self {
            RunResult::Failure { stage, .. } => Some(*stage),
            RunResult::Success { .. } => None,
        }
    }
}

impl From<Result<Vec<Value>, WasmError>> for RunResult {
    fn from(outcome: Result<Vec<Value>, WasmError>) -> Self {
        match outcome {
            Ok(results) => RunResult::Success { results },
            Err(e) => RunResult::Failure {
                stage: e.stage(),
                cause: e.cause().to_string(),
            },
        }
    }
}

impl fmt::Display for RunResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunResult::Success { results } => {
                let rendered: Vec<String> = results.iter().map(|v| v.to_string()).collect();
                write!(f, "ok [{}]", rendered.join(", "))
            }
            RunResult::Failure { stage, cause } => write!(f, "{stage} failed: {cause}"),
        }
    }
}

/// Loads and runs WebAssembly modules.
///
/// The engine and HTTP client are shared across runs; stores, instances
/// and linear memories are not.
pub struct WasmHarness {
    runtime: Arc<WasmRuntime>,
    http: Client,
    max_fetch_bytes: u64,
    sink: Arc<dyn DiagnosticSink>,
}

impl fmt::Debug for WasmHarness {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WasmHarness")
            .field("runtime", &self.runtime)
            .field("max_fetch_bytes", &self.max_fetch_bytes)
            .finish_non_exhaustive()
    }
}

impl WasmHarness {
    /// Build a harness from configuration, printing guest output to stdout.
    pub fn new(config: &HarnessConfig) -> Result<Self, WasmError> {
        let runtime = WasmRuntime::with_options(&RuntimeOptions {
            max_wasm_stack: config.max_wasm_stack,
        })?;

        let mut builder = Client::builder().user_agent(concat!(
            env!("CARGO_PKG_NAME"),
            "/",
            env!("CARGO_PKG_VERSION")
        ));
        if !config.use_proxy {
            builder = builder.no_proxy();
        }
        let http = builder
            .build()
            .map_err(|e| WasmError::EngineCreation(format!("HTTP client: {e}")))?;

        Ok(Self {
            runtime: Arc::new(runtime),
            http,
            max_fetch_bytes: config.max_fetch_bytes,
            sink: Arc::new(StdoutSink),
        })
    }

    /// Send `print_string` output somewhere other than stdout.
    pub fn with_sink(mut self, sink: Arc<dyn DiagnosticSink>) -> Self {
        self.sink = sink;
        self
    }

    /// Load `source`, instantiate it against `imports`, call `entry(args)`.
    ///
    /// Files take the byte-buffer path. URLs are streamed through the
    /// incremental decoder while they download. Engine work runs on the
    /// blocking pool.
    pub async fn load_and_run(
        &self,
        source: &ModuleSource,
        entry: &str,
        args: &[Value],
        imports: &ImportsSpec,
    ) -> RunResult {
        let run_id = Uuid::new_v4();
        let span = tracing::info_span!("run", %run_id, entry, source = %source);

        async {
            let outcome = match source {
                ModuleSource::Path(path) => {
                    let path = path.clone();
                    self.on_blocking_pool(entry, args, imports, move || read_file(&path))
                        .await
                }
                ModuleSource::Url(url) => {
                    match fetch_streaming(&self.http, url, self.max_fetch_bytes).await {
                        Ok(bytes) => {
                            self.on_blocking_pool(entry, args, imports, move || Ok(bytes))
                                .await
                        }
                        Err(e) => Err(e),
                    }
                }
            };
            report(RunResult::from(outcome))
        }
        .instrument(span)
        .await
    }

    /// Synchronous byte-buffer path: compile, instantiate and run `bytes`.
    pub fn run_bytes(
        &self,
        bytes: &[u8],
        entry: &str,
        args: &[Value],
        imports: &ImportsSpec,
    ) -> RunResult {
        let _guard = tracing::info_span!("run", run_id = %Uuid::new_v4(), entry).entered();
        let outcome = self.runtime.compile(bytes).and_then(|module| {
            self.runtime
                .execute(&module, entry, args, imports, self.sink.clone())
        });
        report(RunResult::from(outcome))
    }

    /// Synchronous filesystem path: read the whole file, then `run_bytes`.
    pub fn run_file(
        &self,
        path: &Path,
        entry: &str,
        args: &[Value],
        imports: &ImportsSpec,
    ) -> RunResult {
        match read_file(path) {
            Ok(bytes) => self.run_bytes(&bytes, entry, args, imports),
            Err(e) => report(RunResult::from(Err(e))),
        }
    }

    /// Acquire bytes with `load`, then compile and execute, all off the
    /// async executor.
    async fn on_blocking_pool<F>(
        &self,
        entry: &str,
        args: &[Value],
        imports: &ImportsSpec,
        load: F,
    ) -> Result<Vec<Value>, WasmError>
    where
        F: FnOnce() -> Result<Vec<u8>, WasmError> + Send + 'static,
    {
        let runtime = self.runtime.clone();
        let sink = self.sink.clone();
        let entry = entry.to_string();
        let args = args.to_vec();
        let imports = imports.clone();
        let span = tracing::Span::current();

        tokio::task::spawn_blocking(move || {
            let _guard = span.entered();
            let bytes = load()?;
            let module = runtime.compile(&bytes)?;
            runtime.execute(&module, &entry, &args, &imports, sink)
        })
        .await
        .map_err(|e| WasmError::Execution(format!("harness task panicked: {e}")))?
    }
}

fn report(result: RunResult) -> RunResult {
    match &result {
        RunResult::Success { results } => {
            tracing::debug!(results = results.len(), "run succeeded");
        }
        RunResult::Failure { stage, cause } => {
            tracing::warn!(%stage, "run failed: {cause}");
        }
    }
    result
}
