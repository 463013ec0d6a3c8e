//! Host imports offered to guest modules.
//!
//! An `ImportsSpec` names exactly which host functions get linked. Anything
//! the module imports that the spec does not provide stays undefined, and
//! instantiation fails on it. Nothing is stubbed.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};
use wasmtime::{Caller, Linker};

use super::error::WasmError;

/// Namespace the guest imports host functions from unless told otherwise.
pub const DEFAULT_NAMESPACE: &str = "env";

/// Where `print_string` output goes.
pub trait DiagnosticSink: Send + Sync {
    /// Emit one line of guest output.
    fn emit(&self, line: &str);
}

/// Writes each line to standard output.
#[derive(Debug, Default, Clone, Copy)]
pub struct StdoutSink;

impl DiagnosticSink for StdoutSink {
    fn emit(&self, line: &str) {
        println!("{line}");
    }
}

/// Collects lines in memory.
#[derive(Debug, Default)]
pub struct MemorySink {
    lines: Mutex<Vec<String>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of everything emitted so far.
    pub fn lines(&self) -> Vec<String> {
        self.lines
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }
}

impl DiagnosticSink for MemorySink {
    fn emit(&self, line: &str) {
        self.lines
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(line.to_string());
    }
}

/// A host function the harness knows how to provide.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HostImport {
    /// `print_string(ptr: u32, len: u32)`: emit `len` bytes of UTF-8 at `ptr`.
    PrintString,
}

impl HostImport {
    /// Import name as the guest declares it.
    pub fn name(&self) -> &'static str {
        match self {
            HostImport::PrintString => "print_string",
        }
    }
}

/// Which host functions to link, and under which module namespace.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportsSpec {
    #[serde(default = "default_namespace")]
    pub namespace: String,
    #[serde(default)]
    pub functions: Vec<HostImport>,
}

fn default_namespace() -> String {
    DEFAULT_NAMESPACE.into()
}

impl Default for ImportsSpec {
    fn default() -> Self {
        Self::none()
    }
}

impl ImportsSpec {
    /// No host functions at all.
    pub fn none() -> Self {
        Self {
            namespace: default_namespace(),
            functions: Vec::new(),
        }
    }

    /// `env.print_string`, the import surface the diagnostic examples use.
    pub fn print_string() -> Self {
        Self {
            namespace: default_namespace(),
            functions: vec![HostImport::PrintString],
        }
    }

    /// Same functions under a different namespace.
    pub fn in_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }

    pub fn is_empty(&self) -> bool {
        self.functions.is_empty()
    }

    /// Define every listed function in `linker`, each once.
    pub(crate) fn link(&self, linker: &mut Linker<HostState>) -> Result<(), WasmError> {
        let mut linked = HashSet::new();
        for import in self.functions.iter().filter(|f| linked.insert(**f)) {
            match import {
                HostImport::PrintString => {
                    linker
                        .func_wrap(&self.namespace, import.name(), print_string)
                        .map_err(|e| {
                            WasmError::Instantiation(format!(
                                "failed to define {}::{}: {e}",
                                self.namespace,
                                import.name()
                            ))
                        })?;
                }
            }
        }
        Ok(())
    }
}

/// Store data for one harness run.
pub(crate) struct HostState {
    sink: Arc<dyn DiagnosticSink>,
}

impl HostState {
    pub fn new(sink: Arc<dyn DiagnosticSink>) -> Self {
        Self { sink }
    }
}

/// Host side of `print_string`.
///
/// Memory is looked up on the calling instance at call time. The store
/// holds no memory handle of its own, so a reference taken before
/// instantiation has nowhere to live.
fn print_string(mut caller: Caller<'_, HostState>, ptr: u32, len: u32) -> wasmtime::Result<()> {
    let memory = caller
        .get_export("memory")
        .and_then(|export| export.into_memory())
        .ok_or_else(|| wasmtime::Error::msg("print_string: module does not export 'memory'"))?;

    let data = memory.data(&caller);
    let start = ptr as usize;
    let bytes = start
        .checked_add(len as usize)
        .and_then(|end| data.get(start..end))
        .ok_or_else(|| {
            wasmtime::Error::msg(format!(
                "print_string: range {ptr}+{len} outside linear memory of {} bytes",
                data.len()
            ))
        })?;

    let text = String::from_utf8_lossy(bytes).into_owned();
    tracing::debug!(ptr, len, "print_string");
    caller.data().sink.emit(&text);
    Ok(())
}
