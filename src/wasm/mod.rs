//! WASM harness: load a module, link host imports, run one export.
//!
//! Architecture:
//! - `harness.rs`: WasmHarness: load_and_run, RunResult, Stage
//! - `runtime.rs`: WasmRuntime engine, compilation, instantiate + call
//! - `imports.rs`: ImportsSpec, the print_string host import, diagnostic sinks
//! - `source.rs`: ModuleSource, file read, streaming fetch + incremental decoding
//! - `value.rs`: numeric argument/result values
//! - `error.rs`: WasmError types

pub mod error;
pub mod harness;
pub mod imports;
pub mod runtime;
pub mod source;
pub mod value;

pub use error::WasmError;
pub use harness::{RunResult, Stage, WasmHarness};
pub use imports::{DiagnosticSink, HostImport, ImportsSpec, MemorySink, StdoutSink};
pub use source::ModuleSource;
pub use value::Value;
