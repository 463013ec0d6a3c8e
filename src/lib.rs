//! wasm-harness: run one export of a WebAssembly module.
//!
//! Loads a module from disk or over HTTP (streamed), links the host imports
//! it asks for, calls a named entry point and reports the outcome as a
//! `RunResult` instead of a log line.

pub mod config;
pub mod wasm;
