//! Error types for the WASM harness.

use super::harness::Stage;

#[derive(Debug, thiserror::Error)]
pub enum WasmError {
    #[error("engine creation failed: {0}")]
    EngineCreation(String),
    #[error("module load failed: {0}")]
    Load(String),
    #[error("module compilation failed: {0}")]
    Compilation(String),
    #[error("instantiation failed: {0}")]
    Instantiation(String),
    #[error("execution failed: {0}")]
    Execution(String),
}

impl WasmError {
    /// The run stage this error is reported under.
    pub fn stage(&self) -> Stage {
        match self {
            WasmError::Load(_) => Stage::Load,
            WasmError::EngineCreation(_) | WasmError::Compilation(_) => Stage::Compile,
            WasmError::Instantiation(_) => Stage::Instantiate,
            WasmError::Execution(_) => Stage::Execute,
        }
    }

    /// The bare cause, without the stage prefix added by `Display`.
    pub fn cause(&self) -> &str {
        match self {
            WasmError::EngineCreation(c)
            | WasmError::Load(c)
            | WasmError::Compilation(c)
            | WasmError::Instantiation(c)
            | WasmError::Execution(c) => c,
        }
    }
}
