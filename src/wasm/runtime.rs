//! WASM Runtime: owns the engine, compiles modules, runs entry points.
//!
//! Uses wasmtime's core module API. Modules are compiled per run and every
//! run gets a fresh Store, so no instance, memory or host state survives
//! from one call to the next.

use std::sync::Arc;

use wasmtime::{Engine, Linker, Module, Store, Val};

use super::error::WasmError;
use super::imports::{DiagnosticSink, HostState, ImportsSpec};
use super::value::{val_type_name, Value};

/// Engine settings.
#[derive(Debug, Clone, Default)]
pub struct RuntimeOptions {
    /// Maximum native stack, in bytes, guest code may use before trapping.
    pub max_wasm_stack: Option<usize>,
}

/// The WASM runtime engine, shared across runs.
pub struct WasmRuntime {
    engine: Engine,
}

impl std::fmt::Debug for WasmRuntime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WasmRuntime").finish_non_exhaustive()
    }
}

impl WasmRuntime {
    /// Create a new WASM runtime with default configuration.
    pub fn new() -> Result<Self, WasmError> {
        Self::with_options(&RuntimeOptions::default())
    }

    pub fn with_options(options: &RuntimeOptions) -> Result<Self, WasmError> {
        let mut config = wasmtime::Config::new();
        if let Some(bytes) = options.max_wasm_stack {
            config.max_wasm_stack(bytes);
        }
        let engine =
            Engine::new(&config).map_err(|e| WasmError::EngineCreation(format!("{e:#}")))?;
        Ok(Self { engine })
    }

    /// Compile a core module from its binary encoding.
    pub fn compile(&self, bytes: &[u8]) -> Result<Module, WasmError> {
        let module = Module::from_binary(&self.engine, bytes)
            .map_err(|e| WasmError::Compilation(format!("{e:#}")))?;
        tracing::debug!(
            bytes = bytes.len(),
            imports = module.imports().len(),
            exports = module.exports().len(),
            "compiled module"
        );
        Ok(module)
    }

    /// Create a fresh Store and a linker holding only the requested imports.
    pub(crate) fn make_store_and_linker(
        &self,
        imports: &ImportsSpec,
        sink: Arc<dyn DiagnosticSink>,
    ) -> Result<(Store<HostState>, Linker<HostState>), WasmError> {
        let store = Store::new(&self.engine, HostState::new(sink));
        let mut linker = Linker::new(&self.engine);
        imports.link(&mut linker)?;
        Ok((store, linker))
    }

    /// Instantiate `module` and call `entry` with `args`.
    ///
    /// Instantiation errors (unresolved imports, start-function traps) and
    /// execution errors (missing export, bad arguments, guest traps) are
    /// kept apart so the caller can tell which stage failed.
    pub fn execute(
        &self,
        module: &Module,
        entry: &str,
        args: &[Value],
        imports: &ImportsSpec,
        sink: Arc<dyn DiagnosticSink>,
    ) -> Result<Vec<Value>, WasmError> {
        let (mut store, linker) = self.make_store_and_linker(imports, sink)?;

        let instance = linker
            .instantiate(&mut store, module)
            .map_err(|e| WasmError::Instantiation(format!("{e:#}")))?;
        tracing::debug!(entry, "instantiated module");

        let func = instance
            .get_func(&mut store, entry)
            .ok_or_else(|| WasmError::Execution(format!("export '{entry}' not found")))?;
        let ty = func.ty(&store);

        if ty.params().len() != args.len() {
            return Err(WasmError::Execution(format!(
                "'{entry}' takes {} argument(s), {} given",
                ty.params().len(),
                args.len()
            )));
        }
        let params = args
            .iter()
            .zip(ty.params())
            .enumerate()
            .map(|(i, (arg, param_ty))| {
                arg.coerce_to(&param_ty)
                    .map_err(|e| WasmError::Execution(format!("argument {i} of '{entry}': {e}")))
            })
            .collect::<Result<Vec<Val>, _>>()?;

        let mut results = vec![Val::I32(0); ty.results().len()];
        func.call(&mut store, &params, &mut results)
            .map_err(|e| WasmError::Execution(format!("{e:#}")))?;

        results
            .iter()
            .zip(ty.results())
            .map(|(val, result_ty)| {
                Value::from_val(val).ok_or_else(|| {
                    WasmError::Execution(format!(
                        "'{entry}' returned a non-numeric {} value",
                        val_type_name(&result_ty)
                    ))
                })
            })
            .collect()
    }
}
