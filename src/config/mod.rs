//! Harness configuration: fetch limits, engine settings and named scenarios.
//!
//! Explicit file: `--config <PATH>` or `$WASM_HARNESS_CONFIG`.
//! Project-level file: `.wasm-harness/config.yaml`.
//!
//! Resolution: explicit file (must parse) → project file (falls back to
//! defaults on error) → defaults.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::wasm::imports::ImportsSpec;
use crate::wasm::source::ModuleSource;
use crate::wasm::value::{ParseValueError, Value};

/// Environment variable naming an explicit config file.
pub const CONFIG_ENV: &str = "WASM_HARNESS_CONFIG";

/// Project-level config location, relative to the working directory.
pub const PROJECT_CONFIG: &str = ".wasm-harness/config.yaml";

const DEFAULT_MAX_FETCH_BYTES: u64 = 64 * 1024 * 1024;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("cannot read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("cannot parse {path}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_yaml::Error,
    },

    #[error("scenario '{scenario}': {source}")]
    Argument {
        scenario: String,
        source: ParseValueError,
    },
}

/// Top-level harness configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HarnessConfig {
    /// Largest module body accepted from the network.
    #[serde(default = "default_max_fetch_bytes")]
    pub max_fetch_bytes: u64,
    /// Honour system proxy settings when fetching.
    #[serde(default = "default_true")]
    pub use_proxy: bool,
    /// Native stack limit for guest code, in bytes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_wasm_stack: Option<usize>,
    /// User-defined scenarios; these shadow built-ins of the same name.
    #[serde(default)]
    pub scenarios: Vec<Scenario>,
}

fn default_max_fetch_bytes() -> u64 {
    DEFAULT_MAX_FETCH_BYTES
}

fn default_true() -> bool {
    true
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            max_fetch_bytes: DEFAULT_MAX_FETCH_BYTES,
            use_proxy: true,
            max_wasm_stack: None,
            scenarios: Vec::new(),
        }
    }
}

/// An argument as written in YAML: a bare number or a typed literal string.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ArgLiteral {
    Int(i64),
    Float(f64),
    Text(String),
}

impl ArgLiteral {
    pub fn to_value(&self) -> Result<Value, ParseValueError> {
        match self {
            ArgLiteral::Int(v) => Ok(i32::try_from(*v).map(Value::I32).unwrap_or(Value::I64(*v))),
            ArgLiteral::Float(v) => Ok(Value::F64(*v)),
            ArgLiteral::Text(s) => s.parse(),
        }
    }
}

/// A fixed, named invocation: which module, which export, which arguments.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Scenario {
    pub name: String,
    pub source: String,
    pub entry: String,
    #[serde(default)]
    pub args: Vec<ArgLiteral>,
    #[serde(default)]
    pub imports: ImportsSpec,
}

impl Scenario {
    pub fn module_source(&self) -> ModuleSource {
        ModuleSource::parse(&self.source)
    }

    pub fn values(&self) -> Result<Vec<Value>, ConfigError> {
        self.args
            .iter()
            .map(|a| {
                a.to_value().map_err(|source| ConfigError::Argument {
                    scenario: self.name.clone(),
                    source,
                })
            })
            .collect()
    }

    /// The invocations the harness ships with.
    pub fn builtin() -> Vec<Scenario> {
        vec![
            Scenario {
                name: "add".into(),
                source: "./merged.wasm".into(),
                entry: "add".into(),
                args: vec![ArgLiteral::Int(4)],
                imports: ImportsSpec::none(),
            },
            Scenario {
                name: "add_inc".into(),
                source: "./merged.wasm".into(),
                entry: "add_inc".into(),
                args: vec![ArgLiteral::Int(4), ArgLiteral::Int(2)],
                imports: ImportsSpec::none(),
            },
            Scenario {
                name: "main".into(),
                source: "./test.wasm".into(),
                entry: "main".into(),
                args: Vec::new(),
                imports: ImportsSpec::print_string(),
            },
        ]
    }
}

impl HarnessConfig {
    /// Load config: explicit path, then `$WASM_HARNESS_CONFIG`, then the
    /// project file, then defaults.
    pub fn load(explicit: Option<&Path>) -> Result<Self, ConfigError> {
        if let Some(path) = explicit {
            return Self::from_file(path);
        }
        if let Ok(path) = std::env::var(CONFIG_ENV) {
            return Self::from_file(Path::new(&path));
        }
        Ok(Self::load_project_config())
    }

    /// Read and parse one config file; errors are reported, not defaulted.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        serde_yaml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Load the project-level file, falling back to defaults.
    fn load_project_config() -> Self {
        match std::fs::read_to_string(PROJECT_CONFIG) {
            Ok(content) => serde_yaml::from_str(&content).unwrap_or_else(|e| {
                tracing::warn!("ignoring {PROJECT_CONFIG}: {e}");
                Self::default()
            }),
            Err(_) => Self::default(),
        }
    }

    /// All scenarios: user-defined first, then built-ins not shadowed by them.
    pub fn scenarios(&self) -> Vec<Scenario> {
        let mut all = self.scenarios.clone();
        for builtin in Scenario::builtin() {
            if !all.iter().any(|s| s.name == builtin.name) {
                all.push(builtin);
            }
        }
        all
    }

    /// Look up a scenario by name.
    pub fn scenario(&self, name: &str) -> Option<Scenario> {
        self.scenarios().into_iter().find(|s| s.name == name)
    }
}
