//! Numeric values passed to and returned from entry points.
//!
//! Arguments are written loosely (`4`, `2.5`, `7:i64`) and coerced to the
//! entry point's declared parameter types. Coercion only succeeds when it
//! loses nothing; everything else is reported back to the caller.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use wasmtime::{Val, ValType};

/// Largest integer magnitude an f32 represents exactly.
const F32_EXACT_INT: u64 = 1 << 24;
/// Largest integer magnitude an f64 represents exactly.
const F64_EXACT_INT: u64 = 1 << 53;

/// A numeric WebAssembly value.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "lowercase")]
pub enum Value {
    I32(i32),
    I64(i64),
    F32(f32),
    F64(f64),
}

impl Value {
    /// Short type name as written in WAT (`i32`, `f64`, ...).
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::I32(_) => "i32",
            Value::I64(_) => "i64",
            Value::F32(_) => "f32",
            Value::F64(_) => "f64",
        }
    }

    /// Convert an engine value back into a `Value`.
    ///
    /// Returns `None` for vectors and references, which have no numeric form.
    pub fn from_val(val: &Val) -> Option<Self> {
        match val {
            Val::I32(v) => Some(Value::I32(*v)),
            Val::I64(v) => Some(Value::I64(*v)),
            Val::F32(bits) => Some(Value::F32(f32::from_bits(*bits))),
            Val::F64(bits) => Some(Value::F64(f64::from_bits(*bits))),
            _ => None,
        }
    }

    /// Coerce into an engine value of type `ty`.
    pub fn coerce_to(self, ty: &ValType) -> Result<Val, String> {
        let val = match (self, ty) {
            (Value::I32(v), ValType::I32) => Some(Val::I32(v)),
            (Value::I32(v), ValType::I64) => Some(Val::I64(i64::from(v))),
            (Value::I32(v), ValType::F32) if u64::from(v.unsigned_abs()) <= F32_EXACT_INT => {
                Some(Val::F32((v as f32).to_bits()))
            }
            (Value::I32(v), ValType::F64) => Some(Val::F64(f64::from(v).to_bits())),
            (Value::I64(v), ValType::I64) => Some(Val::I64(v)),
            (Value::I64(v), ValType::I32) => i32::try_from(v).ok().map(Val::I32),
            (Value::I64(v), ValType::F32) if v.unsigned_abs() <= F32_EXACT_INT => {
                Some(Val::F32((v as f32).to_bits()))
            }
            (Value::I64(v), ValType::F64) if v.unsigned_abs() <= F64_EXACT_INT => {
                Some(Val::F64((v as f64).to_bits()))
            }
            (Value::F32(v), ValType::F32) => Some(Val::F32(v.to_bits())),
            (Value::F32(v), ValType::F64) => Some(Val::F64(f64::from(v).to_bits())),
            (Value::F64(v), ValType::F64) => Some(Val::F64(v.to_bits())),
            (Value::F64(v), ValType::F32) if f64::from(v as f32) == v => {
                Some(Val::F32((v as f32).to_bits()))
            }
            _ => None,
        };
        val.ok_or_else(|| {
            format!(
                "cannot pass {self} ({}) as {}",
                self.type_name(),
                val_type_name(ty)
            )
        })
    }
}

pub(crate) fn val_type_name(ty: &ValType) -> String {
    match ty {
        ValType::I32 => "i32".into(),
        ValType::I64 => "i64".into(),
        ValType::F32 => "f32".into(),
        ValType::F64 => "f64".into(),
        ValType::V128 => "v128".into(),
        other => format!("{other:?}"),
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::I32(v) => write!(f, "{v}"),
            Value::I64(v) => write!(f, "{v}"),
            Value::F32(v) => write!(f, "{v}"),
            Value::F64(v) => write!(f, "{v}"),
        }
    }
}

/// Error from parsing an argument literal.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid argument '{literal}': {reason}")]
pub struct ParseValueError {
    pub literal: String,
    pub reason: String,
}

impl FromStr for Value {
    type Err = ParseValueError;

    /// `4` and `-3` parse as i32 (i64 when out of range), `2.5` as f64,
    /// and `7:i64` / `1.5:f32` pick the type explicitly.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let fail = |reason: String| ParseValueError {
            literal: s.to_string(),
            reason,
        };
        let s = s.trim();

        if let Some((num, ty)) = s.rsplit_once(':') {
            let parsed = match ty {
                "i32" => num.parse().map(Value::I32).map_err(|e| e.to_string()),
                "i64" => num.parse().map(Value::I64).map_err(|e| e.to_string()),
                "f32" => num.parse().map(Value::F32).map_err(|e| e.to_string()),
                "f64" => num.parse().map(Value::F64).map_err(|e| e.to_string()),
                other => Err(format!("unknown type suffix '{other}'")),
            };
            return parsed.map_err(fail);
        }

        if let Ok(v) = s.parse::<i32>() {
            return Ok(Value::I32(v));
        }
        if let Ok(v) = s.parse::<i64>() {
            return Ok(Value::I64(v));
        }
        s.parse::<f64>()
            .map(Value::F64)
            .map_err(|_| fail("not a number".into()))
    }
}
