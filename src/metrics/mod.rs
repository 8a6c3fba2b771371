//! Measurement recording and the derivations applied to remote-API data.

mod calculator;
mod export;
pub mod instruments;
mod processor;
mod registry;
mod sink;

#[cfg(test)]
pub(crate) mod testing;

pub use calculator::*;
pub use export::*;
pub use instruments::*;
pub use processor::*;
pub use registry::*;
pub use sink::*;

use serde_json::Value;

/// Short JSON type name for log lines.
pub(crate) fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
