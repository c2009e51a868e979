//! Mapping handler return values to host outcomes

pub use ovpn_hook_api::Outcome;
use wasmtime::Val;

/// What a handler returned, before interpretation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReturnValue {
    /// An integer result
    Int(i64),
    /// A result that is not an integer (the Wasm value kind)
    NotInteger(&'static str),
    /// The handler returned nothing
    Nothing,
}

impl ReturnValue {
    /// Interpret the results of a Wasm call
    pub fn from_results(results: &[Val]) -> Self {
        match results {
            [] => Self::Nothing,
            [value] => match value {
                Val::I32(n) => Self::Int(i64::from(*n)),
                Val::I64(n) => Self::Int(*n),
                Val::F32(_) => Self::NotInteger("f32"),
                Val::F64(_) => Self::NotInteger("f64"),
                Val::V128(_) => Self::NotInteger("v128"),
                _ => Self::NotInteger("reference"),
            },
            _ => Self::NotInteger("multi-value"),
        }
    }
}

/// Map a handler's return value to an outcome
///
/// Total: anything other than 0 or 2 is an error, never success.
pub fn map(value: ReturnValue) -> Outcome {
    match value {
        ReturnValue::Int(0) => Outcome::Success,
        ReturnValue::Int(2) => Outcome::Deferred,
        _ => Outcome::Error,
    }
}
