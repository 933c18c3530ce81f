//! The runtime-facing value domain and its wire encoding.
//!
//! The object serializer/deserializer proper is an external collaborator
//! (§1): what lives here is the thin, explicitly extended value domain that
//! carries remote references across the wire, plus the two custom encoders
//! the spec calls for -- one for ordinary handles, one for the global
//! object's "already local" shortcut (§4.4, §4.7).

use crate::error::ThunkError;
use crate::global_object;
use crate::handle::Handle;
use crate::id::{ProcessId, Rid};
use crate::runtime::Runtime;
use serde::{Deserialize, Serialize};

/// Value as seen by thunks and by callers of `sync`/`fetch`: handles are
/// live, refcounted objects.
#[derive(Debug, Clone)]
pub enum Value {
    Unit,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    Bytes(Vec<u8>),
    List(Vec<Value>),
    Handle(Handle),
    Error(ThunkError),
}

/// Value as it travels the wire: handles are reduced to their bare
/// identifier, since `Handle` itself (an `Rc`) cannot be serialized, and
/// because crossing it needs the side effects in §4.4, not just bytes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum WireValue {
    Unit,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    Bytes(Vec<u8>),
    List(Vec<WireValue>),
    Handle(Rid),
    Error(ThunkError),
}

impl Value {
    /// Encodes this value for sending to `target`, triggering the `§4.4`
    /// `add_client` bookkeeping for every handle it contains along the way.
    pub fn to_wire(&self, rt: &Runtime, target: ProcessId) -> WireValue {
        match self {
            Value::Unit => WireValue::Unit,
            Value::Bool(b) => WireValue::Bool(*b),
            Value::Int(i) => WireValue::Int(*i),
            Value::Float(f) => WireValue::Float(*f),
            Value::Str(s) => WireValue::Str(s.clone()),
            Value::Bytes(b) => WireValue::Bytes(b.clone()),
            Value::List(items) => {
                WireValue::List(items.iter().map(|v| v.to_wire(rt, target)).collect())
            }
            Value::Handle(handle) => {
                let rid = global_object::translate_for_target(rt, handle.rid(), target);
                rt.note_outbound_handle(rid, target);
                WireValue::Handle(rid)
            }
            Value::Error(e) => WireValue::Error(e.clone()),
        }
    }
}

impl WireValue {
    /// Decodes a value, rehydrating any handle it contains per §4.4:
    /// shortcuts to the computed value or the local global-object instance
    /// when possible, otherwise builds (or reuses, via the uniquing table) a
    /// strong handle.
    pub fn into_value(self, rt: &Runtime) -> Value {
        match self {
            WireValue::Unit => Value::Unit,
            WireValue::Bool(b) => Value::Bool(b),
            WireValue::Int(i) => Value::Int(i),
            WireValue::Float(f) => Value::Float(f),
            WireValue::Str(s) => Value::Str(s),
            WireValue::Bytes(b) => Value::Bytes(b),
            WireValue::List(items) => {
                Value::List(items.into_iter().map(|v| v.into_value(rt)).collect())
            }
            WireValue::Handle(rid) => rt.rehydrate_handle(rid),
            WireValue::Error(e) => Value::Error(e),
        }
    }
}
