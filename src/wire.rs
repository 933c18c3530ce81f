//! The wire message format (§6): each message is a single serialized tuple
//! `(verb, payload)`, here a tagged enum since that is what `serde`/bincode
//! give us for free.

use crate::config::Locations;
use crate::id::{ProcessId, Rid};
use crate::registry::Verb;
use crate::value::WireValue;
use serde::{Deserialize, Serialize};

/// Control operations carried via `:do` (§6). These are bookkeeping, not
/// user thunks, so they get their own variants rather than going through
/// the function table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum DoOp {
    DelClient { rid: Rid, peer: ProcessId },
    AddClient { rid: Rid, peer: ProcessId },
    IdentifySocket { peer: ProcessId },
    EmptyGlobalObject,
    InitGlobalObject { rids: Vec<Rid> },
}

/// The `:do` payload: either one of the control operations above, or a
/// fire-and-forget invocation of a registered function with no registry
/// entry (§4.6, `remote_do`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum DoMessage {
    Control(DoOp),
    Invoke { function: String, args: Vec<WireValue> },
}

/// One message on the wire, after framing (§6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Message {
    /// First message on a freshly accepted connection: `(my_id, locations)`
    /// (§6, "Process bootstrap payload").
    Hello {
        process_id: ProcessId,
        locations: Locations,
    },
    Call {
        oid: Rid,
        function: String,
        args: Vec<WireValue>,
    },
    Do(DoMessage),
    Sync { oid: Rid },
    Fetch { oid: Rid },
    Result {
        verb: Verb,
        oid: Rid,
        value: WireValue,
    },
}
