//! `skein`: a peer-to-peer cluster runtime for distributed thunks and
//! remote references. See SPEC_FULL.md for the design and DESIGN.md for how
//! each piece is grounded.

pub(crate) type HashMap<K, V> = hashbrown::HashMap<K, V, ahash::RandomState>;
#[allow(dead_code)]
pub(crate) type HashSet<K> = hashbrown::HashSet<K, ahash::RandomState>;

pub mod bootstrap;
pub mod config;
pub mod connection;
pub mod error;
pub mod global_object;
pub mod handle;
pub mod id;
pub mod registry;
pub mod runtime;
pub mod value;
pub mod waiting;
pub mod wire;

pub use bootstrap::bootstrap;
pub use config::{Config, Location, Locations};
pub use error::{RunResult, ThunkError};
pub use global_object::create as create_global_object;
pub use handle::Handle;
pub use id::{ProcessId, Rid, CLIENT_ID};
pub use runtime::{Runtime, ThunkFn};
pub use value::Value;
