//! Process-wide tunables and the cluster location table (§3, "Location").

use crate::id::ProcessId;
use crate::HashMap;
use serde::{Deserialize, Serialize};
use std::net::IpAddr;

/// `(host, port)` of a peer, as broadcast by the initiator at join time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Location {
    pub host: IpAddr,
    pub port: u16,
}

impl Location {
    pub fn new(host: IpAddr, port: u16) -> Self {
        Self { host, port }
    }
}

/// The cluster's location table: every process id mapped to where it can be
/// reached, broadcast by the initiator to each worker at join time.
pub type Locations = HashMap<ProcessId, Location>;

/// Tunables for peer connections. Analogous to fantoch's `Config`, but
/// scoped to what this runtime's transport needs rather than to a consensus
/// protocol's quorum sizes.
#[derive(Debug, Clone, Copy)]
pub struct Config {
    n: usize,
    tcp_nodelay: bool,
}

impl Config {
    pub fn new(n: usize) -> Self {
        Self {
            n,
            tcp_nodelay: true,
        }
    }

    pub fn n(&self) -> usize {
        self.n
    }

    pub fn tcp_nodelay(&self) -> bool {
        self.tcp_nodelay
    }

    pub fn set_tcp_nodelay(&mut self, nodelay: bool) -> &mut Self {
        self.tcp_nodelay = nodelay;
        self
    }
}
