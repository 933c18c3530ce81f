//! The requester-side waiting table: local tasks suspended awaiting the
//! result of an identifier owned elsewhere (§3, §4.5, §6 "Result delivery").

use crate::id::{ProcessId, Rid};
use crate::registry::Verb;
use crate::value::Value;
use crate::HashMap;
use std::collections::VecDeque;
use tokio::sync::oneshot;

type Waiters = VecDeque<(Verb, oneshot::Sender<Value>)>;

/// Map from remote-reference identifier to the local tasks suspended
/// awaiting its result. Entries are prepended (§5, "Notify-list ordering");
/// tests must not depend on delivery order among same-verb waiters.
#[derive(Default)]
pub struct WaitingTable {
    waiters: HashMap<(ProcessId, u64), Waiters>,
}

impl WaitingTable {
    pub fn new() -> Self {
        Self {
            waiters: HashMap::default(),
        }
    }

    pub fn register(&mut self, rid: Rid, verb: Verb, tx: oneshot::Sender<Value>) {
        self.waiters
            .entry(rid.key())
            .or_default()
            .push_front((verb, tx));
    }

    /// Delivers `value` to the first waiter on `rid` whose verb matches,
    /// removing it. A mismatched or absent entry is dropped silently: the
    /// owner may have notified a waiter that has already given up (no
    /// in-core cancellation, but a dropped `oneshot::Receiver` just makes
    /// the send a no-op).
    pub fn deliver(&mut self, rid: Rid, verb: Verb, value: Value) {
        if let Some(queue) = self.waiters.get_mut(&rid.key()) {
            if let Some(pos) = queue.iter().position(|(v, _)| *v == verb) {
                let (_, tx) = queue.remove(pos).expect("position just found");
                let _ = tx.send(value);
            }
            if queue.is_empty() {
                self.waiters.remove(&rid.key());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::id::Rid;

    #[test]
    fn delivers_to_matching_verb_only() {
        let mut table = WaitingTable::new();
        let rid = Rid::new(2, 1, 0);
        let (fetch_tx, mut fetch_rx) = oneshot::channel();
        let (sync_tx, mut sync_rx) = oneshot::channel();
        table.register(rid, Verb::Fetch, fetch_tx);
        table.register(rid, Verb::Sync, sync_tx);

        table.deliver(rid, Verb::Fetch, Value::Int(42));

        match fetch_rx.try_recv() {
            Ok(Value::Int(42)) => {}
            other => panic!("expected Int(42), got {other:?}"),
        }
        assert!(sync_rx.try_recv().is_err(), "sync waiter untouched");
    }

    #[test]
    fn delivering_to_an_unknown_identifier_is_a_no_op() {
        let mut table = WaitingTable::new();
        table.deliver(Rid::new(2, 1, 0), Verb::Fetch, Value::Unit);
    }

    #[test]
    fn delivering_twice_to_the_same_verb_only_resolves_one_waiter() {
        let mut table = WaitingTable::new();
        let rid = Rid::new(2, 1, 0);
        let (tx1, mut rx1) = oneshot::channel();
        let (tx2, mut rx2) = oneshot::channel();
        table.register(rid, Verb::Fetch, tx1);
        table.register(rid, Verb::Fetch, tx2);

        table.deliver(rid, Verb::Fetch, Value::Int(1));
        table.deliver(rid, Verb::Fetch, Value::Int(2));

        let first = rx1.try_recv().ok();
        let second = rx2.try_recv().ok();
        let delivered: Vec<_> = [first, second].into_iter().flatten().collect();
        assert_eq!(delivered.len(), 2, "both queued waiters get resolved");
    }
}
