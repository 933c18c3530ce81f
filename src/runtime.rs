//! The per-process runtime: owns the registry, the waiting table, the
//! handle table, and every peer connection, and dispatches every wire
//! message (§3 "Process", §4.1-§4.6).
//!
//! There is deliberately no manual coroutine scheduler here (contrast the
//! spec's hand-rolled Task Runner, §9). Each work item is a native task on
//! a single-threaded [`tokio::task::LocalSet`]; awaiting a remote reference
//! just awaits a `oneshot::Receiver`, and the executor parks/wakes it like
//! any other future. `Runtime` itself is an `Rc`-clone handle, so it is
//! `!Send` by construction -- the same property the spec's "marshal
//! finalization onto the loop thread" requirement (§5) asks for, here for
//! free rather than by convention.

use crate::config::{Config, Locations};
use crate::connection::{FrameReader, FrameWriter, PeerConn};
use crate::error::ThunkError;
use crate::global_object;
use crate::handle::{Handle, HandleTable};
use crate::id::{IdGen, ProcessId, Rid};
use crate::registry::{NotifyTarget, Registry, Verb, WorkItem};
use crate::value::{Value, WireValue};
use crate::waiting::WaitingTable;
use crate::wire::{DoMessage, DoOp, Message};
use crate::HashMap;
use futures::future::FutureExt;
use std::cell::{Ref, RefCell, RefMut};
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::pin::Pin;
use std::rc::Rc;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::{mpsc, oneshot};

/// A registered function body: takes the runtime (so it can itself issue
/// remote calls and await them) and the decoded arguments, and returns the
/// computed value or the failure that should replace it (§4.2). Boxed and
/// `!Send` on purpose -- thunks run on the same single-threaded `LocalSet`
/// as everything else.
pub type ThunkFn =
    fn(Runtime, Vec<Value>) -> Pin<Box<dyn Future<Output = Result<Value, ThunkError>>>>;

struct Inner {
    me: ProcessId,
    config: Config,
    id_gen: RefCell<IdGen>,
    registry: RefCell<Registry>,
    waiting: RefCell<WaitingTable>,
    handles: RefCell<HandleTable>,
    peers: RefCell<HashMap<ProcessId, PeerConn>>,
    locations: RefCell<Locations>,
    functions: RefCell<HashMap<String, ThunkFn>>,
    global: RefCell<Option<global_object::GlobalState>>,
}

/// The handle every other module in this crate holds onto: one per process,
/// cheaply `Clone`d (it is a single `Rc`) so that every spawned task and
/// every live [`Handle`] can reach the shared state without a thread-safe
/// wrapper.
#[derive(Clone)]
pub struct Runtime(Rc<Inner>);

impl Runtime {
    pub fn new(me: ProcessId, config: Config) -> Self {
        Self(Rc::new(Inner {
            me,
            config,
            id_gen: RefCell::new(IdGen::new()),
            registry: RefCell::new(Registry::new()),
            waiting: RefCell::new(WaitingTable::new()),
            handles: RefCell::new(HandleTable::new()),
            peers: RefCell::new(HashMap::default()),
            locations: RefCell::new(HashMap::default()),
            functions: RefCell::new(HashMap::default()),
            global: RefCell::new(None),
        }))
    }

    pub fn me(&self) -> ProcessId {
        self.0.me
    }

    pub fn config(&self) -> &Config {
        &self.0.config
    }

    /// Registers a function under `name` so that peers' `Call` messages can
    /// address it (§1's external object dispatch, narrowed to a concrete
    /// table since a generic closure serializer is out of scope here).
    pub fn register(&self, name: impl Into<String>, f: ThunkFn) {
        self.0.functions.borrow_mut().insert(name.into(), f);
    }

    pub fn set_locations(&self, locations: Locations) {
        *self.0.locations.borrow_mut() = locations;
    }

    pub fn locations(&self) -> Locations {
        self.0.locations.borrow().clone()
    }

    pub fn add_peer(&self, id: ProcessId, conn: PeerConn) {
        self.0.peers.borrow_mut().insert(id, conn);
    }

    /// Whether `rid` still has a registry entry on this process (invariant
    /// 1 and 7 of §8): true while at least one client holds a handle to it.
    pub fn has_pending(&self, rid: Rid) -> bool {
        self.registry().contains(rid)
    }

    /// Number of peers currently reachable through this process's
    /// global-object peer table, for diagnostics and tests (§4.7).
    pub fn global_object_peer_count(&self) -> usize {
        self.with_global_state(|g| g.peer_table.len()).unwrap_or(0)
    }

    /// A handle to this process's own global-object instance, if it has
    /// constructed one, for diagnostics and tests (§4.7).
    pub fn global_object_handle(&self) -> Option<Handle> {
        let rid = self.registry().find_global_object()?;
        Some(self.unique_handle(rid))
    }

    /// The client set of this process's own global-object instance, for
    /// diagnostics and tests (§4.7): should never gain a peer purely from
    /// the wire shortcut in [`global_object::translate_for_target`].
    pub fn global_object_clients(&self) -> Option<std::collections::HashSet<ProcessId>> {
        let rid = self.registry().find_global_object()?;
        self.registry().get(rid).map(|item| item.clients.clone())
    }

    pub(crate) fn registry(&self) -> Ref<'_, Registry> {
        self.0.registry.borrow()
    }

    pub(crate) fn registry_mut(&self) -> RefMut<'_, Registry> {
        self.0.registry.borrow_mut()
    }

    fn waiting_mut(&self) -> RefMut<'_, WaitingTable> {
        self.0.waiting.borrow_mut()
    }

    pub(crate) fn unique_handle(&self, rid: Rid) -> Handle {
        self.0.handles.borrow_mut().unique(rid, self)
    }

    pub(crate) fn install_global_state(&self, state: global_object::GlobalState) {
        *self.0.global.borrow_mut() = Some(state);
    }

    pub(crate) fn with_global_state<R>(
        &self,
        f: impl FnOnce(&global_object::GlobalState) -> R,
    ) -> Option<R> {
        self.0.global.borrow().as_ref().map(f)
    }

    fn fresh_rid(&self, owner: ProcessId) -> Rid {
        self.0.id_gen.borrow_mut().fresh(owner, self.me())
    }

    fn send_to(&self, target: ProcessId, msg: Message) {
        let peers = self.0.peers.borrow();
        match peers.get(&target) {
            Some(conn) => conn.send(msg),
            None => tracing::warn!(target, "no connection to peer; dropping message"),
        }
    }

    /// Hands off an accepted or dialed connection, once its process id is
    /// known, to a long-lived reader/writer pair (§4.1). The reader drives
    /// `dispatch` for every frame it decodes; the writer drains an unbounded
    /// per-peer queue so a slow peer never blocks the sender.
    pub fn spawn_peer(&self, peer: ProcessId, read_half: OwnedReadHalf, write_half: OwnedWriteHalf) {
        let (tx, mut rx) = mpsc::unbounded_channel::<Message>();
        self.add_peer(peer, PeerConn { outbound: tx });

        tokio::task::spawn_local(async move {
            let mut writer = FrameWriter::new(write_half);
            while let Some(msg) = rx.recv().await {
                if writer.send(&msg).await.is_err() {
                    break;
                }
            }
        });

        let rt = self.clone();
        tokio::task::spawn_local(async move {
            let mut reader = FrameReader::new(read_half);
            while let Some(msg) = reader.recv::<Message>().await {
                rt.dispatch(peer, msg);
            }
            tracing::debug!(peer, "connection to peer closed");
        });
    }

    /// Decodes and acts on one incoming message (§6's dispatch table).
    pub(crate) fn dispatch(&self, from: ProcessId, msg: Message) {
        match msg {
            Message::Hello { .. } => {
                tracing::warn!(from, "unexpected Hello after bootstrap; ignoring");
            }
            Message::Call {
                oid,
                function,
                args,
            } => {
                let args: Vec<Value> = args.into_iter().map(|a| a.into_value(self)).collect();
                self.spawn_work_item(oid, function, args);
            }
            Message::Do(op) => self.handle_do(op),
            Message::Sync { oid } => self.handle_sync_or_fetch(from, Verb::Sync, oid),
            Message::Fetch { oid } => self.handle_sync_or_fetch(from, Verb::Fetch, oid),
            Message::Result { verb, oid, value } => {
                let value = value.into_value(self);
                self.waiting_mut().deliver(oid, verb, value);
            }
        }
    }

    pub(crate) fn handle_do(&self, msg: DoMessage) {
        match msg {
            DoMessage::Control(DoOp::DelClient { rid, peer }) => self.apply_del_client(rid, peer),
            DoMessage::Control(DoOp::AddClient { rid, peer }) => {
                self.registry_mut().add_client(rid, peer);
            }
            DoMessage::Control(DoOp::IdentifySocket { peer }) => {
                tracing::trace!(peer, "identify_socket");
            }
            DoMessage::Control(DoOp::EmptyGlobalObject) => {
                tracing::warn!(
                    "received :do empty_global_object; this runtime constructs it via CALL instead"
                );
            }
            DoMessage::Control(DoOp::InitGlobalObject { rids }) => {
                global_object::handle_init(self, rids);
            }
            DoMessage::Invoke { function, args } => {
                let args: Vec<Value> = args.into_iter().map(|a| a.into_value(self)).collect();
                let rt = self.clone();
                tokio::task::spawn_local(async move {
                    let _ = rt.run_thunk(&function, args).await;
                });
            }
        }
    }

    /// Replies to (or queues) a `sync`/`fetch` request for a locally owned
    /// identifier (§4.5, §6's dispatch table rows for those two verbs).
    fn handle_sync_or_fetch(&self, from: ProcessId, verb: Verb, oid: Rid) {
        let snapshot = {
            let registry = self.registry();
            registry.get(oid).map(|item| (item.done, item.result.clone()))
        };
        match snapshot {
            Some((true, result)) => {
                let value = match verb {
                    Verb::Sync => Value::Handle(self.unique_handle(oid)),
                    Verb::Fetch => result.unwrap_or(Value::Unit),
                };
                let wire = value.to_wire(self, from);
                self.send_to(
                    from,
                    Message::Result {
                        verb,
                        oid,
                        value: wire,
                    },
                );
            }
            Some((false, _)) => {
                if let Some(item) = self.registry_mut().get_mut(oid) {
                    item.notify.push((verb, NotifyTarget::Remote(from)));
                }
            }
            None => {
                tracing::warn!(from, %oid, "sync/fetch for an identifier this process does not own");
            }
        }
    }

    /// Issues a remote call (§4.6): mints a fresh identifier, either spawns
    /// the work locally or ships a `Call` to its owner, and returns a handle
    /// to the (possibly still pending) result.
    pub fn remote_call(&self, target: ProcessId, function: impl Into<String>, args: Vec<Value>) -> Handle {
        let function = function.into();
        let rid = self.fresh_rid(target);
        if target == self.me() {
            self.spawn_work_item(rid, function, args);
        } else {
            let wire_args: Vec<WireValue> = args.iter().map(|v| v.to_wire(self, target)).collect();
            self.send_to(
                target,
                Message::Call {
                    oid: rid,
                    function,
                    args: wire_args,
                },
            );
        }
        self.unique_handle(rid)
    }

    /// Issues a fire-and-forget control or invocation operation (§4.6): no
    /// registry entry, no handle back.
    pub fn remote_do(&self, target: ProcessId, op: DoOp) {
        if target == self.me() {
            self.handle_do(DoMessage::Control(op));
        } else {
            self.send_to(target, Message::Do(DoMessage::Control(op)));
        }
    }

    pub(crate) fn spawn_work_item(&self, rid: Rid, function: String, args: Vec<Value>) {
        if function == global_object::EMPTY_GLOBAL_OBJECT_FN {
            global_object::construct_local(self, rid);
            return;
        }
        self.registry_mut().insert(WorkItem::new(rid, rid.whence));
        let rt = self.clone();
        tokio::task::spawn_local(async move {
            let result = rt.run_thunk(&function, args).await;
            rt.complete(rid, result);
        });
    }

    async fn run_thunk(&self, function: &str, args: Vec<Value>) -> Value {
        let thunk_fn = self.0.functions.borrow().get(function).copied();
        let thunk_fn = match thunk_fn {
            Some(f) => f,
            None => {
                return Value::Error(ThunkError::new(format!(
                    "no such function registered: {}",
                    function
                )))
            }
        };
        let fut = thunk_fn(self.clone(), args);
        match AssertUnwindSafe(fut).catch_unwind().await {
            Ok(Ok(value)) => value,
            Ok(Err(e)) => {
                tracing::warn!(error = %e, "thunk returned an error");
                Value::Error(e)
            }
            Err(payload) => {
                let message = panic_message(&payload);
                tracing::warn!(message = %message, "thunk panicked");
                Value::Error(ThunkError::new(message))
            }
        }
    }

    /// Marks a work item done and drains its notify list (§4.5).
    fn complete(&self, rid: Rid, result: Value) {
        let notify = {
            let mut registry = self.registry_mut();
            match registry.get_mut(rid) {
                Some(item) => {
                    item.done = true;
                    item.result = Some(result.clone());
                    std::mem::take(&mut item.notify)
                }
                None => Vec::new(),
            }
        };
        for (verb, target) in notify {
            self.notify_one(rid, verb, target, &result);
        }
    }

    fn notify_one(&self, rid: Rid, verb: Verb, target: NotifyTarget, result: &Value) {
        let value = match verb {
            Verb::Sync => Value::Handle(self.unique_handle(rid)),
            Verb::Fetch => result.clone(),
        };
        match target {
            NotifyTarget::Local(tx) => {
                let _ = tx.send(value);
            }
            NotifyTarget::Remote(peer) => {
                let wire = value.to_wire(self, peer);
                self.send_to(
                    peer,
                    Message::Result {
                        verb,
                        oid: rid,
                        value: wire,
                    },
                );
            }
        }
    }

    /// Waits for `rid` to finish and returns a handle to it (§4.5's
    /// `sync`). Collapses the "owner is us" / "owner is a peer" split of
    /// §4.5 into one path since our process mesh is fully symmetric -- there
    /// is no distinguished client connection the way the original keeps one.
    pub async fn sync(&self, rid: Rid) -> Handle {
        if let Some(Value::Handle(h)) = self.consult_or_wait(rid, Verb::Sync).await {
            return h;
        }
        self.unique_handle(rid)
    }

    /// Waits for `rid` to finish and returns its computed value (§4.5's
    /// `fetch`).
    pub async fn fetch(&self, rid: Rid) -> Value {
        self.consult_or_wait(rid, Verb::Fetch)
            .await
            .unwrap_or(Value::Unit)
    }

    async fn consult_or_wait(&self, rid: Rid, verb: Verb) -> Option<Value> {
        if rid.owner == self.me() {
            let snapshot = {
                let registry = self.registry();
                registry.get(rid).map(|item| (item.done, item.result.clone()))
            };
            match snapshot {
                Some((true, result)) => Some(match verb {
                    Verb::Sync => Value::Handle(self.unique_handle(rid)),
                    Verb::Fetch => result.unwrap_or(Value::Unit),
                }),
                Some((false, _)) => {
                    let (tx, rx) = oneshot::channel();
                    if let Some(item) = self.registry_mut().get_mut(rid) {
                        item.notify.push((verb, NotifyTarget::Local(tx)));
                    }
                    rx.await.ok()
                }
                None => None,
            }
        } else {
            let (tx, rx) = oneshot::channel();
            self.waiting_mut().register(rid, verb, tx);
            match verb {
                Verb::Sync => self.send_to(rid.owner, Message::Sync { oid: rid }),
                Verb::Fetch => self.send_to(rid.owner, Message::Fetch { oid: rid }),
            }
            rx.await.ok()
        }
    }

    /// Encodes `rid` for `target`, triggering `add_client` bookkeeping
    /// (§4.4). Exception (a) in that section: no bookkeeping is needed when
    /// the destination already is the owner.
    pub(crate) fn note_outbound_handle(&self, rid: Rid, target: ProcessId) {
        if rid.owner == target {
            return;
        }
        if rid.owner == self.me() {
            self.registry_mut().add_client(rid, target);
        } else {
            self.send_to(
                rid.owner,
                Message::Do(DoMessage::Control(DoOp::AddClient { rid, peer: target })),
            );
        }
    }

    /// Decodes a handle received from `from` (§4.4): shortcuts to the
    /// computed value (or the local global-object instance) when the
    /// identifier is already ours and done, otherwise returns a strong
    /// handle from the uniquing table.
    pub(crate) fn rehydrate_handle(&self, rid: Rid) -> Value {
        if rid.owner == self.me() {
            self.registry_mut().add_client(rid, self.me());
            let snapshot = self
                .registry()
                .get(rid)
                .map(|item| (item.done, item.is_global_object, item.result.clone()));
            if let Some((true, is_global, result)) = snapshot {
                if is_global {
                    return Value::Handle(self.unique_handle(rid));
                }
                if let Some(value) = result {
                    return value;
                }
            }
        }
        Value::Handle(self.unique_handle(rid))
    }

    /// Tells `rid`'s owner that `who` dropped its client (§4.4's
    /// `del_client`): applies locally if we are the owner, otherwise ships
    /// the control operation over the wire.
    pub(crate) fn del_client(&self, rid: Rid, who: ProcessId) {
        if rid.owner == self.me() {
            self.apply_del_client(rid, who);
        } else {
            self.send_to(
                rid.owner,
                Message::Do(DoMessage::Control(DoOp::DelClient { rid, peer: who })),
            );
        }
    }

    pub(crate) fn on_handle_drop(&self, rid: Rid) {
        self.del_client(rid, self.me());
    }

    pub(crate) fn apply_del_client(&self, rid: Rid, who: ProcessId) {
        let became_empty = self.registry_mut().del_client(rid, who);
        if became_empty != Some(true) {
            return;
        }
        let is_global = self
            .registry()
            .get(rid)
            .map(|item| item.is_global_object)
            .unwrap_or(false);
        if is_global {
            global_object::finalize(self, rid);
        } else {
            self.registry_mut().remove(rid);
        }
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "thunk panicked".to_string()
    }
}
