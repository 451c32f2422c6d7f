//! Reusable test doubles for the outbound ports.
//!
//! Kept in the crate proper (not behind `cfg(test)`) so integration tests
//! and downstream crates can drive the insert sender against scripted peers.

use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use shared_types::{Hash, Location, Uid};

use crate::domain::{
    DsaPublicKey, InsertConfig, PeerId, SskBlock, SskKey, SSK_DATA_LENGTH, SSK_HEADERS_LENGTH,
};
use crate::events::{InsertMessage, MessageKind, SendError, WaitError};
use crate::ports::outbound::{
    ByteCounter, HtlPolicy, InsertRegistry, PeerLink, PeerSelector, StatsSink,
};

/// One scripted event on a peer's reply queue.
#[derive(Clone, Debug)]
pub enum ScriptEvent {
    /// Deliver this message to the next matching wait.
    Reply(InsertMessage),
    /// Drop the connection: the current wait fails and later sends are
    /// rejected.
    Disconnect,
}

/// A `PeerLink` whose behavior is a scripted queue of events.
///
/// Sends are recorded; waits consume the script in order. An exhausted
/// script answers every wait with a timeout, which is how tests exercise the
/// silent-peer paths without real clock time.
pub struct ScriptedPeer {
    id: PeerId,
    connected: AtomicBool,
    script: Mutex<VecDeque<ScriptEvent>>,
    sent: Mutex<Vec<InsertMessage>>,
    overload_labels: Mutex<Vec<&'static str>>,
    success_not_overload_calls: AtomicUsize,
    on_success_calls: Mutex<Vec<(bool, bool)>>,
}

impl ScriptedPeer {
    pub fn new(id_byte: u8) -> Arc<Self> {
        Self::scripted(id_byte, vec![])
    }

    pub fn scripted(id_byte: u8, replies: Vec<InsertMessage>) -> Arc<Self> {
        Arc::new(Self {
            id: PeerId::new([id_byte; 32]),
            connected: AtomicBool::new(true),
            script: Mutex::new(replies.into_iter().map(ScriptEvent::Reply).collect()),
            sent: Mutex::new(Vec::new()),
            overload_labels: Mutex::new(Vec::new()),
            success_not_overload_calls: AtomicUsize::new(0),
            on_success_calls: Mutex::new(Vec::new()),
        })
    }

    pub fn with_events(id_byte: u8, events: Vec<ScriptEvent>) -> Arc<Self> {
        Arc::new(Self {
            id: PeerId::new([id_byte; 32]),
            connected: AtomicBool::new(true),
            script: Mutex::new(events.into()),
            sent: Mutex::new(Vec::new()),
            overload_labels: Mutex::new(Vec::new()),
            success_not_overload_calls: AtomicUsize::new(0),
            on_success_calls: Mutex::new(Vec::new()),
        })
    }

    pub fn disconnect(&self) {
        self.connected.store(false, Ordering::SeqCst);
    }

    pub fn sent_messages(&self) -> Vec<InsertMessage> {
        self.sent.lock().clone()
    }

    pub fn sent_kinds(&self) -> Vec<MessageKind> {
        self.sent.lock().iter().map(InsertMessage::kind).collect()
    }

    pub fn overload_labels(&self) -> Vec<&'static str> {
        self.overload_labels.lock().clone()
    }

    pub fn success_not_overload_count(&self) -> usize {
        self.success_not_overload_calls.load(Ordering::SeqCst)
    }

    pub fn on_success_calls(&self) -> Vec<(bool, bool)> {
        self.on_success_calls.lock().clone()
    }
}

#[async_trait]
impl PeerLink for ScriptedPeer {
    fn id(&self) -> PeerId {
        self.id
    }

    async fn send(&self, msg: InsertMessage, counter: &dyn ByteCounter) -> Result<(), SendError> {
        if !self.connected.load(Ordering::SeqCst) {
            return Err(SendError::NotConnected);
        }
        counter.sent_bytes(msg.encoded_size());
        self.sent.lock().push(msg);
        Ok(())
    }

    async fn send_throttled(
        &self,
        msg: InsertMessage,
        size: usize,
        counter: &dyn ByteCounter,
        _timeout: Duration,
    ) -> Result<(), SendError> {
        if !self.connected.load(Ordering::SeqCst) {
            return Err(SendError::NotConnected);
        }
        counter.sent_bytes(msg.encoded_size());
        counter.sent_payload(size);
        self.sent.lock().push(msg);
        Ok(())
    }

    async fn wait_for(
        &self,
        uid: Uid,
        kinds: &[MessageKind],
        _timeout: Duration,
        counter: &dyn ByteCounter,
    ) -> Result<Option<InsertMessage>, WaitError> {
        loop {
            let event = self.script.lock().pop_front();
            match event {
                None => {
                    return if self.connected.load(Ordering::SeqCst) {
                        Ok(None)
                    } else {
                        Err(WaitError::Disconnected)
                    };
                }
                Some(ScriptEvent::Disconnect) => {
                    self.disconnect();
                    return Err(WaitError::Disconnected);
                }
                Some(ScriptEvent::Reply(msg)) => {
                    if msg.uid() == uid && kinds.contains(&msg.kind()) {
                        counter.received_bytes(msg.encoded_size());
                        return Ok(Some(msg));
                    }
                    // A message the filter does not match stays invisible to
                    // this wait; drop it and look at the next event.
                }
            }
        }
    }

    fn local_rejected_overload(&self, reason: &'static str) {
        self.overload_labels.lock().push(reason);
    }

    fn success_not_overload(&self) {
        self.success_not_overload_calls.fetch_add(1, Ordering::SeqCst);
    }

    fn on_success(&self, local: bool, insert: bool) {
        self.on_success_calls.lock().push((local, insert));
    }
}

/// Selector that hands out its peers in order, honoring the exclusion set.
pub struct FixedSelector {
    peers: Vec<Arc<ScriptedPeer>>,
}

impl FixedSelector {
    pub fn new(peers: Vec<Arc<ScriptedPeer>>) -> Self {
        Self { peers }
    }
}

impl PeerSelector for FixedSelector {
    fn closer_peer(
        &self,
        _source: Option<PeerId>,
        exclude: &HashSet<PeerId>,
        _target: Location,
        _htl: u8,
    ) -> Option<Arc<dyn PeerLink>> {
        self.peers
            .iter()
            .find(|p| !exclude.contains(&p.id()))
            .map(|p| Arc::clone(p) as Arc<dyn PeerLink>)
    }
}

/// Deterministic HTL policy: always decrement by one.
pub struct StepDecrement {
    max: u8,
}

impl StepDecrement {
    pub fn new(max: u8) -> Self {
        Self { max }
    }
}

impl HtlPolicy for StepDecrement {
    fn max_htl(&self) -> u8 {
        self.max
    }

    fn decrement(&self, _requestor: Option<PeerId>, htl: u8) -> u8 {
        htl.min(self.max).saturating_sub(1)
    }
}

/// HTL policy that never decrements below 1: every routed peer gets a shot.
pub struct HoldAtMinimum {
    max: u8,
}

impl HoldAtMinimum {
    pub fn new(max: u8) -> Self {
        Self { max }
    }
}

impl HtlPolicy for HoldAtMinimum {
    fn max_htl(&self) -> u8 {
        self.max
    }

    fn decrement(&self, _requestor: Option<PeerId>, htl: u8) -> u8 {
        match htl.min(self.max) {
            0 => 0,
            1 => 1,
            h => h - 1,
        }
    }
}

/// Registry that records register/deregister order with the HTL used.
#[derive(Default)]
pub struct RecordingRegistry {
    events: Mutex<Vec<(u8, bool)>>,
}

impl RecordingRegistry {
    /// `(origin_htl, is_register)` in call order.
    pub fn events(&self) -> Vec<(u8, bool)> {
        self.events.lock().clone()
    }
}

impl InsertRegistry for RecordingRegistry {
    fn register(&self, _routing_key: Hash, origin_htl: u8, _uid: Uid) {
        self.events.lock().push((origin_htl, true));
    }

    fn deregister(&self, _routing_key: Hash, origin_htl: u8, _uid: Uid) {
        self.events.lock().push((origin_htl, false));
    }
}

/// Stats sink that discards everything.
#[derive(Default)]
pub struct NullStats;

impl StatsSink for NullStats {
    fn insert_sent_bytes(&self, _ssk: bool, _len: i64) {}
    fn insert_received_bytes(&self, _ssk: bool, _len: i64) {}
    fn sent_payload(&self, _len: usize) {}
}

/// A verifiable block under a fresh key, filled with a marker byte.
pub fn test_block_with(data_byte: u8) -> SskBlock {
    let key = SskKey::with_pub_key(DsaPublicKey::from_bytes(vec![0x42; 128]), [0x17; 32]);
    SskBlock::new(
        vec![data_byte; SSK_DATA_LENGTH],
        vec![0x01; SSK_HEADERS_LENGTH],
        key,
        true,
    )
    .expect("test block is structurally valid")
}

pub fn test_block() -> SskBlock {
    test_block_with(0x11)
}

/// Config with short timeouts; scripted peers never sleep, so the values
/// only matter for deadline arithmetic.
pub fn test_config() -> InsertConfig {
    InsertConfig {
        accept_timeout: Duration::from_millis(200),
        search_timeout: Duration::from_millis(500),
        data_insert_timeout: Duration::from_millis(200),
        fetch_timeout: Duration::from_millis(200),
    }
}
