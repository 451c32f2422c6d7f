//! Outbound ports (SPI) for the SSK insert subsystem.
//!
//! Everything the insert sender consumes from the node environment sits
//! behind these traits: the peer table, the per-peer message link, the HTL
//! policy, the in-flight registry, and the statistics sink.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use shared_types::{Hash, Location, Uid};

use crate::domain::PeerId;
use crate::events::{InsertMessage, MessageKind, SendError, WaitError};

/// Attributes transferred bytes to the request that caused them.
///
/// The insert sender implements this itself and hands a reference into every
/// transport call, so the link layer can report traffic without knowing
/// anything about inserts.
pub trait ByteCounter: Send + Sync {
    fn sent_bytes(&self, len: usize);
    fn received_bytes(&self, len: usize);
    /// Payload bytes within an already-counted send. Reported separately so
    /// node statistics can distinguish payload from protocol overhead.
    fn sent_payload(&self, len: usize);
}

/// Message link to one connected peer.
#[async_trait]
pub trait PeerLink: Send + Sync {
    fn id(&self) -> PeerId;

    /// Fire-and-forget send.
    async fn send(&self, msg: InsertMessage, counter: &dyn ByteCounter) -> Result<(), SendError>;

    /// Rate-limited send for bulk payloads. Blocks until the throttle admits
    /// the message or `timeout` elapses.
    async fn send_throttled(
        &self,
        msg: InsertMessage,
        size: usize,
        counter: &dyn ByteCounter,
        timeout: Duration,
    ) -> Result<(), SendError>;

    /// Waits for the next message from this peer that carries `uid` and
    /// matches one of `kinds`. Returns `Ok(None)` on timeout; a timeout is a
    /// protocol event, not a failure.
    async fn wait_for(
        &self,
        uid: Uid,
        kinds: &[MessageKind],
        timeout: Duration,
        counter: &dyn ByteCounter,
    ) -> Result<Option<InsertMessage>, WaitError>;

    /// Charges this peer with an overload it generated itself.
    fn local_rejected_overload(&self, reason: &'static str);

    /// Credits this peer with a non-overload outcome (loop detection,
    /// route-not-found, payload rejection all count as the peer doing its
    /// job).
    fn success_not_overload(&self);

    /// Credits this peer with completing a request.
    fn on_success(&self, local: bool, insert: bool);
}

/// Peer table: distance-directed next-hop selection.
pub trait PeerSelector: Send + Sync {
    /// Returns the connected, admissible peer whose location is closest to
    /// `target`, excluding `exclude` and the originating `source`. `None`
    /// when no candidate remains.
    fn closer_peer(
        &self,
        source: Option<PeerId>,
        exclude: &HashSet<PeerId>,
        target: Location,
        htl: u8,
    ) -> Option<Arc<dyn PeerLink>>;
}

/// Node HTL policy.
pub trait HtlPolicy: Send + Sync {
    fn max_htl(&self) -> u8;

    /// One decrement step. `requestor` is the peer the decrement is charged
    /// against (the previous hop once any request was sent, otherwise the
    /// origin). Implementations may decline to decrement near the
    /// boundaries, but must never raise the value.
    fn decrement(&self, requestor: Option<PeerId>, htl: u8) -> u8;
}

/// Node-wide registry of in-flight inserts, used by peers for loop
/// detection. Keyed on `(routing_key, origin_htl)`.
pub trait InsertRegistry: Send + Sync {
    fn register(&self, routing_key: Hash, origin_htl: u8, uid: Uid);
    fn deregister(&self, routing_key: Hash, origin_htl: u8, uid: Uid);
}

/// Node statistics sink. Must accept concurrent updates.
pub trait StatsSink: Send + Sync {
    /// `len` may be negative: payload bytes are re-attributed via
    /// [`StatsSink::sent_payload`] and compensated here.
    fn insert_sent_bytes(&self, ssk: bool, len: i64);
    fn insert_received_bytes(&self, ssk: bool, len: i64);
    fn sent_payload(&self, len: usize);
}
