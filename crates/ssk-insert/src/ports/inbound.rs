//! Inbound port (API) for the SSK insert subsystem.

use shared_types::Uid;

use crate::domain::{InsertStatus, SskBlock};

/// Observer surface of a running (or finished) insert.
///
/// The insert handler that spawned the job reads these while relaying
/// progress upstream; all methods are safe to call concurrently with the
/// job's own worker.
pub trait InsertSenderApi: Send + Sync {
    fn uid(&self) -> Uid;

    /// Current status; `InsertStatus::Running` until finalized.
    fn status(&self) -> InsertStatus;

    /// Canonical label for the current status.
    fn status_label(&self) -> &'static str;

    /// Current hops-to-live. Only ever decreases.
    fn htl(&self) -> u8;

    /// True once any insert request reached any peer.
    fn sent_request(&self) -> bool;

    /// Sticky: true forever after the first collision.
    fn has_collided(&self) -> bool;

    /// Edge-triggered: true once per collision event, cleared by the read.
    fn has_recently_collided(&self) -> bool;

    /// True once a non-local overload report was recorded for forwarding.
    fn received_rejected_overload(&self) -> bool;

    /// Current payload view. After a collision this is the remote block's
    /// data.
    fn data(&self) -> Vec<u8>;

    /// Current header view. After a collision this is the remote block's
    /// headers.
    fn headers(&self) -> Vec<u8>;

    /// The block being propagated.
    fn block(&self) -> SskBlock;

    fn total_sent_bytes(&self) -> u64;
    fn total_received_bytes(&self) -> u64;
}
