//! Node-wide registry of in-flight inserts.

use dashmap::DashMap;
use shared_types::{Hash, Uid};
use tracing::warn;

use crate::ports::outbound::InsertRegistry;

/// In-flight insert registry keyed on `(routing_key, origin_htl)`.
///
/// Peers consult this to detect loops: an incoming insert for a key we are
/// already inserting at the same origin HTL is answered with a loop
/// rejection. Deregistration must use the origin HTL the job was registered
/// under, not the HTL it later decayed to.
#[derive(Debug, Default)]
pub struct InFlightInserts {
    inner: DashMap<(Hash, u8), Uid>,
}

impl InFlightInserts {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, routing_key: &Hash, origin_htl: u8) -> bool {
        self.inner.contains_key(&(*routing_key, origin_htl))
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}

impl InsertRegistry for InFlightInserts {
    fn register(&self, routing_key: Hash, origin_htl: u8, uid: Uid) {
        if let Some(previous) = self.inner.insert((routing_key, origin_htl), uid) {
            warn!(
                %uid,
                displaced = %previous,
                origin_htl,
                "registered insert over an existing entry for the same key and HTL"
            );
        }
    }

    fn deregister(&self, routing_key: Hash, origin_htl: u8, uid: Uid) {
        self.inner
            .remove_if(&(routing_key, origin_htl), |_, registered| {
                *registered == uid
            });
    }
}
