//! SSK Insert Sender implementation.
//!
//! One `SskInsertSender` owns one insert for its whole life: it routes the
//! block toward its key's location, runs the per-hop insert protocol against
//! each chosen peer, and resolves exactly one terminal status. SSK collisions
//! are handled in-protocol: when a peer already stores different data under
//! the key, the preexisting block is adopted and propagated from then on.

use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;
use shared_types::{Hash, Location, Uid};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::domain::{
    DsaPublicKey, InsertConfig, InsertStatus, PeerId, RoutedPeers, SskBlock, SskKey, StatusCell,
};
use crate::events::{
    InsertError, InsertMessage, MessageKind, RejectReason, SendError, WaitError,
};
use crate::ports::inbound::InsertSenderApi;
use crate::ports::outbound::{
    ByteCounter, HtlPolicy, InsertRegistry, PeerLink, PeerSelector, StatsSink,
};

/// What a single hop concluded.
enum HopOutcome {
    /// A terminal status was written; the routing loop stops.
    Finished,
    /// This peer is done with; route to another.
    NextPeer,
}

/// How a collision exchange ended.
enum CollisionOutcome {
    /// Remote block adopted; keep waiting on the same peer.
    Resolved,
    /// The exchange broke off; route to another peer.
    NextPeer,
    /// A terminal status was written.
    Fatal,
}

/// Mutable job state, guarded by the job monitor.
struct JobState {
    htl: u8,
    block: SskBlock,
    /// Current payload view; replaced by the remote data on collision.
    data: Vec<u8>,
    /// Current header view; replaced by the remote headers on collision.
    headers: Vec<u8>,
    sent_request: bool,
    has_collided: bool,
    has_recently_collided: bool,
    has_forwarded_rejected_overload: bool,
}

/// Per-job byte totals. Separate monitor so statistics readers never contend
/// with the protocol-critical job monitor.
#[derive(Default)]
struct ByteTotals {
    sent: u64,
    received: u64,
}

/// Drives one SSK insert to a terminal status.
pub struct SskInsertSender<S, H, R, T>
where
    S: PeerSelector,
    H: HtlPolicy,
    R: InsertRegistry,
    T: StatsSink,
{
    uid: Uid,
    routing_key: Hash,
    target: Location,
    pub_key: DsaPublicKey,
    pub_key_hash: Hash,
    source: Option<PeerId>,
    origin_htl: u8,
    from_store: bool,
    can_write_client_cache: bool,
    can_write_datastore: bool,
    start_time: Instant,
    config: InsertConfig,
    state: Mutex<JobState>,
    status: StatusCell,
    totals: Mutex<ByteTotals>,
    selector: Arc<S>,
    htl_policy: Arc<H>,
    registry: Arc<R>,
    stats: Arc<T>,
}

/// Finalizes and deregisters on every exit path, including panics.
///
/// Deregistration uses the origin HTL the job was registered under, not the
/// HTL the job decayed to.
struct RunGuard<'a, S, H, R, T>
where
    S: PeerSelector,
    H: HtlPolicy,
    R: InsertRegistry,
    T: StatsSink,
{
    sender: &'a SskInsertSender<S, H, R, T>,
}

impl<S, H, R, T> Drop for RunGuard<'_, S, H, R, T>
where
    S: PeerSelector,
    H: HtlPolicy,
    R: InsertRegistry,
    T: StatsSink,
{
    fn drop(&mut self) {
        let sender = self.sender;
        if !sender.status.get().is_terminal() {
            error!(uid = %sender.uid, "insert worker exited without a terminal status");
            let _ = sender.status.finish(InsertStatus::InternalError);
        }
        sender
            .registry
            .deregister(sender.routing_key, sender.origin_htl, sender.uid);
    }
}

impl<S, H, R, T> SskInsertSender<S, H, R, T>
where
    S: PeerSelector + 'static,
    H: HtlPolicy + 'static,
    R: InsertRegistry + 'static,
    T: StatsSink + 'static,
{
    /// Builds the job. Fails if the block's key carries no public key: an
    /// insert must be able to hand the key to peers that lack it.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        block: SskBlock,
        uid: Uid,
        htl: u8,
        source: Option<PeerId>,
        config: InsertConfig,
        selector: Arc<S>,
        htl_policy: Arc<H>,
        registry: Arc<R>,
        stats: Arc<T>,
        from_store: bool,
        can_write_client_cache: bool,
        can_write_datastore: bool,
    ) -> Result<Arc<Self>, InsertError> {
        let key = block.key().clone();
        let pub_key = key.pub_key().cloned().ok_or(InsertError::MissingPubKey)?;
        let pub_key_hash = pub_key.hash();
        let routing_key = key.routing_key();
        let target = key.location();

        Ok(Arc::new(Self {
            uid,
            routing_key,
            target,
            pub_key,
            pub_key_hash,
            source,
            origin_htl: htl,
            from_store,
            can_write_client_cache,
            can_write_datastore,
            start_time: Instant::now(),
            config,
            state: Mutex::new(JobState {
                htl,
                data: block.raw_data().to_vec(),
                headers: block.raw_headers().to_vec(),
                block,
                sent_request: false,
                has_collided: false,
                has_recently_collided: false,
                has_forwarded_rejected_overload: false,
            }),
            status: StatusCell::new(),
            totals: Mutex::new(ByteTotals::default()),
            selector,
            htl_policy,
            registry,
            stats,
        }))
    }

    /// Schedules the job on the runtime.
    pub fn start(self: &Arc<Self>) -> JoinHandle<()> {
        let job = Arc::clone(self);
        tokio::spawn(async move { job.run().await })
    }

    async fn run(self: Arc<Self>) {
        debug!(uid = %self.uid, key = %self, htl = self.origin_htl, "starting ssk insert");
        self.registry
            .register(self.routing_key, self.origin_htl, self.uid);
        let _guard = RunGuard {
            sender: self.as_ref(),
        };
        self.route_loop().await;
        debug!(uid = %self.uid, status = %self.status.get(), "ssk insert finished");
    }

    /// The outer routing loop: decrement HTL, pick the next peer, run one
    /// hop, repeat until a terminal status lands.
    async fn route_loop(&self) {
        let mut routed = RoutedPeers::default();
        let mut last_tried: Option<PeerId> = None;

        loop {
            // Decrement against the previous hop once any request was sent;
            // charging the origin forever pins the job at boundary HTL
            // values while it visits every peer in turn.
            let htl = {
                let mut st = self.state.lock();
                let requestor = if st.sent_request {
                    last_tried
                } else {
                    self.source
                };
                st.htl = self.htl_policy.decrement(requestor, st.htl);
                st.htl
            };
            if htl == 0 {
                // The insert has propagated as far as it needs to go.
                self.finish(InsertStatus::Success, None);
                return;
            }

            let Some(next) =
                self.selector
                    .closer_peer(self.source, routed.as_set(), self.target, htl)
            else {
                self.finish(InsertStatus::RouteNotFound, None);
                return;
            };
            debug!(uid = %self.uid, peer = %next.id(), htl, "routing insert");
            routed.record(next.id());
            last_tried = Some(next.id());

            match self.run_hop(&next).await {
                HopOutcome::Finished => return,
                HopOutcome::NextPeer => continue,
            }
        }
    }

    /// Runs the full per-hop protocol against one peer.
    async fn run_hop(&self, next: &Arc<dyn PeerLink>) -> HopOutcome {
        let (htl, data, headers) = {
            let st = self.state.lock();
            (st.htl, st.data.clone(), st.headers.clone())
        };

        // Phase 1: announce, await acceptance.
        let request = InsertMessage::InsertRequest {
            uid: self.uid,
            htl,
            routing_key: self.routing_key,
        };
        if next.send(request, self).await.is_err() {
            debug!(uid = %self.uid, peer = %next.id(), "not connected");
            return HopOutcome::NextPeer;
        }
        self.state.lock().sent_request = true;

        let need_pub_key = match self.await_acceptance(next).await {
            Some(need_pub_key) => need_pub_key,
            None => return HopOutcome::NextPeer,
        };
        debug!(uid = %self.uid, peer = %next.id(), need_pub_key, "insert accepted");

        // Phase 2: push headers and data; headers ride an ordinary send, the
        // payload goes through the throttle.
        let headers_msg = InsertMessage::InsertHeaders {
            uid: self.uid,
            headers,
        };
        if next.send(headers_msg, self).await.is_err() {
            debug!(uid = %self.uid, peer = %next.id(), "not connected sending headers");
            return HopOutcome::NextPeer;
        }

        let size = data.len();
        let data_msg = InsertMessage::InsertData {
            uid: self.uid,
            data,
        };
        match next
            .send_throttled(data_msg, size, self, self.config.data_insert_timeout)
            .await
        {
            Ok(()) => {}
            Err(SendError::NotConnected) => {
                debug!(uid = %self.uid, peer = %next.id(), "not connected sending data");
                return HopOutcome::NextPeer;
            }
            Err(SendError::WaitedTooLong) => {
                error!(uid = %self.uid, peer = %next.id(), "waited too long to send insert data");
                return HopOutcome::NextPeer;
            }
            Err(SendError::PeerRestarted) => {
                debug!(uid = %self.uid, peer = %next.id(), "peer restarted during data send");
                return HopOutcome::NextPeer;
            }
        }

        if need_pub_key && !self.send_pub_key(next).await {
            return HopOutcome::NextPeer;
        }

        // Phases 3 and 4: final reply, with collision resolution inline.
        self.await_final_reply(next).await
    }

    /// Phase 1 wait loop. Returns the accepted `need_pub_key` flag, or
    /// `None` when this peer should be given up on.
    async fn await_acceptance(&self, next: &Arc<dyn PeerLink>) -> Option<bool> {
        const KINDS: &[MessageKind] = &[
            MessageKind::Accepted,
            MessageKind::RejectedLoop,
            MessageKind::RejectedOverload,
        ];
        let deadline = Instant::now() + self.config.accept_timeout;

        // Messages may reorder: a non-local overload can arrive before the
        // acceptance it logically follows, so it must not end the wait.
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            let msg = match next.wait_for(self.uid, KINDS, remaining, self).await {
                Ok(msg) => msg,
                Err(WaitError::Disconnected) => {
                    info!(uid = %self.uid, peer = %next.id(), "disconnected while waiting for acceptance");
                    return None;
                }
            };

            match msg {
                None => {
                    debug!(uid = %self.uid, peer = %next.id(), "timed out waiting for acceptance");
                    next.local_rejected_overload("AcceptTimeout");
                    self.forward_rejected_overload();
                    return None;
                }
                Some(InsertMessage::RejectedOverload { is_local, .. }) => {
                    if is_local {
                        next.local_rejected_overload("ForwardRejectedOverload");
                        debug!(uid = %self.uid, peer = %next.id(), "local overload, trying another peer");
                        return None;
                    }
                    self.forward_rejected_overload();
                }
                Some(InsertMessage::RejectedLoop { .. }) => {
                    debug!(uid = %self.uid, peer = %next.id(), "peer already services this insert");
                    next.success_not_overload();
                    return None;
                }
                Some(InsertMessage::Accepted { need_pub_key, .. }) => {
                    return Some(need_pub_key);
                }
                Some(other) => {
                    error!(
                        uid = %self.uid,
                        peer = %next.id(),
                        kind = ?other.kind(),
                        "unexpected message while waiting for acceptance"
                    );
                    return None;
                }
            }
        }
    }

    /// Pubkey exchange of phase 2. Returns false when this peer should be
    /// given up on.
    async fn send_pub_key(&self, next: &Arc<dyn PeerLink>) -> bool {
        let pk_msg = InsertMessage::PubKey {
            uid: self.uid,
            pub_key: self.pub_key.as_bytes().to_vec(),
        };
        if next.send(pk_msg, self).await.is_err() {
            debug!(uid = %self.uid, peer = %next.id(), "disconnected while sending pubkey");
            return false;
        }

        match next
            .wait_for(
                self.uid,
                &[MessageKind::PubKeyAccepted],
                self.config.accept_timeout,
                self,
            )
            .await
        {
            Err(WaitError::Disconnected) => {
                debug!(uid = %self.uid, peer = %next.id(), "disconnected waiting for pubkey ack");
                false
            }
            Ok(None) => {
                debug!(uid = %self.uid, peer = %next.id(), "timed out waiting for pubkey ack");
                next.local_rejected_overload("PubKeyTimeout");
                self.forward_rejected_overload();
                false
            }
            Ok(Some(_)) => true,
        }
    }

    /// Phase 3 wait loop, entered once the payload was pushed. Collisions
    /// (phase 4) resolve inline and fall back into this loop.
    async fn await_final_reply(&self, next: &Arc<dyn PeerLink>) -> HopOutcome {
        const KINDS: &[MessageKind] = &[
            MessageKind::InsertReply,
            MessageKind::RouteNotFound,
            MessageKind::RejectedOverload,
            MessageKind::DataInsertRejected,
            MessageKind::CollisionHeaders,
        ];
        let deadline = Instant::now() + self.config.search_timeout;
        let mut collided_this_hop = false;

        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            let msg = match next.wait_for(self.uid, KINDS, remaining, self).await {
                Ok(msg) => msg,
                Err(WaitError::Disconnected) => {
                    info!(uid = %self.uid, peer = %next.id(), "disconnected while waiting for insert reply");
                    return HopOutcome::NextPeer;
                }
            };

            let Some(msg) = msg else {
                // The peer accepted and then went silent for the whole
                // search window; that ends the job, not just the hop.
                error!(uid = %self.uid, peer = %next.id(), "timed out after insert was accepted");
                next.local_rejected_overload("AfterInsertAcceptedTimeout");
                self.finish(InsertStatus::TimedOut, Some(next.as_ref()));
                return HopOutcome::Finished;
            };

            match msg {
                InsertMessage::RejectedOverload { is_local, .. } => {
                    if is_local {
                        next.local_rejected_overload("ForwardRejectedOverload");
                        debug!(uid = %self.uid, peer = %next.id(), "local overload, trying another peer");
                        return HopOutcome::NextPeer;
                    }
                    self.forward_rejected_overload();
                }
                InsertMessage::RouteNotFound { htl: new_htl, .. } => {
                    debug!(uid = %self.uid, peer = %next.id(), new_htl, "route not found downstream");
                    {
                        let mut st = self.state.lock();
                        st.htl = st.htl.min(new_htl);
                    }
                    next.success_not_overload();
                    return HopOutcome::NextPeer;
                }
                InsertMessage::DataInsertRejected { reason, .. } => {
                    next.success_not_overload();
                    warn!(uid = %self.uid, peer = %next.id(), ?reason, "insert data rejected");
                    if reason == RejectReason::VerifyFailed && self.from_store {
                        error!(
                            uid = %self.uid,
                            peer = %next.id(),
                            "peer failed to verify a block served from our own store"
                        );
                    }
                    return HopOutcome::NextPeer;
                }
                InsertMessage::CollisionHeaders { headers, .. } => {
                    if collided_this_hop {
                        error!(uid = %self.uid, peer = %next.id(), "duplicate collision headers from peer");
                        self.finish(InsertStatus::InternalError, Some(next.as_ref()));
                        return HopOutcome::Finished;
                    }
                    collided_this_hop = true;
                    match self.resolve_collision(next, headers).await {
                        // The peer now propagates the adopted data; a
                        // terminal reply is still expected on this hop.
                        CollisionOutcome::Resolved => {}
                        CollisionOutcome::NextPeer => return HopOutcome::NextPeer,
                        CollisionOutcome::Fatal => return HopOutcome::Finished,
                    }
                }
                InsertMessage::InsertReply { .. } => {
                    next.success_not_overload();
                    self.finish(InsertStatus::Success, Some(next.as_ref()));
                    return HopOutcome::Finished;
                }
                other => {
                    error!(
                        uid = %self.uid,
                        peer = %next.id(),
                        kind = ?other.kind(),
                        "unexpected message while waiting for insert reply"
                    );
                    self.finish(InsertStatus::InternalError, Some(next.as_ref()));
                    return HopOutcome::Finished;
                }
            }
        }
    }

    /// Phase 4: the peer already stores a different block under this key.
    /// The preexisting block wins; adopt it and propagate it from now on.
    async fn resolve_collision(
        &self,
        next: &Arc<dyn PeerLink>,
        remote_headers: Vec<u8>,
    ) -> CollisionOutcome {
        info!(uid = %self.uid, peer = %next.id(), key = %self, "collision: adopting preexisting block");
        self.state.lock().headers = remote_headers;

        let msg = match next
            .wait_for(
                self.uid,
                &[MessageKind::CollisionData],
                self.config.fetch_timeout,
                self,
            )
            .await
        {
            Err(WaitError::Disconnected) => {
                debug!(uid = %self.uid, peer = %next.id(), "disconnected waiting for collision data");
                return CollisionOutcome::NextPeer;
            }
            Ok(None) => {
                error!(uid = %self.uid, peer = %next.id(), "got collision headers but no data body");
                return CollisionOutcome::NextPeer;
            }
            Ok(Some(msg)) => msg,
        };
        let InsertMessage::CollisionData { data, .. } = msg else {
            // The filter admits only collision data.
            error!(uid = %self.uid, peer = %next.id(), kind = ?msg.kind(), "unexpected collision reply");
            return CollisionOutcome::NextPeer;
        };

        // TODO: the rebuilt block keeps the pre-collision headers while the
        // job's header view above carries the remote ones; flagged for
        // protocol review.
        let (prior_headers, key) = {
            let mut st = self.state.lock();
            st.data = data.clone();
            (st.block.raw_headers().to_vec(), st.block.key().clone())
        };
        match SskBlock::new(data, prior_headers, key, false) {
            Ok(block) => {
                {
                    let mut st = self.state.lock();
                    st.block = block;
                    st.has_collided = true;
                    st.has_recently_collided = true;
                }
                self.status.notify();
                CollisionOutcome::Resolved
            }
            Err(e) => {
                error!(uid = %self.uid, peer = %next.id(), error = %e, "collided block failed verification");
                self.finish(InsertStatus::InternalError, Some(next.as_ref()));
                CollisionOutcome::Fatal
            }
        }
    }

    /// Records a non-local overload for upstream forwarding. Idempotent:
    /// only the first report flips the bit and wakes waiters.
    fn forward_rejected_overload(&self) {
        {
            let mut st = self.state.lock();
            if st.has_forwarded_rejected_overload {
                return;
            }
            st.has_forwarded_rejected_overload = true;
        }
        self.status.notify();
    }

    /// Writes the terminal status exactly once.
    ///
    /// A route-not-found that never managed to send a single request is
    /// rewritten to the stronger "really not found", distinguishing "could
    /// not even begin" from "backtracked after trying".
    fn finish(&self, code: InsertStatus, last_peer: Option<&dyn PeerLink>) {
        let code = if code == InsertStatus::RouteNotFound && !self.sent_request() {
            InsertStatus::RouteReallyNotFound
        } else {
            code
        };

        if let Err(existing) = self.status.finish(code) {
            panic!("finish() called with {code:?} when status was already {existing:?}");
        }
        debug!(uid = %self.uid, status = %code, "insert finalized");

        // Reputation callback stays outside any job-monitor critical section.
        if code == InsertStatus::Success {
            if let Some(peer) = last_peer {
                peer.on_success(true, true);
            }
        }
    }

    /// Suspends until the job reaches a terminal status.
    pub async fn wait_for_status(&self) -> InsertStatus {
        self.status.wait_terminal().await
    }

    pub fn pub_key_hash(&self) -> Hash {
        self.pub_key_hash
    }

    pub fn routing_key(&self) -> Hash {
        self.routing_key
    }

    pub fn target(&self) -> Location {
        self.target
    }

    pub fn from_store(&self) -> bool {
        self.from_store
    }

    pub fn can_write_client_cache(&self) -> bool {
        self.can_write_client_cache
    }

    pub fn can_write_datastore(&self) -> bool {
        self.can_write_datastore
    }

    pub fn start_time(&self) -> Instant {
        self.start_time
    }
}

impl<S, H, R, T> InsertSenderApi for SskInsertSender<S, H, R, T>
where
    S: PeerSelector + 'static,
    H: HtlPolicy + 'static,
    R: InsertRegistry + 'static,
    T: StatsSink + 'static,
{
    fn uid(&self) -> Uid {
        self.uid
    }

    fn status(&self) -> InsertStatus {
        self.status.get()
    }

    fn status_label(&self) -> &'static str {
        self.status.get().label()
    }

    fn htl(&self) -> u8 {
        self.state.lock().htl
    }

    fn sent_request(&self) -> bool {
        self.state.lock().sent_request
    }

    fn has_collided(&self) -> bool {
        self.state.lock().has_collided
    }

    fn has_recently_collided(&self) -> bool {
        let mut st = self.state.lock();
        std::mem::take(&mut st.has_recently_collided)
    }

    fn received_rejected_overload(&self) -> bool {
        self.state.lock().has_forwarded_rejected_overload
    }

    fn data(&self) -> Vec<u8> {
        self.state.lock().data.clone()
    }

    fn headers(&self) -> Vec<u8> {
        self.state.lock().headers.clone()
    }

    fn block(&self) -> SskBlock {
        self.state.lock().block.clone()
    }

    fn total_sent_bytes(&self) -> u64 {
        self.totals.lock().sent
    }

    fn total_received_bytes(&self) -> u64 {
        self.totals.lock().received
    }
}

impl<S, H, R, T> ByteCounter for SskInsertSender<S, H, R, T>
where
    S: PeerSelector + 'static,
    H: HtlPolicy + 'static,
    R: InsertRegistry + 'static,
    T: StatsSink + 'static,
{
    fn sent_bytes(&self, len: usize) {
        self.totals.lock().sent += len as u64;
        self.stats.insert_sent_bytes(true, len as i64);
    }

    fn received_bytes(&self, len: usize) {
        self.totals.lock().received += len as u64;
        self.stats.insert_received_bytes(true, len as i64);
    }

    fn sent_payload(&self, len: usize) {
        self.stats.sent_payload(len);
        self.stats.insert_sent_bytes(true, -(len as i64));
    }
}

impl<S, H, R, T> fmt::Display for SskInsertSender<S, H, R, T>
where
    S: PeerSelector,
    H: HtlPolicy,
    R: InsertRegistry,
    T: StatsSink,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SskInsertSender:")?;
        for byte in &self.routing_key[..8] {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}
