//! Node statistics sink backed by atomic counters.

use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};

use crate::ports::outbound::StatsSink;

/// Accumulates insert traffic totals for the whole node.
///
/// Payload bytes are counted once as payload: the transport reports them via
/// [`StatsSink::sent_payload`], which books them into the payload counter and
/// backs them out of the insert-sent counter where the full message size was
/// already booked.
#[derive(Debug, Default)]
pub struct NodeStatsRecorder {
    ssk_insert_sent: AtomicI64,
    ssk_insert_received: AtomicI64,
    chk_insert_sent: AtomicI64,
    chk_insert_received: AtomicI64,
    payload_sent: AtomicU64,
}

impl NodeStatsRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn ssk_insert_sent(&self) -> i64 {
        self.ssk_insert_sent.load(Ordering::Relaxed)
    }

    pub fn ssk_insert_received(&self) -> i64 {
        self.ssk_insert_received.load(Ordering::Relaxed)
    }

    pub fn chk_insert_sent(&self) -> i64 {
        self.chk_insert_sent.load(Ordering::Relaxed)
    }

    pub fn chk_insert_received(&self) -> i64 {
        self.chk_insert_received.load(Ordering::Relaxed)
    }

    pub fn payload_sent(&self) -> u64 {
        self.payload_sent.load(Ordering::Relaxed)
    }
}

impl StatsSink for NodeStatsRecorder {
    fn insert_sent_bytes(&self, ssk: bool, len: i64) {
        let counter = if ssk {
            &self.ssk_insert_sent
        } else {
            &self.chk_insert_sent
        };
        counter.fetch_add(len, Ordering::Relaxed);
    }

    fn insert_received_bytes(&self, ssk: bool, len: i64) {
        let counter = if ssk {
            &self.ssk_insert_received
        } else {
            &self.chk_insert_received
        };
        counter.fetch_add(len, Ordering::Relaxed);
    }

    fn sent_payload(&self, len: usize) {
        self.payload_sent.fetch_add(len as u64, Ordering::Relaxed);
    }
}
