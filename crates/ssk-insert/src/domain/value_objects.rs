//! Value objects: insert configuration, terminal status, routed-peer set.

use std::collections::HashSet;
use std::fmt;
use std::time::Duration;

use super::PeerId;

/// Timeouts and limits for one insert.
#[derive(Clone, Debug)]
pub struct InsertConfig {
    /// Applies to every wait until the final-reply phase.
    pub accept_timeout: Duration,
    /// Applies to the final-reply phase after the payload was pushed.
    pub search_timeout: Duration,
    /// Governs the throttled data send.
    pub data_insert_timeout: Duration,
    /// Governs the wait for the collision data body.
    pub fetch_timeout: Duration,
}

impl Default for InsertConfig {
    fn default() -> Self {
        Self {
            accept_timeout: Duration::from_secs(10),
            search_timeout: Duration::from_secs(60),
            data_insert_timeout: Duration::from_secs(30),
            fetch_timeout: Duration::from_secs(120),
        }
    }
}

/// Terminal state of one insert. Written exactly once.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum InsertStatus {
    /// Still running.
    Running,
    /// Insert propagated as far as it needs to go.
    Success,
    /// Backtracked after trying at least one peer.
    RouteNotFound,
    /// Could not get off this node at all.
    RouteReallyNotFound,
    /// Protocol violation or unexpected fault.
    InternalError,
    /// No reply within the search timeout after a peer accepted.
    TimedOut,
    /// This node itself generated a rejected-overload.
    GeneratedRejectedOverload,
}

impl InsertStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, InsertStatus::Running)
    }

    /// Canonical external label for this status.
    pub fn label(self) -> &'static str {
        match self {
            InsertStatus::Running => "NOT FINISHED",
            InsertStatus::Success => "SUCCESS",
            InsertStatus::RouteNotFound => "ROUTE NOT FOUND",
            InsertStatus::RouteReallyNotFound => "ROUTE REALLY NOT FOUND",
            InsertStatus::InternalError => "INTERNAL ERROR",
            InsertStatus::TimedOut => "TIMED OUT",
            InsertStatus::GeneratedRejectedOverload => "GENERATED REJECTED OVERLOAD",
        }
    }
}

impl fmt::Display for InsertStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Peers already attempted for this insert.
///
/// Grows monotonically; a recorded peer is excluded from every later routing
/// decision of the same job.
#[derive(Debug, Default)]
pub struct RoutedPeers(HashSet<PeerId>);

impl RoutedPeers {
    pub fn record(&mut self, peer: PeerId) {
        self.0.insert(peer);
    }

    pub fn contains(&self, peer: &PeerId) -> bool {
        self.0.contains(peer)
    }

    pub fn as_set(&self) -> &HashSet<PeerId> {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_defaults() {
        let config = InsertConfig::default();
        assert_eq!(config.accept_timeout, Duration::from_secs(10));
        assert_eq!(config.search_timeout, Duration::from_secs(60));
        assert_eq!(config.data_insert_timeout, Duration::from_secs(30));
        assert_eq!(config.fetch_timeout, Duration::from_secs(120));
    }

    #[test]
    fn test_status_labels() {
        assert_eq!(InsertStatus::Running.label(), "NOT FINISHED");
        assert_eq!(InsertStatus::Success.label(), "SUCCESS");
        assert_eq!(InsertStatus::RouteNotFound.label(), "ROUTE NOT FOUND");
        assert_eq!(
            InsertStatus::RouteReallyNotFound.label(),
            "ROUTE REALLY NOT FOUND"
        );
        assert_eq!(InsertStatus::InternalError.label(), "INTERNAL ERROR");
        assert_eq!(InsertStatus::TimedOut.label(), "TIMED OUT");
        assert_eq!(
            InsertStatus::GeneratedRejectedOverload.label(),
            "GENERATED REJECTED OVERLOAD"
        );
    }

    #[test]
    fn test_only_running_is_non_terminal() {
        assert!(!InsertStatus::Running.is_terminal());
        assert!(InsertStatus::Success.is_terminal());
        assert!(InsertStatus::RouteReallyNotFound.is_terminal());
    }

    #[test]
    fn test_routed_peers_accumulate() {
        let mut routed = RoutedPeers::default();
        let a = PeerId::new([1u8; 32]);
        let b = PeerId::new([2u8; 32]);

        assert!(routed.is_empty());
        routed.record(a);
        routed.record(a);
        routed.record(b);

        assert_eq!(routed.len(), 2);
        assert!(routed.contains(&a));
        assert!(routed.contains(&b));
    }
}
