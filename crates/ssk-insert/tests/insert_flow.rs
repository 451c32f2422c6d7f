//! End-to-end scenarios for the insert sender, driven against scripted peers.

use std::sync::Arc;

use shared_types::Uid;

use ssk_insert::adapters::{InFlightInserts, NodeStatsRecorder, ProbabilisticHtlPolicy};
use ssk_insert::ports::outbound::HtlPolicy;
use ssk_insert::testing::{
    test_block, test_config, FixedSelector, HoldAtMinimum, RecordingRegistry, ScriptEvent,
    ScriptedPeer, StepDecrement,
};
use ssk_insert::{
    InsertMessage, InsertSenderApi, InsertStatus, MessageKind, RejectReason, SskInsertSender,
    SSK_DATA_LENGTH, SSK_HEADERS_LENGTH,
};

const UID: Uid = Uid(1);

type Sender<H> = SskInsertSender<FixedSelector, H, RecordingRegistry, NodeStatsRecorder>;

fn build<H: HtlPolicy + 'static>(
    htl: u8,
    peers: Vec<Arc<ScriptedPeer>>,
    policy: H,
    from_store: bool,
) -> (
    Arc<Sender<H>>,
    Arc<RecordingRegistry>,
    Arc<NodeStatsRecorder>,
) {
    let registry = Arc::new(RecordingRegistry::default());
    let stats = Arc::new(NodeStatsRecorder::new());
    let sender = SskInsertSender::new(
        test_block(),
        UID,
        htl,
        None,
        test_config(),
        Arc::new(FixedSelector::new(peers)),
        Arc::new(policy),
        registry.clone(),
        stats.clone(),
        from_store,
        true,
        true,
    )
    .expect("test block carries a pubkey");
    (sender, registry, stats)
}

fn accepted() -> InsertMessage {
    InsertMessage::Accepted {
        uid: UID,
        need_pub_key: false,
    }
}

fn reply() -> InsertMessage {
    InsertMessage::InsertReply { uid: UID }
}

#[tokio::test]
async fn accepted_then_reply_is_success() {
    let peer = ScriptedPeer::scripted(1, vec![accepted(), reply()]);
    let (sender, _, _) = build(1, vec![peer.clone()], HoldAtMinimum::new(18), false);

    sender.start().await.unwrap();

    assert_eq!(sender.status(), InsertStatus::Success);
    assert_eq!(sender.status_label(), "SUCCESS");
    assert!(sender.sent_request());
    assert_eq!(
        peer.sent_kinds(),
        vec![
            MessageKind::InsertRequest,
            MessageKind::InsertHeaders,
            MessageKind::InsertData,
        ]
    );
    assert_eq!(peer.on_success_calls(), vec![(true, true)]);
    assert_eq!(peer.success_not_overload_count(), 1);
}

#[tokio::test]
async fn no_peers_at_all_is_route_really_not_found() {
    let (sender, _, _) = build(5, vec![], StepDecrement::new(18), false);

    sender.start().await.unwrap();

    assert_eq!(sender.status(), InsertStatus::RouteReallyNotFound);
    assert!(!sender.sent_request());
}

#[tokio::test]
async fn downstream_route_not_found_clamps_htl() {
    let first = ScriptedPeer::scripted(
        1,
        vec![accepted(), InsertMessage::RouteNotFound { uid: UID, htl: 2 }],
    );
    let second = ScriptedPeer::scripted(2, vec![accepted(), reply()]);
    let (sender, registry, _) = build(
        5,
        vec![first.clone(), second.clone()],
        StepDecrement::new(18),
        false,
    );

    sender.start().await.unwrap();

    assert_eq!(sender.status(), InsertStatus::Success);
    // Clamped to the advertised 2, then decremented once more for hop 2.
    assert!(sender.htl() <= 2);
    assert_eq!(first.success_not_overload_count(), 1);
    assert_eq!(second.on_success_calls(), vec![(true, true)]);
    // Registered and deregistered under the origin HTL despite the clamp.
    assert_eq!(registry.events(), vec![(5, true), (5, false)]);
}

#[tokio::test]
async fn nonlocal_overload_is_forwarded_and_wait_continues() {
    let peer = ScriptedPeer::scripted(
        1,
        vec![
            accepted(),
            InsertMessage::RejectedOverload {
                uid: UID,
                is_local: false,
            },
            reply(),
        ],
    );
    let (sender, _, _) = build(5, vec![peer.clone()], StepDecrement::new(18), false);

    sender.start().await.unwrap();

    assert_eq!(sender.status(), InsertStatus::Success);
    assert!(sender.received_rejected_overload());
    // The overload was downstream's fault, not this peer's.
    assert!(peer.overload_labels().is_empty());
}

#[tokio::test]
async fn repeated_nonlocal_overloads_forward_once() {
    let peer = ScriptedPeer::scripted(
        1,
        vec![
            accepted(),
            InsertMessage::RejectedOverload {
                uid: UID,
                is_local: false,
            },
            InsertMessage::RejectedOverload {
                uid: UID,
                is_local: false,
            },
            reply(),
        ],
    );
    let (sender, _, _) = build(5, vec![peer], StepDecrement::new(18), false);

    sender.start().await.unwrap();

    assert_eq!(sender.status(), InsertStatus::Success);
    assert!(sender.received_rejected_overload());
}

#[tokio::test]
async fn local_overload_moves_to_next_peer_without_forwarding() {
    let first = ScriptedPeer::scripted(
        1,
        vec![
            accepted(),
            InsertMessage::RejectedOverload {
                uid: UID,
                is_local: true,
            },
        ],
    );
    let second = ScriptedPeer::scripted(2, vec![accepted(), reply()]);
    let (sender, _, _) = build(
        5,
        vec![first.clone(), second],
        StepDecrement::new(18),
        false,
    );

    sender.start().await.unwrap();

    assert_eq!(sender.status(), InsertStatus::Success);
    assert!(!sender.received_rejected_overload());
    assert_eq!(first.overload_labels(), vec!["ForwardRejectedOverload"]);
}

#[tokio::test]
async fn collision_adopts_preexisting_block() {
    let remote_headers = vec![0xBB; SSK_HEADERS_LENGTH];
    let remote_data = vec![0xAA; SSK_DATA_LENGTH];
    let peer = ScriptedPeer::scripted(
        1,
        vec![
            accepted(),
            InsertMessage::CollisionHeaders {
                uid: UID,
                headers: remote_headers.clone(),
            },
            InsertMessage::CollisionData {
                uid: UID,
                data: remote_data.clone(),
            },
            reply(),
        ],
    );
    let (sender, _, _) = build(5, vec![peer], StepDecrement::new(18), false);

    let original_key = sender.routing_key();
    sender.start().await.unwrap();

    assert_eq!(sender.status(), InsertStatus::Success);
    assert!(sender.has_collided());
    assert_eq!(sender.data(), remote_data);
    assert_eq!(sender.headers(), remote_headers);
    // The rebuilt block keeps the pre-collision headers and the same key.
    assert_eq!(sender.block().raw_data(), &remote_data[..]);
    assert_eq!(sender.block().raw_headers(), test_block().raw_headers());
    assert_eq!(sender.block().key().routing_key(), original_key);
    // Edge bit reads true exactly once.
    assert!(sender.has_recently_collided());
    assert!(!sender.has_recently_collided());
    // Sticky bit stays.
    assert!(sender.has_collided());
}

#[tokio::test]
async fn silence_after_accept_times_out_the_job() {
    let peer = ScriptedPeer::scripted(1, vec![accepted()]);
    let (sender, _, _) = build(5, vec![peer.clone()], StepDecrement::new(18), false);

    sender.start().await.unwrap();

    assert_eq!(sender.status(), InsertStatus::TimedOut);
    assert_eq!(sender.status_label(), "TIMED OUT");
    assert_eq!(peer.overload_labels(), vec!["AfterInsertAcceptedTimeout"]);
}

#[tokio::test]
async fn rejected_loop_excludes_peer_and_backtracks() {
    let peer = ScriptedPeer::scripted(1, vec![InsertMessage::RejectedLoop { uid: UID }]);
    let (sender, _, _) = build(5, vec![peer.clone()], StepDecrement::new(18), false);

    sender.start().await.unwrap();

    // A request went out, so this is an ordinary backtrack.
    assert_eq!(sender.status(), InsertStatus::RouteNotFound);
    assert_eq!(sender.status_label(), "ROUTE NOT FOUND");
    assert!(sender.sent_request());
    // The peer was tried exactly once and never re-selected.
    assert_eq!(peer.sent_kinds(), vec![MessageKind::InsertRequest]);
    assert_eq!(peer.success_not_overload_count(), 1);
}

#[tokio::test]
async fn data_insert_rejected_moves_to_next_peer() {
    let first = ScriptedPeer::scripted(
        1,
        vec![
            accepted(),
            InsertMessage::DataInsertRejected {
                uid: UID,
                reason: RejectReason::VerifyFailed,
            },
        ],
    );
    let second = ScriptedPeer::scripted(2, vec![accepted(), reply()]);
    let (sender, _, _) = build(
        5,
        vec![first.clone(), second],
        StepDecrement::new(18),
        true, // from_store: exercises the verify-failed diagnostics path
    );

    sender.start().await.unwrap();

    assert_eq!(sender.status(), InsertStatus::Success);
    assert_eq!(first.success_not_overload_count(), 1);
}

#[tokio::test]
async fn pubkey_is_sent_when_requested() {
    let peer = ScriptedPeer::scripted(
        1,
        vec![
            InsertMessage::Accepted {
                uid: UID,
                need_pub_key: true,
            },
            InsertMessage::PubKeyAccepted { uid: UID },
            reply(),
        ],
    );
    let (sender, _, _) = build(5, vec![peer.clone()], StepDecrement::new(18), false);

    sender.start().await.unwrap();

    assert_eq!(sender.status(), InsertStatus::Success);
    let sent = peer.sent_messages();
    let pub_key_msg = sent
        .iter()
        .find(|m| m.kind() == MessageKind::PubKey)
        .expect("pubkey was pushed");
    assert_eq!(
        *pub_key_msg,
        InsertMessage::PubKey {
            uid: UID,
            pub_key: vec![0x42; 128],
        }
    );
}

#[tokio::test]
async fn pubkey_ack_timeout_forwards_overload_and_retries() {
    let first = ScriptedPeer::scripted(
        1,
        vec![InsertMessage::Accepted {
            uid: UID,
            need_pub_key: true,
        }],
    );
    let second = ScriptedPeer::scripted(2, vec![accepted(), reply()]);
    let (sender, _, _) = build(
        5,
        vec![first.clone(), second],
        StepDecrement::new(18),
        false,
    );

    sender.start().await.unwrap();

    assert_eq!(sender.status(), InsertStatus::Success);
    assert!(sender.received_rejected_overload());
    assert_eq!(first.overload_labels(), vec!["PubKeyTimeout"]);
}

#[tokio::test]
async fn disconnect_during_acceptance_silently_retries() {
    let first = ScriptedPeer::with_events(1, vec![ScriptEvent::Disconnect]);
    let second = ScriptedPeer::scripted(2, vec![accepted(), reply()]);
    let (sender, _, _) = build(
        5,
        vec![first.clone(), second],
        StepDecrement::new(18),
        false,
    );

    sender.start().await.unwrap();

    assert_eq!(sender.status(), InsertStatus::Success);
    assert_eq!(first.sent_kinds(), vec![MessageKind::InsertRequest]);
    assert!(first.overload_labels().is_empty());
}

#[tokio::test]
async fn duplicate_collision_headers_is_a_protocol_error() {
    let peer = ScriptedPeer::scripted(
        1,
        vec![
            accepted(),
            InsertMessage::CollisionHeaders {
                uid: UID,
                headers: vec![0xBB; SSK_HEADERS_LENGTH],
            },
            InsertMessage::CollisionData {
                uid: UID,
                data: vec![0xAA; SSK_DATA_LENGTH],
            },
            InsertMessage::CollisionHeaders {
                uid: UID,
                headers: vec![0xCC; SSK_HEADERS_LENGTH],
            },
        ],
    );
    let (sender, _, _) = build(5, vec![peer], StepDecrement::new(18), false);

    sender.start().await.unwrap();

    assert_eq!(sender.status(), InsertStatus::InternalError);
    // The first collision still counted.
    assert!(sender.has_collided());
}

#[tokio::test]
async fn collision_data_timeout_moves_on_with_partial_headers() {
    let remote_headers = vec![0xBB; SSK_HEADERS_LENGTH];
    let first = ScriptedPeer::scripted(
        1,
        vec![
            accepted(),
            InsertMessage::CollisionHeaders {
                uid: UID,
                headers: remote_headers.clone(),
            },
        ],
    );
    let second = ScriptedPeer::scripted(2, vec![accepted(), reply()]);
    let (sender, _, _) = build(5, vec![first, second], StepDecrement::new(18), false);

    sender.start().await.unwrap();

    assert_eq!(sender.status(), InsertStatus::Success);
    // The header view was already overwritten when the data never came; the
    // job carries that state forward.
    assert_eq!(sender.headers(), remote_headers);
    assert_eq!(sender.data(), test_block().raw_data());
    assert!(!sender.has_collided());
}

#[tokio::test]
async fn status_is_written_once_and_observers_agree_forever() {
    let peer = ScriptedPeer::scripted(1, vec![accepted(), reply()]);
    let (sender, _, _) = build(5, vec![peer], StepDecrement::new(18), false);

    let handle = sender.start();
    let status = sender.wait_for_status().await;
    handle.await.unwrap();

    assert_eq!(status, InsertStatus::Success);
    for _ in 0..3 {
        assert_eq!(sender.status(), InsertStatus::Success);
    }
    // A second wait resolves immediately with the same value.
    assert_eq!(sender.wait_for_status().await, InsertStatus::Success);
}

#[tokio::test]
async fn traffic_is_accounted_per_job_and_node_wide() {
    let peer = ScriptedPeer::scripted(1, vec![accepted(), reply()]);
    let (sender, _, stats) = build(5, vec![peer], StepDecrement::new(18), false);

    sender.start().await.unwrap();

    assert_eq!(sender.status(), InsertStatus::Success);
    assert!(sender.total_sent_bytes() > SSK_DATA_LENGTH as u64);
    assert!(sender.total_received_bytes() > 0);
    // Payload bytes were re-attributed out of the insert-sent counter.
    assert_eq!(stats.payload_sent(), SSK_DATA_LENGTH as u64);
    assert_eq!(
        stats.ssk_insert_sent(),
        sender.total_sent_bytes() as i64 - SSK_DATA_LENGTH as i64
    );
    assert_eq!(
        stats.ssk_insert_received(),
        sender.total_received_bytes() as i64
    );
}

#[tokio::test]
async fn production_adapters_wire_end_to_end() {
    let peer = ScriptedPeer::scripted(1, vec![accepted(), reply()]);
    let registry = Arc::new(InFlightInserts::new());
    let stats = Arc::new(NodeStatsRecorder::new());
    let sender = SskInsertSender::new(
        test_block(),
        UID,
        5,
        None,
        test_config(),
        Arc::new(FixedSelector::new(vec![peer])),
        Arc::new(ProbabilisticHtlPolicy::new(18, 1.0, 1.0)),
        registry.clone(),
        stats.clone(),
        false,
        true,
        true,
    )
    .unwrap();
    let routing_key = sender.routing_key();

    sender.start().await.unwrap();

    assert_eq!(sender.status(), InsertStatus::Success);
    assert!(stats.ssk_insert_sent() > 0);
    // The job deregistered itself under its origin HTL on exit.
    assert!(!registry.contains(&routing_key, 5));
    assert!(registry.is_empty());
}

#[tokio::test]
async fn htl_exhaustion_finishes_as_success() {
    // Two peers that both push the insert along without completing it: the
    // job keeps routing until HTL bottoms out.
    let first = ScriptedPeer::scripted(
        1,
        vec![accepted(), InsertMessage::RouteNotFound { uid: UID, htl: 18 }],
    );
    let second = ScriptedPeer::scripted(
        2,
        vec![accepted(), InsertMessage::RouteNotFound { uid: UID, htl: 18 }],
    );
    let (sender, _, _) = build(2, vec![first, second], StepDecrement::new(18), false);

    sender.start().await.unwrap();

    // htl 2 -> 1 (hop 1) -> 0: propagated far enough.
    assert_eq!(sender.status(), InsertStatus::Success);
    assert_eq!(sender.htl(), 0);
    assert!(sender.sent_request());
}
