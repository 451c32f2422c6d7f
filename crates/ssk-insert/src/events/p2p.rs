//! P2P message types for the SSK insert protocol.

use serde::{Deserialize, Serialize};
use shared_types::{Hash, Uid};

/// Why a peer rejected a pushed payload.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum RejectReason {
    /// The block failed verification at the receiver.
    VerifyFailed,
    /// The receiver could not take delivery of the payload.
    ReceiveFailed,
}

/// Messages exchanged with one peer while driving an SSK insert.
///
/// Every message carries the insert's `uid`; replies are matched on it
/// regardless of arrival order. Byte layout is the transport's concern.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum InsertMessage {
    /// Outbound announcement of the insert.
    InsertRequest { uid: Uid, htl: u8, routing_key: Hash },
    /// Peer will service the insert; may ask for the public key.
    Accepted { uid: Uid, need_pub_key: bool },
    /// Peer is already servicing this uid.
    RejectedLoop { uid: Uid },
    /// Peer (or someone downstream of it) is under load.
    RejectedOverload { uid: Uid, is_local: bool },
    /// Signed header blob for the block being inserted.
    InsertHeaders { uid: Uid, headers: Vec<u8> },
    /// The 1 KiB payload. Sent throttled.
    InsertData { uid: Uid, data: Vec<u8> },
    /// Public key for a peer that asked for it.
    PubKey { uid: Uid, pub_key: Vec<u8> },
    /// Peer took delivery of the public key.
    PubKeyAccepted { uid: Uid },
    /// Insert completed downstream.
    InsertReply { uid: Uid },
    /// Peer exhausted its own routing options; may advertise a lower HTL.
    RouteNotFound { uid: Uid, htl: u8 },
    /// Peer refused the pushed payload.
    DataInsertRejected { uid: Uid, reason: RejectReason },
    /// Peer already stores different data under this key; headers of the
    /// preexisting block.
    CollisionHeaders { uid: Uid, headers: Vec<u8> },
    /// Data body of the preexisting block.
    CollisionData { uid: Uid, data: Vec<u8> },
}

/// Message discriminant, used to build wait filters.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum MessageKind {
    InsertRequest,
    Accepted,
    RejectedLoop,
    RejectedOverload,
    InsertHeaders,
    InsertData,
    PubKey,
    PubKeyAccepted,
    InsertReply,
    RouteNotFound,
    DataInsertRejected,
    CollisionHeaders,
    CollisionData,
}

impl InsertMessage {
    pub fn kind(&self) -> MessageKind {
        match self {
            InsertMessage::InsertRequest { .. } => MessageKind::InsertRequest,
            InsertMessage::Accepted { .. } => MessageKind::Accepted,
            InsertMessage::RejectedLoop { .. } => MessageKind::RejectedLoop,
            InsertMessage::RejectedOverload { .. } => MessageKind::RejectedOverload,
            InsertMessage::InsertHeaders { .. } => MessageKind::InsertHeaders,
            InsertMessage::InsertData { .. } => MessageKind::InsertData,
            InsertMessage::PubKey { .. } => MessageKind::PubKey,
            InsertMessage::PubKeyAccepted { .. } => MessageKind::PubKeyAccepted,
            InsertMessage::InsertReply { .. } => MessageKind::InsertReply,
            InsertMessage::RouteNotFound { .. } => MessageKind::RouteNotFound,
            InsertMessage::DataInsertRejected { .. } => MessageKind::DataInsertRejected,
            InsertMessage::CollisionHeaders { .. } => MessageKind::CollisionHeaders,
            InsertMessage::CollisionData { .. } => MessageKind::CollisionData,
        }
    }

    pub fn uid(&self) -> Uid {
        match self {
            InsertMessage::InsertRequest { uid, .. }
            | InsertMessage::Accepted { uid, .. }
            | InsertMessage::RejectedLoop { uid }
            | InsertMessage::RejectedOverload { uid, .. }
            | InsertMessage::InsertHeaders { uid, .. }
            | InsertMessage::InsertData { uid, .. }
            | InsertMessage::PubKey { uid, .. }
            | InsertMessage::PubKeyAccepted { uid }
            | InsertMessage::InsertReply { uid }
            | InsertMessage::RouteNotFound { uid, .. }
            | InsertMessage::DataInsertRejected { uid, .. }
            | InsertMessage::CollisionHeaders { uid, .. }
            | InsertMessage::CollisionData { uid, .. } => *uid,
        }
    }

    /// Payload bytes carried by this message, if any.
    pub fn payload_len(&self) -> usize {
        match self {
            InsertMessage::InsertHeaders { headers, .. }
            | InsertMessage::CollisionHeaders { headers, .. } => headers.len(),
            InsertMessage::InsertData { data, .. } | InsertMessage::CollisionData { data, .. } => {
                data.len()
            }
            InsertMessage::PubKey { pub_key, .. } => pub_key.len(),
            _ => 0,
        }
    }

    /// Approximate on-wire size, used for traffic accounting.
    pub fn encoded_size(&self) -> usize {
        // type tag + uid
        const ENVELOPE: usize = 1 + 8;
        let body = match self {
            InsertMessage::InsertRequest { .. } => 1 + 32,
            InsertMessage::Accepted { .. } => 1,
            InsertMessage::RejectedLoop { .. }
            | InsertMessage::PubKeyAccepted { .. }
            | InsertMessage::InsertReply { .. } => 0,
            InsertMessage::RejectedOverload { .. } => 1,
            InsertMessage::RouteNotFound { .. } => 1,
            InsertMessage::DataInsertRejected { .. } => 1,
            _ => 4 + self.payload_len(),
        };
        ENVELOPE + body
    }
}
