//! # SSK Insert Sender Subsystem
//!
//! Drives the insertion of a single Signed Subspace Key (SSK) block through
//! the overlay. Each insert is a state machine owning one request: it
//! repeatedly routes toward the key's location, runs the per-hop insert
//! protocol against the chosen peer, and resolves a terminal status.
//!
//! ## Architecture Role
//!
//! ```text
//! [Insert Handler] ──SskBlock + HTL──→ [SskInsertSender]
//!                                            │ closer_peer / decrement_htl
//!                                            ↓
//!                                       [Peer A] ──fail──→ [Peer B] ...
//!                                            │
//!                                   accepted → headers+data → reply
//! ```
//!
//! SSKs need insert logic separate from requests:
//! - SSK blocks can *collide*: a peer may already store different data under
//!   the same key, and the preexisting block wins.
//! - SSK payloads are small (1 KiB), so data rides in ordinary messages with
//!   no bulk-transfer phase.
//! - SSKs carry a public key that only sometimes needs to be sent.

pub mod adapters;
pub mod domain;
pub mod events;
pub mod ports;
pub mod service;
pub mod testing;

pub use domain::*;
pub use events::{InsertError, InsertMessage, MessageKind, RejectReason, SendError, WaitError};
pub use ports::inbound::InsertSenderApi;
pub use service::SskInsertSender;
