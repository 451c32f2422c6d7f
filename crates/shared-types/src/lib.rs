//! # Shared Types Crate
//!
//! Cross-subsystem vocabulary for the overlay node. Every subsystem speaks in
//! terms of these types, so they are defined once here rather than in any one
//! crate.
//!
//! ## Design Principles
//!
//! - **Single Source of Truth**: identifiers and routing coordinates are
//!   defined here and re-exported everywhere.
//! - **No protocol logic**: this crate holds values and the arithmetic that
//!   belongs to them (e.g. circular distance); behavior stays in the
//!   subsystems.

pub mod entities;

pub use entities::{Hash, Location, Uid};
