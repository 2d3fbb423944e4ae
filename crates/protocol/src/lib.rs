//! Wire types for the skiff session protocol.
//!
//! This crate contains the serde-serializable types exchanged between a
//! client and the members of a Raft-style cluster over the session RPCs
//! (register, keep-alive, unregister).
//!
//! # Design Philosophy
//!
//! Types in this crate are:
//! * Pure data: No behavior beyond serialization/deserialization
//! * 1:1 with the wire: field names match what servers send and expect
//! * Stable: Changes only when the wire protocol changes
//!
//! The session lifecycle built on top of these types lives in `skiff-rs`.

pub mod address;
pub mod frame;
pub mod messages;

pub use address::*;
pub use frame::*;
pub use messages::*;
