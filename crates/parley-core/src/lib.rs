//! # parley-core
//!
//! In-memory pub/sub engine for the Parley chat backend.
//!
//! This crate provides the fundamental building blocks:
//!
//! - **Hub** - Registry of live rooms, keyed by room UUID
//! - **Room** - Membership set and fan-out logic for one chat channel
//! - **Client** - Read/write pumps and bounded outbound queue for one connection
//! - **BroadcastPool** - Worker pool that takes over fan-out for large rooms
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐     ┌─────────────┐     ┌─────────────┐
//! │  Connection │────▶│     Hub     │────▶│    Room     │
//! └─────────────┘     └─────────────┘     └──────┬──────┘
//!                                                │ membership > threshold
//!                                                ▼
//!                                         ┌───────────────┐
//!                                         │ BroadcastPool │
//!                                         └───────────────┘
//! ```
//!
//! Rooms start in direct fan-out mode: the broadcasting path enqueues into
//! each member's outbound queue itself. Once membership crosses the
//! activation threshold, fan-out moves to a fixed worker pool and never
//! reverts. Every producer-to-consumer handoff is a bounded queue with
//! drop-on-full semantics; a slow consumer loses messages instead of
//! stalling the room.

pub mod client;
pub mod connection;
pub mod hub;
pub mod pool;
pub mod room;
pub mod store;

pub use client::{Client, ClientId, Identity, DEFAULT_OUTBOUND_CAPACITY};
pub use connection::{ConnectionError, FrameReceiver, FrameSender};
pub use hub::{Hub, HubConfig, DEFAULT_ROOM_ID};
pub use pool::{BroadcastJob, BroadcastPool};
pub use room::{format_with_author, Room};
pub use store::{MessageStore, StoreError};
