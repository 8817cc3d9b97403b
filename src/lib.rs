//! Avatar Broadcast Engine
//!
//! Builds the per-tick avatar info packet for every observer of an RS-like
//! game world: which avatars each observer tracks in high resolution, how
//! they moved, and the extended-info blocks (appearance, chat, hits, ...)
//! that fit in the packet.
//!
//! # Layout
//!
//! - [`game`] - avatar records, the index repository and its object pool
//! - [`info`] - extended-info blocks and their cached encodings
//! - [`broadcast`] - resolution tracking, admission, dispatch and the engine
//! - [`net`] - bit packing, packet assembly and a client-side decoder
//! - [`config`] / [`metrics`] - env configuration and Prometheus counters

pub mod broadcast;
pub mod config;
pub mod game;
pub mod info;
pub mod metrics;
pub mod net;
pub mod util;

pub use broadcast::{BroadcastEngine, BroadcastError, ProtocolProfile, Tier, TickOutput, TickStats};
pub use config::BroadcastConfig;
