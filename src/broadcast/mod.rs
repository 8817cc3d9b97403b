//! Avatar info broadcast
//!
//! Turns the avatars of one repository into one bit-packed buffer per
//! observer per tick. The [`engine::BroadcastEngine`] drives the tick; the
//! other modules are its parts.

pub mod dispatcher;
pub mod engine;
pub mod error;
pub mod exceptions;
pub mod filter;
pub mod movement;
pub mod observer;
pub mod profile;
pub mod tracker;

#[cfg(test)]
mod scenarios;

pub use engine::{BroadcastEngine, TickOutput, TickStats};
pub use error::BroadcastError;
pub use profile::ProtocolProfile;
pub use tracker::Tier;
