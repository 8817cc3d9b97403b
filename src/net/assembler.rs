//! Observer packet assembly
//!
//! Concatenates the padded bit section and the extended-info byte section
//! into the buffer handed to the transport layer.
//!
//! Format: [bit section, zero-padded to a byte][extended-info entries]

use crate::broadcast::error::BroadcastError;
use crate::info::ObserverId;
use crate::net::bits::BitWriter;

/// Per-packet counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PacketStats {
    /// High-resolution entries with movement or extended info
    pub active: u32,
    /// High-resolution entries written as a single idle bit
    pub idle: u32,
    pub removals: u32,
    pub adds: u32,
    /// Entries whose extended info was written
    pub info_written: u32,
    /// Entries whose extended info was refused by the admission filter
    pub info_deferred: u32,
    /// Entries whose extended info failed to encode
    pub info_faults: u32,
    /// Size of the bit section in bytes
    pub bit_bytes: u32,
    /// Size of the extended-info section in bytes
    pub info_bytes: u32,
}

/// One finished buffer for one observer and tick
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObserverPacket {
    pub observer: ObserverId,
    pub tick: u32,
    pub payload: Vec<u8>,
    pub stats: PacketStats,
}

impl ObserverPacket {
    pub fn len(&self) -> usize {
        self.payload.len()
    }

    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }
}

/// Assemble a packet, refusing anything above `hard_capacity`
pub fn assemble(
    observer: ObserverId,
    tick: u32,
    bits: &mut BitWriter,
    extended_info: &[u8],
    hard_capacity: usize,
    mut stats: PacketStats,
) -> Result<ObserverPacket, BroadcastError> {
    let bit_bytes = bits.byte_len();
    let required = bit_bytes + extended_info.len();
    if required > hard_capacity {
        return Err(BroadcastError::CapacityExceeded {
            observer,
            required,
            capacity: hard_capacity,
        });
    }

    let mut payload = Vec::with_capacity(required);
    bits.finish_into(&mut payload);
    payload.extend_from_slice(extended_info);

    stats.bit_bytes = bit_bytes as u32;
    stats.info_bytes = extended_info.len() as u32;
    Ok(ObserverPacket {
        observer,
        tick,
        payload,
        stats,
    })
}
