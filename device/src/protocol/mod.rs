/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

//! GVCP packet codec.
//!
//! [`cmd`] builds command frames sent to the device, [`ack`] parses
//! acknowledge frames received from it. All multi-byte header fields are
//! big-endian on the wire.

pub mod ack;
pub mod cmd;

/// Well-known UDP port a device listens on for control traffic.
pub const GVCP_PORT: u16 = 3956;

/// Length of a GVCP header in bytes.
pub const GVCP_HEADER_LENGTH: usize = 8;

/// Maximum number of data bytes a single `ReadMem`/`WriteMem` packet may
/// carry. Larger transfers must be split into multiple transactions.
pub const GVCP_DATA_SIZE_MAX: usize = 536;

/// Packet type octet, the first byte of every GVCP frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketType {
    /// Command sent by the host.
    Cmd,
    /// Normal acknowledge.
    Ack,
    /// Error acknowledge; the per-command error code travels in the flags
    /// byte.
    Error,
    /// Error acknowledge of an unspecified class.
    UnknownError,
}

impl PacketType {
    pub fn from_raw(raw: u8) -> Option<Self> {
        match raw {
            0x42 => Some(PacketType::Cmd),
            0x00 => Some(PacketType::Ack),
            0x80 => Some(PacketType::Error),
            0x8f => Some(PacketType::UnknownError),
            _ => None,
        }
    }

    pub fn as_raw(self) -> u8 {
        match self {
            PacketType::Cmd => 0x42,
            PacketType::Ack => 0x00,
            PacketType::Error => 0x80,
            PacketType::UnknownError => 0x8f,
        }
    }
}

/// Advances the rotating packet id. Id zero is reserved and skipped on
/// wraparound.
pub fn next_packet_id(packet_id: u16) -> u16 {
    if packet_id == u16::max_value() {
        1
    } else {
        packet_id + 1
    }
}
