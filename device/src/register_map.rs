/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

use crate::Endianness;

/// (Address, Length) of registers of the Bootstrap Register Map.
pub mod bootstrap {
    pub const DEVICE_MODE: (u32, u16) = (0x0000, 4);
    pub const NETWORK_INTERFACE_CONFIGURATION: (u32, u16) = (0x0014, 4);
    pub const CURRENT_IP_ADDRESS: (u32, u16) = (0x0024, 4);
    pub const CURRENT_SUBNET_MASK: (u32, u16) = (0x0034, 4);
    pub const CURRENT_DEFAULT_GATEWAY: (u32, u16) = (0x0044, 4);
    pub const MANUFACTURER_NAME: (u32, u16) = (0x0048, 32);
    pub const MODEL_NAME: (u32, u16) = (0x0068, 32);
    pub const DEVICE_VERSION: (u32, u16) = (0x0088, 32);
    pub const MANUFACTURER_INFO: (u32, u16) = (0x00A8, 48);
    pub const DEVICE_ID: (u32, u16) = (0x00D8, 16);
    pub const FIRST_URL: (u32, u16) = (0x0200, 512);
    pub const SECOND_URL: (u32, u16) = (0x0400, 512);
    pub const PERSISTENT_IP_ADDRESS: (u32, u16) = (0x064C, 4);
    pub const PERSISTENT_SUBNET_MASK: (u32, u16) = (0x065C, 4);
    pub const PERSISTENT_DEFAULT_GATEWAY: (u32, u16) = (0x066C, 4);
    pub const NUMBER_OF_STREAM_CHANNELS: (u32, u16) = (0x0904, 4);
    pub const GVCP_CAPABILITY: (u32, u16) = (0x0934, 4);
    pub const HEARTBEAT_TIMEOUT: (u32, u16) = (0x0938, 4);
    pub const TIMESTAMP_TICK_FREQUENCY_HIGH: (u32, u16) = (0x093C, 4);
    pub const TIMESTAMP_TICK_FREQUENCY_LOW: (u32, u16) = (0x0940, 4);
    pub const CONTROL_CHANNEL_PRIVILEGE: (u32, u16) = (0x0A00, 4);
}

/// (Offset, Length) of registers of a Stream Channel Register Map, relative
/// to [`stream::base_address`].
pub mod stream {
    pub const STREAM_CHANNEL_PORT: (u32, u16) = (0x0000, 4);
    pub const STREAM_CHANNEL_PACKET_SIZE: (u32, u16) = (0x0004, 4);
    pub const STREAM_CHANNEL_DESTINATION_ADDRESS: (u32, u16) = (0x0018, 4);
    pub const STREAM_CHANNEL_SOURCE_PORT: (u32, u16) = (0x001C, 4);

    pub fn base_address(channel_index: u32) -> u32 {
        0x0D00 + 0x0040 * channel_index
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceMode(u32);

impl DeviceMode {
    pub fn from_raw(raw: u32) -> Self {
        Self(raw)
    }

    pub fn as_raw(self) -> u32 {
        self.0
    }

    pub fn endianness(self) -> Endianness {
        if self.0 & (1 << 31) == 0 {
            Endianness::LE
        } else {
            Endianness::BE
        }
    }
}

/// IP configuration flags of the first network interface.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NicConfiguration(u32);

impl NicConfiguration {
    const LLA: u32 = 1 << 29;
    const DHCP: u32 = 1 << 30;
    const PERSISTENT_IP: u32 = 1 << 31;

    pub fn from_raw(raw: u32) -> Self {
        Self(raw)
    }

    pub fn as_raw(self) -> u32 {
        self.0
    }

    pub fn is_lla_enabled(self) -> bool {
        self.0 & Self::LLA != 0
    }

    pub fn is_dhcp_enabled(self) -> bool {
        self.0 & Self::DHCP != 0
    }

    pub fn is_persistent_ip_enabled(self) -> bool {
        self.0 & Self::PERSISTENT_IP != 0
    }

    pub fn enable_persistent_ip(self) -> Self {
        Self(self.0 | Self::PERSISTENT_IP)
    }

    pub fn disable_persistent_ip(self) -> Self {
        Self(self.0 & !Self::PERSISTENT_IP)
    }

    pub fn enable_dhcp(self) -> Self {
        Self(self.0 | Self::DHCP)
    }

    pub fn disable_dhcp(self) -> Self {
        Self(self.0 & !Self::DHCP)
    }
}

/// GVCP capability flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GvcpCapability(u32);

impl GvcpCapability {
    const PENDING_ACK: u32 = 1 << 26;
    const PACKET_RESEND: u32 = 1 << 29;
    const WRITE_MEM: u32 = 1 << 30;

    pub fn from_raw(raw: u32) -> Self {
        Self(raw)
    }

    pub fn as_raw(self) -> u32 {
        self.0
    }

    pub fn is_pending_ack_supported(self) -> bool {
        self.0 & Self::PENDING_ACK != 0
    }

    pub fn is_packet_resend_supported(self) -> bool {
        self.0 & Self::PACKET_RESEND != 0
    }

    pub fn is_write_mem_supported(self) -> bool {
        self.0 & Self::WRITE_MEM != 0
    }
}

/// Control channel privilege register. The control bit grants command
/// authority to a single host; the exclusive bit additionally locks out
/// monitor access.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ControlChannelPrivilege(u32);

impl ControlChannelPrivilege {
    const CONTROL: u32 = 0x8000_0000;
    const EXCLUSIVE: u32 = 0x4000_0000;

    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_raw(raw: u32) -> Self {
        Self(raw)
    }

    pub fn as_raw(self) -> u32 {
        self.0
    }

    pub fn enable_control_access(self) -> Self {
        Self(self.0 | Self::CONTROL)
    }

    pub fn disable_control_access(self) -> Self {
        Self(self.0 & !Self::CONTROL)
    }

    pub fn is_control_access_enabled(self) -> bool {
        self.0 & Self::CONTROL != 0
    }

    pub fn enable_exclusive_access(self) -> Self {
        Self(self.0 | Self::EXCLUSIVE)
    }

    pub fn disable_exclusive_access(self) -> Self {
        Self(self.0 & !Self::EXCLUSIVE)
    }

    pub fn is_exclusive_access_enabled(self) -> bool {
        self.0 & Self::EXCLUSIVE != 0
    }
}

/// Stream channel packet size register: flag bits in the top of the word,
/// packet size in the low 16 bits.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StreamChannelPacketSize(u32);

impl StreamChannelPacketSize {
    const FIRE_TEST_PACKET: u32 = 1 << 31;
    const DO_NOT_FRAGMENT: u32 = 1 << 30;
    const BIG_ENDIAN: u32 = 1 << 29;

    pub fn from_raw(raw: u32) -> Self {
        Self(raw)
    }

    pub fn as_raw(self) -> u32 {
        self.0
    }

    pub fn packet_size(self) -> u16 {
        (self.0 & 0xffff) as u16
    }

    pub fn set_packet_size(self, size: u16) -> Self {
        Self((self.0 & !0xffff) | u32::from(size))
    }

    pub fn is_fire_test_packet_set(self) -> bool {
        self.0 & Self::FIRE_TEST_PACKET != 0
    }

    pub fn set_fire_test_packet(self) -> Self {
        Self(self.0 | Self::FIRE_TEST_PACKET)
    }

    pub fn clear_fire_test_packet(self) -> Self {
        Self(self.0 & !Self::FIRE_TEST_PACKET)
    }

    pub fn is_do_not_fragment_enabled(self) -> bool {
        self.0 & Self::DO_NOT_FRAGMENT != 0
    }

    pub fn enable_do_not_fragment(self) -> Self {
        Self(self.0 | Self::DO_NOT_FRAGMENT)
    }

    pub fn disable_do_not_fragment(self) -> Self {
        Self(self.0 & !Self::DO_NOT_FRAGMENT)
    }

    pub fn is_big_endian_enabled(self) -> bool {
        self.0 & Self::BIG_ENDIAN != 0
    }
}

/// Stream channel port register; the host UDP port occupies the low 16 bits.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StreamChannelPort(u32);

impl StreamChannelPort {
    pub fn from_raw(raw: u32) -> Self {
        Self(raw)
    }

    pub fn as_raw(self) -> u32 {
        self.0
    }

    pub fn host_port(self) -> u16 {
        (self.0 & 0xffff) as u16
    }

    pub fn set_host_port(self, port: u16) -> Self {
        Self((self.0 & !0xffff) | u32::from(port))
    }
}
