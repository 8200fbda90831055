/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

//! `GigE` device register structs.
//!
//! This module abstracts the physical configuration of the device and
//! provides an easy access to its registers.

use std::{convert::TryInto, net::Ipv4Addr, time};

pub use gevcam_device::register_map::{
    ControlChannelPrivilege, DeviceMode, GvcpCapability, StreamChannelPacketSize,
    StreamChannelPort,
};

use gevcam_device::register_map::{bootstrap, stream};

use crate::{camera::DeviceControl, ControlError, ControlResult};

/// Represents the Bootstrap register map of a `GigE` device.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Bootstrap {}

impl Bootstrap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn device_mode<Ctrl: DeviceControl + ?Sized>(
        self,
        device: &mut Ctrl,
    ) -> ControlResult<DeviceMode> {
        Ok(DeviceMode::from_raw(read_reg(
            device,
            bootstrap::DEVICE_MODE,
        )?))
    }

    pub fn gvcp_capability<Ctrl: DeviceControl + ?Sized>(
        self,
        device: &mut Ctrl,
    ) -> ControlResult<GvcpCapability> {
        Ok(GvcpCapability::from_raw(read_reg(
            device,
            bootstrap::GVCP_CAPABILITY,
        )?))
    }

    pub fn current_ip<Ctrl: DeviceControl + ?Sized>(
        self,
        device: &mut Ctrl,
    ) -> ControlResult<Ipv4Addr> {
        Ok(read_reg(device, bootstrap::CURRENT_IP_ADDRESS)?.into())
    }

    pub fn current_subnet_mask<Ctrl: DeviceControl + ?Sized>(
        self,
        device: &mut Ctrl,
    ) -> ControlResult<Ipv4Addr> {
        Ok(read_reg(device, bootstrap::CURRENT_SUBNET_MASK)?.into())
    }

    pub fn current_default_gateway<Ctrl: DeviceControl + ?Sized>(
        self,
        device: &mut Ctrl,
    ) -> ControlResult<Ipv4Addr> {
        Ok(read_reg(device, bootstrap::CURRENT_DEFAULT_GATEWAY)?.into())
    }

    pub fn persistent_ip<Ctrl: DeviceControl + ?Sized>(
        self,
        device: &mut Ctrl,
    ) -> ControlResult<Ipv4Addr> {
        Ok(read_reg(device, bootstrap::PERSISTENT_IP_ADDRESS)?.into())
    }

    pub fn persistent_subnet_mask<Ctrl: DeviceControl + ?Sized>(
        self,
        device: &mut Ctrl,
    ) -> ControlResult<Ipv4Addr> {
        Ok(read_reg(device, bootstrap::PERSISTENT_SUBNET_MASK)?.into())
    }

    pub fn persistent_default_gateway<Ctrl: DeviceControl + ?Sized>(
        self,
        device: &mut Ctrl,
    ) -> ControlResult<Ipv4Addr> {
        Ok(read_reg(device, bootstrap::PERSISTENT_DEFAULT_GATEWAY)?.into())
    }

    pub fn vendor_name<Ctrl: DeviceControl + ?Sized>(
        self,
        device: &mut Ctrl,
    ) -> ControlResult<String> {
        read_string(device, bootstrap::MANUFACTURER_NAME)
    }

    pub fn model_name<Ctrl: DeviceControl + ?Sized>(
        self,
        device: &mut Ctrl,
    ) -> ControlResult<String> {
        read_string(device, bootstrap::MODEL_NAME)
    }

    pub fn device_version<Ctrl: DeviceControl + ?Sized>(
        self,
        device: &mut Ctrl,
    ) -> ControlResult<String> {
        read_string(device, bootstrap::DEVICE_VERSION)
    }

    pub fn manufacturer_info<Ctrl: DeviceControl + ?Sized>(
        self,
        device: &mut Ctrl,
    ) -> ControlResult<String> {
        read_string(device, bootstrap::MANUFACTURER_INFO)
    }

    pub fn device_id<Ctrl: DeviceControl + ?Sized>(
        self,
        device: &mut Ctrl,
    ) -> ControlResult<String> {
        read_string(device, bootstrap::DEVICE_ID)
    }

    pub fn first_url<Ctrl: DeviceControl + ?Sized>(
        self,
        device: &mut Ctrl,
    ) -> ControlResult<String> {
        read_string(device, bootstrap::FIRST_URL)
    }

    pub fn second_url<Ctrl: DeviceControl + ?Sized>(
        self,
        device: &mut Ctrl,
    ) -> ControlResult<String> {
        read_string(device, bootstrap::SECOND_URL)
    }

    pub fn number_of_stream_channel<Ctrl: DeviceControl + ?Sized>(
        self,
        device: &mut Ctrl,
    ) -> ControlResult<u32> {
        read_reg(device, bootstrap::NUMBER_OF_STREAM_CHANNELS)
    }

    pub fn heartbeat_timeout<Ctrl: DeviceControl + ?Sized>(
        self,
        device: &mut Ctrl,
    ) -> ControlResult<time::Duration> {
        let time_raw = read_reg(device, bootstrap::HEARTBEAT_TIMEOUT)?;
        Ok(time::Duration::from_millis(time_raw as u64))
    }

    pub fn set_heartbeat_timeout<Ctrl: DeviceControl + ?Sized>(
        self,
        device: &mut Ctrl,
        value: time::Duration,
    ) -> ControlResult<()> {
        let time_raw: u32 = value.as_millis().try_into().map_err(|_| {
            ControlError::InvalidData(
                format!("too long time is specified for heartbeat timeout: {:?}", value).into(),
            )
        })?;
        write_reg(device, bootstrap::HEARTBEAT_TIMEOUT, time_raw)
    }

    pub fn timestamp_tick_frequency<Ctrl: DeviceControl + ?Sized>(
        self,
        device: &mut Ctrl,
    ) -> ControlResult<u64> {
        let high = read_reg(device, bootstrap::TIMESTAMP_TICK_FREQUENCY_HIGH)?;
        let low = read_reg(device, bootstrap::TIMESTAMP_TICK_FREQUENCY_LOW)?;
        Ok((u64::from(high) << 32) | u64::from(low))
    }

    pub fn control_channel_privilege<Ctrl: DeviceControl + ?Sized>(
        self,
        device: &mut Ctrl,
    ) -> ControlResult<ControlChannelPrivilege> {
        Ok(ControlChannelPrivilege::from_raw(read_reg(
            device,
            bootstrap::CONTROL_CHANNEL_PRIVILEGE,
        )?))
    }

    pub fn set_control_channel_privilege<Ctrl: DeviceControl + ?Sized>(
        self,
        device: &mut Ctrl,
        privilege: ControlChannelPrivilege,
    ) -> ControlResult<()> {
        write_reg(
            device,
            bootstrap::CONTROL_CHANNEL_PRIVILEGE,
            privilege.as_raw(),
        )
    }
}

/// Register map of a single stream channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamRegister {
    channel: u32,
}

impl StreamRegister {
    pub fn new(channel: u32) -> Self {
        Self { channel }
    }

    pub fn channel_port<Ctrl: DeviceControl + ?Sized>(
        self,
        device: &mut Ctrl,
    ) -> ControlResult<StreamChannelPort> {
        Ok(StreamChannelPort::from_raw(
            device.read_reg(self.address(stream::STREAM_CHANNEL_PORT))?,
        ))
    }

    pub fn set_channel_port<Ctrl: DeviceControl + ?Sized>(
        self,
        device: &mut Ctrl,
        port: StreamChannelPort,
    ) -> ControlResult<()> {
        device.write_reg(self.address(stream::STREAM_CHANNEL_PORT), port.as_raw())
    }

    pub fn packet_size<Ctrl: DeviceControl + ?Sized>(
        self,
        device: &mut Ctrl,
    ) -> ControlResult<StreamChannelPacketSize> {
        Ok(StreamChannelPacketSize::from_raw(
            device.read_reg(self.address(stream::STREAM_CHANNEL_PACKET_SIZE))?,
        ))
    }

    pub fn set_packet_size<Ctrl: DeviceControl + ?Sized>(
        self,
        device: &mut Ctrl,
        packet_size: StreamChannelPacketSize,
    ) -> ControlResult<()> {
        device.write_reg(
            self.address(stream::STREAM_CHANNEL_PACKET_SIZE),
            packet_size.as_raw(),
        )
    }

    pub fn destination_address<Ctrl: DeviceControl + ?Sized>(
        self,
        device: &mut Ctrl,
    ) -> ControlResult<Ipv4Addr> {
        Ok(device
            .read_reg(self.address(stream::STREAM_CHANNEL_DESTINATION_ADDRESS))?
            .into())
    }

    pub fn set_destination_address<Ctrl: DeviceControl + ?Sized>(
        self,
        device: &mut Ctrl,
        addr: Ipv4Addr,
    ) -> ControlResult<()> {
        device.write_reg(
            self.address(stream::STREAM_CHANNEL_DESTINATION_ADDRESS),
            addr.into(),
        )
    }

    pub fn source_port<Ctrl: DeviceControl + ?Sized>(
        self,
        device: &mut Ctrl,
    ) -> ControlResult<u16> {
        let raw = device.read_reg(self.address(stream::STREAM_CHANNEL_SOURCE_PORT))?;
        Ok((raw & 0xffff) as u16)
    }

    fn address(self, register: (u32, u16)) -> u64 {
        u64::from(stream::base_address(self.channel) + register.0)
    }
}

/// Location of the `GenICam` XML file, parsed from a bootstrap URL register.
///
/// The URL grammar is `scheme:path[;address_hex;size_hex]` with scheme one of
/// `local`, `file`, `http`/`https` (case-insensitive).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum XmlFileLocation {
    /// On-device memory region.
    Device { path: String, address: u64, size: u64 },
    /// Host filesystem path.
    Host { path: String },
    /// Web resource fetched over HTTP(S).
    Net { url: String },
}

impl XmlFileLocation {
    pub fn parse(url: &str) -> ControlResult<Self> {
        let url = url.trim_matches(char::from(0)).trim();
        let colon = url.find(':').ok_or_else(|| {
            ControlError::InvalidData(format!("no scheme in XML URL: '{}'", url).into())
        })?;
        let scheme = &url[..colon];
        let rest = &url[colon + 1..];

        match scheme.to_ascii_lowercase().as_str() {
            "local" => {
                let mut fields = rest.split(';');
                let path = fields.next().unwrap_or("").to_string();
                let address = parse_hex(fields.next().ok_or_else(|| {
                    ControlError::InvalidData("no address field in local XML URL".into())
                })?)?;
                let size = parse_hex(fields.next().ok_or_else(|| {
                    ControlError::InvalidData("no size field in local XML URL".into())
                })?)?;
                Ok(XmlFileLocation::Device {
                    path,
                    address,
                    size,
                })
            }
            "file" => {
                // Both `file:/path` and `file:///path` appear in the wild.
                let path = if rest.starts_with("//") {
                    rest[2..].to_string()
                } else {
                    rest.to_string()
                };
                Ok(XmlFileLocation::Host { path })
            }
            "http" | "https" => Ok(XmlFileLocation::Net {
                url: url.to_string(),
            }),
            _ => Err(ControlError::InvalidData(
                format!("unknown GenICam XML URL scheme: '{}'", url).into(),
            )),
        }
    }

    /// Whether the payload must be unzipped before it can be parsed.
    pub fn is_zip(&self) -> bool {
        match self {
            XmlFileLocation::Device { path, .. } => {
                path.to_ascii_lowercase().ends_with(".zip")
            }
            _ => false,
        }
    }
}

fn parse_hex(field: &str) -> ControlResult<u64> {
    let digits = field
        .trim()
        .trim_start_matches("0x")
        .trim_start_matches("0X");
    u64::from_str_radix(digits, 16).map_err(|_| {
        ControlError::InvalidData(format!("invalid hex field in XML URL: '{}'", field).into())
    })
}

fn read_reg<Ctrl: DeviceControl + ?Sized>(
    device: &mut Ctrl,
    register: (u32, u16),
) -> ControlResult<u32> {
    device.read_reg(u64::from(register.0))
}

fn write_reg<Ctrl: DeviceControl + ?Sized>(
    device: &mut Ctrl,
    register: (u32, u16),
    value: u32,
) -> ControlResult<()> {
    device.write_reg(u64::from(register.0), value)
}

fn read_string<Ctrl: DeviceControl + ?Sized>(
    device: &mut Ctrl,
    register: (u32, u16),
) -> ControlResult<String> {
    let mut buf = vec![0; register.1 as usize];
    device.read_mem(u64::from(register.0), &mut buf)?;
    let end = buf.iter().position(|c| *c == 0).unwrap_or(buf.len());
    Ok(String::from_utf8_lossy(&buf[..end]).into_owned())
}
