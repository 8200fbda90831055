/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

//! Contract of the external descriptor-model evaluator, and the fallback
//! register vocabulary the control plane injects into it.
//!
//! The core never interprets `GenICam` XML itself. It hands the XML bytes to
//! an implementation of [`FromXml`], then talks to the resulting context
//! through [`GenApiCtxt`]: symbolic feature names in, register traffic out
//! through the [`DeviceControl`] port passed to every call.

use gevcam_device::register_map::{bootstrap, stream};

use crate::{camera::DeviceControl, ControlResult};

/// Interface kind a named feature exposes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeatureKind {
    Integer,
    Boolean,
    Command,
    String,
    Other,
}

/// Register access mode of a fallback definition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessMode {
    RO,
    RW,
}

/// Constructs a descriptor context from `GenICam` XML.
pub trait FromXml: Sized {
    fn from_xml(xml: &str) -> ControlResult<Self>;
}

/// Contract of the external descriptor-model evaluator.
///
/// Implementations resolve symbolic feature names to register addresses and
/// encodings, performing the actual device access through the `ctrl` port
/// handed to each call. The context is treated as read-shared by the core
/// after bootstrap.
pub trait GenApiCtxt {
    /// Returns `None` if the context has no feature with the given name.
    fn feature_kind(&self, name: &str) -> Option<FeatureKind>;

    fn integer_value(&mut self, ctrl: &mut dyn DeviceControl, name: &str) -> ControlResult<i64>;

    fn set_integer_value(
        &mut self,
        ctrl: &mut dyn DeviceControl,
        name: &str,
        value: i64,
    ) -> ControlResult<()>;

    /// Returns `(minimum, maximum)` of an integer feature.
    fn integer_bounds(
        &mut self,
        ctrl: &mut dyn DeviceControl,
        name: &str,
    ) -> ControlResult<(i64, i64)>;

    fn integer_increment(
        &mut self,
        ctrl: &mut dyn DeviceControl,
        name: &str,
    ) -> ControlResult<i64>;

    fn boolean_value(&mut self, ctrl: &mut dyn DeviceControl, name: &str) -> ControlResult<bool>;

    fn set_boolean_value(
        &mut self,
        ctrl: &mut dyn DeviceControl,
        name: &str,
        value: bool,
    ) -> ControlResult<()>;

    fn execute_command(&mut self, ctrl: &mut dyn DeviceControl, name: &str) -> ControlResult<()>;

    /// Registers a fallback definition for `name`. Returns `false` when the
    /// context already defines the name, in which case nothing changes.
    fn set_default_node(&mut self, name: &str, node: FallbackNode) -> bool;
}

/// A fallback register definition for a bootstrap feature.
///
/// Bit positions count within the host-order `u32` a register read yields,
/// bit 31 being the most significant bit of the big-endian register.
/// Definitions with `per_channel` set address stream channel registers; the
/// given address is that of channel 0 and strides by 0x40 per channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FallbackNode {
    /// NUL-terminated string register.
    StringReg { address: u32, length: u16 },
    /// Big-endian 32-bit integer register.
    IntReg {
        address: u32,
        access: AccessMode,
        per_channel: bool,
    },
    /// Contiguous bit slice of a 32-bit register, `lsb..=msb`.
    MaskedIntReg {
        address: u32,
        lsb: u8,
        msb: u8,
        access: AccessMode,
        per_channel: bool,
    },
    /// Single-bit boolean within a 32-bit register.
    BooleanReg {
        address: u32,
        bit: u8,
        access: AccessMode,
        per_channel: bool,
    },
    /// 64-bit read-only value concatenated from two 32-bit registers.
    IntConcat { high_address: u32, low_address: u32 },
    /// Plain integer held by the descriptor itself, not backed by a register.
    IntValue { value: i64, min: i64, max: i64 },
}

/// Installs the minimal `GigE Vision` bootstrap vocabulary into a freshly
/// built descriptor context.
///
/// These definitions anchor the feature set the driver requires even against
/// cameras whose XML omits them; names the camera's own XML defines are left
/// untouched.
pub fn install_fallback_nodes<Ctxt: GenApiCtxt + ?Sized>(ctxt: &mut Ctxt) {
    use AccessMode::{RO, RW};

    let sc_base = stream::base_address(0);

    let nodes = vec![
        (
            "GevCurrentIPConfigurationLLA",
            FallbackNode::BooleanReg {
                address: bootstrap::NETWORK_INTERFACE_CONFIGURATION.0,
                bit: 29,
                access: RW,
                per_channel: false,
            },
        ),
        (
            "GevCurrentIPConfigurationDHCP",
            FallbackNode::BooleanReg {
                address: bootstrap::NETWORK_INTERFACE_CONFIGURATION.0,
                bit: 30,
                access: RW,
                per_channel: false,
            },
        ),
        (
            "GevCurrentIPConfigurationPersistentIP",
            FallbackNode::BooleanReg {
                address: bootstrap::NETWORK_INTERFACE_CONFIGURATION.0,
                bit: 31,
                access: RW,
                per_channel: false,
            },
        ),
        (
            "DeviceVendorName",
            FallbackNode::StringReg {
                address: bootstrap::MANUFACTURER_NAME.0,
                length: bootstrap::MANUFACTURER_NAME.1,
            },
        ),
        (
            "DeviceModelName",
            FallbackNode::StringReg {
                address: bootstrap::MODEL_NAME.0,
                length: bootstrap::MODEL_NAME.1,
            },
        ),
        (
            "DeviceVersion",
            FallbackNode::StringReg {
                address: bootstrap::DEVICE_VERSION.0,
                length: bootstrap::DEVICE_VERSION.1,
            },
        ),
        (
            "DeviceManufacturerInfo",
            FallbackNode::StringReg {
                address: bootstrap::MANUFACTURER_INFO.0,
                length: bootstrap::MANUFACTURER_INFO.1,
            },
        ),
        (
            "DeviceID",
            FallbackNode::StringReg {
                address: bootstrap::DEVICE_ID.0,
                length: bootstrap::DEVICE_ID.1,
            },
        ),
        (
            "GevCurrentIPAddress",
            FallbackNode::IntReg {
                address: bootstrap::CURRENT_IP_ADDRESS.0,
                access: RW,
                per_channel: false,
            },
        ),
        (
            "GevCurrentSubnetMask",
            FallbackNode::IntReg {
                address: bootstrap::CURRENT_SUBNET_MASK.0,
                access: RW,
                per_channel: false,
            },
        ),
        (
            "GevCurrentDefaultGateway",
            FallbackNode::IntReg {
                address: bootstrap::CURRENT_DEFAULT_GATEWAY.0,
                access: RW,
                per_channel: false,
            },
        ),
        (
            "GevPersistentIPAddress",
            FallbackNode::IntReg {
                address: bootstrap::PERSISTENT_IP_ADDRESS.0,
                access: RW,
                per_channel: false,
            },
        ),
        (
            "GevPersistentSubnetMask",
            FallbackNode::IntReg {
                address: bootstrap::PERSISTENT_SUBNET_MASK.0,
                access: RW,
                per_channel: false,
            },
        ),
        (
            "GevPersistentDefaultGateway",
            FallbackNode::IntReg {
                address: bootstrap::PERSISTENT_DEFAULT_GATEWAY.0,
                access: RW,
                per_channel: false,
            },
        ),
        (
            "GevStreamChannelCount",
            FallbackNode::IntReg {
                address: bootstrap::NUMBER_OF_STREAM_CHANNELS.0,
                access: RO,
                per_channel: false,
            },
        ),
        (
            "GevTimestampTickFrequency",
            FallbackNode::IntConcat {
                high_address: bootstrap::TIMESTAMP_TICK_FREQUENCY_HIGH.0,
                low_address: bootstrap::TIMESTAMP_TICK_FREQUENCY_LOW.0,
            },
        ),
        (
            "GevSCPHostPort",
            FallbackNode::MaskedIntReg {
                address: sc_base + stream::STREAM_CHANNEL_PORT.0,
                lsb: 0,
                msb: 15,
                access: RW,
                per_channel: true,
            },
        ),
        (
            "GevSCPSDoNotFragment",
            FallbackNode::BooleanReg {
                address: sc_base + stream::STREAM_CHANNEL_PACKET_SIZE.0,
                bit: 30,
                access: RW,
                per_channel: true,
            },
        ),
        (
            "GevSCPSBigEndian",
            FallbackNode::BooleanReg {
                address: sc_base + stream::STREAM_CHANNEL_PACKET_SIZE.0,
                bit: 29,
                access: RW,
                per_channel: true,
            },
        ),
        (
            "GevSCPSPacketSize",
            FallbackNode::MaskedIntReg {
                address: sc_base + stream::STREAM_CHANNEL_PACKET_SIZE.0,
                lsb: 0,
                msb: 15,
                access: RW,
                per_channel: true,
            },
        ),
        (
            "GevSCDA",
            FallbackNode::IntReg {
                address: sc_base + stream::STREAM_CHANNEL_DESTINATION_ADDRESS.0,
                access: RW,
                per_channel: true,
            },
        ),
        (
            "GevSCSP",
            FallbackNode::MaskedIntReg {
                address: sc_base + stream::STREAM_CHANNEL_SOURCE_PORT.0,
                lsb: 0,
                msb: 15,
                access: RO,
                per_channel: true,
            },
        ),
        (
            "TLParamsLocked",
            FallbackNode::IntValue {
                value: 0,
                min: 0,
                max: 1,
            },
        ),
    ];

    for (name, node) in nodes {
        ctxt.set_default_node(name, node);
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;
    use crate::ControlError;

    struct NameOnlyCtxt {
        nodes: HashMap<String, FallbackNode>,
    }

    impl GenApiCtxt for NameOnlyCtxt {
        fn feature_kind(&self, name: &str) -> Option<FeatureKind> {
            self.nodes.get(name).map(|_| FeatureKind::Other)
        }

        fn integer_value(
            &mut self,
            _: &mut dyn DeviceControl,
            name: &str,
        ) -> ControlResult<i64> {
            Err(ControlError::InvalidParameter(name.to_string().into()))
        }

        fn set_integer_value(
            &mut self,
            _: &mut dyn DeviceControl,
            name: &str,
            _: i64,
        ) -> ControlResult<()> {
            Err(ControlError::InvalidParameter(name.to_string().into()))
        }

        fn integer_bounds(
            &mut self,
            _: &mut dyn DeviceControl,
            name: &str,
        ) -> ControlResult<(i64, i64)> {
            Err(ControlError::InvalidParameter(name.to_string().into()))
        }

        fn integer_increment(
            &mut self,
            _: &mut dyn DeviceControl,
            name: &str,
        ) -> ControlResult<i64> {
            Err(ControlError::InvalidParameter(name.to_string().into()))
        }

        fn boolean_value(
            &mut self,
            _: &mut dyn DeviceControl,
            name: &str,
        ) -> ControlResult<bool> {
            Err(ControlError::InvalidParameter(name.to_string().into()))
        }

        fn set_boolean_value(
            &mut self,
            _: &mut dyn DeviceControl,
            name: &str,
            _: bool,
        ) -> ControlResult<()> {
            Err(ControlError::InvalidParameter(name.to_string().into()))
        }

        fn execute_command(
            &mut self,
            _: &mut dyn DeviceControl,
            name: &str,
        ) -> ControlResult<()> {
            Err(ControlError::InvalidParameter(name.to_string().into()))
        }

        fn set_default_node(&mut self, name: &str, node: FallbackNode) -> bool {
            if self.nodes.contains_key(name) {
                return false;
            }
            self.nodes.insert(name.to_string(), node);
            true
        }
    }

    #[test]
    fn test_install_fallback_nodes() {
        let mut ctxt = NameOnlyCtxt {
            nodes: HashMap::new(),
        };
        install_fallback_nodes(&mut ctxt);

        assert_eq!(
            ctxt.nodes.get("GevSCPSPacketSize"),
            Some(&FallbackNode::MaskedIntReg {
                address: 0x0D04,
                lsb: 0,
                msb: 15,
                access: AccessMode::RW,
                per_channel: true,
            })
        );
        assert_eq!(
            ctxt.nodes.get("GevStreamChannelCount"),
            Some(&FallbackNode::IntReg {
                address: 0x0904,
                access: AccessMode::RO,
                per_channel: false,
            })
        );
        assert!(ctxt.nodes.contains_key("TLParamsLocked"));
        assert!(ctxt.nodes.contains_key("GevTimestampTickFrequency"));
        // The fallback vocabulary intentionally has no test packet trigger;
        // that feature must come from the camera's own XML.
        assert!(!ctxt.nodes.contains_key("GevSCPSFireTestPacket"));
    }

    #[test]
    fn test_existing_definitions_are_kept() {
        let mut ctxt = NameOnlyCtxt {
            nodes: HashMap::new(),
        };
        let own_definition = FallbackNode::IntReg {
            address: 0xdead_0000,
            access: AccessMode::RW,
            per_channel: false,
        };
        ctxt.set_default_node("GevCurrentIPAddress", own_definition.clone());

        install_fallback_nodes(&mut ctxt);

        assert_eq!(ctxt.nodes.get("GevCurrentIPAddress"), Some(&own_definition));
    }
}
