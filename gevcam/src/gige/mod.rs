/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

//! This module contains the low level device control implementation for
//! `GigE Vision` devices.

pub mod control_handle;
pub mod packet_size;
pub mod register_map;
pub mod stream_handle;

pub use control_handle::{ControlHandle, DeviceInfo, SharedControlHandle};
pub use packet_size::{auto_packet_size, PacketSizeAdjustment};
pub use stream_handle::StreamParams;

use gevcam_device as device;

use crate::ControlError;

impl From<device::Error> for ControlError {
    fn from(err: device::Error) -> Self {
        match err {
            device::Error::Io(err) => ControlError::Unknown(err.into()),
            device::Error::InvalidPacket(msg) => ControlError::InvalidData(msg),
        }
    }
}
