/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

//! This module contains the main entry types of `gevcam`.

use auto_impl::auto_impl;
use tracing::info;

use super::{
    genapi::{install_fallback_nodes, FromXml, GenApiCtxt},
    gige::{ControlHandle, StreamParams},
    ControlError, ControlResult,
};

/// Provides easy-to-use access to a `GenICam` compatible camera.
///
/// # Examples
/// ```no_run
/// use std::net::Ipv4Addr;
/// use gevcam::{gige::ControlHandle, Camera, DeviceControl};
///
/// # fn main() -> gevcam::ControlResult<()> {
/// let ctrl = ControlHandle::new(
///     Ipv4Addr::new(192, 168, 1, 1),
///     Ipv4Addr::new(192, 168, 1, 100),
/// )?;
/// let mut camera: Camera<_, MyGenApiCtxt> = Camera::new(ctrl);
///
/// camera.open()?;
/// let _xml = camera.load_context()?;
/// // ... Do something with the camera.
/// camera.close()?;
/// # Ok(())
/// # }
/// # use gevcam::genapi::{FallbackNode, FeatureKind, FromXml, GenApiCtxt};
/// # struct MyGenApiCtxt;
/// # impl FromXml for MyGenApiCtxt {
/// #     fn from_xml(_: &str) -> gevcam::ControlResult<Self> { Ok(MyGenApiCtxt) }
/// # }
/// # impl GenApiCtxt for MyGenApiCtxt {
/// #     fn feature_kind(&self, _: &str) -> Option<FeatureKind> { None }
/// #     fn integer_value(&mut self, _: &mut dyn DeviceControl, _: &str) -> gevcam::ControlResult<i64> { unimplemented!() }
/// #     fn set_integer_value(&mut self, _: &mut dyn DeviceControl, _: &str, _: i64) -> gevcam::ControlResult<()> { unimplemented!() }
/// #     fn integer_bounds(&mut self, _: &mut dyn DeviceControl, _: &str) -> gevcam::ControlResult<(i64, i64)> { unimplemented!() }
/// #     fn integer_increment(&mut self, _: &mut dyn DeviceControl, _: &str) -> gevcam::ControlResult<i64> { unimplemented!() }
/// #     fn boolean_value(&mut self, _: &mut dyn DeviceControl, _: &str) -> gevcam::ControlResult<bool> { unimplemented!() }
/// #     fn set_boolean_value(&mut self, _: &mut dyn DeviceControl, _: &str, _: bool) -> gevcam::ControlResult<()> { unimplemented!() }
/// #     fn execute_command(&mut self, _: &mut dyn DeviceControl, _: &str) -> gevcam::ControlResult<()> { unimplemented!() }
/// #     fn set_default_node(&mut self, _: &str, _: FallbackNode) -> bool { false }
/// # }
/// ```
#[derive(Debug)]
pub struct Camera<Ctrl, Ctxt> {
    /// Device control handle of the camera.
    pub ctrl: Ctrl,
    /// Descriptor-model context of the camera.
    pub ctxt: Option<Ctxt>,
}

impl<Ctrl, Ctxt> Camera<Ctrl, Ctxt> {
    /// Constructs a camera around a control handle. The context is built
    /// later by [`load_context`](Self::load_context).
    pub fn new(ctrl: Ctrl) -> Self {
        Self { ctrl, ctxt: None }
    }

    /// Opens the camera. Ensure calling this method before starting to use
    /// the camera.
    pub fn open(&mut self) -> ControlResult<()>
    where
        Ctrl: DeviceControl,
    {
        info!("try opening the device");
        self.ctrl.open()?;
        info!("opened the device successfully");
        Ok(())
    }

    /// Closes the camera. Make sure to call this method before the camera is
    /// dropped.
    pub fn close(&mut self) -> ControlResult<()>
    where
        Ctrl: DeviceControl,
    {
        info!("try closing the device");
        self.ctrl.close()?;
        info!("closed the device successfully");
        Ok(())
    }

    /// Loads the `GenICam` XML from the device, builds the descriptor
    /// context, and installs the fallback bootstrap vocabulary for features
    /// the camera's XML omits. Returns the XML string; once the context is
    /// built the string itself is no longer needed.
    pub fn load_context(&mut self) -> ControlResult<String>
    where
        Ctrl: DeviceControl,
        Ctxt: GenApiCtxt + FromXml,
    {
        let xml = self.ctrl.genapi()?;
        let mut ctxt = Ctxt::from_xml(&xml)?;
        install_fallback_nodes(&mut ctxt);
        self.ctxt = Some(ctxt);
        Ok(xml)
    }
}

impl<Ctxt> Camera<ControlHandle, Ctxt>
where
    Ctxt: GenApiCtxt,
{
    /// Creates a stream, negotiating the packet size according to the
    /// handle's adjustment policy. The returned parameters are consumed by
    /// the external stream data plane.
    pub fn create_stream(&mut self) -> ControlResult<StreamParams> {
        let ctxt = self
            .ctxt
            .as_mut()
            .ok_or(ControlError::InvalidParameter(
                "`GenApi` context is not loaded".into(),
            ))?;
        self.ctrl.create_stream(ctxt)
    }
}

/// This trait provides operations on the device's memory.
#[auto_impl(&mut, Box)]
pub trait DeviceControl {
    /// Opens the handle.
    fn open(&mut self) -> ControlResult<()>;

    /// Closes the handle.
    fn close(&mut self) -> ControlResult<()>;

    /// Returns `true` if the device is already opened.
    fn is_opened(&self) -> bool;

    /// Reads data from the device's memory. Read length is same as
    /// `buf.len()`. On failure the buffer is zeroed.
    fn read_mem(&mut self, address: u64, buf: &mut [u8]) -> ControlResult<()>;

    /// Reads a 32-bit register.
    fn read_reg(&mut self, address: u64) -> ControlResult<u32>;

    /// Writes data to the device's memory.
    fn write_mem(&mut self, address: u64, data: &[u8]) -> ControlResult<()>;

    /// Writes a 32-bit register.
    fn write_reg(&mut self, address: u64, value: u32) -> ControlResult<()>;

    /// Returns the `GenICam` XML string.
    fn genapi(&mut self) -> ControlResult<String>;
}
