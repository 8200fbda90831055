/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

#![allow(
    clippy::module_name_repetitions,
    clippy::similar_names,
    clippy::missing_errors_doc
)]

//! `gevcam-device` provides the `GigE Vision` control protocol (GVCP) codec
//! and the bootstrap register map shared by the control-plane implementation.
//!
//! Everything in this crate is pure: no sockets, no threads. The transport
//! and retry logic live in the `gevcam` crate.

pub mod protocol;
pub mod register_map;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("packet is broken: {0}")]
    InvalidPacket(std::borrow::Cow<'static, str>),
}

/// Byte order of multi-byte values in the device's register space, reported
/// through the device mode register.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Endianness {
    /// Little endian.
    LE,
    /// Big endian.
    BE,
}
