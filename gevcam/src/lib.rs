/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

#![allow(
    clippy::module_name_repetitions,
    clippy::similar_names,
    clippy::missing_errors_doc
)]

//! `gevcam` implements the control plane of `GigE Vision` cameras: a reliable
//! GVCP request/reply engine over UDP, control-privilege arbitration with a
//! heartbeat supervisor, retrieval of the camera's `GenICam` register
//! description, and automatic negotiation of the stream packet size.
//!
//! The descriptor-model evaluator and the stream data plane are external
//! collaborators; their contracts are the [`genapi::GenApiCtxt`] trait and
//! [`gige::StreamParams`].

#[macro_use]
mod utils;

pub mod camera;
pub mod genapi;
pub mod gige;

pub use camera::{Camera, DeviceControl};

use std::borrow::Cow;

pub use gevcam_device::protocol::ack::GvcpError;

/// The error type for control-plane operations.
#[derive(Debug, thiserror::Error)]
pub enum ControlError {
    /// An invalid argument was passed to an operation.
    #[error("invalid parameter: {0}")]
    InvalidParameter(Cow<'static, str>),

    /// An I/O fault or another error without a more precise classification.
    #[error("unknown error: {0}")]
    Unknown(anyhow::Error),

    /// The device rejected the request with an error acknowledge. Retrying
    /// cannot change a semantic rejection, so none is attempted.
    #[error("GigEVision {operation} error ({code})")]
    Protocol {
        operation: &'static str,
        code: GvcpError,
    },

    /// No matching acknowledge arrived within the retry budget.
    #[error("GigEVision {0} timeout")]
    Timeout(&'static str),

    /// The device is not opened.
    #[error("device is not opened")]
    NotOpened,

    /// Received or supplied data does not conform to the protocol.
    #[error("invalid data: {0}")]
    InvalidData(Cow<'static, str>),

    /// Neither XML URL slot yielded a register description.
    #[error("GenICam data not found")]
    GenicamNotFound,

    /// The operation requires control privilege the handle does not hold.
    #[error("controller privilege required for streaming control")]
    NotController,

    /// The device exposes no stream channel.
    #[error("no stream channel found")]
    NoStreamChannel,
}

impl From<std::io::Error> for ControlError {
    fn from(err: std::io::Error) -> Self {
        ControlError::Unknown(err.into())
    }
}

/// A specialized `Result` type for control-plane operations.
pub type ControlResult<T> = std::result::Result<T, ControlError>;
