/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

use std::net::Ipv4Addr;

/// Parameters the external stream data plane consumes when it opens its
/// receive path, produced by
/// [`ControlHandle::create_stream`](super::ControlHandle::create_stream).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamParams {
    /// Host interface address stream packets are sent to.
    pub host_addr: Ipv4Addr,
    /// Negotiated stream packet size in bytes, including the UDP/IP overhead.
    pub packet_size: u32,
}
