/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

//! Automatic negotiation of the stream packet size.
//!
//! The negotiator asks the device to emit test packets of a candidate size
//! and confirms their reception on an ephemeral UDP socket, narrowing the
//! candidate with a bounded binary search. It relies on the
//! `GevSCPSFireTestPacket` feature of the descriptor model; devices without
//! it keep their current packet size.

use std::{net::SocketAddrV4, time::Duration};

use async_std::{future, net::UdpSocket, task};
use tracing::{info, warn};

use crate::{
    genapi::{FeatureKind, GenApiCtxt},
    ControlResult,
};

use super::control_handle::ControlHandle;

/// IP and UDP header bytes that do not count towards the payload of a test
/// packet.
const PACKET_UDP_OVERHEAD: i64 = 28;

/// Absolute packet size bounds the device-advertised range is clipped
/// against.
const MINIMUM_PACKET_SIZE: i64 = 576;
const MAXIMUM_PACKET_SIZE: i64 = 16384;

/// Receive poll granularity while waiting for a test packet.
const TEST_PACKET_POLL: Duration = Duration::from_millis(10);

/// Fire attempts per probed candidate size.
const TEST_PACKET_N_TRIES: usize = 3;

/// Policy governing when the packet-size negotiation runs relative to stream
/// creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketSizeAdjustment {
    /// Never adjust the packet size.
    Never,
    /// Run the full search only if the current size fails its probe, and
    /// only for the first stream created on the handle. This is the default.
    OnFailureOnce,
    /// Run the full search only if the current size fails its probe, on
    /// every stream creation.
    OnFailure,
    /// Run the full search for the first stream created on the handle.
    Once,
    /// Run the full search on every stream creation.
    Always,
}

impl Default for PacketSizeAdjustment {
    fn default() -> Self {
        PacketSizeAdjustment::OnFailureOnce
    }
}

/// Determines the biggest packet size usable for data streaming and writes it
/// back into `GevSCPSPacketSize`.
///
/// When `exit_early` is set and the current packet size passes its probe, the
/// search is skipped and the current size returned. Devices without a
/// `GevSCPSFireTestPacket` command or boolean keep their current size.
pub fn auto_packet_size<Ctxt>(
    ctrl: &mut ControlHandle,
    ctxt: &mut Ctxt,
    exit_early: bool,
) -> ControlResult<i64>
where
    Ctxt: GenApiCtxt + ?Sized,
{
    let is_command = match ctxt.feature_kind("GevSCPSFireTestPacket") {
        Some(FeatureKind::Command) => true,
        Some(FeatureKind::Boolean) => false,
        _ => {
            info!("no GevSCPSFireTestPacket feature found");
            return ctxt.integer_value(ctrl, "GevSCPSPacketSize");
        }
    };

    let inc = ctxt
        .integer_increment(ctrl, "GevSCPSPacketSize")
        .unwrap_or(1)
        .max(1);
    let packet_size = ctxt.integer_value(ctrl, "GevSCPSPacketSize")?;
    let (minimum, maximum) = ctxt.integer_bounds(ctrl, "GevSCPSPacketSize")?;
    let max_size = MAXIMUM_PACKET_SIZE.min(maximum);
    let min_size = MINIMUM_PACKET_SIZE.max(minimum);

    if max_size < min_size || inc > max_size - min_size {
        warn!("invalid GevSCPSPacketSize properties");
        return Ok(packet_size);
    }

    let interface_addr = ctrl.interface_addr();
    let sock = task::block_on(UdpSocket::bind(SocketAddrV4::new(*interface_addr.ip(), 0)))?;
    let port = match sock.local_addr()? {
        std::net::SocketAddr::V4(addr) => addr.port(),
        _ => 0,
    };

    // Point the device's test stream at us for the duration of the search.
    ctxt.set_integer_value(ctrl, "GevSCDA", i64::from(u32::from(*interface_addr.ip())))?;
    ctxt.set_integer_value(ctrl, "GevSCPHostPort", i64::from(port))?;

    let do_not_fragment = ctxt
        .boolean_value(ctrl, "GevSCPSDoNotFragment")
        .unwrap_or(false);
    ctxt.set_boolean_value(ctrl, "GevSCPSDoNotFragment", true)?;

    let result = run_search(
        ctrl,
        ctxt,
        &sock,
        is_command,
        exit_early,
        packet_size,
        min_size,
        max_size,
        inc,
    );

    // The saved fragmentation setting is restored even when the search
    // failed.
    if let Err(err) = ctxt.set_boolean_value(ctrl, "GevSCPSDoNotFragment", do_not_fragment) {
        warn!("failed to restore GevSCPSDoNotFragment: {}", err);
    }

    result
}

#[allow(clippy::too_many_arguments)]
fn run_search<Ctxt>(
    ctrl: &mut ControlHandle,
    ctxt: &mut Ctxt,
    sock: &UdpSocket,
    is_command: bool,
    exit_early: bool,
    mut packet_size: i64,
    mut min_size: i64,
    mut max_size: i64,
    inc: i64,
) -> ControlResult<i64>
where
    Ctxt: GenApiCtxt + ?Sized,
{
    let mut buffer = vec![0; max_size as usize];

    let current_ok = test_packet_check(ctrl, ctxt, sock, &mut buffer, packet_size, is_command)?;
    if current_ok && exit_early {
        info!(
            "current packet size check successful ({} bytes)",
            packet_size
        );
        return Ok(packet_size);
    }

    let mut current_size = packet_size;
    let mut last_size = 0;

    loop {
        if current_size == last_size || min_size + inc >= max_size {
            break;
        }

        info!("try packet size = {}", current_size);
        ctxt.set_integer_value(ctrl, "GevSCPSPacketSize", current_size)?;
        // The device may quantize the requested size; search on what it
        // actually accepted.
        current_size = ctxt.integer_value(ctrl, "GevSCPSPacketSize")?;
        last_size = current_size;

        let success = test_packet_check(ctrl, ctxt, sock, &mut buffer, current_size, is_command)?;
        if success {
            packet_size = current_size;
            if current_size == max_size {
                break;
            }
            min_size = current_size;
        } else {
            max_size = current_size;
        }

        current_size = min_size + (((max_size - min_size) / 2 + 1) / inc) * inc;
    }

    ctxt.set_integer_value(ctrl, "GevSCPSPacketSize", packet_size)?;
    info!("packet size set to {} bytes", packet_size);
    Ok(packet_size)
}

/// Fires a test packet and checks its reception. Datagrams whose length is
/// not `packet_size` minus the IP/UDP overhead are discarded as late packets
/// of a previous probe.
fn test_packet_check<Ctxt>(
    ctrl: &mut ControlHandle,
    ctxt: &mut Ctxt,
    sock: &UdpSocket,
    buffer: &mut [u8],
    packet_size: i64,
    is_command: bool,
) -> ControlResult<bool>
where
    Ctxt: GenApiCtxt + ?Sized,
{
    let expected_len = (packet_size - PACKET_UDP_OVERHEAD).max(0) as usize;

    for _ in 0..TEST_PACKET_N_TRIES {
        if is_command {
            ctxt.execute_command(ctrl, "GevSCPSFireTestPacket")?;
        } else {
            ctxt.set_boolean_value(ctrl, "GevSCPSFireTestPacket", false)?;
            ctxt.set_boolean_value(ctrl, "GevSCPSFireTestPacket", true)?;
        }

        loop {
            match task::block_on(future::timeout(TEST_PACKET_POLL, sock.recv(buffer))) {
                Ok(Ok(count)) => {
                    if count == expected_len {
                        return Ok(true);
                    }
                    // Late packet of an earlier probe; keep draining.
                }
                Ok(Err(err)) => {
                    warn!("test packet reception error: {}", err);
                    break;
                }
                Err(_) => break,
            }
        }
    }

    Ok(false)
}
