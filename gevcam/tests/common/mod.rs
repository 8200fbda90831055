/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

//! In-process mock of a GigE Vision device, plus a small descriptor-model
//! evaluator over the fallback node definitions.

#![allow(dead_code)]

use std::{
    collections::HashMap,
    net::{Ipv4Addr, SocketAddr, SocketAddrV4, UdpSocket},
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex,
    },
    thread::{self, JoinHandle},
    time::Duration,
};

use gevcam::{
    genapi::{FallbackNode, FeatureKind, FromXml, GenApiCtxt},
    ControlError, ControlResult, DeviceControl,
};

pub const READ_MEM_CMD: u16 = 0x0080;
pub const WRITE_MEM_CMD: u16 = 0x0082;
pub const READ_REG_CMD: u16 = 0x0084;
pub const WRITE_REG_CMD: u16 = 0x0086;

pub const READ_MEM_ACK: u16 = 0x0081;
pub const WRITE_MEM_ACK: u16 = 0x0083;
pub const READ_REG_ACK: u16 = 0x0085;
pub const WRITE_REG_ACK: u16 = 0x0087;
pub const PENDING_ACK: u16 = 0x0089;

pub const CCP_REGISTER: u32 = 0x0A00;
pub const SCPS_REGISTER: u32 = 0x0D04;
pub const SCDA_REGISTER: u32 = 0x0D18;
pub const SCP_REGISTER: u32 = 0x0D00;

/// A GVCP command received by the mock.
#[derive(Debug, Clone)]
pub struct Request {
    pub kind: u16,
    pub packet_id: u16,
    pub payload: Vec<u8>,
}

impl Request {
    pub fn parse(buf: &[u8]) -> Option<Self> {
        if buf.len() < 8 || buf[0] != 0x42 {
            return None;
        }
        Some(Self {
            kind: u16::from_be_bytes([buf[2], buf[3]]),
            packet_id: u16::from_be_bytes([buf[6], buf[7]]),
            payload: buf[8..].to_vec(),
        })
    }

    pub fn address(&self) -> u32 {
        u32::from_be_bytes([
            self.payload[0],
            self.payload[1],
            self.payload[2],
            self.payload[3],
        ])
    }

    /// Read length of a `ReadMem` command.
    pub fn read_len(&self) -> u16 {
        u16::from_be_bytes([self.payload[6], self.payload[7]])
    }

    /// Value of a `WriteReg` command.
    pub fn value(&self) -> u32 {
        u32::from_be_bytes([
            self.payload[4],
            self.payload[5],
            self.payload[6],
            self.payload[7],
        ])
    }

    /// Data of a `WriteMem` command.
    pub fn data(&self) -> &[u8] {
        &self.payload[4..]
    }
}

pub fn ack_with(kind: u16, packet_id: u16, payload: &[u8]) -> Vec<u8> {
    let mut buf = vec![0x00, 0x00];
    buf.extend(&kind.to_be_bytes());
    buf.extend(&(payload.len() as u16).to_be_bytes());
    buf.extend(&packet_id.to_be_bytes());
    buf.extend(payload);
    buf
}

pub fn error_ack(code: u8, kind: u16, packet_id: u16) -> Vec<u8> {
    let mut buf = vec![0x80, code];
    buf.extend(&kind.to_be_bytes());
    buf.extend(&0u16.to_be_bytes());
    buf.extend(&packet_id.to_be_bytes());
    buf
}

pub fn pending_ack(packet_id: u16, timeout_ms: u16) -> Vec<u8> {
    let mut payload = vec![0x00, 0x00];
    payload.extend(&timeout_ms.to_be_bytes());
    ack_with(PENDING_ACK, packet_id, &payload)
}

pub fn read_reg_ack(packet_id: u16, value: u32) -> Vec<u8> {
    ack_with(READ_REG_ACK, packet_id, &value.to_be_bytes())
}

/// Scripted deviation from the normal register-model answer, keyed by
/// `(command kind, address)`. Reply tuples carry the gap slept before each
/// send.
#[derive(Debug, Clone)]
pub enum Behavior {
    /// Never reply.
    Silent,
    /// Reply with an error acknowledge carrying the given GVCP error code.
    ErrorAck(u8),
    /// Reply with an ack bearing the previous packet id, then the real one.
    StaleThenAck { stale_value: u32, value: u32 },
    /// Emit pending acks, then the real answer.
    PendingThenAck {
        /// `(gap before send, timeout_ms)` per pending ack.
        pendings: Vec<(Duration, u16)>,
        /// Gap between the last pending ack and the real answer.
        ack_gap: Duration,
        value: u32,
    },
}

#[derive(Default)]
pub struct CameraState {
    pub regs: HashMap<u32, u32>,
    pub mem: HashMap<u32, u8>,
    pub overrides: HashMap<(u16, u32), Behavior>,
    /// 1-based index of the `ReadMem` request answered with an error ack.
    pub read_mem_error_at: Option<usize>,
    pub read_mem_count: usize,
    /// `(kind, address, packet id)` of every received command.
    pub request_log: Vec<(u16, u32, u16)>,
    /// When set, a fire-test-packet write emits a test packet if the
    /// requested size does not exceed this value.
    pub accept_test_packet_max: Option<u32>,
}

impl CameraState {
    /// A camera with sane bootstrap defaults: little-endian, write-mem and
    /// packet-resend capable, one stream channel, 3 s heartbeat timeout.
    pub fn gige_defaults() -> Self {
        let mut state = Self::default();
        state.regs.insert(0x0000, 0); // Device mode.
        state.regs.insert(0x0934, (1 << 30) | (1 << 29)); // GVCP capability.
        state.regs.insert(0x0938, 3000); // Heartbeat timeout, ms.
        state.regs.insert(0x0904, 1); // Stream channel count.
        state
    }

    pub fn set_mem_bytes(&mut self, addr: u32, bytes: &[u8]) {
        for (i, byte) in bytes.iter().enumerate() {
            self.mem.insert(addr + i as u32, *byte);
        }
    }

    pub fn set_mem_str(&mut self, addr: u32, value: &str) {
        self.set_mem_bytes(addr, value.as_bytes());
        self.mem.insert(addr + value.len() as u32, 0);
    }

    pub fn mem_bytes(&self, addr: u32, len: usize) -> Vec<u8> {
        (0..len)
            .map(|i| *self.mem.get(&(addr + i as u32)).unwrap_or(&0))
            .collect()
    }

    pub fn request_count(&self, kind: u16, addr: u32) -> usize {
        self.request_log
            .iter()
            .filter(|(k, a, _)| *k == kind && *a == addr)
            .count()
    }
}

/// An in-process GVCP device on an ephemeral localhost port.
pub struct MockCamera {
    pub addr: SocketAddrV4,
    pub state: Arc<Mutex<CameraState>>,
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl MockCamera {
    pub fn spawn() -> Self {
        Self::spawn_with(CameraState::gige_defaults())
    }

    pub fn spawn_with(state: CameraState) -> Self {
        let sock = UdpSocket::bind((Ipv4Addr::LOCALHOST, 0)).unwrap();
        sock.set_read_timeout(Some(Duration::from_millis(50)))
            .unwrap();
        let addr = match sock.local_addr().unwrap() {
            SocketAddr::V4(addr) => addr,
            SocketAddr::V6(_) => unreachable!(),
        };

        let state = Arc::new(Mutex::new(state));
        let stop = Arc::new(AtomicBool::new(false));
        let handle = {
            let state = state.clone();
            let stop = stop.clone();
            thread::spawn(move || serve(&sock, &state, &stop))
        };

        Self {
            addr,
            state,
            stop,
            handle: Some(handle),
        }
    }
}

impl Drop for MockCamera {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
        if let Some(handle) = self.handle.take() {
            handle.join().ok();
        }
    }
}

fn serve(sock: &UdpSocket, state: &Arc<Mutex<CameraState>>, stop: &Arc<AtomicBool>) {
    let mut buf = [0u8; 2048];
    while !stop.load(Ordering::SeqCst) {
        let (count, peer) = match sock.recv_from(&mut buf) {
            Ok(received) => received,
            Err(_) => continue,
        };
        let request = match Request::parse(&buf[..count]) {
            Some(request) => request,
            None => continue,
        };
        let replies = handle_request(state, &request);
        for (gap, bytes) in replies {
            if gap > Duration::from_millis(0) {
                thread::sleep(gap);
            }
            sock.send_to(&bytes, peer).ok();
        }
    }
}

fn handle_request(
    state: &Arc<Mutex<CameraState>>,
    request: &Request,
) -> Vec<(Duration, Vec<u8>)> {
    let mut state = state.lock().unwrap();
    let addr = request.address();
    let id = request.packet_id;
    state.request_log.push((request.kind, addr, id));

    let instant = Duration::from_millis(0);

    if let Some(behavior) = state.overrides.get(&(request.kind, addr)).cloned() {
        match behavior {
            Behavior::Silent => return vec![],
            Behavior::ErrorAck(code) => {
                let ack_kind = request.kind + 1;
                return vec![(instant, error_ack(code, ack_kind, id))];
            }
            Behavior::StaleThenAck { stale_value, value } => {
                return vec![
                    (instant, read_reg_ack(id.wrapping_sub(1), stale_value)),
                    (Duration::from_millis(20), read_reg_ack(id, value)),
                ];
            }
            Behavior::PendingThenAck {
                pendings,
                ack_gap,
                value,
            } => {
                let mut replies: Vec<_> = pendings
                    .into_iter()
                    .map(|(gap, timeout_ms)| (gap, pending_ack(id, timeout_ms)))
                    .collect();
                replies.push((ack_gap, read_reg_ack(id, value)));
                return replies;
            }
        }
    }

    match request.kind {
        READ_REG_CMD => {
            let value = state.regs.get(&addr).copied().unwrap_or(0);
            vec![(instant, read_reg_ack(id, value))]
        }
        WRITE_REG_CMD => {
            let value = request.value();
            state.regs.insert(addr, value);
            if let Some((dest, payload)) = fire_test_side_effect(&*state, addr, value) {
                let sender = UdpSocket::bind((Ipv4Addr::LOCALHOST, 0)).unwrap();
                sender.send_to(&payload, dest).ok();
            }
            vec![(instant, ack_with(WRITE_REG_ACK, id, &[]))]
        }
        READ_MEM_CMD => {
            state.read_mem_count += 1;
            if state.read_mem_error_at == Some(state.read_mem_count) {
                return vec![(instant, error_ack(0x06, READ_MEM_ACK, id))];
            }
            let data = state.mem_bytes(addr, request.read_len() as usize);
            vec![(instant, ack_with(READ_MEM_ACK, id, &data))]
        }
        WRITE_MEM_CMD => {
            let data = request.data().to_vec();
            state.set_mem_bytes(addr, &data);
            vec![(instant, ack_with(WRITE_MEM_ACK, id, &addr.to_be_bytes()))]
        }
        _ => vec![],
    }
}

/// A write that sets the fire bit on a stream packet-size register emits a
/// test packet when the requested size is accepted.
fn fire_test_side_effect(
    state: &CameraState,
    addr: u32,
    value: u32,
) -> Option<(SocketAddrV4, Vec<u8>)> {
    if addr != SCPS_REGISTER || value & 0x8000_0000 == 0 {
        return None;
    }
    let accept_max = state.accept_test_packet_max?;
    let size = value & 0xffff;
    if size < 28 || size > accept_max {
        return None;
    }
    let dest_ip = Ipv4Addr::from(state.regs.get(&SCDA_REGISTER).copied().unwrap_or(0));
    let dest_port = (state.regs.get(&SCP_REGISTER).copied().unwrap_or(0) & 0xffff) as u16;
    if dest_port == 0 {
        return None;
    }
    Some((
        SocketAddrV4::new(dest_ip, dest_port),
        vec![0u8; (size - 28) as usize],
    ))
}

/// Builds a zip archive containing a single file, stored uncompressed.
pub fn zip_single(name: &str, content: &[u8]) -> Vec<u8> {
    use std::io::Write;
    use zip::{write::FileOptions, CompressionMethod, ZipWriter};

    let mut writer = ZipWriter::new(std::io::Cursor::new(Vec::new()));
    writer
        .start_file(name, FileOptions::default().compression_method(CompressionMethod::Stored))
        .unwrap();
    writer.write_all(content).unwrap();
    writer.finish().unwrap().into_inner()
}

/// Minimal descriptor-model evaluator interpreting [`FallbackNode`]
/// definitions against the device, standing in for the external `GenApi`
/// implementation.
#[derive(Default)]
pub struct TestCtxt {
    pub nodes: HashMap<String, FallbackNode>,
    /// Features exposed as commands: name to `(register, bit)` written on
    /// execution.
    pub commands: HashMap<String, (u32, u8)>,
    pub bounds: HashMap<String, (i64, i64)>,
    pub increments: HashMap<String, i64>,
    pub values: HashMap<String, i64>,
    pub xml: String,
}

impl TestCtxt {
    pub fn node(&self, name: &str) -> ControlResult<FallbackNode> {
        self.nodes.get(name).cloned().ok_or_else(|| {
            ControlError::InvalidParameter(format!("no feature named '{}'", name).into())
        })
    }
}

impl FromXml for TestCtxt {
    fn from_xml(xml: &str) -> ControlResult<Self> {
        let mut ctxt = Self::default();
        ctxt.xml = xml.to_string();
        Ok(ctxt)
    }
}

impl GenApiCtxt for TestCtxt {
    fn feature_kind(&self, name: &str) -> Option<FeatureKind> {
        if self.commands.contains_key(name) {
            return Some(FeatureKind::Command);
        }
        self.nodes.get(name).map(|node| match node {
            FallbackNode::StringReg { .. } => FeatureKind::String,
            FallbackNode::BooleanReg { .. } => FeatureKind::Boolean,
            _ => FeatureKind::Integer,
        })
    }

    fn integer_value(&mut self, ctrl: &mut dyn DeviceControl, name: &str) -> ControlResult<i64> {
        match self.node(name)? {
            FallbackNode::IntReg { address, .. } => {
                Ok(i64::from(ctrl.read_reg(u64::from(address))?))
            }
            FallbackNode::MaskedIntReg {
                address, lsb, msb, ..
            } => {
                let raw = ctrl.read_reg(u64::from(address))?;
                Ok(i64::from((raw >> lsb) & field_mask(lsb, msb)))
            }
            FallbackNode::IntConcat {
                high_address,
                low_address,
            } => {
                let high = ctrl.read_reg(u64::from(high_address))?;
                let low = ctrl.read_reg(u64::from(low_address))?;
                Ok(((u64::from(high) << 32) | u64::from(low)) as i64)
            }
            FallbackNode::IntValue { value, .. } => {
                Ok(*self.values.get(name).unwrap_or(&value))
            }
            _ => Err(ControlError::InvalidParameter(
                format!("'{}' is not an integer feature", name).into(),
            )),
        }
    }

    fn set_integer_value(
        &mut self,
        ctrl: &mut dyn DeviceControl,
        name: &str,
        value: i64,
    ) -> ControlResult<()> {
        match self.node(name)? {
            FallbackNode::IntReg { address, .. } => {
                ctrl.write_reg(u64::from(address), value as u32)
            }
            FallbackNode::MaskedIntReg {
                address, lsb, msb, ..
            } => {
                let mask = field_mask(lsb, msb);
                let raw = ctrl.read_reg(u64::from(address))?;
                let raw = (raw & !(mask << lsb)) | (((value as u32) & mask) << lsb);
                ctrl.write_reg(u64::from(address), raw)
            }
            FallbackNode::IntValue { .. } => {
                self.values.insert(name.to_string(), value);
                Ok(())
            }
            _ => Err(ControlError::InvalidParameter(
                format!("'{}' is not a writable integer feature", name).into(),
            )),
        }
    }

    fn integer_bounds(
        &mut self,
        _ctrl: &mut dyn DeviceControl,
        name: &str,
    ) -> ControlResult<(i64, i64)> {
        if let Some(bounds) = self.bounds.get(name) {
            return Ok(*bounds);
        }
        if let FallbackNode::IntValue { min, max, .. } = self.node(name)? {
            return Ok((min, max));
        }
        Ok((0, i64::max_value()))
    }

    fn integer_increment(
        &mut self,
        _ctrl: &mut dyn DeviceControl,
        name: &str,
    ) -> ControlResult<i64> {
        Ok(*self.increments.get(name).unwrap_or(&1))
    }

    fn boolean_value(&mut self, ctrl: &mut dyn DeviceControl, name: &str) -> ControlResult<bool> {
        match self.node(name)? {
            FallbackNode::BooleanReg { address, bit, .. } => {
                let raw = ctrl.read_reg(u64::from(address))?;
                Ok(raw & (1 << bit) != 0)
            }
            _ => Err(ControlError::InvalidParameter(
                format!("'{}' is not a boolean feature", name).into(),
            )),
        }
    }

    fn set_boolean_value(
        &mut self,
        ctrl: &mut dyn DeviceControl,
        name: &str,
        value: bool,
    ) -> ControlResult<()> {
        match self.node(name)? {
            FallbackNode::BooleanReg { address, bit, .. } => {
                let raw = ctrl.read_reg(u64::from(address))?;
                let raw = if value {
                    raw | (1 << bit)
                } else {
                    raw & !(1 << bit)
                };
                ctrl.write_reg(u64::from(address), raw)
            }
            _ => Err(ControlError::InvalidParameter(
                format!("'{}' is not a writable boolean feature", name).into(),
            )),
        }
    }

    fn execute_command(&mut self, ctrl: &mut dyn DeviceControl, name: &str) -> ControlResult<()> {
        let (address, bit) = *self.commands.get(name).ok_or_else(|| {
            ControlError::InvalidParameter(format!("no command named '{}'", name).into())
        })?;
        let raw = ctrl.read_reg(u64::from(address))?;
        ctrl.write_reg(u64::from(address), raw | (1 << bit))
    }

    fn set_default_node(&mut self, name: &str, node: FallbackNode) -> bool {
        if self.nodes.contains_key(name) {
            return false;
        }
        self.nodes.insert(name.to_string(), node);
        true
    }
}

fn field_mask(lsb: u8, msb: u8) -> u32 {
    let width = msb - lsb + 1;
    if width >= 32 {
        u32::max_value()
    } else {
        (1u32 << width) - 1
    }
}
