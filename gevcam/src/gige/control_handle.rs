/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

//! Low level device control implementation for `GigE Vision` devices.
//!
//! [`ControlHandle`] owns the GVCP channel to one camera: a UDP socket bound
//! to the host interface, the rotating packet-id counter, and the retry
//! engine that turns the unreliable datagram exchange into a reliable
//! request/acknowledge transaction. Opening the handle acquires the device's
//! control privilege and starts the heartbeat supervisor that watches it.

use std::{
    cmp,
    convert::TryInto,
    net::{Ipv4Addr, SocketAddrV4},
    sync::{Arc, Mutex},
    thread,
    time::{Duration, Instant},
};

use async_std::{channel, future, net::UdpSocket, task};
use futures_channel::oneshot;
use futures_util::{select, FutureExt};
use tracing::{debug, error, info, warn};

use gevcam_device::{
    protocol::{
        ack,
        cmd::{self, CommandData},
        next_packet_id, PacketType, GVCP_DATA_SIZE_MAX, GVCP_HEADER_LENGTH, GVCP_PORT,
    },
    register_map::bootstrap,
    Endianness,
};

use crate::{camera::DeviceControl, genapi::GenApiCtxt, utils::unzip_genxml, ControlError, ControlResult};

use super::{
    packet_size::{auto_packet_size, PacketSizeAdjustment},
    register_map::{Bootstrap, ControlChannelPrivilege, GvcpCapability, XmlFileLocation},
    stream_handle::StreamParams,
};

/// Default number of attempts for a GVCP transaction.
const GVCP_N_RETRIES_DEFAULT: u16 = 3;

/// Default timeout of a single GVCP attempt.
const GVCP_TIMEOUT_DEFAULT: Duration = Duration::from_millis(1000);

/// Absolute ceiling on the time a single transaction may be deferred by
/// successive pending acknowledges.
const PENDING_ACK_CEILING: Duration = Duration::from_secs(30);

/// Heartbeat period used when the device reports no heartbeat timeout.
const HEARTBEAT_PERIOD_DEFAULT: Duration = Duration::from_secs(1);

/// Window during which a failed privilege poll is retried before the
/// privilege is considered lost.
const HEARTBEAT_RETRY_TIMEOUT: Duration = Duration::from_millis(500);

/// Delay between two privilege poll retries.
const HEARTBEAT_RETRY_DELAY: Duration = Duration::from_millis(10);

/// Scratch buffer size, larger than any acknowledge the codec can produce.
const GVCP_BUFFER_SIZE: usize = 1024;

/// Start near the end of the circular counter so id wraparound is exercised
/// early in a session's life.
const PACKET_ID_INITIAL: u16 = 65300;

/// Handler invoked by the heartbeat supervisor when the control privilege is
/// observed lost.
pub type ControlLostHandler = Box<dyn Fn() + Send + 'static>;

/// Identification strings read from the bootstrap register map.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceInfo {
    pub vendor_name: String,
    pub model_name: String,
    pub device_version: String,
    pub manufacturer_info: String,
    pub device_id: String,
}

/// This handle provides the low level API to read and write data from a
/// `GigE Vision` device.
pub struct ControlHandle {
    inner: Arc<Mutex<ControlHandleInner>>,
    event_tx: Option<channel::Sender<HeartbeatEvent>>,
    completion_rx: Option<oneshot::Receiver<()>>,
    control_lost_handler: Arc<Mutex<Option<ControlLostHandler>>>,
    packet_size_adjustment: PacketSizeAdjustment,
    first_stream_created: bool,
}

impl ControlHandle {
    /// Creates a handle bound to `interface_addr`, addressing the device's
    /// well-known GVCP port.
    pub fn new(interface_addr: Ipv4Addr, device_addr: Ipv4Addr) -> ControlResult<Self> {
        Self::connect(
            SocketAddrV4::new(interface_addr, 0),
            SocketAddrV4::new(device_addr, GVCP_PORT),
        )
    }

    /// Creates a handle with explicit socket addresses, for devices answering
    /// on a non-standard control port.
    pub fn connect(
        interface_addr: SocketAddrV4,
        device_addr: SocketAddrV4,
    ) -> ControlResult<Self> {
        let inner = task::block_on(ControlHandleInner::new(interface_addr, device_addr))?;
        Ok(Self {
            inner: Arc::new(Mutex::new(inner)),
            event_tx: None,
            completion_rx: None,
            control_lost_handler: Arc::new(Mutex::new(None)),
            packet_size_adjustment: PacketSizeAdjustment::default(),
            first_stream_created: false,
        })
    }

    /// Timeout duration of each transaction attempt.
    #[must_use]
    pub fn timeout(&self) -> Duration {
        self.inner.lock().unwrap().config.timeout
    }

    /// Sets the timeout duration of each transaction attempt.
    pub fn set_timeout(&mut self, timeout: Duration) {
        self.inner.lock().unwrap().config.timeout = timeout;
    }

    /// Number of attempts before a transaction is reported as timed out.
    #[must_use]
    pub fn retry_count(&self) -> u16 {
        self.inner.lock().unwrap().config.retry_count
    }

    /// Sets the number of attempts before a transaction is reported as timed
    /// out.
    pub fn set_retry_count(&mut self, count: u16) {
        self.inner.lock().unwrap().config.retry_count = count;
    }

    /// Sets the policy governing when the packet-size negotiation runs
    /// relative to stream creation.
    pub fn set_packet_size_adjustment(&mut self, adjustment: PacketSizeAdjustment) {
        self.packet_size_adjustment = adjustment;
    }

    /// Registers the observer notified when the heartbeat supervisor detects
    /// loss of the control privilege.
    pub fn set_control_lost_handler(&mut self, handler: impl Fn() + Send + 'static) {
        *self.control_lost_handler.lock().unwrap() = Some(Box::new(handler));
    }

    /// Whether this handle currently holds the device's control privilege.
    #[must_use]
    pub fn is_controller(&self) -> bool {
        self.inner.lock().unwrap().is_controller
    }

    /// Whether the device reported big-endian register layout at open.
    #[must_use]
    pub fn is_big_endian_device(&self) -> bool {
        self.inner.lock().unwrap().is_big_endian_device
    }

    /// Whether the device advertises stream packet resend support.
    #[must_use]
    pub fn is_packet_resend_supported(&self) -> bool {
        self.inner.lock().unwrap().is_packet_resend_supported
    }

    /// Whether the device advertises write-memory support. `false` until the
    /// capability register has been read at open.
    #[must_use]
    pub fn is_write_mem_supported(&self) -> bool {
        self.inner
            .lock()
            .unwrap()
            .capability
            .map_or(false, |capability| capability.is_write_mem_supported())
    }

    /// Acquires the device's control channel privilege.
    pub fn take_control(&mut self) -> ControlResult<()> {
        self.inner.lock().unwrap().take_control()
    }

    /// Relinquishes the device's control channel privilege.
    pub fn leave_control(&mut self) -> ControlResult<()> {
        self.inner.lock().unwrap().leave_control()
    }

    /// Writes the device heartbeat timeout and re-paces the running
    /// supervisor accordingly.
    pub fn set_heartbeat_timeout(&mut self, timeout: Duration) -> ControlResult<()> {
        unwrap_or_log!(
            Bootstrap::new().set_heartbeat_timeout(&mut *self.inner.lock().unwrap(), timeout)
        );
        if let Some(tx) = self.event_tx.as_ref() {
            tx.try_send(HeartbeatEvent::TimeoutChanged(heartbeat_period(timeout)))
                .ok();
        }
        Ok(())
    }

    /// Returns the device's timestamp tick frequency in Hz.
    pub fn timestamp_tick_frequency(&mut self) -> ControlResult<u64> {
        Bootstrap::new().timestamp_tick_frequency(&mut *self.inner.lock().unwrap())
    }

    /// Reads the identification strings from the bootstrap register map.
    pub fn device_info(&mut self) -> ControlResult<DeviceInfo> {
        let mut inner = self.inner.lock().unwrap();
        let bs = Bootstrap::new();
        Ok(DeviceInfo {
            vendor_name: bs.vendor_name(&mut *inner)?,
            model_name: bs.model_name(&mut *inner)?,
            device_version: bs.device_version(&mut *inner)?,
            manufacturer_info: bs.manufacturer_info(&mut *inner)?,
            device_id: bs.device_id(&mut *inner)?,
        })
    }

    /// Reads the current IP address, subnet mask and default gateway of the
    /// device.
    pub fn current_ip(&mut self) -> ControlResult<(Ipv4Addr, Ipv4Addr, Ipv4Addr)> {
        let mut inner = self.inner.lock().unwrap();
        let bs = Bootstrap::new();
        Ok((
            bs.current_ip(&mut *inner)?,
            bs.current_subnet_mask(&mut *inner)?,
            bs.current_default_gateway(&mut *inner)?,
        ))
    }

    /// Reads the persistent IP address, subnet mask and default gateway of
    /// the device.
    pub fn persistent_ip(&mut self) -> ControlResult<(Ipv4Addr, Ipv4Addr, Ipv4Addr)> {
        let mut inner = self.inner.lock().unwrap();
        let bs = Bootstrap::new();
        Ok((
            bs.persistent_ip(&mut *inner)?,
            bs.persistent_subnet_mask(&mut *inner)?,
            bs.persistent_default_gateway(&mut *inner)?,
        ))
    }

    /// Creates a stream: validates the channel count and the control
    /// privilege, runs the packet-size negotiation according to the
    /// adjustment policy, and yields the parameters the stream data plane
    /// consumes.
    pub fn create_stream<Ctxt: GenApiCtxt + ?Sized>(
        &mut self,
        ctxt: &mut Ctxt,
    ) -> ControlResult<StreamParams> {
        let n_stream_channels = ctxt.integer_value(self, "GevStreamChannelCount")?;
        info!("number of stream channels = {}", n_stream_channels);
        if n_stream_channels < 1 {
            return Err(ControlError::NoStreamChannel);
        }
        if !self.is_controller() {
            warn!("can't create stream without control access");
            return Err(ControlError::NotController);
        }

        let adjustment = self.packet_size_adjustment;
        let run_search = match adjustment {
            PacketSizeAdjustment::Never => false,
            PacketSizeAdjustment::Once | PacketSizeAdjustment::OnFailureOnce => {
                !self.first_stream_created
            }
            PacketSizeAdjustment::Always | PacketSizeAdjustment::OnFailure => true,
        };
        if run_search {
            let exit_early = matches!(
                adjustment,
                PacketSizeAdjustment::OnFailure | PacketSizeAdjustment::OnFailureOnce
            );
            auto_packet_size(self, ctxt, exit_early)?;
        }

        let packet_size = ctxt.integer_value(self, "GevSCPSPacketSize")?;
        let host_addr = *self.interface_addr().ip();
        self.first_stream_created = true;
        Ok(StreamParams {
            host_addr,
            packet_size: packet_size as u32,
        })
    }

    pub(super) fn interface_addr(&self) -> SocketAddrV4 {
        self.inner.lock().unwrap().interface_addr
    }
}

impl DeviceControl for ControlHandle {
    fn open(&mut self) -> ControlResult<()> {
        if self.is_opened() {
            return Ok(());
        }
        debug!("opening camera");

        let period = {
            let mut inner = self.inner.lock().unwrap();
            unwrap_or_log!(inner.open());
            let timeout = Bootstrap::new()
                .heartbeat_timeout(&mut *inner)
                .unwrap_or_else(|_| Duration::from_millis(0));
            heartbeat_period(timeout)
        };
        debug!("heartbeat period: {:?}", period);

        let (event_tx, event_rx) = channel::unbounded();
        let (completion_tx, completion_rx) = oneshot::channel();
        let heartbeat_loop = HeartbeatLoop {
            inner: self.inner.clone(),
            period,
            event_rx,
            handler: self.control_lost_handler.clone(),
        };

        self.event_tx = Some(event_tx);
        self.completion_rx = Some(completion_rx);

        thread::spawn(move || task::block_on(heartbeat_loop.run(completion_tx)));
        Ok(())
    }

    fn close(&mut self) -> ControlResult<()> {
        // The supervisor must be joined before the control privilege is
        // released and the channel torn down.
        if let (Some(event_tx), Some(completion_rx)) =
            (self.event_tx.take(), self.completion_rx.take())
        {
            event_tx.try_send(HeartbeatEvent::ChannelClosed).ok();
            task::block_on(completion_rx).ok();
        }

        unwrap_or_log!(self.inner.lock().unwrap().close());
        Ok(())
    }

    fn is_opened(&self) -> bool {
        self.inner.lock().unwrap().is_opened
    }

    fn read_mem(&mut self, address: u64, buf: &mut [u8]) -> ControlResult<()> {
        let mut inner = self.inner.lock().unwrap();
        unwrap_or_log!(assert_open(&inner));
        unwrap_or_log!(inner.read_mem(address, buf));
        Ok(())
    }

    fn read_reg(&mut self, address: u64) -> ControlResult<u32> {
        let mut inner = self.inner.lock().unwrap();
        unwrap_or_log!(assert_open(&inner));
        Ok(unwrap_or_log!(inner.read_reg(address)))
    }

    fn write_mem(&mut self, address: u64, data: &[u8]) -> ControlResult<()> {
        let mut inner = self.inner.lock().unwrap();
        unwrap_or_log!(assert_open(&inner));
        unwrap_or_log!(inner.write_mem(address, data));
        Ok(())
    }

    fn write_reg(&mut self, address: u64, value: u32) -> ControlResult<()> {
        let mut inner = self.inner.lock().unwrap();
        unwrap_or_log!(assert_open(&inner));
        unwrap_or_log!(inner.write_reg(address, value));
        Ok(())
    }

    fn genapi(&mut self) -> ControlResult<String> {
        let mut inner = self.inner.lock().unwrap();
        unwrap_or_log!(assert_open(&inner));
        Ok(unwrap_or_log!(inner.genapi()))
    }
}

impl Drop for ControlHandle {
    fn drop(&mut self) {
        if let Err(err) = self.close() {
            error!(?err);
        }
    }
}

/// Thread safe, clonable version of [`ControlHandle`].
#[derive(Clone)]
pub struct SharedControlHandle(Arc<Mutex<ControlHandle>>);

impl From<ControlHandle> for SharedControlHandle {
    fn from(handle: ControlHandle) -> Self {
        Self(Arc::new(Mutex::new(handle)))
    }
}

impl SharedControlHandle {
    /// Thread safe version of [`ControlHandle::is_controller`].
    #[must_use]
    pub fn is_controller(&self) -> bool {
        self.0.lock().unwrap().is_controller()
    }
}

impl DeviceControl for SharedControlHandle {
    fn open(&mut self) -> ControlResult<()> {
        self.0.lock().unwrap().open()
    }

    fn close(&mut self) -> ControlResult<()> {
        self.0.lock().unwrap().close()
    }

    fn is_opened(&self) -> bool {
        self.0.lock().unwrap().is_opened()
    }

    fn read_mem(&mut self, address: u64, buf: &mut [u8]) -> ControlResult<()> {
        self.0.lock().unwrap().read_mem(address, buf)
    }

    fn read_reg(&mut self, address: u64) -> ControlResult<u32> {
        self.0.lock().unwrap().read_reg(address)
    }

    fn write_mem(&mut self, address: u64, data: &[u8]) -> ControlResult<()> {
        self.0.lock().unwrap().write_mem(address, data)
    }

    fn write_reg(&mut self, address: u64, value: u32) -> ControlResult<()> {
        self.0.lock().unwrap().write_reg(address, value)
    }

    fn genapi(&mut self) -> ControlResult<String> {
        self.0.lock().unwrap().genapi()
    }
}

fn assert_open(inner: &ControlHandleInner) -> ControlResult<()> {
    if inner.is_opened {
        Ok(())
    } else {
        Err(ControlError::NotOpened)
    }
}

fn heartbeat_period(timeout: Duration) -> Duration {
    if timeout == Duration::from_millis(0) {
        HEARTBEAT_PERIOD_DEFAULT
    } else {
        timeout / 3
    }
}

#[derive(Debug, Clone)]
struct ConnectionConfig {
    /// Timeout duration of each transaction attempt.
    timeout: Duration,

    /// Number of attempts before a transaction is reported as timed out.
    retry_count: u16,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            timeout: GVCP_TIMEOUT_DEFAULT,
            retry_count: GVCP_N_RETRIES_DEFAULT,
        }
    }
}

#[derive(Debug)]
struct ControlHandleInner {
    sock: UdpSocket,
    interface_addr: SocketAddrV4,
    device_addr: SocketAddrV4,
    config: ConnectionConfig,
    /// Packet id of the outstanding request.
    next_packet_id: u16,
    /// Scratch buffer acknowledges are received into.
    buffer: Vec<u8>,
    capability: Option<GvcpCapability>,
    is_big_endian_device: bool,
    is_packet_resend_supported: bool,
    is_controller: bool,
    is_opened: bool,
    /// XML retained after the first successful bootstrap.
    genicam_xml: Option<String>,
}

impl ControlHandleInner {
    async fn new(
        interface_addr: SocketAddrV4,
        device_addr: SocketAddrV4,
    ) -> ControlResult<Self> {
        let sock = UdpSocket::bind(interface_addr)
            .await
            .map_err(|err| ControlError::Unknown(err.into()))?;
        sock.connect(device_addr)
            .await
            .map_err(|err| ControlError::Unknown(err.into()))?;
        let interface_addr = match sock.local_addr() {
            Ok(std::net::SocketAddr::V4(addr)) => addr,
            _ => interface_addr,
        };
        info!("interface address = {}", interface_addr);
        info!("device address = {}", device_addr);

        Ok(Self {
            sock,
            interface_addr,
            device_addr,
            config: ConnectionConfig::default(),
            next_packet_id: PACKET_ID_INITIAL,
            buffer: vec![0; GVCP_BUFFER_SIZE],
            capability: None,
            is_big_endian_device: false,
            is_packet_resend_supported: false,
            is_controller: false,
            is_opened: false,
            genicam_xml: None,
        })
    }

    fn take_control(&mut self) -> ControlResult<()> {
        let ccp = ControlChannelPrivilege::new().enable_control_access();
        match Bootstrap::new().set_control_channel_privilege(self, ccp) {
            Ok(()) => {
                self.is_controller = true;
                Ok(())
            }
            Err(err) => {
                warn!("can't get control access");
                Err(err)
            }
        }
    }

    fn leave_control(&mut self) -> ControlResult<()> {
        match Bootstrap::new().set_control_channel_privilege(self, ControlChannelPrivilege::new())
        {
            Ok(()) => {
                self.is_controller = false;
                Ok(())
            }
            Err(err) => {
                warn!("can't relinquish control access");
                Err(err)
            }
        }
    }

    fn capability(&mut self) -> ControlResult<GvcpCapability> {
        if let Some(capability) = self.capability {
            return Ok(capability);
        }
        let capability = Bootstrap::new().gvcp_capability(self)?;
        self.capability = Some(capability);
        Ok(capability)
    }

    /// Sends one command and classifies the answer, per the GVCP reliability
    /// rules. Returns the received acknowledge length; the acknowledge bytes
    /// are left in `self.buffer`.
    fn transact<T: CommandData>(&mut self, cmd: T, expected_ack_size: usize) -> ControlResult<usize> {
        let kind = cmd.kind();
        self.next_packet_id = next_packet_id(self.next_packet_id);
        let packet = cmd.finalize(self.next_packet_id);

        let mut cmd_buf = Vec::with_capacity(packet.length());
        packet.serialize(&mut cmd_buf)?;

        task::block_on(self.exchange(&cmd_buf, kind, expected_ack_size))
    }

    async fn exchange(
        &mut self,
        cmd_buf: &[u8],
        kind: cmd::CommandKind,
        expected_ack_size: usize,
    ) -> ControlResult<usize> {
        let operation = kind.operation();
        let expected_ack = kind.ack_kind();
        let packet_id = self.next_packet_id;

        let mut command_error: Option<ack::GvcpError> = None;
        let mut received: Option<usize> = None;

        'retry: for _ in 0..self.config.retry_count {
            if let Err(err) = self.sock.send(cmd_buf).await {
                warn!("[{}] command sending error: {}", operation, err);
                continue;
            }

            let started = Instant::now();
            let ceiling = started + PENDING_ACK_CEILING;
            let mut deadline = started + self.config.timeout;

            loop {
                let now = Instant::now();
                if now >= deadline {
                    warn!("[{}] ack reception timeout", operation);
                    break;
                }

                let count =
                    match future::timeout(deadline - now, self.sock.recv(&mut self.buffer)).await {
                        Ok(Ok(count)) => count,
                        Ok(Err(err)) => {
                            warn!("[{}] ack reception error: {}", operation, err);
                            break;
                        }
                        Err(_) => {
                            warn!("[{}] ack reception timeout", operation);
                            break;
                        }
                    };

                if count < GVCP_HEADER_LENGTH {
                    info!("[{}] spurious packet ({} bytes)", operation, count);
                    continue;
                }

                let packet = match ack::AckPacket::parse(&self.buffer[..count]) {
                    Ok(packet) => packet,
                    Err(err) => {
                        info!("[{}] unexpected answer: {}", operation, err);
                        continue;
                    }
                };

                // A pending ack defers the deadline without consuming a
                // retry, up to the absolute ceiling.
                if packet.ack_kind() == ack::AckKind::Pending && count >= ack::PENDING_ACK_SIZE {
                    match packet.ack_data_as::<ack::Pending>() {
                        Ok(pending) => {
                            let waiting_time = pending.waiting_time();
                            debug!("[{}] pending ack timeout = {:?}", operation, waiting_time);
                            deadline = cmp::min(Instant::now() + waiting_time, ceiling);
                        }
                        Err(err) => info!("[{}] unexpected answer: {}", operation, err),
                    }
                    continue;
                }

                match packet.packet_type() {
                    PacketType::Error | PacketType::UnknownError => {
                        if packet.ack_kind() == expected_ack && packet.packet_id() == packet_id {
                            command_error = Some(packet.error());
                            break 'retry;
                        }
                        info!(
                            "[{}] unexpected answer ({:#04x})",
                            operation,
                            packet.packet_type().as_raw()
                        );
                    }
                    PacketType::Ack => {
                        if packet.ack_kind() == expected_ack
                            && packet.packet_id() == packet_id
                            && count >= expected_ack_size
                        {
                            received = Some(count);
                            break 'retry;
                        }
                        info!(
                            "[{}] unexpected answer ({:#04x})",
                            operation,
                            packet.packet_type().as_raw()
                        );
                    }
                    PacketType::Cmd => {
                        info!("[{}] unexpected answer (command packet)", operation);
                    }
                }
            }
        }

        if let Some(code) = command_error {
            return Err(ControlError::Protocol { operation, code });
        }
        received.ok_or(ControlError::Timeout(operation))
    }

    fn read_reg_impl(&mut self, address: u64) -> ControlResult<u32> {
        let address: u32 = address.try_into().map_err(|_| {
            ControlError::InvalidData(
                "the address of `ReadReg` command must be smaller than u32::MAX".into(),
            )
        })?;

        let cmd = cmd::ReadReg::new(address)?;
        let recv_len = self.transact(cmd, ack::READ_REGISTER_ACK_SIZE)?;
        let value: ack::ReadReg = ack::AckPacket::parse(&self.buffer[..recv_len])?.ack_data_as()?;
        Ok(value.value())
    }

    fn read_mem_impl(&mut self, mut address: u64, buf: &mut [u8]) -> ControlResult<()> {
        for buf_chunk in buf.chunks_mut(GVCP_DATA_SIZE_MAX) {
            let target_addr: u32 = address.try_into().map_err(|_| {
                ControlError::InvalidData(
                    "the address of `ReadMem` command must be smaller than u32::MAX".into(),
                )
            })?;
            let read_len = buf_chunk.len() as u16;

            let cmd = cmd::ReadMem::new(target_addr, read_len)?;
            let recv_len = self.transact(cmd, ack::read_memory_ack_size(read_len as usize))?;
            let data: ack::ReadMem =
                ack::AckPacket::parse(&self.buffer[..recv_len])?.ack_data_as()?;
            if data.data().len() < read_len as usize {
                return Err(ControlError::InvalidData(
                    "`ReadMem` ack carries less data than requested".into(),
                ));
            }
            buf_chunk.copy_from_slice(&data.data()[..read_len as usize]);

            address += u64::from(read_len);
        }

        Ok(())
    }

    fn write_reg_fallback(&mut self, mut address: u64, data: &[u8]) -> ControlResult<()> {
        for data_chunk in data.chunks(4) {
            let mut aligned = [0; 4];
            aligned[..data_chunk.len()].copy_from_slice(data_chunk);
            self.write_reg(address, u32::from_be_bytes(aligned))?;
            address += data_chunk.len() as u64;
        }
        Ok(())
    }

    fn genapi_url(&mut self, url_register: (u32, u16)) -> ControlResult<String> {
        let mut buf = vec![0; url_register.1 as usize];
        self.read_mem(u64::from(url_register.0), &mut buf)?;
        let end = buf.iter().position(|c| *c == 0).unwrap_or(buf.len());
        Ok(String::from_utf8_lossy(&buf[..end]).into_owned())
    }

    /// Fetches the XML pointed to by one URL slot. `Ok(None)` is a soft miss:
    /// the slot is empty, or its target yields no data without a hard error.
    fn load_genicam(&mut self, url_register: (u32, u16)) -> ControlResult<Option<String>> {
        let url_string = self.genapi_url(url_register)?;
        if url_string.trim().is_empty() {
            return Ok(None);
        }
        info!("xml url = '{}' at {:#x}", url_string, url_register.0);

        let location = XmlFileLocation::parse(&url_string)?;
        let payload = match &location {
            XmlFileLocation::Device {
                address,
                size,
                path,
            } => {
                if *size == 0 {
                    return Ok(None);
                }
                info!("xml address = {:#x} - size = {:#x} - {}", address, size, path);
                let mut buf = vec![0; *size as usize];
                self.read_mem(*address, &mut buf)?;
                buf
            }
            XmlFileLocation::Host { path } => {
                std::fs::read(path).map_err(|err| ControlError::Unknown(err.into()))?
            }
            XmlFileLocation::Net { url } => {
                info!("retrieving GenICam file from: {}", url);
                let response = ureq::get(url)
                    .call()
                    .map_err(|err| ControlError::Unknown(err.into()))?;
                if response.status() != 200 {
                    return Err(ControlError::Unknown(anyhow::Error::msg(format!(
                        "can't retrieve GenApi XML from vendor website: {:?}",
                        response
                    ))));
                }
                let mut buf = vec![];
                use std::io::Read;
                response
                    .into_reader()
                    .read_to_end(&mut buf)
                    .map_err(|err| ControlError::Unknown(err.into()))?;
                buf
            }
        };

        if payload.is_empty() {
            return Ok(None);
        }

        let xml = if location.is_zip() {
            info!("zipped xml data");
            unzip_genxml(payload)?
        } else {
            payload
        };
        Ok(Some(String::from_utf8_lossy(&xml).into_owned()))
    }
}

impl DeviceControl for ControlHandleInner {
    fn open(&mut self) -> ControlResult<()> {
        let bs = Bootstrap::new();

        let device_mode = bs.device_mode(self)?;
        self.is_big_endian_device = device_mode.endianness() == Endianness::BE;
        let capability = self.capability()?;
        self.is_packet_resend_supported = capability.is_packet_resend_supported();
        info!("device endianness = {:?}", device_mode.endianness());
        info!("packet resend = {}", capability.is_packet_resend_supported());
        info!("write memory = {}", capability.is_write_mem_supported());

        // The device may already be controlled by another host; the handle
        // then degrades to monitor access until `take_control` succeeds.
        if let Err(err) = self.take_control() {
            warn!("opened without control access: {}", err);
        }

        self.is_opened = true;
        Ok(())
    }

    fn close(&mut self) -> ControlResult<()> {
        if self.is_controller {
            if let Err(err) = self.leave_control() {
                error!("failed to relinquish control access: {}", err);
            }
        }
        self.is_opened = false;
        Ok(())
    }

    fn is_opened(&self) -> bool {
        self.is_opened
    }

    fn read_mem(&mut self, address: u64, buf: &mut [u8]) -> ControlResult<()> {
        let result = self.read_mem_impl(address, buf);
        if result.is_err() {
            // Failed reads must not leave stale bytes with the caller.
            for byte in buf.iter_mut() {
                *byte = 0;
            }
        }
        result
    }

    fn read_reg(&mut self, address: u64) -> ControlResult<u32> {
        self.read_reg_impl(address)
    }

    fn write_mem(&mut self, mut address: u64, data: &[u8]) -> ControlResult<()> {
        if !self.capability()?.is_write_mem_supported() {
            return self.write_reg_fallback(address, data);
        }

        for data_chunk in data.chunks(GVCP_DATA_SIZE_MAX) {
            let target_addr: u32 = address.try_into().map_err(|_| {
                ControlError::InvalidData(
                    "the address of `WriteMem` command must be smaller than u32::MAX".into(),
                )
            })?;

            let recv_len = {
                let cmd = cmd::WriteMem::new(target_addr, data_chunk)?;
                self.transact(cmd, ack::WRITE_MEMORY_ACK_SIZE)?
            };
            let _: ack::WriteMem = ack::AckPacket::parse(&self.buffer[..recv_len])?.ack_data_as()?;

            address += data_chunk.len() as u64;
        }

        Ok(())
    }

    fn write_reg(&mut self, address: u64, value: u32) -> ControlResult<()> {
        let address: u32 = address.try_into().map_err(|_| {
            ControlError::InvalidData(
                "the address of `WriteReg` command must be smaller than u32::MAX".into(),
            )
        })?;

        let cmd = cmd::WriteReg::new(address, value)?;
        let recv_len = self.transact(cmd, ack::WRITE_REGISTER_ACK_SIZE)?;
        let _: ack::WriteReg = ack::AckPacket::parse(&self.buffer[..recv_len])?.ack_data_as()?;
        Ok(())
    }

    fn genapi(&mut self) -> ControlResult<String> {
        if let Some(xml) = &self.genicam_xml {
            return Ok(xml.clone());
        }

        let xml = match self.load_genicam(bootstrap::FIRST_URL)? {
            Some(xml) => xml,
            None => self
                .load_genicam(bootstrap::SECOND_URL)?
                .ok_or(ControlError::GenicamNotFound)?,
        };

        self.genicam_xml = Some(xml.clone());
        Ok(xml)
    }
}

enum HeartbeatEvent {
    TimeoutChanged(Duration),
    ChannelClosed,
}

/// Periodic privilege prober running on its own thread while the handle is
/// open.
struct HeartbeatLoop {
    inner: Arc<Mutex<ControlHandleInner>>,
    period: Duration,
    event_rx: channel::Receiver<HeartbeatEvent>,
    handler: Arc<Mutex<Option<ControlLostHandler>>>,
}

impl HeartbeatLoop {
    async fn run(mut self, _completion_tx: oneshot::Sender<()>) {
        loop {
            select! {
                _ = task::sleep(self.period).fuse() => {
                    if Self::probe(&self.inner, &self.handler, &self.event_rx).await {
                        break;
                    }
                }
                event = self.event_rx.recv().fuse() => {
                    match event {
                        Ok(HeartbeatEvent::TimeoutChanged(period)) => self.period = period,
                        Ok(HeartbeatEvent::ChannelClosed) | Err(_) => break,
                    }
                }
            }
        }
    }

    /// Polls the control channel privilege register, retrying transient
    /// failures within a bounded window. Returns `true` when cancellation was
    /// observed while probing.
    async fn probe(
        inner: &Arc<Mutex<ControlHandleInner>>,
        handler: &Arc<Mutex<Option<ControlLostHandler>>>,
        event_rx: &channel::Receiver<HeartbeatEvent>,
    ) -> bool {
        if !inner.lock().unwrap().is_controller {
            return false;
        }

        let started = Instant::now();
        let mut counter = 1u32;
        let ccp = loop {
            // The channel lock must not be held across the retry sleep.
            let attempt = {
                let mut guard = inner.lock().unwrap();
                Bootstrap::new().control_channel_privilege(&mut *guard)
            };
            match attempt {
                Ok(ccp) => break Some(ccp),
                Err(err) => {
                    debug!("privilege poll failed: {}", err);
                    if started.elapsed() >= HEARTBEAT_RETRY_TIMEOUT {
                        break None;
                    }
                    match event_rx.try_recv() {
                        Ok(HeartbeatEvent::ChannelClosed) | Err(channel::TryRecvError::Closed) => {
                            inner.lock().unwrap().is_controller = false;
                            return true;
                        }
                        Ok(HeartbeatEvent::TimeoutChanged(_)) | Err(channel::TryRecvError::Empty) => {}
                    }
                    task::sleep(HEARTBEAT_RETRY_DELAY).await;
                    counter += 1;
                }
            }
        };

        if counter > 1 {
            debug!("privilege poll tried {} times", counter);
        }

        // A window that closes without a single successful poll reads as
        // privilege 0, the same as an explicit revocation.
        let lost = match ccp {
            Some(ccp) => {
                debug!("privilege ack value = {:#010x}", ccp.as_raw());
                !ccp.is_control_access_enabled() && !ccp.is_exclusive_access_enabled()
            }
            None => true,
        };

        if lost {
            warn!("control access lost");
            if let Some(handler) = handler.lock().unwrap().as_ref() {
                handler();
            }
            inner.lock().unwrap().is_controller = false;
        }
        false
    }
}
