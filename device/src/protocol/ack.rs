/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

use std::{fmt, io, time};

use byteorder::{ReadBytesExt, BE};

use super::{PacketType, GVCP_HEADER_LENGTH};
use crate::{Error, Result};

/// Size of a `ReadMem` acknowledge carrying `data_len` bytes.
pub const fn read_memory_ack_size(data_len: usize) -> usize {
    GVCP_HEADER_LENGTH + data_len
}

/// Size of a `WriteMem` acknowledge (header plus address echo).
pub const WRITE_MEMORY_ACK_SIZE: usize = GVCP_HEADER_LENGTH + 4;

/// Size of a `ReadReg` acknowledge (header plus 32-bit value).
pub const READ_REGISTER_ACK_SIZE: usize = GVCP_HEADER_LENGTH + 4;

/// Size of a `WriteReg` acknowledge (header only).
pub const WRITE_REGISTER_ACK_SIZE: usize = GVCP_HEADER_LENGTH;

/// Size of a pending acknowledge (header plus reserved and timeout fields).
pub const PENDING_ACK_SIZE: usize = GVCP_HEADER_LENGTH + 4;

/// An acknowledge frame received from the device.
///
/// Parsing is total: any buffer that doesn't contain a full GVCP header, or
/// whose declared data length exceeds the buffer, fails with
/// [`Error::InvalidPacket`] and must be treated as a lost acknowledge.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AckPacket<'a> {
    header: Header,
    raw_ack_data: &'a [u8],
}

impl<'a> AckPacket<'a> {
    pub fn parse(buf: &'a [u8]) -> Result<Self> {
        if buf.len() < GVCP_HEADER_LENGTH {
            return Err(Error::InvalidPacket(
                "ack is shorter than a GVCP header".into(),
            ));
        }

        let mut cursor = io::Cursor::new(buf);
        let header = Header::parse(&mut cursor)?;

        let data_end = GVCP_HEADER_LENGTH + header.length as usize;
        if buf.len() < data_end {
            return Err(Error::InvalidPacket(
                "ack data is shorter than the length declared in its header".into(),
            ));
        }

        Ok(Self {
            header,
            raw_ack_data: &buf[GVCP_HEADER_LENGTH..data_end],
        })
    }

    pub fn packet_type(&self) -> PacketType {
        self.header.packet_type
    }

    pub fn ack_kind(&self) -> AckKind {
        self.header.ack_kind
    }

    pub fn packet_id(&self) -> u16 {
        self.header.packet_id
    }

    /// Per-command error code carried in the flags byte. Meaningful only for
    /// [`PacketType::Error`] and [`PacketType::UnknownError`] frames.
    pub fn error(&self) -> GvcpError {
        self.header.error
    }

    pub fn is_error(&self) -> bool {
        matches!(
            self.header.packet_type,
            PacketType::Error | PacketType::UnknownError
        )
    }

    pub fn raw_ack_data(&self) -> &'a [u8] {
        self.raw_ack_data
    }

    pub fn ack_data_as<T: ParseAckData<'a>>(&self) -> Result<T> {
        T::parse(self.raw_ack_data, &self.header)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Header {
    packet_type: PacketType,
    error: GvcpError,
    ack_kind: AckKind,
    length: u16,
    packet_id: u16,
}

impl Header {
    fn parse(cursor: &mut io::Cursor<&[u8]>) -> Result<Self> {
        let type_raw = cursor.read_u8()?;
        let packet_type = PacketType::from_raw(type_raw).ok_or_else(|| {
            Error::InvalidPacket(format!("unknown packet type {:#04x}", type_raw).into())
        })?;
        let error = GvcpError::from_raw(cursor.read_u8()?);
        let ack_kind = AckKind::parse(cursor)?;
        let length = cursor.read_u16::<BE>()?;
        let packet_id = cursor.read_u16::<BE>()?;

        Ok(Self {
            packet_type,
            error,
            ack_kind,
            length,
            packet_id,
        })
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AckKind {
    ReadMem,
    WriteMem,
    ReadReg,
    WriteReg,
    Pending,
}

impl AckKind {
    pub fn as_raw(self) -> u16 {
        match self {
            AckKind::ReadMem => 0x0081,
            AckKind::WriteMem => 0x0083,
            AckKind::ReadReg => 0x0085,
            AckKind::WriteReg => 0x0087,
            AckKind::Pending => 0x0089,
        }
    }

    fn parse(cursor: &mut io::Cursor<&[u8]>) -> Result<Self> {
        let id = cursor.read_u16::<BE>()?;
        match id {
            0x0081 => Ok(AckKind::ReadMem),
            0x0083 => Ok(AckKind::WriteMem),
            0x0085 => Ok(AckKind::ReadReg),
            0x0087 => Ok(AckKind::WriteReg),
            0x0089 => Ok(AckKind::Pending),
            _ => Err(Error::InvalidPacket(
                format!("unknown ack kind id {:#06x}", id).into(),
            )),
        }
    }
}

/// Per-command error code the device signals through the flags byte of an
/// error acknowledge.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GvcpError {
    None,
    NotImplemented,
    InvalidParameter,
    InvalidAddress,
    WriteProtect,
    BadAlignment,
    AccessDenied,
    Busy,
    LocalProblem,
    DataOverrun,
    InvalidHeader,
    Unknown(u8),
}

impl GvcpError {
    pub fn from_raw(raw: u8) -> Self {
        match raw {
            0x00 => GvcpError::None,
            0x01 => GvcpError::NotImplemented,
            0x02 => GvcpError::InvalidParameter,
            0x03 => GvcpError::InvalidAddress,
            0x04 => GvcpError::WriteProtect,
            0x05 => GvcpError::BadAlignment,
            0x06 => GvcpError::AccessDenied,
            0x07 => GvcpError::Busy,
            0x08 => GvcpError::LocalProblem,
            0x0d => GvcpError::DataOverrun,
            0x0e => GvcpError::InvalidHeader,
            code => GvcpError::Unknown(code),
        }
    }

    pub fn as_raw(self) -> u8 {
        match self {
            GvcpError::None => 0x00,
            GvcpError::NotImplemented => 0x01,
            GvcpError::InvalidParameter => 0x02,
            GvcpError::InvalidAddress => 0x03,
            GvcpError::WriteProtect => 0x04,
            GvcpError::BadAlignment => 0x05,
            GvcpError::AccessDenied => 0x06,
            GvcpError::Busy => 0x07,
            GvcpError::LocalProblem => 0x08,
            GvcpError::DataOverrun => 0x0d,
            GvcpError::InvalidHeader => 0x0e,
            GvcpError::Unknown(code) => code,
        }
    }
}

impl fmt::Display for GvcpError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GvcpError::None => f.write_str("NONE"),
            GvcpError::NotImplemented => f.write_str("NOT_IMPLEMENTED"),
            GvcpError::InvalidParameter => f.write_str("INVALID_PARAMETER"),
            GvcpError::InvalidAddress => f.write_str("INVALID_ADDRESS"),
            GvcpError::WriteProtect => f.write_str("WRITE_PROTECT"),
            GvcpError::BadAlignment => f.write_str("BAD_ALIGNMENT"),
            GvcpError::AccessDenied => f.write_str("ACCESS_DENIED"),
            GvcpError::Busy => f.write_str("BUSY"),
            GvcpError::LocalProblem => f.write_str("LOCAL_PROBLEM"),
            GvcpError::DataOverrun => f.write_str("DATA_OVERRUN"),
            GvcpError::InvalidHeader => f.write_str("INVALID_HEADER"),
            GvcpError::Unknown(code) => write!(f, "UNKNOWN ({:#04x})", code),
        }
    }
}

pub trait ParseAckData<'a>: Sized {
    fn parse(raw_data: &'a [u8], header: &Header) -> Result<Self>;
}

fn expect_kind(header: &Header, expected: AckKind) -> Result<()> {
    if header.ack_kind == expected {
        Ok(())
    } else {
        Err(Error::InvalidPacket(
            format!(
                "invalid ack kind: expected {:?} but {:?}",
                expected, header.ack_kind
            )
            .into(),
        ))
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReadMem<'a> {
    data: &'a [u8],
}

impl<'a> ReadMem<'a> {
    pub fn data(&self) -> &'a [u8] {
        self.data
    }
}

impl<'a> ParseAckData<'a> for ReadMem<'a> {
    fn parse(raw_data: &'a [u8], header: &Header) -> Result<Self> {
        expect_kind(header, AckKind::ReadMem)?;
        Ok(Self { data: raw_data })
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct WriteMem {
    address: u32,
}

impl WriteMem {
    pub fn address(self) -> u32 {
        self.address
    }
}

impl<'a> ParseAckData<'a> for WriteMem {
    fn parse(mut raw_data: &'a [u8], header: &Header) -> Result<Self> {
        expect_kind(header, AckKind::WriteMem)?;
        let address = raw_data.read_u32::<BE>()?;
        Ok(Self { address })
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ReadReg {
    value: u32,
}

impl ReadReg {
    pub fn value(self) -> u32 {
        self.value
    }
}

impl<'a> ParseAckData<'a> for ReadReg {
    fn parse(mut raw_data: &'a [u8], header: &Header) -> Result<Self> {
        expect_kind(header, AckKind::ReadReg)?;
        let value = raw_data.read_u32::<BE>()?;
        Ok(Self { value })
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct WriteReg;

impl<'a> ParseAckData<'a> for WriteReg {
    fn parse(_raw_data: &'a [u8], header: &Header) -> Result<Self> {
        expect_kind(header, AckKind::WriteReg)?;
        Ok(Self)
    }
}

/// A device-originated deferral: the device needs more time before it can
/// answer the outstanding command.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Pending {
    waiting_time_ms: u16,
}

impl Pending {
    pub fn waiting_time(self) -> time::Duration {
        time::Duration::from_millis(self.waiting_time_ms as u64)
    }
}

impl<'a> ParseAckData<'a> for Pending {
    fn parse(raw_data: &'a [u8], header: &Header) -> Result<Self> {
        expect_kind(header, AckKind::Pending)?;
        if raw_data.len() < 4 {
            return Err(Error::InvalidPacket(
                "pending ack data is shorter than 4 bytes".into(),
            ));
        }
        let waiting_time_ms = (&raw_data[2..4]).read_u16::<BE>()?;
        Ok(Self { waiting_time_ms })
    }
}
