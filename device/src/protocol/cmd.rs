/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

use std::io;

use byteorder::{WriteBytesExt, BE};

use super::{ack::AckKind, PacketType, GVCP_DATA_SIZE_MAX, GVCP_HEADER_LENGTH};
use crate::{Error, Result};

/// A complete command frame: header plus command specific data.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CommandPacket<T> {
    header: CommandHeader,
    command_data: T,
}

impl<T> CommandPacket<T>
where
    T: CommandData,
{
    pub fn new(command_data: T, packet_id: u16) -> Self {
        let header = CommandHeader::new(&command_data, packet_id);
        Self {
            header,
            command_data,
        }
    }

    /// Total frame length in bytes.
    pub fn length(&self) -> usize {
        GVCP_HEADER_LENGTH + self.command_data.length() as usize
    }

    pub fn packet_id(&self) -> u16 {
        self.header.packet_id
    }

    pub fn serialize(&self, mut buf: impl io::Write) -> Result<()> {
        self.header.serialize(&mut buf)?;
        self.command_data.serialize(&mut buf)?;
        Ok(())
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CommandHeader {
    flag: CommandFlag,
    command_kind: CommandKind,
    length: u16,
    packet_id: u16,
}

impl CommandHeader {
    pub fn new(command_data: &impl CommandData, packet_id: u16) -> Self {
        Self {
            flag: command_data.flag(),
            command_kind: command_data.kind(),
            length: command_data.length(),
            packet_id,
        }
    }

    pub fn serialize(&self, mut buf: impl io::Write) -> Result<()> {
        buf.write_u8(PacketType::Cmd.as_raw())?;
        self.flag.serialize(&mut buf)?;
        self.command_kind.serialize(&mut buf)?;
        buf.write_u16::<BE>(self.length)?;
        buf.write_u16::<BE>(self.packet_id)?;
        Ok(())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CommandKind {
    ReadMem,
    WriteMem,
    ReadReg,
    WriteReg,
}

impl CommandKind {
    pub fn as_raw(self) -> u16 {
        match self {
            Self::ReadMem => 0x0080,
            Self::WriteMem => 0x0082,
            Self::ReadReg => 0x0084,
            Self::WriteReg => 0x0086,
        }
    }

    /// Acknowledge kind a command of this kind must be answered with.
    pub fn ack_kind(self) -> AckKind {
        match self {
            Self::ReadMem => AckKind::ReadMem,
            Self::WriteMem => AckKind::WriteMem,
            Self::ReadReg => AckKind::ReadReg,
            Self::WriteReg => AckKind::WriteReg,
        }
    }

    pub fn operation(self) -> &'static str {
        match self {
            Self::ReadMem => "read_memory",
            Self::WriteMem => "write_memory",
            Self::ReadReg => "read_register",
            Self::WriteReg => "write_register",
        }
    }

    fn serialize(self, mut buf: impl io::Write) -> Result<()> {
        buf.write_u16::<BE>(self.as_raw())?;
        Ok(())
    }
}

pub trait CommandData: Sized {
    fn kind(&self) -> CommandKind;

    /// Length of the command specific data in bytes.
    fn length(&self) -> u16;

    fn serialize(&self, buf: impl io::Write) -> Result<()>;

    fn flag(&self) -> CommandFlag {
        CommandFlag::new().need_ack()
    }

    fn finalize(self, packet_id: u16) -> CommandPacket<Self> {
        CommandPacket::new(self, packet_id)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ReadMem {
    address: u32,
    length: u16,
}

impl ReadMem {
    pub fn new(address: u32, length: u16) -> Result<Self> {
        if length as usize > GVCP_DATA_SIZE_MAX {
            Err(Error::InvalidPacket(
                format!(
                    "a read length of `ReadMem` must be smaller or equal than {}",
                    GVCP_DATA_SIZE_MAX
                )
                .into(),
            ))
        } else {
            Ok(Self { address, length })
        }
    }
}

impl CommandData for ReadMem {
    fn kind(&self) -> CommandKind {
        CommandKind::ReadMem
    }

    fn length(&self) -> u16 {
        8
    }

    fn serialize(&self, mut buf: impl io::Write) -> Result<()> {
        buf.write_u32::<BE>(self.address)?;
        buf.write_u16::<BE>(0)?; // Reserved.
        buf.write_u16::<BE>(self.length)?;
        Ok(())
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WriteMem<'a> {
    address: u32,
    data: &'a [u8],
}

impl<'a> WriteMem<'a> {
    pub fn new(address: u32, data: &'a [u8]) -> Result<Self> {
        if data.len() > GVCP_DATA_SIZE_MAX {
            Err(Error::InvalidPacket(
                format!(
                    "a data length of `WriteMem` must be smaller or equal than {}",
                    GVCP_DATA_SIZE_MAX
                )
                .into(),
            ))
        } else {
            Ok(Self { address, data })
        }
    }

    pub fn data_len(&self) -> usize {
        self.data.len()
    }
}

impl<'a> CommandData for WriteMem<'a> {
    fn kind(&self) -> CommandKind {
        CommandKind::WriteMem
    }

    fn length(&self) -> u16 {
        4 + self.data.len() as u16
    }

    fn serialize(&self, mut buf: impl io::Write) -> Result<()> {
        buf.write_u32::<BE>(self.address)?;
        buf.write_all(self.data)?;
        Ok(())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ReadReg {
    address: u32,
}

impl ReadReg {
    pub fn new(address: u32) -> Result<Self> {
        if address % 4 != 0 {
            Err(Error::InvalidPacket(
                "an address of `ReadReg` must be a multiple of 4".into(),
            ))
        } else {
            Ok(Self { address })
        }
    }
}

impl CommandData for ReadReg {
    fn kind(&self) -> CommandKind {
        CommandKind::ReadReg
    }

    fn length(&self) -> u16 {
        4
    }

    fn serialize(&self, mut buf: impl io::Write) -> Result<()> {
        buf.write_u32::<BE>(self.address)?;
        Ok(())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct WriteReg {
    address: u32,
    value: u32,
}

impl WriteReg {
    pub fn new(address: u32, value: u32) -> Result<Self> {
        if address % 4 != 0 {
            Err(Error::InvalidPacket(
                "an address of `WriteReg` must be a multiple of 4".into(),
            ))
        } else {
            Ok(Self { address, value })
        }
    }
}

impl CommandData for WriteReg {
    fn kind(&self) -> CommandKind {
        CommandKind::WriteReg
    }

    fn length(&self) -> u16 {
        8
    }

    fn serialize(&self, mut buf: impl io::Write) -> Result<()> {
        buf.write_u32::<BE>(self.address)?;
        buf.write_u32::<BE>(self.value)?;
        Ok(())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub struct CommandFlag(u8);

impl CommandFlag {
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests an acknowledge from the device.
    pub fn need_ack(self) -> Self {
        Self(self.0 | 0x80)
    }

    pub fn as_raw(self) -> u8 {
        self.0
    }

    pub fn serialize(self, mut buf: impl io::Write) -> Result<()> {
        buf.write_u8(self.0)?;
        Ok(())
    }
}
