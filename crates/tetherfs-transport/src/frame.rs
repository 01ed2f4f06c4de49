//! Packet framing for the tetherfs agent protocol.
//!
//! Every packet starts with an 11-byte big-endian header: bytes 0-7 request
//! id, byte 8 op code, byte 9 connection index, byte 10 flags. The payload
//! that follows is the bincode encoding of the record selected by the op
//! code. On the wire a packet is carried length-prefixed (u32, big-endian)
//! because TCP gives no message boundaries; the prefix is connection
//! framing and not part of the packet encoding.

use crate::error::{Result, TransportError};
use crate::message::{
    self, AttrInfo, CloseInfo, CreateInfo, DirInfo, ErrorMsg, FileChunk, FileStat, OpenInfo,
    Payload, ReadDirInfo, ReadInfo, RemotePath, RenameInfo, WriteInfo, WriteResult,
};

/// Size of the fixed packet header in bytes.
pub const PACKET_HEADER_SIZE: usize = 11;

/// Flag bit marking a response. `flags == 0` denotes a request; the
/// remaining bits are reserved.
pub const FLAG_RESPONSE: u8 = 0x01;

/// Upper bound on an encoded packet, enforced by the connection layer.
pub const MAX_PACKET_SIZE: usize = 16 * 1024 * 1024;

/// The closed op code set shared with the agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Opcode {
    Attr = 0,
    ReadDir = 1,
    ReadDirAll = 2,
    FetchFile = 3,
    ReadFile = 4,
    WriteFile = 5,
    SetAttr = 6,
    Create = 7,
    Remove = 8,
    Rename = 9,
    Open = 10,
    Close = 11,
    Ping = 12,
    Stat = 20,
    DirInfo = 21,
    FileData = 22,
    WriteResult = 23,
    Pong = 24,
    Error = 25,
}

impl Opcode {
    /// Decodes an op code byte.
    pub fn from_u8(raw: u8) -> Result<Self> {
        Ok(match raw {
            0 => Opcode::Attr,
            1 => Opcode::ReadDir,
            2 => Opcode::ReadDirAll,
            3 => Opcode::FetchFile,
            4 => Opcode::ReadFile,
            5 => Opcode::WriteFile,
            6 => Opcode::SetAttr,
            7 => Opcode::Create,
            8 => Opcode::Remove,
            9 => Opcode::Rename,
            10 => Opcode::Open,
            11 => Opcode::Close,
            12 => Opcode::Ping,
            20 => Opcode::Stat,
            21 => Opcode::DirInfo,
            22 => Opcode::FileData,
            23 => Opcode::WriteResult,
            24 => Opcode::Pong,
            25 => Opcode::Error,
            other => return Err(TransportError::UnknownOpcode(other)),
        })
    }

    /// True for op codes in the request half of the set.
    pub fn is_request_op(self) -> bool {
        (self as u8) < 20
    }
}

/// The unit of transport: header fields plus the decoded payload.
#[derive(Debug, Clone, PartialEq)]
pub struct Packet {
    /// Request id, unique per remote for the process lifetime.
    pub id: u64,
    /// Op code selecting the payload record.
    pub op: Opcode,
    /// Ordinal of the connection the packet travels on.
    pub conn_id: u8,
    /// `0` for requests; [`FLAG_RESPONSE`] set on responses.
    pub flags: u8,
    /// Decoded payload record.
    pub data: Payload,
}

impl Packet {
    /// Builds a request packet. Id and connection index are stamped by the
    /// egress worker, not the caller.
    pub fn request(op: Opcode, data: Payload) -> Self {
        Self {
            id: 0,
            op,
            conn_id: 0,
            flags: 0,
            data,
        }
    }

    /// Builds the response to this packet, preserving the routing key.
    pub fn make_response(&self, op: Opcode, data: Payload) -> Self {
        Self {
            id: self.id,
            op,
            conn_id: self.conn_id,
            flags: FLAG_RESPONSE,
            data,
        }
    }

    /// `flags == 0` denotes a request.
    pub fn is_request(&self) -> bool {
        self.flags == 0
    }

    /// Encodes header and payload into a contiguous buffer.
    pub fn encode(&self) -> Result<Vec<u8>> {
        let payload = encode_payload(self.op, &self.data)?;
        let mut buf = Vec::with_capacity(PACKET_HEADER_SIZE + payload.len());
        buf.extend_from_slice(&self.id.to_be_bytes());
        buf.push(self.op as u8);
        buf.push(self.conn_id);
        buf.push(self.flags);
        buf.extend_from_slice(&payload);
        Ok(buf)
    }

    /// Decodes a buffer produced by [`Packet::encode`].
    pub fn decode(buf: &[u8]) -> Result<Self> {
        if buf.len() < PACKET_HEADER_SIZE {
            return Err(TransportError::ShortFrame { len: buf.len() });
        }
        let id = u64::from_be_bytes(buf[0..8].try_into().expect("8-byte slice"));
        let op = Opcode::from_u8(buf[8])?;
        let conn_id = buf[9];
        let flags = buf[10];
        let data = decode_payload(op, &buf[PACKET_HEADER_SIZE..])?;
        Ok(Self {
            id,
            op,
            conn_id,
            flags,
            data,
        })
    }
}

fn encode_payload(op: Opcode, data: &Payload) -> Result<Vec<u8>> {
    match data {
        Payload::Path(p) => message::serialize_payload(op, p),
        Payload::ReadDir(p) => message::serialize_payload(op, p),
        Payload::Read(p) => message::serialize_payload(op, p),
        Payload::Write(p) => message::serialize_payload(op, p),
        Payload::Attr(p) => message::serialize_payload(op, p),
        Payload::Create(p) => message::serialize_payload(op, p),
        Payload::Rename(p) => message::serialize_payload(op, p),
        Payload::Open(p) => message::serialize_payload(op, p),
        Payload::Close(p) => message::serialize_payload(op, p),
        Payload::Stat(p) => message::serialize_payload(op, p),
        Payload::Dir(p) => message::serialize_payload(op, p),
        Payload::Chunk(p) => message::serialize_payload(op, p),
        Payload::WriteResult(p) => message::serialize_payload(op, p),
        Payload::Error(p) => message::serialize_payload(op, p),
        Payload::Empty => Ok(Vec::new()),
    }
}

/// Decodes the payload record selected by `op`.
pub fn decode_payload(op: Opcode, buf: &[u8]) -> Result<Payload> {
    Ok(match op {
        Opcode::Attr | Opcode::ReadDirAll | Opcode::FetchFile | Opcode::Remove => {
            Payload::Path(message::deserialize_payload::<RemotePath>(op, buf)?)
        }
        Opcode::ReadDir => Payload::ReadDir(message::deserialize_payload::<ReadDirInfo>(op, buf)?),
        Opcode::ReadFile => Payload::Read(message::deserialize_payload::<ReadInfo>(op, buf)?),
        Opcode::WriteFile => Payload::Write(message::deserialize_payload::<WriteInfo>(op, buf)?),
        Opcode::SetAttr => Payload::Attr(message::deserialize_payload::<AttrInfo>(op, buf)?),
        Opcode::Create => Payload::Create(message::deserialize_payload::<CreateInfo>(op, buf)?),
        Opcode::Rename => Payload::Rename(message::deserialize_payload::<RenameInfo>(op, buf)?),
        Opcode::Open => Payload::Open(message::deserialize_payload::<OpenInfo>(op, buf)?),
        Opcode::Close => Payload::Close(message::deserialize_payload::<CloseInfo>(op, buf)?),
        Opcode::Stat => Payload::Stat(message::deserialize_payload::<FileStat>(op, buf)?),
        Opcode::DirInfo => Payload::Dir(message::deserialize_payload::<DirInfo>(op, buf)?),
        Opcode::FileData => Payload::Chunk(message::deserialize_payload::<FileChunk>(op, buf)?),
        Opcode::WriteResult => {
            Payload::WriteResult(message::deserialize_payload::<WriteResult>(op, buf)?)
        }
        Opcode::Error => Payload::Error(message::deserialize_payload::<ErrorMsg>(op, buf)?),
        Opcode::Ping | Opcode::Pong => Payload::Empty,
    })
}
