//! Wire format of the server discovery protocol as far as the query cache needs it.
//!
//! Covers the `A2S_INFO` request signature, the known poison packet, and the
//! info reply layout. Every byte written here is fixed by the external protocol.

use byteorder::{LittleEndian, ReadBytesExt};
use std::io::{BufRead, Cursor, Read};
use thiserror::Error;

/// Every connectionless packet starts with this 4-byte marker (`-1` as a long).
pub const PACKET_MARKER: [u8; 4] = [0xFF, 0xFF, 0xFF, 0xFF];

/// Type byte of an `A2S_INFO` request (`'T'`).
pub const A2S_INFO_TYPE: u8 = 0x54;
/// Total length of an `A2S_INFO` request datagram.
pub const A2S_INFO_LEN: usize = 25;
/// Offset of the type byte inside a connectionless packet.
pub const TYPE_OFFSET: usize = 4;

/// Type byte of an info reply (`'I'`).
pub const S2A_INFO_TYPE: u8 = 0x49;

/// Server type byte for a dedicated server.
pub const SERVER_TYPE_DEDICATED: u8 = b'd';
/// Operating system byte for Windows.
pub const OS_WINDOWS: u8 = b'w';
/// Anti-cheat secured flag.
pub const SECURED: u8 = 1;

/// Fixed capacity of the reply buffer.
pub const REPLY_CAPACITY: usize = 1024;

/// Receives of this many bytes or fewer are never inspected.
pub const MIN_INSPECTED_LEN: usize = 5;

/// The null-entity packet used to hang vulnerable servers.
pub const POISON_SIGNATURE: [u8; 17] = [
    0xFF, 0xFF, 0xFF, 0xFF, 0x71, 0x30, 0x30, 0x30, 0x30, 0x30, 0x30, 0x30, 0x30, 0x30, 0x30,
    0x30, 0x30,
];

/// Canonical `A2S_INFO` request as sent by server browsers.
pub fn info_request() -> Vec<u8> {
    let mut request = Vec::with_capacity(A2S_INFO_LEN);
    request.extend_from_slice(&PACKET_MARKER);
    request.push(A2S_INFO_TYPE);
    request.extend_from_slice(b"Source Engine Query\0");
    request
}

/// The poison packet followed by its terminator.
pub fn poison_packet() -> Vec<u8> {
    let mut packet = POISON_SIGNATURE.to_vec();
    packet.push(0);
    packet
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DatagramKind {
    /// Matches the null-entity signature and must be dropped.
    Poison,
    /// An `A2S_INFO` request that the cache answers.
    InfoQuery,
    /// Everything else; handed to the host untouched.
    PassThrough,
}

/// Classifies a received datagram.
///
/// The poison test compares the payload up to its first NUL against the
/// signature, the way a C string comparison of the receive buffer would.
pub fn classify(datagram: &[u8]) -> DatagramKind {
    if datagram.len() <= MIN_INSPECTED_LEN {
        return DatagramKind::PassThrough;
    }

    let until_nul = datagram
        .iter()
        .position(|&b| b == 0)
        .map_or(datagram, |end| &datagram[..end]);
    if until_nul == POISON_SIGNATURE {
        return DatagramKind::Poison;
    }

    if datagram.len() == A2S_INFO_LEN && datagram[TYPE_OFFSET] == A2S_INFO_TYPE {
        return DatagramKind::InfoQuery;
    }

    DatagramKind::PassThrough
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CodecError {
    #[error("reply exceeds buffer capacity of {capacity} bytes")]
    Overflow { capacity: usize },
    #[error("reply truncated at offset {0}")]
    Truncated(usize),
    #[error("bad reply header")]
    BadHeader,
    #[error("unterminated string at offset {0}")]
    UnterminatedString(usize),
}

/// Fixed-capacity write buffer for a serialized reply.
///
/// Integers are little-endian. Writes past the capacity fail and leave the
/// overflow flag set until the next [`ReplyBuffer::reset`].
#[derive(Debug, Clone)]
pub struct ReplyBuffer {
    data: Box<[u8]>,
    written: usize,
    overflowed: bool,
}

impl ReplyBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            data: vec![0u8; capacity].into_boxed_slice(),
            written: 0,
            overflowed: false,
        }
    }

    pub fn capacity(&self) -> usize {
        self.data.len()
    }

    /// Rewinds the write position.
    pub fn reset(&mut self) {
        self.written = 0;
        self.overflowed = false;
    }

    pub fn is_empty(&self) -> bool {
        self.written == 0
    }

    pub fn overflowed(&self) -> bool {
        self.overflowed
    }

    /// Bytes written since the last reset.
    pub fn as_bytes(&self) -> &[u8] {
        &self.data[..self.written]
    }

    pub fn write_bytes(&mut self, bytes: &[u8]) -> Result<(), CodecError> {
        let end = self.written + bytes.len();
        if self.overflowed || end > self.data.len() {
            self.overflowed = true;
            return Err(CodecError::Overflow {
                capacity: self.data.len(),
            });
        }
        self.data[self.written..end].copy_from_slice(bytes);
        self.written = end;
        Ok(())
    }

    pub fn write_byte(&mut self, value: u8) -> Result<(), CodecError> {
        self.write_bytes(&[value])
    }

    pub fn write_short(&mut self, value: u16) -> Result<(), CodecError> {
        self.write_bytes(&value.to_le_bytes())
    }

    pub fn write_long(&mut self, value: i32) -> Result<(), CodecError> {
        self.write_bytes(&value.to_le_bytes())
    }

    /// Writes `value` up to its first NUL, then a terminator.
    pub fn write_string(&mut self, value: &str) -> Result<(), CodecError> {
        let bytes = value.as_bytes();
        let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
        self.write_bytes(&bytes[..end])?;
        self.write_byte(0)
    }
}

impl Default for ReplyBuffer {
    fn default() -> Self {
        Self::new(REPLY_CAPACITY)
    }
}

/// Every field of an info reply, in wire order.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct InfoReply {
    pub protocol: u8,
    pub name: String,
    pub map: String,
    pub folder: String,
    pub game: String,
    pub app_id: u16,
    pub players: u8,
    pub max_players: u8,
    pub bots: u8,
    pub server_type: u8,
    pub environment: u8,
    pub passworded: bool,
    pub secured: bool,
    pub version: String,
}

impl InfoReply {
    /// Serializes into `buf`, replacing whatever it held.
    ///
    /// On error the buffer is left empty.
    pub fn encode(&self, buf: &mut ReplyBuffer) -> Result<(), CodecError> {
        buf.reset();
        let result = self.write_fields(buf);
        if result.is_err() {
            buf.reset();
        }
        result
    }

    fn write_fields(&self, buf: &mut ReplyBuffer) -> Result<(), CodecError> {
        buf.write_long(-1)?;
        buf.write_byte(S2A_INFO_TYPE)?;
        buf.write_byte(self.protocol)?;
        buf.write_string(&self.name)?;
        buf.write_string(&self.map)?;
        buf.write_string(&self.folder)?;
        buf.write_string(&self.game)?;
        buf.write_short(self.app_id)?;
        buf.write_byte(self.players)?;
        buf.write_byte(self.max_players)?;
        buf.write_byte(self.bots)?;
        buf.write_byte(self.server_type)?;
        buf.write_byte(self.environment)?;
        buf.write_byte(u8::from(self.passworded))?;
        buf.write_byte(u8::from(self.secured))?;
        buf.write_string(&self.version)
    }

    /// Parses a reply produced by [`InfoReply::encode`] or a real server.
    pub fn decode(bytes: &[u8]) -> Result<Self, CodecError> {
        let mut reader = Reader::new(bytes);

        if reader.marker()? != PACKET_MARKER || reader.byte()? != S2A_INFO_TYPE {
            return Err(CodecError::BadHeader);
        }

        Ok(Self {
            protocol: reader.byte()?,
            name: reader.string()?,
            map: reader.string()?,
            folder: reader.string()?,
            game: reader.string()?,
            app_id: reader.short()?,
            players: reader.byte()?,
            max_players: reader.byte()?,
            bots: reader.byte()?,
            server_type: reader.byte()?,
            environment: reader.byte()?,
            passworded: reader.byte()? != 0,
            secured: reader.byte()? != 0,
            version: reader.string()?,
        })
    }
}

struct Reader<'a> {
    cursor: Cursor<&'a [u8]>,
}

impl<'a> Reader<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        Self {
            cursor: Cursor::new(bytes),
        }
    }

    fn offset(&self) -> usize {
        self.cursor.position() as usize
    }

    fn marker(&mut self) -> Result<[u8; 4], CodecError> {
        let start = self.offset();
        let mut marker = [0u8; 4];
        self.cursor
            .read_exact(&mut marker)
            .map_err(|_| CodecError::Truncated(start))?;
        Ok(marker)
    }

    fn byte(&mut self) -> Result<u8, CodecError> {
        let start = self.offset();
        self.cursor
            .read_u8()
            .map_err(|_| CodecError::Truncated(start))
    }

    fn short(&mut self) -> Result<u16, CodecError> {
        let start = self.offset();
        self.cursor
            .read_u16::<LittleEndian>()
            .map_err(|_| CodecError::Truncated(start))
    }

    fn string(&mut self) -> Result<String, CodecError> {
        let start = self.offset();
        let mut raw = Vec::new();
        self.cursor
            .read_until(0, &mut raw)
            .map_err(|_| CodecError::UnterminatedString(start))?;
        if raw.pop() != Some(0) {
            return Err(CodecError::UnterminatedString(start));
        }
        Ok(String::from_utf8_lossy(&raw).into_owned())
    }
}
