//! Frame layout (RFC 9113 section 4).

use bytes::{Buf, BufMut, Bytes, BytesMut};

use super::error::{ErrorCode, Http2Error};

pub const FRAME_HEADER_LEN: usize = 9;
pub const CONNECTION_PREFACE: &[u8] = b"PRI * HTTP/2.0\r\n\r\nSM\r\n\r\n";
pub const MAX_FRAME_LENGTH: u32 = (1 << 24) - 1;

pub mod flags {
    pub const END_STREAM: u8 = 0x1;
    pub const ACK: u8 = 0x1;
    pub const END_HEADERS: u8 = 0x4;
    pub const PADDED: u8 = 0x8;
    pub const PRIORITY: u8 = 0x20;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameType {
    Data,
    Headers,
    Priority,
    RstStream,
    Settings,
    PushPromise,
    Ping,
    GoAway,
    WindowUpdate,
    Continuation,
    Unknown(u8),
}

impl FrameType {
    pub fn from_u8(value: u8) -> Self {
        match value {
            0x0 => FrameType::Data,
            0x1 => FrameType::Headers,
            0x2 => FrameType::Priority,
            0x3 => FrameType::RstStream,
            0x4 => FrameType::Settings,
            0x5 => FrameType::PushPromise,
            0x6 => FrameType::Ping,
            0x7 => FrameType::GoAway,
            0x8 => FrameType::WindowUpdate,
            0x9 => FrameType::Continuation,
            other => FrameType::Unknown(other),
        }
    }

    pub fn as_u8(&self) -> u8 {
        match self {
            FrameType::Data => 0x0,
            FrameType::Headers => 0x1,
            FrameType::Priority => 0x2,
            FrameType::RstStream => 0x3,
            FrameType::Settings => 0x4,
            FrameType::PushPromise => 0x5,
            FrameType::Ping => 0x6,
            FrameType::GoAway => 0x7,
            FrameType::WindowUpdate => 0x8,
            FrameType::Continuation => 0x9,
            FrameType::Unknown(value) => *value,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    pub length: u32,
    pub frame_type: FrameType,
    pub flags: u8,
    pub stream_id: u32,
}

impl FrameHeader {
    pub fn has_flag(&self, flag: u8) -> bool {
        self.flags & flag == flag
    }

    pub fn encode(&self, buf: &mut BytesMut) {
        buf.put_uint(u64::from(self.length), 3);
        buf.put_u8(self.frame_type.as_u8());
        buf.put_u8(self.flags);
        buf.put_u32(self.stream_id & 0x7fff_ffff);
    }

    pub fn decode(mut raw: &[u8]) -> Result<Self, Http2Error> {
        if raw.len() < FRAME_HEADER_LEN {
            return Err(Http2Error::connection(ErrorCode::FrameSize, "truncated frame header"));
        }
        let length = raw.get_uint(3) as u32;
        let frame_type = FrameType::from_u8(raw.get_u8());
        let flags = raw.get_u8();
        let stream_id = raw.get_u32() & 0x7fff_ffff;
        Ok(Self {
            length,
            frame_type,
            flags,
            stream_id,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub header: FrameHeader,
    pub payload: Bytes,
}

impl Frame {
    pub fn new(frame_type: FrameType, flags: u8, stream_id: u32, payload: impl Into<Bytes>) -> Self {
        let payload = payload.into();
        Self {
            header: FrameHeader {
                length: payload.len() as u32,
                frame_type,
                flags,
                stream_id,
            },
            payload,
        }
    }

    pub fn frame_type(&self) -> FrameType {
        self.header.frame_type
    }

    pub fn stream_id(&self) -> u32 {
        self.header.stream_id
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut buf = BytesMut::with_capacity(FRAME_HEADER_LEN + self.payload.len());
        self.header.encode(&mut buf);
        buf.put_slice(&self.payload);
        buf.to_vec()
    }

    /// Decodes one frame from the front of `buf`. Returns `None` when more
    /// bytes are needed, otherwise the frame and the bytes it consumed.
    pub fn decode(buf: &[u8], max_frame_size: u32) -> Result<Option<(Frame, usize)>, Http2Error> {
        if buf.len() < FRAME_HEADER_LEN {
            return Ok(None);
        }
        let header = FrameHeader::decode(buf)?;
        if header.length > max_frame_size {
            return Err(Http2Error::connection(
                ErrorCode::FrameSize,
                format!("frame of {} bytes exceeds {}", header.length, max_frame_size),
            ));
        }
        let total = FRAME_HEADER_LEN + header.length as usize;
        if buf.len() < total {
            return Ok(None);
        }
        let payload = Bytes::copy_from_slice(&buf[FRAME_HEADER_LEN..total]);
        Ok(Some((Frame { header, payload }, total)))
    }

    pub fn settings(values: &[(u16, u32)]) -> Self {
        let mut payload = BytesMut::with_capacity(values.len() * 6);
        for (id, value) in values {
            payload.put_u16(*id);
            payload.put_u32(*value);
        }
        Self::new(FrameType::Settings, 0, 0, payload.freeze())
    }

    pub fn settings_ack() -> Self {
        Self::new(FrameType::Settings, flags::ACK, 0, Bytes::new())
    }

    pub fn window_update(stream_id: u32, increment: u32) -> Self {
        let mut payload = BytesMut::with_capacity(4);
        payload.put_u32(increment & 0x7fff_ffff);
        Self::new(FrameType::WindowUpdate, 0, stream_id, payload.freeze())
    }

    pub fn rst_stream(stream_id: u32, code: ErrorCode) -> Self {
        let mut payload = BytesMut::with_capacity(4);
        payload.put_u32(code.as_u32());
        Self::new(FrameType::RstStream, 0, stream_id, payload.freeze())
    }

    pub fn ping(ack: bool, data: [u8; 8]) -> Self {
        let flags = if ack { flags::ACK } else { 0 };
        Self::new(FrameType::Ping, flags, 0, Bytes::copy_from_slice(&data))
    }

    pub fn goaway(last_stream_id: u32, code: ErrorCode) -> Self {
        let mut payload = BytesMut::with_capacity(8);
        payload.put_u32(last_stream_id & 0x7fff_ffff);
        payload.put_u32(code.as_u32());
        Self::new(FrameType::GoAway, 0, 0, payload.freeze())
    }

    pub fn headers(stream_id: u32, block: Vec<u8>, end_stream: bool) -> Self {
        let mut flags = flags::END_HEADERS;
        if end_stream {
            flags |= self::flags::END_STREAM;
        }
        Self::new(FrameType::Headers, flags, stream_id, block)
    }

    pub fn data(stream_id: u32, data: Bytes, end_stream: bool) -> Self {
        let flags = if end_stream { flags::END_STREAM } else { 0 };
        Self::new(FrameType::Data, flags, stream_id, data)
    }

    /// Payload with padding (and the HEADERS priority block) removed.
    pub fn content(&self) -> Result<Bytes, Http2Error> {
        let mut payload = self.payload.clone();
        let mut padding = 0usize;
        if self.header.has_flag(flags::PADDED)
            && matches!(self.header.frame_type, FrameType::Data | FrameType::Headers)
        {
            if payload.is_empty() {
                return Err(Http2Error::connection(ErrorCode::Protocol, "missing pad length"));
            }
            padding = payload.get_u8() as usize;
        }
        if self.header.frame_type == FrameType::Headers && self.header.has_flag(flags::PRIORITY) {
            if payload.len() < 5 {
                return Err(Http2Error::connection(ErrorCode::FrameSize, "short priority block"));
            }
            payload.advance(5);
        }
        if padding > payload.len() {
            return Err(Http2Error::connection(ErrorCode::Protocol, "padding exceeds payload"));
        }
        payload.truncate(payload.len() - padding);
        Ok(payload)
    }
}
