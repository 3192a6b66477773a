//! Client-side HTTP/2 connection state, driven frame by frame.
//!
//! Streams are plain values keyed by id; the connection owns them together
//! with the settings, flow-control and HPACK state they share.

use std::collections::BTreeMap;

use bytes::{Buf, Bytes};

use super::error::{ErrorCode, Http2Error};
use super::flow_control::{FlowControl, FlowWindow, DEFAULT_WINDOW};
use super::frame::{flags, Frame, FrameType, CONNECTION_PREFACE};
use super::hpack::{Decoder, Encoder};
use super::settings::{decode_settings, SettingId, Settings, SettingsSync};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    Open,
    HalfClosedLocal,
    HalfClosedRemote,
    Closed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Stream {
    pub id: u32,
    pub state: StreamState,
    pub headers: Vec<(String, String)>,
    pub data: Vec<u8>,
    pub reset: Option<ErrorCode>,
}

impl Stream {
    fn new(id: u32) -> Self {
        Self {
            id,
            state: StreamState::Open,
            headers: Vec::new(),
            data: Vec::new(),
            reset: None,
        }
    }

    fn end_local(&mut self) {
        self.state = match self.state {
            StreamState::Open => StreamState::HalfClosedLocal,
            _ => StreamState::Closed,
        };
    }

    fn end_remote(&mut self) {
        self.state = match self.state {
            StreamState::Open => StreamState::HalfClosedRemote,
            _ => StreamState::Closed,
        };
    }

    pub fn status(&self) -> Option<u16> {
        self.headers
            .iter()
            .find(|(name, _)| name == ":status")
            .and_then(|(_, value)| value.parse().ok())
    }
}

#[derive(Debug, Clone)]
pub struct H2Connection {
    settings: SettingsSync,
    flow: FlowControl,
    encoder: Encoder,
    decoder: Decoder,
    streams: BTreeMap<u32, Stream>,
    next_stream_id: u32,
    goaway: Option<ErrorCode>,
    closed: bool,
}

impl Default for H2Connection {
    fn default() -> Self {
        Self::new()
    }
}

impl H2Connection {
    pub fn new() -> Self {
        Self {
            settings: SettingsSync::new(),
            flow: FlowControl::default(),
            encoder: Encoder::new(),
            decoder: Decoder::new(),
            streams: BTreeMap::new(),
            next_stream_id: 1,
            goaway: None,
            closed: false,
        }
    }

    /// Connection preface followed by our initial SETTINGS.
    pub fn preface(&mut self) -> Vec<u8> {
        let frame = self.settings.send_local(vec![
            (SettingId::EnablePush, 0),
            (SettingId::InitialWindowSize, DEFAULT_WINDOW),
        ]);
        let mut bytes = CONNECTION_PREFACE.to_vec();
        bytes.extend_from_slice(&frame.encode());
        bytes
    }

    pub fn update_settings(&mut self, values: Vec<(SettingId, u32)>) -> Frame {
        self.settings.send_local(values)
    }

    pub fn local_settings(&self) -> &Settings {
        self.settings.local()
    }

    pub fn remote_settings(&self) -> &Settings {
        self.settings.remote()
    }

    pub fn stream(&self, id: u32) -> Option<&Stream> {
        self.streams.get(&id)
    }

    pub fn open_streams(&self) -> Vec<u32> {
        self.streams
            .values()
            .filter(|s| s.state != StreamState::Closed)
            .map(|s| s.id)
            .collect()
    }

    pub fn send_window(&self, id: u32) -> Option<FlowWindow> {
        self.flow.stream(id).map(|w| w.send)
    }

    pub fn decoder(&self) -> &Decoder {
        &self.decoder
    }

    pub fn encoder(&self) -> &Encoder {
        &self.encoder
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    pub fn goaway(&self) -> Option<ErrorCode> {
        self.goaway
    }

    fn ensure_open(&self) -> Result<(), Http2Error> {
        if self.closed || self.goaway.is_some() {
            return Err(Http2Error::connection(
                self.goaway.unwrap_or(ErrorCode::NoError),
                "connection is closed",
            ));
        }
        Ok(())
    }

    /// Opens a new stream with a HEADERS frame.
    pub fn open_stream(&mut self, headers: &[(String, String)], end_stream: bool) -> Result<(u32, Frame), Http2Error> {
        self.ensure_open()?;
        if let Some(limit) = self.settings.remote().max_concurrent_streams {
            if self.open_streams().len() as u32 >= limit {
                return Err(Http2Error::connection(ErrorCode::RefusedStream, "concurrent stream limit reached"));
            }
        }
        let id = self.next_stream_id;
        self.next_stream_id += 2;
        let block = self.encoder.encode(headers);
        let mut stream = Stream::new(id);
        if end_stream {
            stream.end_local();
        }
        self.streams.insert(id, stream);
        self.flow.open_stream(id);
        Ok((id, Frame::headers(id, block, end_stream)))
    }

    /// Frames as much of `data` as flow control allows. Returns the frames and
    /// the number of bytes they carry.
    pub fn send_data(&mut self, id: u32, data: &[u8], end_stream: bool) -> Result<(Vec<Frame>, usize), Http2Error> {
        self.ensure_open()?;
        let max_frame = self.settings.remote().max_frame_size as usize;
        let mut frames = Vec::new();
        let mut sent = 0;
        loop {
            let window = self.flow.sendable(id) as usize;
            let chunk = (data.len() - sent).min(window).min(max_frame);
            let last = sent + chunk == data.len();
            if chunk == 0 && !(last && end_stream) {
                break;
            }
            self.flow.reserve_send(id, chunk as u32)?;
            let end = last && end_stream;
            frames.push(Frame::data(id, Bytes::copy_from_slice(&data[sent..sent + chunk]), end));
            sent += chunk;
            if end {
                if let Some(stream) = self.streams.get_mut(&id) {
                    stream.end_local();
                }
                break;
            }
            if last {
                break;
            }
        }
        Ok((frames, sent))
    }

    /// Processes one inbound frame and returns the frames to write back.
    pub fn handle(&mut self, frame: Frame) -> Result<Vec<Frame>, Http2Error> {
        match frame.frame_type() {
            FrameType::Settings => self.on_settings(&frame),
            FrameType::WindowUpdate => self.on_window_update(&frame),
            FrameType::RstStream => self.on_rst_stream(&frame),
            FrameType::Ping => {
                if frame.header.has_flag(flags::ACK) {
                    return Ok(Vec::new());
                }
                let mut data = [0u8; 8];
                if frame.payload.len() != 8 {
                    return Err(Http2Error::connection(ErrorCode::FrameSize, "PING payload must be 8 bytes"));
                }
                data.copy_from_slice(&frame.payload);
                Ok(vec![Frame::ping(true, data)])
            }
            FrameType::GoAway => {
                let mut payload = frame.payload.clone();
                if payload.len() < 8 {
                    return Err(Http2Error::connection(ErrorCode::FrameSize, "short GOAWAY"));
                }
                let _last_stream = payload.get_u32() & 0x7fff_ffff;
                let code = ErrorCode::from_u32(payload.get_u32());
                self.goaway = Some(code);
                tracing::debug!(code = %code, "Peer sent GOAWAY");
                Ok(Vec::new())
            }
            FrameType::Headers => {
                let block = frame.content()?;
                let headers = self.decoder.decode(&block)?;
                if let Some(stream) = self.streams.get_mut(&frame.stream_id()) {
                    stream.headers.extend(headers);
                    if frame.header.has_flag(flags::END_STREAM) {
                        stream.end_remote();
                    }
                }
                Ok(Vec::new())
            }
            FrameType::Data => {
                let id = frame.stream_id();
                let updates = self.flow.on_data_received(id, frame.header.length)?;
                let content = frame.content()?;
                if let Some(stream) = self.streams.get_mut(&id) {
                    stream.data.extend_from_slice(&content);
                    if frame.header.has_flag(flags::END_STREAM) {
                        stream.end_remote();
                    }
                }
                Ok(updates
                    .into_iter()
                    .map(|(stream_id, increment)| Frame::window_update(stream_id, increment))
                    .collect())
            }
            _ => Ok(Vec::new()),
        }
    }

    fn on_settings(&mut self, frame: &Frame) -> Result<Vec<Frame>, Http2Error> {
        if frame.stream_id() != 0 {
            return Err(Http2Error::connection(ErrorCode::Protocol, "SETTINGS on a stream"));
        }
        if frame.header.has_flag(flags::ACK) {
            if !frame.payload.is_empty() {
                return Err(Http2Error::connection(ErrorCode::FrameSize, "SETTINGS ACK with payload"));
            }
            let local = self.settings.on_ack()?;
            self.decoder.set_max_allowed(local.header_table_size as usize);
            self.flow.set_initial_recv(local.initial_window_size);
            return Ok(Vec::new());
        }

        let values = decode_settings(&frame.payload)?;
        let update = self.settings.on_remote(&values)?;
        if let Some(size) = update.initial_window_size {
            let delta = self.flow.apply_initial_window(size)?;
            tracing::trace!(delta, "Applied INITIAL_WINDOW_SIZE");
        }
        if let Some(size) = update.header_table_size {
            self.encoder.set_max_table_size(size as usize);
        }
        Ok(vec![Frame::settings_ack()])
    }

    fn on_window_update(&mut self, frame: &Frame) -> Result<Vec<Frame>, Http2Error> {
        let mut payload = frame.payload.clone();
        if payload.len() != 4 {
            return Err(Http2Error::connection(ErrorCode::FrameSize, "WINDOW_UPDATE payload must be 4 bytes"));
        }
        let increment = payload.get_u32() & 0x7fff_ffff;
        match self.flow.on_window_update(frame.stream_id(), increment) {
            Ok(()) => Ok(Vec::new()),
            Err(Http2Error::Stream { stream_id, code, .. }) => {
                self.reset_stream(stream_id, code);
                Ok(vec![Frame::rst_stream(stream_id, code)])
            }
            Err(err) => {
                self.closed = true;
                Err(err)
            }
        }
    }

    fn on_rst_stream(&mut self, frame: &Frame) -> Result<Vec<Frame>, Http2Error> {
        let mut payload = frame.payload.clone();
        if payload.len() != 4 {
            return Err(Http2Error::connection(ErrorCode::FrameSize, "RST_STREAM payload must be 4 bytes"));
        }
        let code = ErrorCode::from_u32(payload.get_u32());
        let id = frame.stream_id();
        self.reset_stream(id, code);
        if code.is_fatal() {
            self.closed = true;
            return Err(Http2Error::connection(code, format!("stream {id} reset")));
        }
        Ok(Vec::new())
    }

    fn reset_stream(&mut self, id: u32, code: ErrorCode) {
        if let Some(stream) = self.streams.get_mut(&id) {
            stream.state = StreamState::Closed;
            stream.reset = Some(code);
        }
        self.flow.close_stream(id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engines::http2::settings::settings_frame;

    fn request() -> Vec<(String, String)> {
        vec![
            (":method".to_string(), "GET".to_string()),
            (":scheme".to_string(), "http".to_string()),
            (":path".to_string(), "/".to_string()),
            (":authority".to_string(), "localhost".to_string()),
        ]
    }

    fn connected() -> H2Connection {
        let mut conn = H2Connection::new();
        let preface = conn.preface();
        assert!(preface.starts_with(CONNECTION_PREFACE));
        conn
    }

    #[test]
    fn test_initial_window_delta_applied_once() {
        let mut conn = connected();
        let (first, _) = conn.open_stream(&request(), true).unwrap();
        let (second, _) = conn.open_stream(&request(), true).unwrap();
        assert_eq!((first, second), (1, 3));

        let out = conn
            .handle(settings_frame(&[(SettingId::InitialWindowSize, 65_536)]))
            .unwrap();
        assert_eq!(out, vec![Frame::settings_ack()]);
        conn.handle(Frame::settings_ack()).unwrap();

        for id in [first, second] {
            let window = conn.send_window(id).unwrap();
            assert_eq!(window.available(), 65_536);
            assert_eq!(window.deficit(), 0);
        }
    }

    #[test]
    fn test_shrinking_window_never_goes_negative() {
        let mut conn = connected();
        let (id, _) = conn.open_stream(&request(), false).unwrap();
        let (_, sent) = conn.send_data(id, &[0u8; 40_000], false).unwrap();
        assert_eq!(sent, 40_000);

        conn.handle(settings_frame(&[(SettingId::InitialWindowSize, 10_000)]))
            .unwrap();
        let window = conn.send_window(id).unwrap();
        assert_eq!(window.available(), 0);
        assert_eq!(window.deficit(), 30_000);
    }

    #[test]
    fn test_send_data_is_flow_limited() {
        let mut conn = connected();
        let (id, _) = conn.open_stream(&request(), false).unwrap();
        let (frames, sent) = conn.send_data(id, &vec![1u8; 70_000], true).unwrap();
        assert_eq!(sent, 65_535);
        assert_eq!(frames.len(), 4);
        assert!(frames.iter().all(|f| !f.header.has_flag(flags::END_STREAM)));

        conn.handle(Frame::window_update(0, 10_000)).unwrap();
        conn.handle(Frame::window_update(id, 10_000)).unwrap();
        let (frames, sent) = conn.send_data(id, &vec![1u8; 4_465], true).unwrap();
        assert_eq!(sent, 4_465);
        assert!(frames.last().unwrap().header.has_flag(flags::END_STREAM));
        assert_eq!(conn.stream(id).unwrap().state, StreamState::HalfClosedLocal);
    }

    #[test]
    fn test_header_table_size_waits_for_ack() {
        let mut conn = connected();
        conn.handle(Frame::settings_ack()).unwrap();
        conn.update_settings(vec![(SettingId::HeaderTableSize, 8192)]);
        assert_eq!(conn.decoder().max_allowed(), 4096);
        conn.handle(Frame::settings_ack()).unwrap();
        assert_eq!(conn.decoder().max_allowed(), 8192);
    }

    #[test]
    fn test_non_fatal_reset_closes_only_the_stream() {
        let mut conn = connected();
        let (first, _) = conn.open_stream(&request(), true).unwrap();
        let (second, _) = conn.open_stream(&request(), true).unwrap();
        conn.handle(Frame::rst_stream(first, ErrorCode::Cancel)).unwrap();
        assert_eq!(conn.stream(first).unwrap().reset, Some(ErrorCode::Cancel));
        assert!(!conn.is_closed());
        assert_eq!(conn.open_streams(), vec![second]);
    }

    #[test]
    fn test_fatal_reset_tears_down_connection() {
        let mut conn = connected();
        let (id, _) = conn.open_stream(&request(), true).unwrap();
        let err = conn.handle(Frame::rst_stream(id, ErrorCode::Protocol)).unwrap_err();
        assert_eq!(err.code(), ErrorCode::Protocol);
        assert!(conn.is_closed());
        assert!(conn.open_stream(&request(), true).is_err());
    }

    #[test]
    fn test_response_headers_and_data() {
        let mut conn = connected();
        let (id, _) = conn.open_stream(&request(), true).unwrap();

        let mut peer = Encoder::new();
        let block = peer.encode(&[(":status".to_string(), "200".to_string())]);
        conn.handle(Frame::headers(id, block, false)).unwrap();
        let updates = conn
            .handle(Frame::data(id, Bytes::from_static(b"hello"), true))
            .unwrap();
        assert_eq!(updates, vec![Frame::window_update(0, 5), Frame::window_update(id, 5)]);

        let stream = conn.stream(id).unwrap();
        assert_eq!(stream.status(), Some(200));
        assert_eq!(stream.data, b"hello");
        assert_eq!(stream.state, StreamState::Closed);
    }

    #[test]
    fn test_ping_is_acknowledged() {
        let mut conn = connected();
        let out = conn.handle(Frame::ping(false, *b"abcdefgh")).unwrap();
        assert_eq!(out, vec![Frame::ping(true, *b"abcdefgh")]);
    }
}
