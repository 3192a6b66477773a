//! SETTINGS synchronization (RFC 9113 section 6.5).
//!
//! Local settings take effect only once the peer acknowledges them; remote
//! settings take effect on receipt.

use std::collections::VecDeque;

use bytes::Buf;

use super::error::{ErrorCode, Http2Error};
use super::flow_control::MAX_WINDOW;
use super::frame::Frame;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SettingId {
    HeaderTableSize,
    EnablePush,
    MaxConcurrentStreams,
    InitialWindowSize,
    MaxFrameSize,
    MaxHeaderListSize,
}

impl SettingId {
    pub fn from_u16(id: u16) -> Option<Self> {
        match id {
            0x1 => Some(SettingId::HeaderTableSize),
            0x2 => Some(SettingId::EnablePush),
            0x3 => Some(SettingId::MaxConcurrentStreams),
            0x4 => Some(SettingId::InitialWindowSize),
            0x5 => Some(SettingId::MaxFrameSize),
            0x6 => Some(SettingId::MaxHeaderListSize),
            _ => None,
        }
    }

    pub fn as_u16(&self) -> u16 {
        match self {
            SettingId::HeaderTableSize => 0x1,
            SettingId::EnablePush => 0x2,
            SettingId::MaxConcurrentStreams => 0x3,
            SettingId::InitialWindowSize => 0x4,
            SettingId::MaxFrameSize => 0x5,
            SettingId::MaxHeaderListSize => 0x6,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Settings {
    pub header_table_size: u32,
    pub enable_push: bool,
    pub max_concurrent_streams: Option<u32>,
    pub initial_window_size: u32,
    pub max_frame_size: u32,
    pub max_header_list_size: Option<u32>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            header_table_size: 4096,
            enable_push: true,
            max_concurrent_streams: None,
            initial_window_size: 65_535,
            max_frame_size: 16_384,
            max_header_list_size: None,
        }
    }
}

impl Settings {
    pub fn apply(&mut self, id: SettingId, value: u32) -> Result<(), Http2Error> {
        match id {
            SettingId::HeaderTableSize => self.header_table_size = value,
            SettingId::EnablePush => {
                if value > 1 {
                    return Err(Http2Error::connection(ErrorCode::Protocol, "ENABLE_PUSH must be 0 or 1"));
                }
                self.enable_push = value == 1;
            }
            SettingId::MaxConcurrentStreams => self.max_concurrent_streams = Some(value),
            SettingId::InitialWindowSize => {
                if value > MAX_WINDOW {
                    return Err(Http2Error::connection(
                        ErrorCode::FlowControl,
                        "INITIAL_WINDOW_SIZE above 2^31-1",
                    ));
                }
                self.initial_window_size = value;
            }
            SettingId::MaxFrameSize => {
                if !(16_384..=16_777_215).contains(&value) {
                    return Err(Http2Error::connection(ErrorCode::Protocol, "MAX_FRAME_SIZE out of range"));
                }
                self.max_frame_size = value;
            }
            SettingId::MaxHeaderListSize => self.max_header_list_size = Some(value),
        }
        Ok(())
    }
}

/// Decodes a SETTINGS payload. Unknown identifiers are ignored.
pub fn decode_settings(payload: &[u8]) -> Result<Vec<(SettingId, u32)>, Http2Error> {
    if payload.len() % 6 != 0 {
        return Err(Http2Error::connection(
            ErrorCode::FrameSize,
            "SETTINGS payload is not a multiple of 6",
        ));
    }
    let mut buf = payload;
    let mut values = Vec::with_capacity(payload.len() / 6);
    while buf.has_remaining() {
        let id = buf.get_u16();
        let value = buf.get_u32();
        if let Some(id) = SettingId::from_u16(id) {
            values.push((id, value));
        }
    }
    Ok(values)
}

pub fn settings_frame(values: &[(SettingId, u32)]) -> Frame {
    let raw: Vec<(u16, u32)> = values.iter().map(|(id, v)| (id.as_u16(), *v)).collect();
    Frame::settings(&raw)
}

/// Changes caused by one remote SETTINGS frame.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RemoteUpdate {
    pub initial_window_size: Option<u32>,
    pub header_table_size: Option<u32>,
}

#[derive(Debug, Clone, Default)]
pub struct SettingsSync {
    local: Settings,
    remote: Settings,
    pending: VecDeque<Vec<(SettingId, u32)>>,
}

impl SettingsSync {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn local(&self) -> &Settings {
        &self.local
    }

    pub fn remote(&self) -> &Settings {
        &self.remote
    }

    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    /// Queues new local settings and returns the frame announcing them.
    pub fn send_local(&mut self, values: Vec<(SettingId, u32)>) -> Frame {
        let frame = settings_frame(&values);
        self.pending.push_back(values);
        frame
    }

    /// Applies the oldest unacknowledged local settings.
    pub fn on_ack(&mut self) -> Result<Settings, Http2Error> {
        let values = self
            .pending
            .pop_front()
            .ok_or_else(|| Http2Error::connection(ErrorCode::Protocol, "unexpected SETTINGS ACK"))?;
        for (id, value) in values {
            self.local.apply(id, value)?;
        }
        Ok(self.local)
    }

    pub fn on_remote(&mut self, values: &[(SettingId, u32)]) -> Result<RemoteUpdate, Http2Error> {
        let mut update = RemoteUpdate::default();
        for (id, value) in values {
            self.remote.apply(*id, *value)?;
            match id {
                SettingId::InitialWindowSize => update.initial_window_size = Some(*value),
                SettingId::HeaderTableSize => update.header_table_size = Some(*value),
                _ => {}
            }
        }
        Ok(update)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_local_settings_wait_for_ack() {
        let mut sync = SettingsSync::new();
        sync.send_local(vec![(SettingId::HeaderTableSize, 1024)]);
        assert_eq!(sync.local().header_table_size, 4096);
        assert_eq!(sync.pending(), 1);

        let applied = sync.on_ack().unwrap();
        assert_eq!(applied.header_table_size, 1024);
        assert_eq!(sync.pending(), 0);
        assert_eq!(sync.on_ack().unwrap_err().code(), ErrorCode::Protocol);
    }

    #[test]
    fn test_remote_settings_apply_immediately() {
        let mut sync = SettingsSync::new();
        let update = sync
            .on_remote(&[(SettingId::InitialWindowSize, 65_536), (SettingId::MaxConcurrentStreams, 100)])
            .unwrap();
        assert_eq!(update.initial_window_size, Some(65_536));
        assert_eq!(update.header_table_size, None);
        assert_eq!(sync.remote().max_concurrent_streams, Some(100));
    }

    #[test]
    fn test_invalid_values() {
        let mut settings = Settings::default();
        assert_eq!(
            settings.apply(SettingId::InitialWindowSize, 1 << 31).unwrap_err().code(),
            ErrorCode::FlowControl
        );
        assert_eq!(
            settings.apply(SettingId::MaxFrameSize, 100).unwrap_err().code(),
            ErrorCode::Protocol
        );
        assert_eq!(
            settings.apply(SettingId::EnablePush, 2).unwrap_err().code(),
            ErrorCode::Protocol
        );
    }

    #[test]
    fn test_decode_payload() {
        let frame = settings_frame(&[(SettingId::InitialWindowSize, 65_536)]);
        let mut payload = frame.payload.to_vec();
        // unknown identifier 0xff is skipped
        payload.extend_from_slice(&[0, 0xff, 0, 0, 0, 1]);
        assert_eq!(
            decode_settings(&payload).unwrap(),
            vec![(SettingId::InitialWindowSize, 65_536)]
        );
        assert_eq!(decode_settings(&[0, 1]).unwrap_err().code(), ErrorCode::FrameSize);
    }
}
