//! Stream and connection flow-control windows (RFC 9113 section 6.9).
//!
//! A SETTINGS change to INITIAL_WINDOW_SIZE can shrink an open stream's send
//! window below what was already sent. The window then saturates at zero and
//! the shortfall is carried as a deficit that later WINDOW_UPDATEs repay.

use std::collections::BTreeMap;

use super::error::{ErrorCode, Http2Error};

pub const MAX_WINDOW: u32 = (1 << 31) - 1;
pub const DEFAULT_WINDOW: u32 = 65_535;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlowWindow {
    available: u32,
    deficit: u32,
}

impl FlowWindow {
    pub fn new(size: u32) -> Self {
        Self {
            available: size,
            deficit: 0,
        }
    }

    pub fn available(&self) -> u32 {
        self.available
    }

    pub fn deficit(&self) -> u32 {
        self.deficit
    }

    pub fn consume(&mut self, amount: u32) -> Result<(), Http2Error> {
        if amount > self.available {
            return Err(Http2Error::connection(
                ErrorCode::FlowControl,
                format!("{} bytes exceed window of {}", amount, self.available),
            ));
        }
        self.available -= amount;
        Ok(())
    }

    pub fn increase(&mut self, amount: u32) -> Result<(), Http2Error> {
        let repaid = amount.min(self.deficit);
        self.deficit -= repaid;
        let gained = u64::from(self.available) + u64::from(amount - repaid);
        if gained > u64::from(MAX_WINDOW) {
            return Err(Http2Error::connection(ErrorCode::FlowControl, "window exceeds 2^31-1"));
        }
        self.available = gained as u32;
        Ok(())
    }

    pub fn apply_delta(&mut self, delta: i64) -> Result<(), Http2Error> {
        if delta >= 0 {
            let amount = u32::try_from(delta)
                .map_err(|_| Http2Error::connection(ErrorCode::FlowControl, "window delta too large"))?;
            return self.increase(amount);
        }
        let shrink = delta.unsigned_abs();
        let shrink = u32::try_from(shrink)
            .map_err(|_| Http2Error::connection(ErrorCode::FlowControl, "window delta too large"))?;
        if shrink <= self.available {
            self.available -= shrink;
        } else {
            self.deficit = self.deficit.saturating_add(shrink - self.available);
            self.available = 0;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamWindows {
    pub send: FlowWindow,
    pub recv: FlowWindow,
}

/// Windows for one connection and its streams, keyed by stream id.
#[derive(Debug, Clone)]
pub struct FlowControl {
    connection_send: FlowWindow,
    connection_recv: FlowWindow,
    streams: BTreeMap<u32, StreamWindows>,
    initial_send: u32,
    initial_recv: u32,
}

impl Default for FlowControl {
    fn default() -> Self {
        Self::new(DEFAULT_WINDOW, DEFAULT_WINDOW)
    }
}

impl FlowControl {
    pub fn new(initial_send: u32, initial_recv: u32) -> Self {
        Self {
            connection_send: FlowWindow::new(DEFAULT_WINDOW),
            connection_recv: FlowWindow::new(DEFAULT_WINDOW),
            streams: BTreeMap::new(),
            initial_send,
            initial_recv,
        }
    }

    pub fn open_stream(&mut self, stream_id: u32) {
        self.streams.entry(stream_id).or_insert(StreamWindows {
            send: FlowWindow::new(self.initial_send),
            recv: FlowWindow::new(self.initial_recv),
        });
    }

    pub fn close_stream(&mut self, stream_id: u32) {
        self.streams.remove(&stream_id);
    }

    pub fn stream(&self, stream_id: u32) -> Option<&StreamWindows> {
        self.streams.get(&stream_id)
    }

    pub fn connection_send(&self) -> FlowWindow {
        self.connection_send
    }

    pub fn initial_send(&self) -> u32 {
        self.initial_send
    }

    /// Applies a new peer INITIAL_WINDOW_SIZE to every open stream. Returns
    /// the delta that was applied.
    pub fn apply_initial_window(&mut self, size: u32) -> Result<i64, Http2Error> {
        let delta = i64::from(size) - i64::from(self.initial_send);
        if delta != 0 {
            for windows in self.streams.values_mut() {
                windows.send.apply_delta(delta)?;
            }
        }
        self.initial_send = size;
        Ok(delta)
    }

    pub fn set_initial_recv(&mut self, size: u32) {
        self.initial_recv = size;
    }

    /// Bytes that may be sent on `stream_id` right now.
    pub fn sendable(&self, stream_id: u32) -> u32 {
        self.streams
            .get(&stream_id)
            .map(|w| w.send.available().min(self.connection_send.available()))
            .unwrap_or(0)
    }

    pub fn reserve_send(&mut self, stream_id: u32, amount: u32) -> Result<(), Http2Error> {
        if amount > self.sendable(stream_id) {
            return Err(Http2Error::stream(
                stream_id,
                ErrorCode::FlowControl,
                format!("cannot send {amount} bytes"),
            ));
        }
        self.connection_send.consume(amount)?;
        if let Some(windows) = self.streams.get_mut(&stream_id) {
            windows.send.consume(amount)?;
        }
        Ok(())
    }

    pub fn on_window_update(&mut self, stream_id: u32, increment: u32) -> Result<(), Http2Error> {
        if increment == 0 {
            return Err(if stream_id == 0 {
                Http2Error::connection(ErrorCode::Protocol, "zero WINDOW_UPDATE increment")
            } else {
                Http2Error::stream(stream_id, ErrorCode::Protocol, "zero WINDOW_UPDATE increment")
            });
        }
        if stream_id == 0 {
            return self.connection_send.increase(increment);
        }
        match self.streams.get_mut(&stream_id) {
            Some(windows) => windows
                .send
                .increase(increment)
                .map_err(|e| Http2Error::stream(stream_id, ErrorCode::FlowControl, e.to_string())),
            None => Ok(()),
        }
    }

    /// Accounts received DATA and returns the WINDOW_UPDATEs (stream id,
    /// increment) that replenish both windows.
    pub fn on_data_received(&mut self, stream_id: u32, amount: u32) -> Result<Vec<(u32, u32)>, Http2Error> {
        if amount == 0 {
            return Ok(Vec::new());
        }
        self.connection_recv.consume(amount)?;
        self.connection_recv.increase(amount)?;
        let mut updates = vec![(0, amount)];
        if let Some(windows) = self.streams.get_mut(&stream_id) {
            windows.recv.consume(amount)?;
            windows.recv.increase(amount)?;
            updates.push((stream_id, amount));
        }
        Ok(updates)
    }
}
