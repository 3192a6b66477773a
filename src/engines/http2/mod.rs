//! HTTP/2 connection-level state machines: frames, SETTINGS synchronization,
//! flow-control windows and HPACK.

pub mod connection;
pub mod error;
pub mod flow_control;
pub mod frame;
pub mod hpack;
pub mod settings;

pub use connection::{H2Connection, Stream, StreamState};
pub use error::{ErrorCode, Http2Error};
pub use flow_control::{FlowControl, FlowWindow};
pub use frame::{Frame, FrameHeader, FrameType};
pub use hpack::{Decoder, DynamicTable, Encoder};
pub use settings::{SettingId, Settings, SettingsSync};
