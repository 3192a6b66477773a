//! Shared runtime primitives: context values, per-stage context, edge history,
//! shutdown signalling, graph events, clocks and checkpoint storage.

pub mod checkpoint;
pub mod context;
pub mod event_bus;
pub mod history;
pub mod runtime_context;
pub mod safe_stop;
pub mod value;

pub use checkpoint::{CheckpointStore, FileCheckpointStore, MemoryCheckpointStore};
pub use context::StageContext;
pub use event_bus::{create_event_channel, EventEmitter, EventReceiver, EventSender, GraphEvent};
pub use history::{merge_slot, GraphHistory, HistorySlot};
pub use runtime_context::{Clock, IdGenerator, ManualClock, MonotonicClock, RuntimeContext};
pub use safe_stop::ShutdownSignal;
pub use value::{ContextValue, OpaqueValue};
