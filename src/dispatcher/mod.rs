//! Per-stage hook dispatch: layering hooks into waves, running them with
//! bounded time, gating on conditions and wiring channels.

pub mod channel;
pub mod event;
pub mod event_dispatcher;
pub mod execution_path;

pub use channel::ChannelBus;
pub use event::Event;
pub use event_dispatcher::{DispatchOutcome, EventDispatcher};
pub use execution_path::{ActionPlan, ExecutionGraph};
