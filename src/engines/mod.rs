//! Protocol engines: the engine contract, the result record, connection
//! pooling, and the reference wire implementations.

pub mod action;
pub mod dns;
pub mod engine;
pub mod http;
pub mod http2;
pub mod pool;
pub mod registry;
pub mod result;
pub mod runner;
pub mod udp;

pub use action::{Action, ActionMetadata, ActionTimeouts, EngineType, PreparedAction, SocketConfig};
pub use dns::DnsCache;
pub use engine::{BeforeSend, Engine};
pub use http::HttpEngine;
pub use pool::{ConnectionPool, PoolLease};
pub use registry::{create_engine, EngineSet, UnsupportedEngine};
pub use result::{ActionResult, CheckOutcome, TimingRecorder, Timings, ERROR_STATUS, TIMEOUT_STATUS};
pub use runner::ActionRunner;
pub use udp::UdpEngine;
