//! On-disk configuration (`stampede.toml`), per-run settings and duration parsing.

pub mod duration;
pub mod file;
pub mod settings;

pub use duration::{format_duration, parse_duration};
pub use file::{CoreSettings, LogLevel, LoggingSettings, StampedeConfig, CONFIG_FILE_NAME};
pub use settings::{default_pool_size, RunOverrides, RunSettings, SummaryKind, SummarySelection};
