//! Load shapes: a persona turns prepared action plans into a time-bounded
//! workload.

pub mod config;
pub mod persona;
pub mod selector;

pub use config::{PersonaConfig, PersonaType};
pub use persona::{Persona, PersonaOutput};
pub use selector::{normalize_weights, Selector};
