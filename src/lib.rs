pub mod analysis;
pub mod config;
pub mod engine;
pub mod error;
pub mod events;
pub mod lighting;
pub mod midi;
pub mod performance;
pub mod session;
pub mod timing;

pub use config::Config;
pub use engine::LightingEngine;
pub use error::{Error, Result};
pub use session::{PerformanceSession, PerformanceSignals, SessionLog};
