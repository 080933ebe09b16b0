pub mod bridge;
mod config;
pub mod control_plane;
pub mod engine;
pub mod polling;
pub mod process;
pub mod reconciler;
pub mod scheduler;
pub mod storage;
pub mod transport;

#[cfg(any(test, feature = "testkit"))]
pub mod testkit;

pub use config::{Config, ConfigError, Timings};
pub use engine::{Engine, EngineError, EngineHandle, Snapshot};
pub use reconciler::{RenderRequest, ToggleError};
