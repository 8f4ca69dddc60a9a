//! Worker side of the launcher control protocol.
//!
//! A worker reads its flags from the environment, announces its capabilities
//! on stderr, then decodes commands from stdin on a dedicated thread and hands
//! them to its engine as [`WorkerAction`]s.

pub mod announce;
pub mod control;
pub mod env;
pub mod log_format;

pub use announce::ControlWriter;
pub use control::{ControlError, ControlReader, WorkerAction, spawn_control_thread};
pub use env::WorkerEnv;
pub use log_format::WorkerLogFormat;
