//! Recording Session
//!
//! Wires the sample source, the encoders and the container writer together
//! behind a start/record/stop lifecycle. The host (or the CLI) decides when a
//! session starts and stops; everything in between is driven from here.

mod config;
mod error;
mod session;

pub use config::RecorderConfig;
pub use error::RecorderError;
pub use session::{run_demo, Recorder, SessionInfo};
