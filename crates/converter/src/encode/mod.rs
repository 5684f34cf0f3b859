//! ffmpeg driver: progress parsing, process control and the encode loop

pub mod ffmpeg;
pub mod process;
pub mod progress;

pub use ffmpeg::{parse_duration, EncodeOutcome, Encoder, Progress};
pub use process::{ControlError, ProcessControl, ProcessState, SysinfoControl};
pub use progress::{parse_elapsed, percent};
