pub mod buffer;
pub mod codec;
pub mod config;
pub mod error;
pub mod framing;
pub mod pipeline;
pub mod run;
mod stages;

pub use buffer::{IndexedBuffer, Slot};
pub use codec::Codec;
pub use config::{PipelineConfig, DEFAULT_BLOCK_SIZE, DEFAULT_CAPACITY};
pub use error::{PipelineError, ProtocolError, Result, Stage};
pub use pipeline::{open_read, open_write, Phase, Pipeline, RunStats};
pub use run::{CancelFlag, RunState};
