//! Host pieces for `driftd`: the JSON-lines input loop and the bundled
//! publishers.

pub mod input;
pub mod publishers;

pub use input::{FolderRecord, InboundMessage, InputHandler, LineOutcome, spawn_stdin_reader};
pub use publishers::{JsonLinesPublisher, LogPublisher};
