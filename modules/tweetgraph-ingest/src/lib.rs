pub mod dead_letter;
pub mod ingestor;
pub mod source;

pub use dead_letter::{DeadLetter, DeadLetterSink, JsonlDeadLetters, MemoryDeadLetters};
pub use ingestor::{IngestConfig, IngestStats, Ingestor, LoopState, RunReport, StopReason};
pub use source::{JsonlSource, JsonlStats, PostSource, VecSource};
