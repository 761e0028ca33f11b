pub mod jsonl;
pub mod text;

pub use jsonl::JsonlReporter;
pub use text::TextReporter;
