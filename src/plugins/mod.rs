//! Plugins shipped with the crate.

pub mod plain_text;
pub mod transcript;

pub use plain_text::PlainTextRenderer;
pub use transcript::TranscriptPlugin;
