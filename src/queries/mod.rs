//! SQL text for every statement the store runs, built with sea-query.
//! One module per table; statements are rendered for SQLite.

pub mod audio_files;
pub mod ddl;
pub mod metadata;
pub mod segments;
pub mod transcripts;
