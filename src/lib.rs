// Library interface for the CLI and tests

pub mod assignment;
pub mod blob;
pub mod chunker;
pub mod config;
pub mod constants;
pub mod context;
pub mod credentials;
pub mod db;
pub mod error;
pub mod ingest;
pub mod lifecycle;
pub mod model;
pub mod queries;
pub mod schema;
pub mod sftp;
pub mod store;

pub use constants::EXPECTED_DB_VERSION;
pub use context::RequestContext;
pub use error::{DispatchError, Result};
