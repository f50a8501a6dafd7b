pub mod anchor;
pub mod config;
pub mod crypto;
pub mod error;
pub mod pipeline;
pub mod project;
pub mod readiness;
pub mod receipt;
pub mod server;
pub mod snapshot;
