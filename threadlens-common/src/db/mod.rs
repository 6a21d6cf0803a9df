//! Database access shared across threadlens crates

pub mod init;
pub mod schema;

pub use init::*;
pub use schema::*;
