pub mod backend;
pub mod catalog;
pub mod client;
pub mod config;
pub mod error;
pub mod fixture;
pub mod oracle;
pub mod protocol;
pub mod security;
pub mod server;
pub mod sql;

pub use client::Session;
pub use error::{Error, Result};
