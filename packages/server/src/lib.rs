//! Fleet server: the HTTP front door over the chassis, with the creator
//! dashboard and resources as its reference domains.

pub mod config;
pub mod domains;
pub mod kernel;
pub mod server;

pub use config::Config;
