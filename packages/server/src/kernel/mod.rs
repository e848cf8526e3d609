// Kernel - dependency wiring shared by the HTTP server and background services
pub mod deps;

pub use deps::{event_catalog, InMemoryStores, ServerDeps};
