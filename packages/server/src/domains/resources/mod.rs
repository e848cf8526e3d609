//! Resources domain - subject-owned records created through the API
//!
//! Creation commits the resource and its `resource.created` event in one unit
//! of work; the relay publishes the event and the inbound pipeline reacts to
//! it.

pub mod actions;
pub mod effects;
pub mod models;

pub use actions::{Resources, RESOURCE_CREATED};
pub use effects::ResourceCreatedHandler;
pub use models::{CreateResource, CreateResourceCommand, Resource, ResourceBook};
