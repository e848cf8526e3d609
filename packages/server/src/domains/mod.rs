// Business domains
pub mod dashboard;
pub mod resources;
