// HTTP routes
pub mod audit;
pub mod dashboard;
pub mod events;
pub mod health;
pub mod resources;

pub use audit::*;
pub use dashboard::*;
pub use events::*;
pub use health::*;
pub use resources::*;
