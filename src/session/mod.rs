pub mod controller;
pub mod models;
pub use controller::*;
pub use models::*;
