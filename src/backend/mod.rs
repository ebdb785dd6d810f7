pub mod core;
pub mod models;
pub use core::*;
pub use models::*;
