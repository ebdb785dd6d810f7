pub mod backend;
pub mod cli;
pub mod core;
pub mod markdown;
pub mod media;
pub mod render;
pub mod session;
pub mod upload;
