//! Core data models: configuration, errors and dataset items.

mod config;
mod error;
mod item;

pub use config::*;
pub use error::*;
pub use item::*;
