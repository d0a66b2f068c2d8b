//! Pipeline module - per-item step pipeline and the batch orchestrator.

mod batch;
mod item;
mod progress;

pub use batch::*;
pub use item::*;
pub use progress::*;
