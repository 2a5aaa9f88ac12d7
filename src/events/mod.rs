//! Observable event stream for coordination state changes.

mod bus;
mod types;

pub use bus::{EventBus, SharedEventBus};
pub use types::CoordinationEvent;
