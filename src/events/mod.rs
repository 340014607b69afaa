mod bus;
mod types;

pub use bus::{BusObserver, EventReceiver, ImportEventBus};
pub use types::{EventSequence, ImportEvent, ImportEventPayload};
