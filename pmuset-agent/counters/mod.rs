pub mod change;
pub mod control;
pub mod events;
pub mod status;

pub use change::{ChangeSet, FieldChange};
pub use control::PmuController;
pub use events::{PmuEvent, ARCHITECTURAL_EVENTS};
pub use status::{
    CoreCounterStatus, CounterValues, FixedCounter, FixedCounterStatus, PmuEventSelStatus,
};
