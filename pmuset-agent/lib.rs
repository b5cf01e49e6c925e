// Macros (must be first for visibility)
#[macro_use]
pub mod macros;

pub mod common;
pub mod config;
pub mod counters;
pub mod error;
pub mod orchestrator;
pub mod report;

pub use common::{AccessError, MsrAccess, MsrDevice, SimulatedMsr, Update};
pub use config::{CoreSelection, Topology};
pub use counters::{ChangeSet, FieldChange, PmuController};
pub use error::{PmuError, Result};
pub use orchestrator::{BatchReport, BatchRunner, FailurePolicy};
pub use report::OutputFormat;
