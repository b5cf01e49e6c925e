pub mod batch;

pub use batch::{BatchReport, BatchRunner, CoreOutcome, CoreReport, FailurePolicy, Outcome};
