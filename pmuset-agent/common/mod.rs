pub mod cpuid;
pub mod msr;
pub mod sim;

pub use cpuid::PerfmonInfo;
pub use msr::{AccessError, MsrAccess, MsrDevice, Update};
pub use sim::SimulatedMsr;
