//! # pmuset-raw
//!
//! Hardware register definitions for Intel core Performance Monitoring.
//!
//! This crate provides compile-time checked bit-field descriptors, typed
//! register layouts and raw MSR (Model-Specific Register) access for the
//! per-core performance monitoring registers: global enable control,
//! fixed-counter control and general-purpose event selects.
//!
//! ## Usage
//!
//! ```ignore
//! use std::path::Path;
//! use pmuset_raw::perfmon::{field, msr};
//! use pmuset_raw::{MsrFile, DEFAULT_MSR_ROOT};
//!
//! let mut dev = MsrFile::open(Path::new(DEFAULT_MSR_ROOT), 0)?;
//!
//! // Program event 0x3C on counter 2 without touching any other bit
//! let addr = msr::IA32_PERFEVTSEL[2];
//! let current = dev.read(addr)?;
//! dev.write(addr, field::evtsel::EVENT_SELECT.insert(current, 0x3C))?;
//! ```

pub mod arch;
pub mod msr;
pub mod register;

// Re-export for convenience
pub use arch::perfmon;
pub use msr::{device_path, read_msr, MsrError, MsrFile, Result, DEFAULT_MSR_ROOT};
pub use register::{mask_of, BitField, RegisterLayout};
