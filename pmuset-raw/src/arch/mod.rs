//! Architecture-specific register definitions
//!
//! ## Supported Architectures
//!
//! - **Intel architectural perfmon v2+** (`perfmon`) - IA32_PERF_GLOBAL_CTRL,
//!   IA32_FIXED_CTR_CTRL and IA32_PERFEVTSELx as documented in the SDM;
//!   identical across Core and Xeon generations since Nehalem.

pub mod perfmon;
