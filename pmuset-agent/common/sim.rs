//! In-memory register file standing in for `/dev/cpu/*/msr`
//!
//! Backs `--simulate` runs and the unit tests. Every read and write is
//! recorded in order, so callers can assert exactly which registers an
//! operation touched.

use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::io;

use crate::common::msr::{AccessError, MsrAccess};
use crate::config::Topology;

/// A recorded register access
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    Read { core: u32, msr: u64 },
    Write { core: u32, msr: u64, value: u64 },
}

impl Access {
    pub fn core(&self) -> u32 {
        match self {
            Access::Read { core, .. } | Access::Write { core, .. } => *core,
        }
    }

    pub fn is_write(&self) -> bool {
        matches!(self, Access::Write { .. })
    }
}

pub struct SimulatedMsr {
    cores: Vec<u32>,
    registers: Mutex<HashMap<(u32, u64), u64>>,
    log: Mutex<Vec<Access>>,
    offline: Mutex<HashSet<u32>>,
}

impl SimulatedMsr {
    /// All registers of all topology cores start at zero
    pub fn new(topology: &Topology) -> Self {
        Self {
            cores: topology.cores().to_vec(),
            registers: Mutex::new(HashMap::new()),
            log: Mutex::new(Vec::new()),
            offline: Mutex::new(HashSet::new()),
        }
    }

    /// Seed a register without recording an access
    pub fn preset(&self, core: u32, msr: u64, value: u64) {
        self.registers.lock().insert((core, msr), value);
    }

    /// Current value without recording an access
    pub fn peek(&self, core: u32, msr: u64) -> u64 {
        self.registers
            .lock()
            .get(&(core, msr))
            .copied()
            .unwrap_or(0)
    }

    /// Every non-zero register of `core`, by address
    pub fn snapshot(&self, core: u32) -> BTreeMap<u64, u64> {
        self.registers
            .lock()
            .iter()
            .filter_map(|(&(c, msr), &v)| (c == core && v != 0).then_some((msr, v)))
            .collect()
    }

    /// Make every access to `core` fail as if its device node were missing
    pub fn take_offline(&self, core: u32) {
        self.offline.lock().insert(core);
    }

    pub fn accesses(&self) -> Vec<Access> {
        self.log.lock().clone()
    }

    pub fn clear_log(&self) {
        self.log.lock().clear();
    }

    fn check_core(&self, core: u32) -> Result<(), AccessError> {
        if !self.cores.contains(&core) {
            return Err(AccessError::CoreOutOfRange {
                core,
                available: self.cores.len(),
            });
        }
        if self.offline.lock().contains(&core) {
            return Err(AccessError::InterfaceUnavailable {
                core,
                source: io::Error::from(io::ErrorKind::NotFound),
            });
        }
        Ok(())
    }
}

impl MsrAccess for SimulatedMsr {
    fn read(&self, core: u32, msr: u64) -> Result<u64, AccessError> {
        self.check_core(core)?;
        self.log.lock().push(Access::Read { core, msr });
        let value = self.peek(core, msr);
        tracing::debug!("Simulated MSR read: CPU {} MSR 0x{:08x} = 0x{:016x}", core, msr, value);
        Ok(value)
    }

    fn write(&self, core: u32, msr: u64, value: u64) -> Result<(), AccessError> {
        self.check_core(core)?;
        self.log.lock().push(Access::Write { core, msr, value });
        self.preset(core, msr, value);
        tracing::debug!("Simulated MSR write: CPU {} MSR 0x{:08x} = 0x{:016x}", core, msr, value);
        Ok(())
    }
}
