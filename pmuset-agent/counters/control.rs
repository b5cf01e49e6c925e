use pmuset_raw::perfmon::{field, mask, msr};

use crate::common::msr::{MsrAccess, Update};
use crate::config::Topology;
use crate::counters::change::ChangeSet;
use crate::error::{PmuError, Result};

/// Read-modify-write front end for the core PMU control registers
///
/// Every operation reads the current register value on the target core,
/// changes only the bits it names and writes the result back. Nothing is
/// cached between calls.
pub struct PmuController<'a, A: MsrAccess + ?Sized> {
    pub(crate) access: &'a A,
    pub(crate) topology: &'a Topology,
}

impl<'a, A: MsrAccess + ?Sized> PmuController<'a, A> {
    pub fn new(access: &'a A, topology: &'a Topology) -> Self {
        Self { access, topology }
    }

    pub fn topology(&self) -> &Topology {
        self.topology
    }

    pub(crate) fn check_pmu_index(&self, index: usize) -> Result<u64> {
        if index >= self.topology.num_pmu() {
            return Err(PmuError::invalid(format!(
                "PMU index {index} out of range (0-{})",
                self.topology.num_pmu() - 1
            )));
        }
        msr::perfevtsel(index)
            .ok_or_else(|| PmuError::invalid(format!("no event-select register for PMU {index}")))
    }

    /// Event-select addresses for one PMU or all of them
    fn evtsel_targets(&self, pmu_index: Option<usize>) -> Result<Vec<u64>> {
        match pmu_index {
            Some(index) => Ok(vec![self.check_pmu_index(index)?]),
            None => Ok(msr::IA32_PERFEVTSEL[..self.topology.num_pmu()].to_vec()),
        }
    }

    /// Start or stop the three fixed counters
    ///
    /// Touches bits 32-34 of IA32_PERF_GLOBAL_CTRL and the EN fields of
    /// IA32_FIXED_CTR_CTRL; PMI/ANY and PMU enables are kept.
    pub fn set_fixed_counters_enabled(&self, core: u32, enabled: bool) -> Result<Vec<Update>> {
        let global = self
            .access
            .modify(core, msr::IA32_PERF_GLOBAL_CTRL, &|v| {
                if enabled {
                    v | mask::ENABLE_FIXED_ALL
                } else {
                    v & !mask::ENABLE_FIXED_ALL
                }
            })?;

        let fixed = self.access.modify(core, msr::IA32_FIXED_CTR_CTRL, &|v| {
            if enabled {
                v | mask::START_FIXED_ALL
            } else {
                v & !mask::START_FIXED_ALL
            }
        })?;

        tracing::info!(
            "Core {}: fixed counters {}",
            core,
            if enabled { "enabled" } else { "disabled" }
        );
        Ok(vec![global, fixed])
    }

    /// Start or stop general-purpose counters
    ///
    /// Without an index all counters are affected; when enabling, every
    /// event-select register also gets its USR, OS and EN bits. With an index
    /// only that counter's global bit and event-select register change.
    pub fn set_pmu_enabled(
        &self,
        core: u32,
        enabled: bool,
        pmu_index: Option<usize>,
    ) -> Result<Vec<Update>> {
        let targets = self.evtsel_targets(pmu_index)?;
        let global_bits = match pmu_index {
            Some(index) => field::global::PMC_ENABLE[index].mask(),
            None if enabled => self.topology.pmu_enable_mask(),
            None => mask::ENABLE_PMU_ALL,
        };

        let mut updates = Vec::with_capacity(targets.len() + 1);
        if enabled {
            for addr in targets {
                updates.push(
                    self.access
                        .modify(core, addr, &|v| v | mask::ENABLE_ALL_RINGS_MASK)?,
                );
            }
        }

        updates.push(self.access.modify(core, msr::IA32_PERF_GLOBAL_CTRL, &|v| {
            if enabled {
                v | global_bits
            } else {
                v & !global_bits
            }
        })?);

        tracing::info!(
            "Core {}: PMU {} {}",
            core,
            pmu_index.map_or_else(|| "all".to_string(), |i| i.to_string()),
            if enabled { "enabled" } else { "disabled" }
        );
        Ok(updates)
    }

    /// Program event code and/or unit mask on one event-select register, or
    /// all of them when `pmu_index` is `None`
    ///
    /// Each given field replaces the previous content of that field.
    pub fn configure_pmu_event(
        &self,
        core: u32,
        pmu_index: Option<usize>,
        event_code: Option<u8>,
        unit_mask: Option<u8>,
    ) -> Result<Vec<Update>> {
        if event_code.is_none() && unit_mask.is_none() {
            return Err(PmuError::invalid(
                "an event code or a unit mask is required",
            ));
        }
        let targets = self.evtsel_targets(pmu_index)?;

        let program = |mut v: u64| {
            if let Some(umask) = unit_mask {
                v = field::evtsel::UMASK.insert(v, u64::from(umask));
            }
            if let Some(event) = event_code {
                v = field::evtsel::EVENT_SELECT.insert(v, u64::from(event));
            }
            v
        };

        let mut updates = Vec::with_capacity(targets.len());
        for addr in targets {
            updates.push(self.access.modify(core, addr, &program)?);
        }

        tracing::info!(
            "Core {}: PMU {} event {} umask {}",
            core,
            pmu_index.map_or_else(|| "all".to_string(), |i| i.to_string()),
            event_code.map_or_else(|| "-".to_string(), |e| format!("0x{e:02X}")),
            unit_mask.map_or_else(|| "-".to_string(), |u| format!("0x{u:02X}")),
        );
        Ok(updates)
    }

    /// Disable and clear every counter control of one core
    ///
    /// Clears all enable bits in IA32_PERF_GLOBAL_CTRL, the EN/ANY/PMI groups
    /// of IA32_FIXED_CTR_CTRL and the low 32 bits of each event-select
    /// register. Bits 32-63 of the event-select registers are kept.
    pub fn reset_core(&self, core: u32) -> Result<Vec<Update>> {
        let mut updates = Vec::with_capacity(self.topology.num_pmu() + 2);

        updates.push(self.access.modify(core, msr::IA32_PERF_GLOBAL_CTRL, &|v| {
            v & !(mask::ENABLE_FIXED_ALL | mask::ENABLE_PMU_ALL)
        })?);
        updates.push(
            self.access
                .modify(core, msr::IA32_FIXED_CTR_CTRL, &|v| v & !mask::FIXED_CTRL_ALL)?,
        );
        for &addr in &msr::IA32_PERFEVTSEL[..self.topology.num_pmu()] {
            updates.push(
                self.access
                    .modify(core, addr, &|v| v & !mask::EVTSEL_LOW_HALF)?,
            );
        }

        tracing::info!("Core {}: counters reset", core);
        Ok(updates)
    }

    /// [`reset_core`](Self::reset_core) for every core, stopping at the first failure
    pub fn reset_all(&self, cores: &[u32]) -> Result<Vec<Update>> {
        let mut updates = Vec::new();
        for &core in cores {
            updates.extend(self.reset_core(core)?);
        }
        Ok(updates)
    }

    /// Apply a validated change set to one core
    ///
    /// Order: reset, fixed counters, event programming, PMU enable, so a
    /// counter is fully programmed before it starts.
    pub fn apply(&self, core: u32, changes: &ChangeSet) -> Result<Vec<Update>> {
        if changes.reset {
            return self.reset_core(core);
        }

        let mut updates = Vec::new();
        if let Some(enabled) = changes.fixed.target() {
            updates.extend(self.set_fixed_counters_enabled(core, enabled)?);
        }
        if changes.event.is_some() || changes.umask.is_some() {
            updates.extend(self.configure_pmu_event(
                core,
                changes.pmu_index,
                changes.event,
                changes.umask,
            )?);
        }
        if let Some(enabled) = changes.pmu.target() {
            updates.extend(self.set_pmu_enabled(core, enabled, changes.pmu_index)?);
        }
        Ok(updates)
    }
}
