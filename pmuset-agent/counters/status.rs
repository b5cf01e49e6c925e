use serde::Serialize;

use pmuset_raw::perfmon::{
    msr, FixedCtrCtrl, GlobalCtrl, PerfEvtSel, RingMode, FIXED_COUNTERS,
};
use pmuset_raw::RegisterLayout;

use crate::common::msr::MsrAccess;
use crate::counters::control::PmuController;
use crate::counters::events::PmuEvent;
use crate::error::Result;

labeled_enum! {
    /// Fixed-function counters, in register order
    pub enum FixedCounter {
        InstructionsRetired => "INST_RETIRED.ANY",
        CoreCycles => "CPU_CLK_UNHALTED.THREAD",
        ReferenceCycles => "CPU_CLK_UNHALTED.REF_TSC",
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct FixedCounterStatus {
    pub index: usize,
    pub name: &'static str,
    /// Enable bit in IA32_PERF_GLOBAL_CTRL
    pub enabled: bool,
    pub mode: RingMode,
    pub any_thread: bool,
    pub pmi: bool,
}

impl FixedCounterStatus {
    /// Globally enabled and counting in at least one ring
    pub fn is_counting(&self) -> bool {
        self.enabled && self.mode != RingMode::Off
    }
}

/// Decoded IA32_PERF_GLOBAL_CTRL and IA32_FIXED_CTR_CTRL of one core
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CoreCounterStatus {
    pub core: u32,
    pub global_ctrl: u64,
    pub fixed_ctr_ctrl: u64,
    pub fixed: Vec<FixedCounterStatus>,
    /// Global enable bit per general-purpose counter
    pub pmu_enabled: Vec<bool>,
}

/// Decoded IA32_PERFEVTSELx
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PmuEventSelStatus {
    pub core: u32,
    pub index: usize,
    pub raw: u64,
    #[serde(flatten)]
    pub fields: PerfEvtSel,
    /// Architectural event matching event code and unit mask, if any
    pub event_name: Option<&'static str>,
}

/// Raw counter register contents
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CounterValues {
    pub core: u32,
    pub fixed: [u64; FIXED_COUNTERS],
    pub pmu: Vec<u64>,
}

impl<A: MsrAccess + ?Sized> PmuController<'_, A> {
    pub fn decode_global_and_fixed(&self, core: u32) -> Result<CoreCounterStatus> {
        let global_ctrl = self.access.read(core, msr::IA32_PERF_GLOBAL_CTRL)?;
        let fixed_ctr_ctrl = self.access.read(core, msr::IA32_FIXED_CTR_CTRL)?;

        let global = GlobalCtrl::from_msr_value(global_ctrl);
        let fixed_ctrl = FixedCtrCtrl::from_msr_value(fixed_ctr_ctrl);

        let fixed = FixedCounter::all()
            .into_iter()
            .enumerate()
            .map(|(index, counter)| {
                let ctrl = fixed_ctrl.counters[index];
                FixedCounterStatus {
                    index,
                    name: counter.name(),
                    enabled: global.fixed_enable[index],
                    mode: ctrl.mode,
                    any_thread: ctrl.any_thread,
                    pmi: ctrl.pmi,
                }
            })
            .collect();

        let pmu_enabled = (0..self.topology.num_pmu())
            .map(|i| global.pmc_enabled(i))
            .collect();

        Ok(CoreCounterStatus {
            core,
            global_ctrl,
            fixed_ctr_ctrl,
            fixed,
            pmu_enabled,
        })
    }

    pub fn decode_pmu(&self, core: u32, pmu_index: usize) -> Result<PmuEventSelStatus> {
        let addr = self.check_pmu_index(pmu_index)?;
        let raw = self.access.read(core, addr)?;
        let fields = PerfEvtSel::from_msr_value(raw);

        if let Err(reason) = fields.validate() {
            tracing::warn!("Core {} PMU {}: {}", core, pmu_index, reason);
        }

        Ok(PmuEventSelStatus {
            core,
            index: pmu_index,
            raw,
            fields,
            event_name: PmuEvent::lookup(fields.event_select, fields.umask).map(|e| e.name),
        })
    }

    /// Event-select status of every PMU counter of `core`
    pub fn decode_all_pmus(&self, core: u32) -> Result<Vec<PmuEventSelStatus>> {
        (0..self.topology.num_pmu())
            .map(|index| self.decode_pmu(core, index))
            .collect()
    }

    pub fn read_counter_values(&self, core: u32) -> Result<CounterValues> {
        let mut fixed = [0u64; FIXED_COUNTERS];
        for (value, &addr) in fixed.iter_mut().zip(&msr::IA32_FIXED_CTR) {
            *value = self.access.read(core, addr)?;
        }

        let pmu = msr::IA32_PMC[..self.topology.num_pmu()]
            .iter()
            .map(|&addr| self.access.read(core, addr))
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(CounterValues { core, fixed, pmu })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::sim::SimulatedMsr;
    use crate::config::Topology;
    use crate::error::PmuError;

    #[test]
    fn test_decode_global_and_fixed() {
        let topo = Topology::uniform(1, 4);
        let sim = SimulatedMsr::new(&topo);
        sim.preset(0, msr::IA32_PERF_GLOBAL_CTRL, 0x5_0000_0005);
        // ctr0: OS + ANY, ctr1: User + PMI, ctr2: all rings
        sim.preset(0, msr::IA32_FIXED_CTR_CTRL, 0x3A5);

        let status = PmuController::new(&sim, &topo)
            .decode_global_and_fixed(0)
            .unwrap();

        assert_eq!(status.pmu_enabled, vec![true, false, true, false]);

        let ctr0 = status.fixed[0];
        assert_eq!(ctr0.name, "INST_RETIRED.ANY");
        assert!(ctr0.enabled);
        assert_eq!(ctr0.mode, RingMode::Os);
        assert!(ctr0.any_thread);
        assert!(!ctr0.pmi);
        assert!(ctr0.is_counting());

        let ctr1 = status.fixed[1];
        assert!(!ctr1.enabled);
        assert_eq!(ctr1.mode, RingMode::User);
        assert!(ctr1.pmi);
        assert!(!ctr1.is_counting());

        let ctr2 = status.fixed[2];
        assert!(ctr2.enabled);
        assert_eq!(ctr2.mode, RingMode::AllRings);
    }

    #[test]
    fn test_decode_is_read_only() {
        let topo = Topology::uniform(1, 8);
        let sim = SimulatedMsr::new(&topo);
        let ctl = PmuController::new(&sim, &topo);

        ctl.decode_global_and_fixed(0).unwrap();
        ctl.decode_all_pmus(0).unwrap();
        ctl.read_counter_values(0).unwrap();

        let accesses = sim.accesses();
        assert_eq!(accesses.len(), 2 + 8 + 3 + 8);
        assert!(accesses.iter().all(|a| !a.is_write()));
    }

    #[test]
    fn test_decode_pmu_fields() {
        let topo = Topology::uniform(1, 8);
        let sim = SimulatedMsr::new(&topo);
        // CMASK 5, INV, EN, INT, E, OS, umask 0x41, event 0x2E
        sim.preset(0, msr::IA32_PERFEVTSEL[7], 0x05D6_412E);

        let status = PmuController::new(&sim, &topo).decode_pmu(0, 7).unwrap();
        let f = status.fields;
        assert_eq!(f.event_select, 0x2E);
        assert_eq!(f.umask, 0x41);
        assert!(!f.usr);
        assert!(f.os);
        assert!(f.edge);
        assert!(!f.pc);
        assert!(f.int);
        assert!(!f.any_thread);
        assert!(f.enable);
        assert!(f.invert);
        assert_eq!(f.cmask, 5);
        assert_eq!(status.event_name, Some("LLCMisses"));
    }

    #[test]
    fn test_decode_pmu_out_of_range() {
        let topo = Topology::uniform(1, 4);
        let sim = SimulatedMsr::new(&topo);
        let err = PmuController::new(&sim, &topo)
            .decode_pmu(0, 4)
            .unwrap_err();
        assert!(matches!(err, PmuError::InvalidArgument(_)));
        assert!(sim.accesses().is_empty());
    }

    #[test]
    fn test_read_counter_values() {
        let topo = Topology::uniform(2, 2);
        let sim = SimulatedMsr::new(&topo);
        sim.preset(1, msr::IA32_FIXED_CTR[0], 1_000_000);
        sim.preset(1, msr::IA32_FIXED_CTR[2], 42);
        sim.preset(1, msr::IA32_PMC[1], 7);
        sim.preset(1, msr::IA32_PMC[2], 99); // beyond num_pmu

        let values = PmuController::new(&sim, &topo)
            .read_counter_values(1)
            .unwrap();
        assert_eq!(values.fixed, [1_000_000, 0, 42]);
        assert_eq!(values.pmu, vec![0, 7]);
    }

    #[test]
    fn test_fixed_counter_labels() {
        let all = FixedCounter::all();
        assert_eq!(all.len(), FIXED_COUNTERS);
        assert_eq!(FixedCounter::ReferenceCycles.name(), "CPU_CLK_UNHALTED.REF_TSC");
    }
}
