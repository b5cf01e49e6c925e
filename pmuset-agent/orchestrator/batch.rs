// Multi-core orchestration: one change set applied to every selected core,
// and inspection dumps gathered the same way

use serde::Serialize;

use crate::common::msr::{MsrAccess, Update};
use crate::config::Topology;
use crate::counters::change::ChangeSet;
use crate::counters::control::PmuController;
use crate::counters::status::{CoreCounterStatus, CounterValues, PmuEventSelStatus};
use crate::error::{PmuError, Result};

/// What to do with the remaining cores after one fails
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FailurePolicy {
    #[default]
    Abort,
    Continue,
}

#[derive(Debug)]
pub enum Outcome {
    Applied(Vec<Update>),
    Failed(PmuError),
    /// Not attempted because an earlier core failed under `Abort`
    Skipped,
}

impl Outcome {
    pub fn label(&self) -> &'static str {
        match self {
            Outcome::Applied(_) => "applied",
            Outcome::Failed(_) => "failed",
            Outcome::Skipped => "skipped",
        }
    }
}

#[derive(Debug)]
pub struct CoreOutcome {
    pub core: u32,
    pub result: Outcome,
}

impl CoreOutcome {
    /// Registers whose value actually changed
    pub fn changed_registers(&self) -> usize {
        match &self.result {
            Outcome::Applied(updates) => updates.iter().filter(|u| u.changed()).count(),
            _ => 0,
        }
    }
}

/// Per-core results of one batch, in the order cores were given
#[derive(Debug, Default)]
pub struct BatchReport {
    pub outcomes: Vec<CoreOutcome>,
}

impl BatchReport {
    pub fn failures(&self) -> impl Iterator<Item = (u32, &PmuError)> {
        self.outcomes.iter().filter_map(|o| match &o.result {
            Outcome::Failed(e) => Some((o.core, e)),
            _ => None,
        })
    }

    pub fn first_error(&self) -> Option<&PmuError> {
        self.failures().next().map(|(_, e)| e)
    }

    pub fn is_success(&self) -> bool {
        self.first_error().is_none()
    }

    pub fn count(&self, label: &str) -> usize {
        self.outcomes
            .iter()
            .filter(|o| o.result.label() == label)
            .count()
    }

    /// 0 on success, otherwise the exit code of the first failure
    pub fn exit_code(&self) -> u8 {
        match self.first_error() {
            None => 0,
            Some(e) => e.exit_code(),
        }
    }
}

/// Decoded state of one core
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CoreReport {
    pub core: u32,
    pub status: CoreCounterStatus,
    pub pmus: Vec<PmuEventSelStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub counters: Option<CounterValues>,
}

pub struct BatchRunner<'a, A: MsrAccess + ?Sized> {
    controller: PmuController<'a, A>,
}

impl<'a, A: MsrAccess + ?Sized> BatchRunner<'a, A> {
    pub fn new(access: &'a A, topology: &'a Topology) -> Self {
        Self {
            controller: PmuController::new(access, topology),
        }
    }

    /// Apply `changes` to each core in turn
    ///
    /// The change set is validated before any core is touched; an invalid
    /// set is returned as an error rather than a per-core failure.
    pub fn run(
        &self,
        changes: &ChangeSet,
        cores: &[u32],
        policy: FailurePolicy,
    ) -> Result<BatchReport> {
        changes.validate(self.controller.topology())?;

        let mut report = BatchReport {
            outcomes: Vec::with_capacity(cores.len()),
        };
        let mut aborted = false;

        for &core in cores {
            let result = if aborted {
                Outcome::Skipped
            } else {
                match self.controller.apply(core, changes) {
                    Ok(updates) => Outcome::Applied(updates),
                    Err(e) => {
                        tracing::error!("Core {}: {}", core, e);
                        if policy == FailurePolicy::Abort {
                            aborted = true;
                        }
                        Outcome::Failed(e)
                    }
                }
            };
            report.outcomes.push(CoreOutcome { core, result });
        }

        if aborted {
            tracing::warn!(
                "Aborted after first failure, {} cores skipped",
                report.count("skipped")
            );
        }
        Ok(report)
    }

    /// Decode control registers (and optionally counter values) of each core
    pub fn inspect(&self, cores: &[u32], with_counters: bool) -> Result<Vec<CoreReport>> {
        cores
            .iter()
            .map(|&core| {
                let status = self.controller.decode_global_and_fixed(core)?;
                let pmus = self.controller.decode_all_pmus(core)?;
                let counters = if with_counters {
                    Some(self.controller.read_counter_values(core)?)
                } else {
                    None
                };
                Ok(CoreReport {
                    core,
                    status,
                    pmus,
                    counters,
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::msr::AccessError;
    use crate::common::sim::SimulatedMsr;
    use crate::counters::change::FieldChange;
    use crate::error::{EXIT_FAILURE, EXIT_PRIVILEGE, EXIT_USAGE};
    use pmuset_raw::perfmon::msr;

    fn enable_fixed() -> ChangeSet {
        ChangeSet {
            fixed: FieldChange::Enable,
            ..Default::default()
        }
    }

    #[test]
    fn test_run_applies_to_every_core() {
        let topo = Topology::uniform(3, 8);
        let sim = SimulatedMsr::new(&topo);
        let runner = BatchRunner::new(&sim, &topo);

        let report = runner
            .run(&enable_fixed(), topo.cores(), FailurePolicy::Abort)
            .unwrap();

        assert!(report.is_success());
        assert_eq!(report.exit_code(), 0);
        assert_eq!(report.count("applied"), 3);
        for core in 0..3 {
            assert_eq!(sim.peek(core, msr::IA32_PERF_GLOBAL_CTRL), 0x7_0000_0000);
            assert_eq!(sim.peek(core, msr::IA32_FIXED_CTR_CTRL), 0x333);
        }
        assert!(report.outcomes.iter().all(|o| o.changed_registers() == 2));
    }

    #[test]
    fn test_abort_skips_remaining_cores() {
        let topo = Topology::uniform(4, 8);
        let sim = SimulatedMsr::new(&topo);
        sim.take_offline(1);

        let report = BatchRunner::new(&sim, &topo)
            .run(&enable_fixed(), topo.cores(), FailurePolicy::Abort)
            .unwrap();

        let labels: Vec<_> = report.outcomes.iter().map(|o| o.result.label()).collect();
        assert_eq!(labels, ["applied", "failed", "skipped", "skipped"]);
        assert_eq!(sim.peek(2, msr::IA32_PERF_GLOBAL_CTRL), 0);
        assert!(sim.accesses().iter().all(|a| a.core() == 0));
        assert_eq!(report.exit_code(), EXIT_PRIVILEGE);
    }

    #[test]
    fn test_continue_policy_keeps_going() {
        let topo = Topology::uniform(4, 8);
        let sim = SimulatedMsr::new(&topo);
        sim.take_offline(1);

        let report = BatchRunner::new(&sim, &topo)
            .run(&enable_fixed(), topo.cores(), FailurePolicy::Continue)
            .unwrap();

        assert_eq!(report.count("applied"), 3);
        assert_eq!(report.count("failed"), 1);
        let (core, err) = report.failures().next().unwrap();
        assert_eq!(core, 1);
        assert!(matches!(
            err,
            PmuError::Access(AccessError::InterfaceUnavailable { core: 1, .. })
        ));
        assert_eq!(sim.peek(3, msr::IA32_FIXED_CTR_CTRL), 0x333);
    }

    #[test]
    fn test_invalid_change_set_touches_nothing() {
        let topo = Topology::uniform(2, 4);
        let sim = SimulatedMsr::new(&topo);
        let changes = ChangeSet {
            pmu: FieldChange::Enable,
            pmu_index: Some(4),
            ..Default::default()
        };

        let err = BatchRunner::new(&sim, &topo)
            .run(&changes, topo.cores(), FailurePolicy::Continue)
            .unwrap_err();
        assert_eq!(err.exit_code(), EXIT_USAGE);
        assert!(sim.accesses().is_empty());
    }

    #[test]
    fn test_unknown_core_is_reported() {
        let topo = Topology::uniform(2, 8);
        let sim = SimulatedMsr::new(&topo);

        let report = BatchRunner::new(&sim, &topo)
            .run(&ChangeSet::reset(), &[0, 7], FailurePolicy::Continue)
            .unwrap();
        assert!(matches!(
            report.first_error(),
            Some(PmuError::Access(AccessError::CoreOutOfRange { core: 7, .. }))
        ));
        assert_eq!(report.exit_code(), EXIT_FAILURE);
    }

    #[test]
    fn test_inspect() {
        let topo = Topology::uniform(2, 2);
        let sim = SimulatedMsr::new(&topo);
        sim.preset(1, msr::IA32_PERF_GLOBAL_CTRL, 0x1_0000_0002);
        sim.preset(1, msr::IA32_PERFEVTSEL[1], 0x43_00C0);
        sim.preset(1, msr::IA32_PMC[1], 12345);

        let runner = BatchRunner::new(&sim, &topo);
        let reports = runner.inspect(&[1], false).unwrap();
        assert_eq!(reports.len(), 1);
        let report = &reports[0];
        assert_eq!(report.core, 1);
        assert_eq!(report.status.pmu_enabled, vec![false, true]);
        assert!(report.status.fixed[0].enabled);
        assert_eq!(report.pmus.len(), 2);
        assert_eq!(report.pmus[1].event_name, Some("InstructionsRetired"));
        assert!(report.counters.is_none());

        let with_counters = runner.inspect(&[1], true).unwrap();
        assert_eq!(with_counters[0].counters.as_ref().unwrap().pmu, vec![0, 12345]);
        assert!(sim.accesses().iter().all(|a| !a.is_write()));
    }

    #[test]
    fn test_inspect_fails_on_offline_core() {
        let topo = Topology::uniform(2, 8);
        let sim = SimulatedMsr::new(&topo);
        sim.take_offline(0);
        assert!(BatchRunner::new(&sim, &topo).inspect(&[0, 1], false).is_err());
    }
}
