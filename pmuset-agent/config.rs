use serde::Serialize;
use std::collections::BTreeSet;
use std::str::FromStr;

use pmuset_raw::perfmon::MAX_PMU_COUNTERS;

use crate::common::cpuid::PerfmonInfo;
use crate::error::{PmuError, Result};

/// CPUs and counters available on this machine
///
/// Resolved once at startup and passed by reference to everything that
/// needs to know which cores and event-select registers exist.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Topology {
    cores: Vec<u32>,
    sockets: Vec<u32>,
    num_pmu: usize,
}

impl Topology {
    /// Build a topology from explicit parts; cores are sorted and deduplicated
    pub fn new(cores: Vec<u32>, sockets: Vec<u32>, num_pmu: usize) -> Result<Self> {
        if cores.is_empty() {
            return Err(PmuError::Topology("no online CPUs".to_string()));
        }
        if num_pmu == 0 || num_pmu > MAX_PMU_COUNTERS {
            return Err(PmuError::Topology(format!(
                "unsupported number of PMU counters: {num_pmu} (expected 1-{MAX_PMU_COUNTERS})"
            )));
        }

        let cores: Vec<u32> = cores.into_iter().collect::<BTreeSet<_>>().into_iter().collect();
        let sockets: Vec<u32> = sockets.into_iter().collect::<BTreeSet<_>>().into_iter().collect();

        Ok(Self {
            cores,
            sockets,
            num_pmu,
        })
    }

    /// `num_cores` cores numbered from 0 on a single socket
    pub fn uniform(num_cores: u32, num_pmu: usize) -> Self {
        Self {
            cores: (0..num_cores).collect(),
            sockets: vec![0],
            num_pmu: num_pmu.clamp(1, MAX_PMU_COUNTERS),
        }
    }

    /// Discover online CPUs, their sockets and the PMU counter count
    ///
    /// `pmu_override` replaces the CPUID-reported counter count.
    pub fn detect(pmu_override: Option<usize>) -> Result<Self> {
        let cores = Self::detect_online_cpus()?;
        let sockets = Self::detect_sockets(&cores);
        let num_pmu = match pmu_override {
            Some(n) => n,
            None => Self::detect_pmu_counters(),
        };

        let topology = Self::new(cores, sockets, num_pmu)?;
        tracing::info!(
            "Detected {} sockets, {} cores, {} PMU counters per core",
            topology.sockets.len(),
            topology.cores.len(),
            topology.num_pmu
        );
        Ok(topology)
    }

    /// Online CPUs from /sys/devices/system/cpu/online
    pub fn detect_online_cpus() -> Result<Vec<u32>> {
        let online = std::fs::read_to_string("/sys/devices/system/cpu/online").map_err(|e| {
            PmuError::Topology(format!("cannot read /sys/devices/system/cpu/online: {e}"))
        })?;

        parse_cpu_list(&online)
            .ok_or_else(|| PmuError::Topology(format!("malformed CPU list: {:?}", online.trim())))
    }

    /// Detect which sockets the cores belong to
    pub fn detect_sockets(cores: &[u32]) -> Vec<u32> {
        let mut sockets = BTreeSet::new();

        for &core in cores {
            let socket_path =
                format!("/sys/devices/system/cpu/cpu{core}/topology/physical_package_id");
            if let Ok(socket_str) = std::fs::read_to_string(&socket_path) {
                if let Ok(socket) = socket_str.trim().parse::<u32>() {
                    sockets.insert(socket);
                }
            }
        }

        if sockets.is_empty() {
            tracing::warn!("Failed to detect sockets, assuming socket 0");
            sockets.insert(0);
        }

        sockets.into_iter().collect()
    }

    fn detect_pmu_counters() -> usize {
        match PerfmonInfo::detect() {
            Some(info) if info.pmu_counters > 0 => {
                tracing::info!(
                    "Architectural perfmon v{}: {} x {}-bit PMCs, {} fixed counters",
                    info.version,
                    info.pmu_counters,
                    info.pmu_width,
                    info.fixed_counters
                );
                if !info.has_fixed_counters() {
                    tracing::warn!("CPU reports fewer than 3 fixed counters");
                }
                info.usable_pmu_counters()
            }
            _ => {
                tracing::warn!(
                    "CPUID leaf 0x0A unavailable, assuming {} PMU counters",
                    MAX_PMU_COUNTERS
                );
                MAX_PMU_COUNTERS
            }
        }
    }

    pub fn cores(&self) -> &[u32] {
        &self.cores
    }

    pub fn sockets(&self) -> &[u32] {
        &self.sockets
    }

    pub fn num_cores(&self) -> usize {
        self.cores.len()
    }

    pub fn num_pmu(&self) -> usize {
        self.num_pmu
    }

    pub fn contains(&self, core: u32) -> bool {
        self.cores.binary_search(&core).is_ok()
    }

    /// IA32_PERF_GLOBAL_CTRL enable bits of the counters that exist
    pub fn pmu_enable_mask(&self) -> u64 {
        (1u64 << self.num_pmu) - 1
    }
}

/// Parse CPU list like "0-3,8-11" into a sorted Vec
pub fn parse_cpu_list(s: &str) -> Option<Vec<u32>> {
    let mut cpus = BTreeSet::new();
    for part in s.trim().split(',') {
        let part = part.trim();
        if part.is_empty() {
            continue;
        }
        if let Some((start, end)) = part.split_once('-') {
            let start: u32 = start.trim().parse().ok()?;
            let end: u32 = end.trim().parse().ok()?;
            if start > end {
                return None;
            }
            cpus.extend(start..=end);
        } else {
            cpus.insert(part.parse().ok()?);
        }
    }
    if cpus.is_empty() {
        return None;
    }
    Some(cpus.into_iter().collect())
}

/// Which cores an invocation targets
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum CoreSelection {
    #[default]
    All,
    List(Vec<u32>),
}

impl CoreSelection {
    /// Concrete core list; every listed core must be online
    pub fn resolve(&self, topology: &Topology) -> Result<Vec<u32>> {
        match self {
            CoreSelection::All => Ok(topology.cores().to_vec()),
            CoreSelection::List(cores) => {
                if let Some(bad) = cores.iter().find(|&&c| !topology.contains(c)) {
                    return Err(PmuError::invalid(format!(
                        "core {bad} is not an online CPU (online: {})",
                        format_cpu_list(topology.cores())
                    )));
                }
                Ok(cores.clone())
            }
        }
    }
}

impl FromStr for CoreSelection {
    type Err = String;

    /// Accepts `all`, a single index, or a list such as `0-3,6`
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        if s.trim().eq_ignore_ascii_case("all") {
            return Ok(CoreSelection::All);
        }
        parse_cpu_list(s)
            .map(CoreSelection::List)
            .ok_or_else(|| format!("expected 'all', a core index or a list like 0-3,6; got {s:?}"))
    }
}

/// Render sorted CPUs back into range notation ("0-3,6")
pub fn format_cpu_list(cpus: &[u32]) -> String {
    let mut parts = Vec::new();
    let mut iter = cpus.iter().copied().peekable();
    while let Some(start) = iter.next() {
        let mut end = start;
        while iter.peek() == Some(&(end + 1)) {
            end += 1;
            iter.next();
        }
        parts.push(if start == end {
            start.to_string()
        } else {
            format!("{start}-{end}")
        });
    }
    parts.join(",")
}
