use pmuset_raw::perfmon::{FIXED_COUNTERS, MAX_PMU_COUNTERS};

/// Architectural performance monitoring leaf
const CPUID_LEAF_PERFMON: u32 = 0x0A;

#[cfg(target_arch = "x86_64")]
pub fn cpuid(eax: u32, ecx: u32) -> (u32, u32, u32, u32) {
    let mut ebx: u32;
    let mut edx: u32;
    let mut eax_out = eax;
    let mut ecx_out = ecx;

    unsafe {
        std::arch::asm!(
            "mov {0:r}, rbx",
            "cpuid",
            "xchg {0:r}, rbx",
            out(reg) ebx,
            inout("eax") eax_out,
            inout("ecx") ecx_out,
            out("edx") edx,
            options(nostack, preserves_flags)
        );
    }

    (eax_out, ebx, ecx_out, edx)
}

#[cfg(not(target_arch = "x86_64"))]
pub fn cpuid(_eax: u32, _ecx: u32) -> (u32, u32, u32, u32) {
    (0, 0, 0, 0)
}

/// Counter inventory reported by CPUID leaf 0x0A
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PerfmonInfo {
    pub version: u8,
    pub pmu_counters: u8,
    pub pmu_width: u8,
    pub fixed_counters: u8,
    pub fixed_width: u8,
}

impl PerfmonInfo {
    /// Query the executing CPU; `None` if leaf 0x0A is not implemented
    pub fn detect() -> Option<Self> {
        let (max_leaf, _ebx, _ecx, _edx) = cpuid(0, 0);
        if max_leaf < CPUID_LEAF_PERFMON {
            return None;
        }
        let (eax, _ebx, _ecx, edx) = cpuid(CPUID_LEAF_PERFMON, 0);
        Some(Self::from_registers(eax, edx))
    }

    pub fn from_registers(eax: u32, edx: u32) -> Self {
        Self {
            version: (eax & 0xFF) as u8,
            pmu_counters: ((eax >> 8) & 0xFF) as u8,
            pmu_width: ((eax >> 16) & 0xFF) as u8,
            fixed_counters: (edx & 0x1F) as u8,
            fixed_width: ((edx >> 5) & 0xFF) as u8,
        }
    }

    /// General-purpose counters addressable through IA32_PERFEVTSEL0..7
    pub fn usable_pmu_counters(&self) -> usize {
        usize::from(self.pmu_counters).min(MAX_PMU_COUNTERS)
    }

    /// Fixed counters 0-2 only exist from version 2 on
    pub fn has_fixed_counters(&self) -> bool {
        self.version >= 2 && usize::from(self.fixed_counters) >= FIXED_COUNTERS
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    #[allow(clippy::similar_names)] // CPU register names are standard
    fn test_cpuid() {
        let (eax, ebx, ecx, edx) = cpuid(0, 0);
        println!("CPUID(0,0): EAX={eax:08X} EBX={ebx:08X} ECX={ecx:08X} EDX={edx:08X}");
    }

    #[test]
    fn test_decode_leaf_0a() {
        // Skylake client: v4, 4 x 48-bit PMCs, 3 x 48-bit fixed
        let info = PerfmonInfo::from_registers(0x0730_0404, 0x0000_0603);
        assert_eq!(info.version, 4);
        assert_eq!(info.pmu_counters, 4);
        assert_eq!(info.pmu_width, 48);
        assert_eq!(info.fixed_counters, 3);
        assert_eq!(info.fixed_width, 48);
        assert!(info.has_fixed_counters());
        assert_eq!(info.usable_pmu_counters(), 4);
    }

    #[test]
    fn test_usable_counters_capped() {
        let info = PerfmonInfo::from_registers(0x0030_0C05, 0x0000_0604);
        assert_eq!(info.pmu_counters, 12);
        assert_eq!(info.usable_pmu_counters(), MAX_PMU_COUNTERS);
    }
}
