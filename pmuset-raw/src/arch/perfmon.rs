//! Intel architectural performance monitoring (version 2+) register definitions
//!
//! Covers the per-core registers every Intel core with architectural
//! perfmon v2 or later exposes: the global enable register, the
//! fixed-function counter control register and the general-purpose
//! event-select registers, plus their counter registers.
//!
//! ## References
//!
//! - Intel® 64 and IA-32 Architectures Software Developer's Manual, Volume 3B
//! - Chapter 20: Performance Monitoring, sections 20.2.1 - 20.2.2

use crate::register::{mask_of, BitField, RegisterLayout};

/// Upper bound on general-purpose counters addressed by this crate
pub const MAX_PMU_COUNTERS: usize = 8;

/// Number of fixed-function performance counters
pub const FIXED_COUNTERS: usize = 3;

/// MSR addresses for the core PMU
pub mod msr {
    use super::{FIXED_COUNTERS, MAX_PMU_COUNTERS};

    /// Performance Counter registers (IA32_PMCx)
    pub const IA32_PMC: [u64; MAX_PMU_COUNTERS] = [0xC1, 0xC2, 0xC3, 0xC4, 0xC5, 0xC6, 0xC7, 0xC8];

    /// Performance Event Select registers (IA32_PERFEVTSELx)
    pub const IA32_PERFEVTSEL: [u64; MAX_PMU_COUNTERS] =
        [0x186, 0x187, 0x188, 0x189, 0x18A, 0x18B, 0x18C, 0x18D];

    /// Fixed-function Performance Counters
    ///
    /// 0: Instructions Retired, 1: Core Cycles, 2: Reference Cycles
    pub const IA32_FIXED_CTR: [u64; FIXED_COUNTERS] = [0x309, 0x30A, 0x30B];

    /// Fixed-function Performance Counter Control
    pub const IA32_FIXED_CTR_CTRL: u64 = 0x38D;

    /// Performance Counter Global Control
    pub const IA32_PERF_GLOBAL_CTRL: u64 = 0x38F;

    /// Event-select register address for general-purpose counter `index`
    pub fn perfevtsel(index: usize) -> Option<u64> {
        IA32_PERFEVTSEL.get(index).copied()
    }

    /// Counter register address for general-purpose counter `index`
    pub fn pmc(index: usize) -> Option<u64> {
        IA32_PMC.get(index).copied()
    }
}

/// Field descriptors, grouped by register
pub mod field {
    /// IA32_PERF_GLOBAL_CTRL
    pub mod global {
        use crate::arch::perfmon::{FIXED_COUNTERS, MAX_PMU_COUNTERS};
        use crate::register::BitField;

        /// Per general-purpose counter enable bits (0-7)
        pub const PMC_ENABLE: [BitField; MAX_PMU_COUNTERS] = [
            BitField::flag("EN_PMC0", 0),
            BitField::flag("EN_PMC1", 1),
            BitField::flag("EN_PMC2", 2),
            BitField::flag("EN_PMC3", 3),
            BitField::flag("EN_PMC4", 4),
            BitField::flag("EN_PMC5", 5),
            BitField::flag("EN_PMC6", 6),
            BitField::flag("EN_PMC7", 7),
        ];

        /// Per fixed counter enable bits (32-34)
        pub const FIXED_ENABLE: [BitField; FIXED_COUNTERS] = [
            BitField::flag("EN_FIXED_CTR0", 32),
            BitField::flag("EN_FIXED_CTR1", 33),
            BitField::flag("EN_FIXED_CTR2", 34),
        ];
    }

    /// IA32_FIXED_CTR_CTRL
    ///
    /// Each fixed counter owns a 4-bit group: EN (2 bits), ANY, PMI.
    pub mod fixed {
        use crate::arch::perfmon::FIXED_COUNTERS;
        use crate::register::BitField;

        /// Ring-level enable, see [`RingMode`](crate::arch::perfmon::RingMode)
        pub const EN: [BitField; FIXED_COUNTERS] = [
            BitField::new("FIXED_CTR0_EN", 0, 2),
            BitField::new("FIXED_CTR1_EN", 4, 2),
            BitField::new("FIXED_CTR2_EN", 8, 2),
        ];

        /// Count on any hardware thread of the core
        pub const ANY: [BitField; FIXED_COUNTERS] = [
            BitField::flag("FIXED_CTR0_ANY", 2),
            BitField::flag("FIXED_CTR1_ANY", 6),
            BitField::flag("FIXED_CTR2_ANY", 10),
        ];

        /// Interrupt on overflow
        pub const PMI: [BitField; FIXED_COUNTERS] = [
            BitField::flag("FIXED_CTR0_PMI", 3),
            BitField::flag("FIXED_CTR1_PMI", 7),
            BitField::flag("FIXED_CTR2_PMI", 11),
        ];
    }

    /// IA32_PERFEVTSELx
    pub mod evtsel {
        use crate::register::BitField;

        pub const EVENT_SELECT: BitField = BitField::new("EVENT", 0, 8);
        pub const UMASK: BitField = BitField::new("UMASK", 8, 8);
        pub const USR: BitField = BitField::flag("USR", 16);
        pub const OS: BitField = BitField::flag("OS", 17);
        pub const EDGE: BitField = BitField::flag("E", 18);
        pub const PC: BitField = BitField::flag("PC", 19);
        pub const INT: BitField = BitField::flag("INT", 20);
        pub const ANY: BitField = BitField::flag("ANY", 21);
        pub const EN: BitField = BitField::flag("EN", 22);
        pub const INV: BitField = BitField::flag("INV", 23);
        pub const CMASK: BitField = BitField::new("CMASK", 24, 8);

        /// Every architecturally defined field, low bit first
        pub const ALL: [BitField; 11] = [
            EVENT_SELECT,
            UMASK,
            USR,
            OS,
            EDGE,
            PC,
            INT,
            ANY,
            EN,
            INV,
            CMASK,
        ];
    }
}

/// Composite masks used by the enable/disable/reset operations
pub mod mask {
    /// Fixed counters 0-2 enable in IA32_PERF_GLOBAL_CTRL (bits 32-34)
    pub const ENABLE_FIXED_ALL: u64 = 0x7_0000_0000;

    /// General-purpose counters 0-7 enable in IA32_PERF_GLOBAL_CTRL (bits 0-7)
    pub const ENABLE_PMU_ALL: u64 = 0xFF;

    /// All three fixed-counter EN fields set to "all rings" (0b11)
    pub const START_FIXED_ALL: u64 = 0x333;

    /// EN, ANY and PMI of all three fixed counters
    pub const FIXED_CTRL_ALL: u64 = 0xFFF;

    /// USR, OS and EN bits of an event-select register
    pub const ENABLE_ALL_RINGS_MASK: u64 = 0x43_0000;

    /// Architecturally defined half of an event-select register
    pub const EVTSEL_LOW_HALF: u64 = 0xFFFF_FFFF;
}

// The composite masks must be exactly the union of the documented fields.
const _: () = assert!(mask_of(&field::global::FIXED_ENABLE) == mask::ENABLE_FIXED_ALL);
const _: () = assert!(mask_of(&field::global::PMC_ENABLE) == mask::ENABLE_PMU_ALL);
const _: () = assert!(
    mask_of(&field::fixed::EN) == mask::START_FIXED_ALL
        && field::fixed::EN[0].max_value() == 0b11
);
const _: () = assert!(
    mask_of(&field::fixed::EN) | mask_of(&field::fixed::ANY) | mask_of(&field::fixed::PMI)
        == mask::FIXED_CTRL_ALL
);
const _: () = assert!(
    mask_of(&[field::evtsel::USR, field::evtsel::OS, field::evtsel::EN])
        == mask::ENABLE_ALL_RINGS_MASK
);
const _: () = assert!(mask_of(&field::evtsel::ALL) == mask::EVTSEL_LOW_HALF);

/// Privilege levels a fixed counter accumulates events for
///
/// Encoded in the 2-bit EN field of each fixed counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub enum RingMode {
    #[default]
    Off,
    Os,
    User,
    AllRings,
}

impl RingMode {
    pub const ALL: [RingMode; 4] = [
        RingMode::Off,
        RingMode::Os,
        RingMode::User,
        RingMode::AllRings,
    ];

    pub fn from_bits(bits: u64) -> Self {
        match bits & 0b11 {
            0 => RingMode::Off,
            1 => RingMode::Os,
            2 => RingMode::User,
            _ => RingMode::AllRings,
        }
    }

    pub fn bits(self) -> u64 {
        match self {
            RingMode::Off => 0,
            RingMode::Os => 1,
            RingMode::User => 2,
            RingMode::AllRings => 3,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            RingMode::Off => "Off",
            RingMode::Os => "OS",
            RingMode::User => "User",
            RingMode::AllRings => "AllRings",
        }
    }
}

/// IA32_PERF_GLOBAL_CTRL layout
///
/// | Bits   | Field          | Description                       |
/// |--------|----------------|-----------------------------------|
/// | 0-7    | pmc_enable     | General-purpose counter enables   |
/// | 32-34  | fixed_enable   | Fixed counter enables             |
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct GlobalCtrl {
    /// One bit per general-purpose counter
    pub pmc_enable: u8,
    pub fixed_enable: [bool; FIXED_COUNTERS],
}

impl GlobalCtrl {
    pub fn pmc_enabled(&self, index: usize) -> bool {
        index < MAX_PMU_COUNTERS && self.pmc_enable & (1 << index) != 0
    }
}

impl RegisterLayout for GlobalCtrl {
    fn to_msr_value(&self) -> u64 {
        let mut value = 0u64;
        for (i, pmc) in field::global::PMC_ENABLE.iter().enumerate() {
            value = pmc.assign(value, self.pmc_enabled(i));
        }
        for (fixed, &on) in field::global::FIXED_ENABLE.iter().zip(&self.fixed_enable) {
            value = fixed.assign(value, on);
        }
        value
    }

    fn from_msr_value(value: u64) -> Self {
        let mut fixed_enable = [false; FIXED_COUNTERS];
        for (slot, fixed) in fixed_enable.iter_mut().zip(&field::global::FIXED_ENABLE) {
            *slot = fixed.is_set(value);
        }
        Self {
            pmc_enable: (value & mask::ENABLE_PMU_ALL) as u8,
            fixed_enable,
        }
    }
}

/// Control group of a single fixed counter
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct FixedCounterCtrl {
    pub mode: RingMode,
    pub any_thread: bool,
    pub pmi: bool,
}

/// IA32_FIXED_CTR_CTRL layout
///
/// Each counter uses 4 bits: [EN (2 bits), any_thread, pmi]
///
/// | Bits  | Counter                         |
/// |-------|---------------------------------|
/// | 0-3   | Fixed counter 0 (instructions)  |
/// | 4-7   | Fixed counter 1 (core cycles)   |
/// | 8-11  | Fixed counter 2 (ref cycles)    |
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct FixedCtrCtrl {
    pub counters: [FixedCounterCtrl; FIXED_COUNTERS],
}

impl RegisterLayout for FixedCtrCtrl {
    fn to_msr_value(&self) -> u64 {
        let mut value = 0u64;
        for (i, ctr) in self.counters.iter().enumerate() {
            value = field::fixed::EN[i].insert(value, ctr.mode.bits());
            value = field::fixed::ANY[i].assign(value, ctr.any_thread);
            value = field::fixed::PMI[i].assign(value, ctr.pmi);
        }
        value
    }

    fn from_msr_value(value: u64) -> Self {
        let mut counters = [FixedCounterCtrl::default(); FIXED_COUNTERS];
        for (i, ctr) in counters.iter_mut().enumerate() {
            *ctr = FixedCounterCtrl {
                mode: RingMode::from_bits(field::fixed::EN[i].extract(value)),
                any_thread: field::fixed::ANY[i].is_set(value),
                pmi: field::fixed::PMI[i].is_set(value),
            };
        }
        Self { counters }
    }
}

/// Performance Event Select Register layout
///
/// ## Register Format
///
/// | Bits   | Field       | Description                    |
/// |--------|-------------|--------------------------------|
/// | 0-7    | event_select| Event select                   |
/// | 8-15   | umask       | Unit mask                      |
/// | 16     | usr         | User mode                      |
/// | 17     | os          | OS mode                        |
/// | 18     | edge        | Edge detect                    |
/// | 19     | pc          | Pin control                    |
/// | 20     | int         | APIC interrupt enable          |
/// | 21     | any_thread  | Any thread                     |
/// | 22     | enable      | Enable counter                 |
/// | 23     | invert      | Invert counter mask            |
/// | 24-31  | cmask       | Counter mask                   |
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct PerfEvtSel {
    pub event_select: u8,
    pub umask: u8,
    pub usr: bool,
    pub os: bool,
    pub edge: bool,
    pub pc: bool,
    pub int: bool,
    pub any_thread: bool,
    pub enable: bool,
    pub invert: bool,
    pub cmask: u8,
}

impl RegisterLayout for PerfEvtSel {
    fn to_msr_value(&self) -> u64 {
        use field::evtsel::*;

        let mut value = EVENT_SELECT.insert(0, u64::from(self.event_select));
        value = UMASK.insert(value, u64::from(self.umask));
        value = USR.assign(value, self.usr);
        value = OS.assign(value, self.os);
        value = EDGE.assign(value, self.edge);
        value = PC.assign(value, self.pc);
        value = INT.assign(value, self.int);
        value = ANY.assign(value, self.any_thread);
        value = EN.assign(value, self.enable);
        value = INV.assign(value, self.invert);
        CMASK.insert(value, u64::from(self.cmask))
    }

    fn from_msr_value(value: u64) -> Self {
        use field::evtsel::*;

        Self {
            event_select: EVENT_SELECT.extract(value) as u8,
            umask: UMASK.extract(value) as u8,
            usr: USR.is_set(value),
            os: OS.is_set(value),
            edge: EDGE.is_set(value),
            pc: PC.is_set(value),
            int: INT.is_set(value),
            any_thread: ANY.is_set(value),
            enable: EN.is_set(value),
            invert: INV.is_set(value),
            cmask: CMASK.extract(value) as u8,
        }
    }

    fn validate(&self) -> Result<(), &'static str> {
        if self.enable && !self.usr && !self.os {
            return Err("enabled counter counts in neither user nor OS mode");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_addresses() {
        assert_eq!(msr::perfevtsel(0), Some(0x186));
        assert_eq!(msr::perfevtsel(7), Some(0x18D));
        assert_eq!(msr::perfevtsel(8), None);
        assert_eq!(msr::pmc(7), Some(0xC8));
        assert_eq!(msr::IA32_FIXED_CTR, [0x309, 0x30A, 0x30B]);
    }

    #[test]
    fn test_every_field_round_trips_full_width() {
        let fields = field::evtsel::ALL
            .iter()
            .chain(&field::fixed::EN)
            .chain(&field::fixed::ANY)
            .chain(&field::fixed::PMI)
            .chain(&field::global::PMC_ENABLE)
            .chain(&field::global::FIXED_ENABLE);

        for f in fields {
            for value in 0..=f.max_value() {
                let reg = f.insert(0x5A5A_5A5A_5A5A_5A5A, value);
                assert_eq!(f.extract(reg), value, "field {}", f.name);
                assert_eq!(reg & !f.mask(), 0x5A5A_5A5A_5A5A_5A5A & !f.mask());
            }
        }
    }

    #[test]
    fn test_ring_mode_round_trip() {
        for mode in RingMode::ALL {
            assert_eq!(RingMode::from_bits(mode.bits()), mode);
        }
        assert_eq!(RingMode::from_bits(0b11).name(), "AllRings");
    }

    #[test]
    fn test_perf_evtsel_layout() {
        let evtsel = PerfEvtSel {
            event_select: 0x3C,
            umask: 0x00,
            usr: true,
            os: true,
            enable: true,
            ..Default::default()
        };

        assert_eq!(evtsel.to_msr_value(), 0x3C | mask::ENABLE_ALL_RINGS_MASK);
        assert_eq!(PerfEvtSel::from_msr_value(evtsel.to_msr_value()), evtsel);
        assert!(evtsel.validate().is_ok());

        let silent = PerfEvtSel {
            enable: true,
            ..Default::default()
        };
        assert!(silent.validate().is_err());
    }

    #[test]
    fn test_perf_evtsel_ignores_high_half() {
        let decoded = PerfEvtSel::from_msr_value(0xFFFF_FFFF_0000_0000);
        assert_eq!(decoded, PerfEvtSel::default());
    }

    #[test]
    fn test_fixed_ctr_ctrl_layout() {
        let decoded = FixedCtrCtrl::from_msr_value(mask::START_FIXED_ALL);
        for ctr in decoded.counters {
            assert_eq!(ctr.mode, RingMode::AllRings);
            assert!(!ctr.any_thread);
            assert!(!ctr.pmi);
        }

        let ctrl = FixedCtrCtrl {
            counters: [
                FixedCounterCtrl {
                    mode: RingMode::Os,
                    any_thread: true,
                    pmi: false,
                },
                FixedCounterCtrl {
                    mode: RingMode::User,
                    any_thread: false,
                    pmi: true,
                },
                FixedCounterCtrl::default(),
            ],
        };
        assert_eq!(ctrl.to_msr_value(), 0x0A5);
        assert_eq!(FixedCtrCtrl::from_msr_value(0x0A5), ctrl);
    }

    #[test]
    fn test_global_ctrl_layout() {
        let value = mask::ENABLE_FIXED_ALL | 0b0000_0101;
        let decoded = GlobalCtrl::from_msr_value(value);
        assert_eq!(decoded.fixed_enable, [true; FIXED_COUNTERS]);
        assert!(decoded.pmc_enabled(0));
        assert!(!decoded.pmc_enabled(1));
        assert!(decoded.pmc_enabled(2));
        assert!(!decoded.pmc_enabled(8));
        assert_eq!(decoded.to_msr_value(), value);
    }
}
