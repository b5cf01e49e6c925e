// Architectural PMU event definitions and event/umask text parsing

use crate::error::{PmuError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PmuEvent {
    pub event: u8,
    pub umask: u8,
    pub name: &'static str,
}

// Architectural events (CPUID leaf 0x0A, same encoding on all Intel CPUs)
pub const ARCHITECTURAL_EVENTS: &[PmuEvent] = &[
    PmuEvent {
        event: 0x3C,
        umask: 0x00,
        name: "UnhaltedCoreCycles",
    },
    PmuEvent {
        event: 0xC0,
        umask: 0x00,
        name: "InstructionsRetired",
    },
    PmuEvent {
        event: 0x3C,
        umask: 0x01,
        name: "UnhaltedReferenceCycles",
    },
    PmuEvent {
        event: 0x2E,
        umask: 0x4F,
        name: "LLCReference",
    },
    PmuEvent {
        event: 0x2E,
        umask: 0x41,
        name: "LLCMisses",
    },
    PmuEvent {
        event: 0xC4,
        umask: 0x00,
        name: "BranchInstructionsRetired",
    },
    PmuEvent {
        event: 0xC5,
        umask: 0x00,
        name: "BranchMissesRetired",
    },
];

impl PmuEvent {
    /// Case-insensitive lookup by name
    pub fn by_name(name: &str) -> Option<&'static PmuEvent> {
        ARCHITECTURAL_EVENTS
            .iter()
            .find(|e| e.name.eq_ignore_ascii_case(name.trim()))
    }

    /// Architectural event programmed with this exact code/umask pair
    pub fn lookup(event: u8, umask: u8) -> Option<&'static PmuEvent> {
        ARCHITECTURAL_EVENTS
            .iter()
            .find(|e| e.event == event && e.umask == umask)
    }
}

/// Parse an 8-bit event code or unit mask
///
/// Accepts decimal (`60`) and `0x`-prefixed hexadecimal (`0x3C`).
pub fn parse_register_byte(text: &str) -> Result<u8> {
    let trimmed = text.trim();
    let parsed = match trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
    {
        Some(hex) => u64::from_str_radix(hex, 16),
        None => trimmed.parse::<u64>(),
    };

    let value = parsed.map_err(|_| {
        PmuError::invalid(format!(
            "{text:?} is not a decimal or 0x-prefixed hexadecimal number"
        ))
    })?;

    u8::try_from(value)
        .map_err(|_| PmuError::invalid(format!("{text:?} does not fit in 8 bits (max 0xFF)")))
}

/// Resolve `--pmu-event` text into an event code and, for named
/// architectural events, their default unit mask.
pub fn resolve_event(text: &str) -> Result<(u8, Option<u8>)> {
    if let Some(event) = PmuEvent::by_name(text) {
        return Ok((event.event, Some(event.umask)));
    }

    parse_register_byte(text).map_err(|_| {
        let names: Vec<&str> = ARCHITECTURAL_EVENTS.iter().map(|e| e.name).collect();
        PmuError::invalid(format!(
            "unknown event {text:?}: expected a number (e.g. 0x3C) or one of {}",
            names.join(", ")
        ))
    })
    .map(|code| (code, None))
}
