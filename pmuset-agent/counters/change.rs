use crate::config::Topology;
use crate::counters::events::{parse_register_byte, resolve_event};
use crate::error::{PmuError, Result};

/// Requested action on one group of enable bits
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FieldChange {
    #[default]
    Leave,
    Enable,
    Disable,
}

impl FieldChange {
    /// Map an enable/disable flag pair; callers reject both being set
    pub fn from_flags(enable: bool, disable: bool) -> Self {
        match (enable, disable) {
            (true, _) => FieldChange::Enable,
            (false, true) => FieldChange::Disable,
            (false, false) => FieldChange::Leave,
        }
    }

    pub fn target(self) -> Option<bool> {
        match self {
            FieldChange::Leave => None,
            FieldChange::Enable => Some(true),
            FieldChange::Disable => Some(false),
        }
    }
}

/// Everything one invocation asks to change, applied identically to every
/// selected core
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChangeSet {
    pub fixed: FieldChange,
    pub pmu: FieldChange,
    pub pmu_index: Option<usize>,
    pub event: Option<u8>,
    pub umask: Option<u8>,
    pub reset: bool,
}

impl ChangeSet {
    /// Reset every core in the selection
    pub fn reset() -> Self {
        Self {
            reset: true,
            ..Default::default()
        }
    }

    /// Build the event/umask part from command-line text
    ///
    /// A named architectural event brings its own unit mask unless one is
    /// given explicitly.
    pub fn with_event_text(mut self, event: Option<&str>, umask: Option<&str>) -> Result<Self> {
        let explicit_umask = umask.map(parse_register_byte).transpose()?;
        match event {
            Some(text) => {
                let (code, default_umask) = resolve_event(text)?;
                self.event = Some(code);
                self.umask = explicit_umask.or(default_umask);
            }
            None if explicit_umask.is_some() => {
                return Err(PmuError::invalid("--pmu-umask requires --pmu-event"));
            }
            None => {}
        }
        Ok(self)
    }

    /// True when nothing would be written
    pub fn is_inspection(&self) -> bool {
        !self.reset
            && self.fixed == FieldChange::Leave
            && self.pmu == FieldChange::Leave
            && self.event.is_none()
            && self.umask.is_none()
    }

    /// Reject inconsistent requests before any register is touched
    pub fn validate(&self, topology: &Topology) -> Result<()> {
        if let Some(index) = self.pmu_index {
            if index >= topology.num_pmu() {
                return Err(PmuError::invalid(format!(
                    "PMU index {index} out of range (this CPU has {} PMU counters: 0-{})",
                    topology.num_pmu(),
                    topology.num_pmu() - 1
                )));
            }
        }

        if self.umask.is_some() && self.event.is_none() {
            return Err(PmuError::invalid("a unit mask requires an event code"));
        }

        if self.reset && !self.is_reset_only() {
            return Err(PmuError::invalid(
                "--reset cannot be combined with other changes",
            ));
        }

        if self.pmu_index.is_some() && self.pmu == FieldChange::Leave && self.event.is_none() {
            return Err(PmuError::invalid(
                "--pmu-number needs --enable-pmu, --disable-pmu or --pmu-event",
            ));
        }

        Ok(())
    }

    fn is_reset_only(&self) -> bool {
        Self {
            reset: false,
            ..self.clone()
        }
        .is_inspection()
            && self.pmu_index.is_none()
    }
}
