use core::fmt;

use crate::config::BootError;

/// Kernel initialization status tracking
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InitStatus {
    NotStarted,
    InProgress,
    Completed,
    Failed(BootError),
}

/// The bring-up phases, in the only order that is safe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BootPhase {
    Console,
    TaskState,
    VectorTable,
}

impl BootPhase {
    pub const ALL: [BootPhase; 3] = [
        BootPhase::Console,
        BootPhase::TaskState,
        BootPhase::VectorTable,
    ];

    pub fn name(self) -> &'static str {
        match self {
            BootPhase::Console => "Diagnostic Console",
            BootPhase::TaskState => "Task State Segment",
            BootPhase::VectorTable => "Interrupt Vector Table",
        }
    }

    fn index(self) -> usize {
        self as usize
    }
}

/// Status of every boot phase
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BootProgress {
    statuses: [InitStatus; BootPhase::ALL.len()],
}

impl BootProgress {
    pub const fn new() -> Self {
        Self {
            statuses: [InitStatus::NotStarted; BootPhase::ALL.len()],
        }
    }

    pub fn status(&self, phase: BootPhase) -> InitStatus {
        self.statuses[phase.index()]
    }

    pub fn set(&mut self, phase: BootPhase, status: InitStatus) {
        self.statuses[phase.index()] = status;
    }

    /// Check if all phases completed
    pub fn all_complete(&self) -> bool {
        self.statuses.iter().all(|s| *s == InitStatus::Completed)
    }

    pub fn is_failed(&self) -> bool {
        self.statuses.iter().any(|s| matches!(s, InitStatus::Failed(_)))
    }
}

impl Default for BootProgress {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for BootPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl fmt::Display for InitStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InitStatus::NotStarted => write!(f, "Not Started"),
            InitStatus::InProgress => write!(f, "In Progress"),
            InitStatus::Completed => write!(f, "Completed"),
            InitStatus::Failed(err) => write!(f, "Failed: {}", err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn progress_tracks_each_phase() {
        let mut progress = BootProgress::new();
        assert!(!progress.all_complete());
        for phase in BootPhase::ALL {
            assert_eq!(progress.status(phase), InitStatus::NotStarted);
            progress.set(phase, InitStatus::Completed);
        }
        assert!(progress.all_complete());
        assert!(!progress.is_failed());
    }

    #[test]
    fn failure_is_displayed_with_its_cause() {
        let status = InitStatus::Failed(BootError::NullFramebuffer);
        assert_eq!(
            status.to_string(),
            "Failed: framebuffer base address is null"
        );
        assert_eq!(BootPhase::VectorTable.to_string(), "Interrupt Vector Table");
    }
}
