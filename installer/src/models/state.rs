// Install run state
//
// NOTE: This is NOT persisted; one value lives for the duration of a single installer
// invocation and only moves forward (or into `Failed`).

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstallPhase {
    CollectingRequirements,
    CollectingConfig,
    Provisioning,
    ImportingSchema,
    SeedingData,
    Done,
    Failed,
}

impl InstallPhase {
    /// Phase reached when the current one succeeds.
    pub fn next(self) -> Self {
        match self {
            InstallPhase::CollectingRequirements => InstallPhase::CollectingConfig,
            InstallPhase::CollectingConfig => InstallPhase::Provisioning,
            InstallPhase::Provisioning => InstallPhase::ImportingSchema,
            InstallPhase::ImportingSchema => InstallPhase::SeedingData,
            InstallPhase::SeedingData => InstallPhase::Done,
            InstallPhase::Done => InstallPhase::Done,
            InstallPhase::Failed => InstallPhase::Failed,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, InstallPhase::Done | InstallPhase::Failed)
    }

    /// Name used in `[PHASE: ...]` log tags.
    pub fn log_name(self) -> &'static str {
        match self {
            InstallPhase::CollectingRequirements => "requirements",
            InstallPhase::CollectingConfig => "config",
            InstallPhase::Provisioning => "provisioning",
            InstallPhase::ImportingSchema => "schema_import",
            InstallPhase::SeedingData => "seeding",
            InstallPhase::Done => "done",
            InstallPhase::Failed => "failed",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn phases_advance_linearly_to_done() {
        let mut phase = InstallPhase::CollectingRequirements;
        let mut seen = vec![phase];
        while !phase.is_terminal() {
            phase = phase.next();
            seen.push(phase);
        }
        assert_eq!(
            seen,
            vec![
                InstallPhase::CollectingRequirements,
                InstallPhase::CollectingConfig,
                InstallPhase::Provisioning,
                InstallPhase::ImportingSchema,
                InstallPhase::SeedingData,
                InstallPhase::Done,
            ]
        );
    }

    #[test]
    fn failed_is_absorbing() {
        assert_eq!(InstallPhase::Failed.next(), InstallPhase::Failed);
        assert!(InstallPhase::Failed.is_terminal());
    }
}
