//! Run options for a deployment.

use std::time::Duration;

use convoy_units::GroupSelection;

#[derive(Debug, Clone)]
pub struct RolloutOptions {
    /// Replace every loaded unit, changed or not. Implies confirmation.
    pub force: bool,
    /// Answer every confirmation with yes.
    pub auto_confirm: bool,
    /// Task groups to operate on.
    pub groups: GroupSelection,
    /// Restrict the run to one scaling group.
    pub scaling_group: Option<u32>,
    /// Pause between destroying and starting units of a slice.
    pub destroy_delay: Duration,
    /// Pause before acting on each slice after the first changed one.
    pub slice_delay: Duration,
}

impl Default for RolloutOptions {
    fn default() -> Self {
        Self {
            force: false,
            auto_confirm: false,
            groups: GroupSelection::all(),
            scaling_group: None,
            destroy_delay: Duration::from_secs(15),
            slice_delay: Duration::from_secs(15),
        }
    }
}

impl RolloutOptions {
    /// No pauses and no prompts.
    pub fn unattended() -> Self {
        Self {
            auto_confirm: true,
            destroy_delay: Duration::ZERO,
            slice_delay: Duration::ZERO,
            ..Self::default()
        }
    }

    pub(crate) fn skips_confirmation(&self) -> bool {
        self.force || self.auto_confirm
    }

    pub(crate) fn includes_scaling_group(&self, sg: u32) -> bool {
        self.scaling_group.is_none_or(|only| only == sg)
    }
}
