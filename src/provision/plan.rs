//! The fixed provisioning plan.

use std::fmt;

use serde::Serialize;

/// One step of the provisioning plan, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Step {
    DisableNativeService,
    RemoveStaleContainer,
    EnsureContainerRuntime,
    EnsureGpuRuntime,
    FetchServingImage,
    LaunchServingContainer,
    AwaitReadiness,
    PullModel,
    EnsureNetwork,
    LaunchDatabase,
    LaunchAdminUi,
}

impl Step {
    /// Every step, in the order the provisioner runs them.
    pub const PLAN: [Step; 11] = [
        Step::DisableNativeService,
        Step::RemoveStaleContainer,
        Step::EnsureContainerRuntime,
        Step::EnsureGpuRuntime,
        Step::FetchServingImage,
        Step::LaunchServingContainer,
        Step::AwaitReadiness,
        Step::PullModel,
        Step::EnsureNetwork,
        Step::LaunchDatabase,
        Step::LaunchAdminUi,
    ];

    /// Best-effort steps fail in valid prior states ("nothing to stop"),
    /// so their errors are logged and the plan continues.
    pub fn is_best_effort(self) -> bool {
        matches!(
            self,
            Step::DisableNativeService | Step::RemoveStaleContainer | Step::EnsureNetwork
        )
    }

    /// 1-based position in [`Step::PLAN`].
    pub fn number(self) -> usize {
        Step::PLAN
            .iter()
            .position(|s| *s == self)
            .map_or(0, |i| i + 1)
    }

    pub fn description(self) -> &'static str {
        match self {
            Step::DisableNativeService => "Disable native inference service",
            Step::RemoveStaleContainer => "Remove stale serving container",
            Step::EnsureContainerRuntime => "Ensure container runtime",
            Step::EnsureGpuRuntime => "Ensure GPU container runtime",
            Step::FetchServingImage => "Fetch serving image",
            Step::LaunchServingContainer => "Launch serving container",
            Step::AwaitReadiness => "Wait for serving container",
            Step::PullModel => "Pull model",
            Step::EnsureNetwork => "Ensure auxiliary network",
            Step::LaunchDatabase => "Launch database",
            Step::LaunchAdminUi => "Launch admin UI",
        }
    }
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}/{}] {}",
            self.number(),
            Step::PLAN.len(),
            self.description()
        )
    }
}

/// What a step did.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", content = "detail", rename_all = "snake_case")]
pub enum StepOutcome {
    /// The step changed host or runtime state.
    Done,
    /// Nothing to do; the reason says why.
    Skipped(String),
    /// The resource already existed and was left as is.
    AlreadyPresent,
    /// A best-effort step failed and was ignored.
    Failed(String),
}

/// A step together with its outcome, kept for the final report.
#[derive(Debug, Clone, Serialize)]
pub struct StepRecord {
    pub step: Step,
    #[serde(flatten)]
    pub outcome: StepOutcome,
    pub elapsed_ms: u64,
}
