//! Per-step results of applying the migration chain.

/// Outcome of a single step during `apply`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepOutcome {
    /// Step statements committed and the marker advanced.
    Applied,
    /// Step not attempted because an earlier step failed.
    Skipped,
    /// Step raised a database error.
    Failed(String),
}

impl std::fmt::Display for StepOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StepOutcome::Applied => write!(f, "applied"),
            StepOutcome::Skipped => write!(f, "skipped"),
            StepOutcome::Failed(reason) => write!(f, "failed: {}", reason),
        }
    }
}

/// Result for one step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepReport {
    /// Step id.
    pub step_id: String,
    /// Step message.
    pub message: String,
    /// What happened.
    pub outcome: StepOutcome,
}

/// Results of one `apply` call, in chain order. Only pending steps appear.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ApplyReport {
    /// Per-step results.
    pub steps: Vec<StepReport>,
}

impl ApplyReport {
    /// Record a step result.
    pub fn push(&mut self, step_id: &str, message: &str, outcome: StepOutcome) {
        self.steps.push(StepReport {
            step_id: step_id.to_string(),
            message: message.to_string(),
            outcome,
        });
    }

    /// Number of steps applied.
    pub fn applied_count(&self) -> usize {
        self.steps
            .iter()
            .filter(|s| s.outcome == StepOutcome::Applied)
            .count()
    }

    /// The failed step, if any.
    pub fn failed(&self) -> Option<&StepReport> {
        self.steps
            .iter()
            .find(|s| matches!(s.outcome, StepOutcome::Failed(_)))
    }

    /// Whether every step was applied.
    pub fn is_success(&self) -> bool {
        self.failed().is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_apply_report() {
        let mut report = ApplyReport::default();
        report.push("a", "first", StepOutcome::Applied);
        report.push("b", "second", StepOutcome::Failed("boom".to_string()));
        report.push("c", "third", StepOutcome::Skipped);

        assert_eq!(report.applied_count(), 1);
        assert_eq!(report.failed().map(|s| s.step_id.as_str()), Some("b"));
        assert!(!report.is_success());
        assert_eq!(report.steps[1].outcome.to_string(), "failed: boom");
    }

    #[test]
    fn test_empty_report_is_success() {
        assert!(ApplyReport::default().is_success());
    }
}
