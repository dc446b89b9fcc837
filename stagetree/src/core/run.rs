//! Run requests and run modes.

use crate::core::StagePath;
use crate::errors::ValidationError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// How a job run selects stages for fresh execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunMode {
    /// Every stage executes fresh.
    Standard,
    /// The target stage and its descendants execute fresh; everything else
    /// is bypassed and replays cached results.
    From,
    /// Exactly the target stage executes fresh; everything else is bypassed.
    Single,
    /// The tree is constructed and persisted but nothing executes.
    BuildOnly,
}

impl fmt::Display for RunMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Standard => write!(f, "standard"),
            Self::From => write!(f, "from"),
            Self::Single => write!(f, "single"),
            Self::BuildOnly => write!(f, "build_only"),
        }
    }
}

/// Describes one execution of a job.
///
/// A request is constructed by the caller, validated once before any side
/// effect, enriched with resolved job and request identifiers during kernel
/// initialization, and treated as read-only for the rest of the run. Clones
/// are handed to parallel branches.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunRequest {
    /// The run mode.
    pub mode: RunMode,
    /// Opaque job correlation handle. Empty for a brand-new job.
    pub job_id: Option<String>,
    /// Opaque request identifier, assigned by the persistence collaborator.
    pub request_id: Option<String>,
    /// The target path used by the From and Single modes.
    pub target: StagePath,
}

impl RunRequest {
    /// Creates a request with explicit fields.
    #[must_use]
    pub fn new(
        mode: RunMode,
        job_id: Option<String>,
        request_id: Option<String>,
        target: StagePath,
    ) -> Self {
        Self {
            mode,
            job_id,
            request_id,
            target,
        }
    }

    /// Creates a standard full-run request.
    #[must_use]
    pub fn standard() -> Self {
        Self::new(RunMode::Standard, None, None, StagePath::empty())
    }

    /// Creates a request resuming an existing job from `target` inclusive of
    /// its descendants.
    #[must_use]
    pub fn from_path(job_id: impl Into<String>, target: StagePath) -> Self {
        Self::new(RunMode::From, Some(job_id.into()), None, target)
    }

    /// Creates a request re-running exactly `target` on an existing job.
    #[must_use]
    pub fn single(job_id: impl Into<String>, target: StagePath) -> Self {
        Self::new(RunMode::Single, Some(job_id.into()), None, target)
    }

    /// Creates a build-only request for a brand-new job.
    #[must_use]
    pub fn build_only() -> Self {
        Self::new(RunMode::BuildOnly, None, None, StagePath::empty())
    }

    /// Creates a build-only request against an existing job.
    #[must_use]
    pub fn build_only_for_job(job_id: impl Into<String>) -> Self {
        Self::new(RunMode::BuildOnly, Some(job_id.into()), None, StagePath::empty())
    }

    /// Returns a copy carrying the resolved job id.
    #[must_use]
    pub fn with_job_id(mut self, job_id: impl Into<String>) -> Self {
        self.job_id = Some(job_id.into());
        self
    }

    /// Returns a copy carrying the assigned request id.
    #[must_use]
    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = Some(request_id.into());
        self
    }

    /// Returns true if a non-blank job id is present.
    #[must_use]
    pub fn has_job_id(&self) -> bool {
        self.job_id
            .as_deref()
            .is_some_and(|id| !id.trim().is_empty())
    }

    /// Checks the request against its validity contract.
    ///
    /// Rules are evaluated in a fixed order so the reported violation is
    /// deterministic. A request is either fully valid or invalid; there is
    /// no partial validity.
    ///
    /// # Errors
    ///
    /// Returns a [`ValidationError`] naming the first violated rule.
    pub fn validate(&self) -> Result<(), ValidationError> {
        match self.mode {
            RunMode::Standard => {
                if self.has_job_id() {
                    return Err(ValidationError::new(
                        "the job id must be empty for run mode 'standard'",
                    ));
                }
                if !self.target.is_empty() {
                    return Err(ValidationError::new(
                        "the target path must be empty for run mode 'standard'",
                    ));
                }
            }
            RunMode::From => {
                if !self.has_job_id() {
                    return Err(ValidationError::new(
                        "a job id must be provided for run mode 'from'",
                    ));
                }
                if self.target.is_empty() {
                    return Err(ValidationError::new(
                        "a target path must be provided for run mode 'from'",
                    ));
                }
            }
            RunMode::Single => {
                if !self.has_job_id() {
                    return Err(ValidationError::new(
                        "a job id must be provided for run mode 'single'",
                    ));
                }
                if self.target.is_empty() {
                    return Err(ValidationError::new(
                        "a target path must be provided for run mode 'single'",
                    ));
                }
            }
            RunMode::BuildOnly => {
                if !self.target.is_empty() {
                    return Err(ValidationError::new(
                        "the target path must be empty for run mode 'build_only'",
                    ));
                }
            }
        }
        Ok(())
    }
}

impl fmt::Display for RunRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}]-[{}]-[{}]-[{}]",
            self.mode,
            self.job_id.as_deref().unwrap_or(""),
            self.request_id.as_deref().unwrap_or(""),
            self.target
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn target() -> StagePath {
        StagePath::parse("1-2").unwrap()
    }

    #[test]
    fn test_standard_valid_without_job_and_target() {
        assert!(RunRequest::standard().validate().is_ok());
    }

    #[test]
    fn test_standard_rejects_job_id() {
        let request = RunRequest::standard().with_job_id("job-1");
        let err = request.validate().unwrap_err();
        assert_eq!(
            err.message,
            "the job id must be empty for run mode 'standard'"
        );
    }

    #[test]
    fn test_standard_rejects_target() {
        let request = RunRequest::new(RunMode::Standard, None, None, target());
        assert!(request.validate().is_err());
    }

    #[test]
    fn test_from_requires_job_and_target() {
        assert!(RunRequest::new(RunMode::From, None, None, target())
            .validate()
            .is_err());
        assert!(
            RunRequest::new(RunMode::From, Some("job-1".into()), None, StagePath::empty())
                .validate()
                .is_err()
        );
        assert!(RunRequest::from_path("job-1", target()).validate().is_ok());
    }

    #[test]
    fn test_single_requires_job_and_target() {
        assert!(RunRequest::new(RunMode::Single, None, None, target())
            .validate()
            .is_err());
        assert!(RunRequest::new(
            RunMode::Single,
            Some("job-1".into()),
            None,
            StagePath::empty()
        )
        .validate()
        .is_err());
        assert!(RunRequest::single("job-1", target()).validate().is_ok());
    }

    #[test]
    fn test_build_only_accepts_existing_job() {
        assert!(RunRequest::build_only().validate().is_ok());
        assert!(RunRequest::build_only_for_job("job-1").validate().is_ok());
    }

    #[test]
    fn test_build_only_rejects_target() {
        let request = RunRequest::new(RunMode::BuildOnly, None, None, target());
        assert!(request.validate().is_err());
    }

    #[test]
    fn test_blank_job_id_counts_as_missing() {
        let request = RunRequest::new(RunMode::From, Some("   ".into()), None, target());
        let err = request.validate().unwrap_err();
        assert_eq!(err.message, "a job id must be provided for run mode 'from'");
    }

    #[test]
    fn test_first_violation_wins() {
        // Both rules are violated; the job id rule is checked first.
        let request = RunRequest::new(RunMode::From, None, None, StagePath::empty());
        let err = request.validate().unwrap_err();
        assert_eq!(err.message, "a job id must be provided for run mode 'from'");
    }

    #[test]
    fn test_display() {
        let request = RunRequest::single("job-1", target()).with_request_id("req-9");
        assert_eq!(request.to_string(), "[single]-[job-1]-[req-9]-[1-2]");
    }

    #[test]
    fn test_mode_serde() {
        let json = serde_json::to_string(&RunMode::BuildOnly).unwrap();
        assert_eq!(json, r#""build_only""#);
        let back: RunMode = serde_json::from_str(&json).unwrap();
        assert_eq!(back, RunMode::BuildOnly);
    }
}
