use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// Id of the phase that receives errors escaping the regular phases.
pub const ERROR_PHASE: &str = "$error";

/// Id of the phase that always runs last.
pub const FINAL_PHASE: &str = "$final";

/// The bucket of a phase a handler is registered into.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Sub {
    Before,
    #[default]
    Use,
    After,
}

impl Sub {
    pub const ALL: [Sub; 3] = [Sub::Before, Sub::Use, Sub::After];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Before => "before",
            Self::Use => "use",
            Self::After => "after",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "before" => Some(Self::Before),
            "use" => Some(Self::Use),
            "after" => Some(Self::After),
            _ => None,
        }
    }

    /// Split a registration name such as `auth:before` into the phase id and
    /// the bucket. A name without a suffix targets [`Sub::Use`].
    pub fn split(name: &str) -> Result<(&str, Sub), CoreError> {
        match name.rsplit_once(':') {
            Some((phase, suffix)) => Sub::parse(suffix)
                .map(|sub| (phase, sub))
                .ok_or_else(|| CoreError::UnknownSubPhase(name.to_string())),
            None => Ok((name, Sub::Use)),
        }
    }
}

impl std::fmt::Display for Sub {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Execution policy of a phase.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct PhaseOptions {
    /// Run the handlers of each bucket concurrently
    pub parallel: bool,
    /// Abort the sequence on the first handler error
    pub fail_fast: bool,
}

impl Default for PhaseOptions {
    fn default() -> Self {
        Self {
            parallel: false,
            fail_fast: true,
        }
    }
}

impl PhaseOptions {
    pub fn sequential() -> Self {
        Self::default()
    }

    pub fn parallel() -> Self {
        Self {
            parallel: true,
            ..Default::default()
        }
    }

    pub fn with_parallel(mut self, parallel: bool) -> Self {
        self.parallel = parallel;
        self
    }

    pub fn with_fail_fast(mut self, fail_fast: bool) -> Self {
        self.fail_fast = fail_fast;
        self
    }

    /// Defaults of the `$error` phase: every error handler gets a chance to run.
    pub fn error_phase() -> Self {
        Self {
            parallel: false,
            fail_fast: false,
        }
    }

    /// Defaults of the `$final` phase.
    pub fn final_phase() -> Self {
        Self::default()
    }
}
