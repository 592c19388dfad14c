use serde::{Deserialize, Serialize};

/// Lifecycle state of a single `PhaseList::run` invocation.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default, Hash)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    #[default]
    Start,
    RunningRegular,
    RunningError,
    RunningFinal,
    Done,
}

impl RunState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Start => "start",
            Self::RunningRegular => "running_regular",
            Self::RunningError => "running_error",
            Self::RunningFinal => "running_final",
            Self::Done => "done",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "start" => Some(Self::Start),
            "running_regular" => Some(Self::RunningRegular),
            "running_error" => Some(Self::RunningError),
            "running_final" => Some(Self::RunningFinal),
            "done" => Some(Self::Done),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done)
    }
}

impl std::fmt::Display for RunState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
