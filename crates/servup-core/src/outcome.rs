/// Result of a top-level command, mapped onto the admin framework's exit codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Success,
    /// Partial success; the operator must inspect the logs.
    Warning,
    /// Aborted; a compensating action was attempted where one applies.
    Error,
}

impl Outcome {
    pub fn exit_code(self) -> i32 {
        match self {
            Self::Success => 0,
            Self::Error => 1,
            Self::Warning => 4,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Warning => "warning",
            Self::Error => "error",
        }
    }

    /// The more severe of two outcomes.
    pub fn combine(self, other: Outcome) -> Outcome {
        match (self, other) {
            (Self::Error, _) | (_, Self::Error) => Self::Error,
            (Self::Warning, _) | (_, Self::Warning) => Self::Warning,
            _ => Self::Success,
        }
    }
}
