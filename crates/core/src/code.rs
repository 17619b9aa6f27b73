//! Process-level error codes.
//!
//! Every export run ends with exactly one of these codes. The numeric values
//! are part of the external contract (logs and exit statuses) and must not
//! change.

use serde::{Deserialize, Serialize};

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    Success,
    ConfigurationError,
    BuildError,
    TransportError,
    UnexpectedError,
    MultipleFailures,
}

impl ErrorCode {
    pub const ALL: [ErrorCode; 6] = [
        ErrorCode::Success,
        ErrorCode::ConfigurationError,
        ErrorCode::BuildError,
        ErrorCode::TransportError,
        ErrorCode::UnexpectedError,
        ErrorCode::MultipleFailures,
    ];

    pub const fn code(self) -> u16 {
        match self {
            ErrorCode::Success => 0,
            ErrorCode::ConfigurationError => 1,
            ErrorCode::BuildError => 101,
            ErrorCode::TransportError => 201,
            ErrorCode::UnexpectedError => 301,
            ErrorCode::MultipleFailures => 999,
        }
    }

    /// Human readable message logged next to the code.
    pub const fn text(self) -> &'static str {
        match self {
            ErrorCode::Success => "success",
            ErrorCode::ConfigurationError => "configuration error",
            ErrorCode::BuildError => "unable to build data payload",
            ErrorCode::TransportError => "unable to upload data payload",
            ErrorCode::UnexpectedError => "unexpected error",
            ErrorCode::MultipleFailures => "multiple failures",
        }
    }

    pub const fn is_success(self) -> bool {
        matches!(self, ErrorCode::Success)
    }

    /// Process exit status for this code.
    ///
    /// Exit statuses are 8 bits wide, codes above 255 saturate.
    pub fn exit_status(self) -> u8 {
        u8::try_from(self.code()).unwrap_or(u8::MAX)
    }

    /// Aggregate the outcome of several independent failures.
    ///
    /// No failure is success, a single failure keeps its own code and more
    /// than one collapses to [`ErrorCode::MultipleFailures`].
    pub fn aggregate<I>(failures: I) -> ErrorCode
    where
        I: IntoIterator<Item = ErrorCode>,
    {
        let mut failures = failures.into_iter().filter(|c| !c.is_success());
        match (failures.next(), failures.next()) {
            (None, _) => ErrorCode::Success,
            (Some(only), None) => only,
            (Some(_), Some(_)) => ErrorCode::MultipleFailures,
        }
    }
}

impl core::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{} ({})", self.text(), self.code())
    }
}
