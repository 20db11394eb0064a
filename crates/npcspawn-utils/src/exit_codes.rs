//! Exit codes for the npcspawn binary.
//!
//! | Code | Constant | Description |
//! |------|----------|-------------|
//! | 0 | `SUCCESS` | Batch finished (partial failures included) |
//! | 1 | `INTERNAL` | General/internal failure |
//! | 2 | `CONFIG` | Invalid configuration or CLI arguments |
//! | 3 | `ALL_FAILED` | Every non-cancelled target failed |

/// Type-safe process exit code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExitCode(i32);

impl ExitCode {
    /// Batch completed; individual targets may still have failed
    pub const SUCCESS: ExitCode = ExitCode(0);

    /// General/internal failure
    pub const INTERNAL: ExitCode = ExitCode(1);

    /// Configuration could not be loaded or validated
    pub const CONFIG: ExitCode = ExitCode(2);

    /// No target produced text
    pub const ALL_FAILED: ExitCode = ExitCode(3);

    /// Build an exit code from a raw value
    #[must_use]
    pub const fn from_i32(code: i32) -> Self {
        ExitCode(code)
    }

    /// Raw value for `std::process::exit`
    #[must_use]
    pub const fn as_i32(self) -> i32 {
        self.0
    }
}

impl From<ExitCode> for i32 {
    fn from(code: ExitCode) -> Self {
        code.as_i32()
    }
}
