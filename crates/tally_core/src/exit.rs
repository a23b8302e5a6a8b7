//! Process exit statuses.

/// Exit status of a controller or worker process.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum ExitStatus {
    Success = 0,
    TestsFailed = 1,
    UnexpectedError = 2,
    /// A plugin could not be loaded. Aborts every outstanding run.
    PluginLoadError = 3,
    /// A worker retired itself after crossing its memory ceiling.
    ExceededMemoryLimit = 4,
}

impl ExitStatus {
    pub fn code(self) -> i32 {
        self as i32
    }

    pub fn from_code(code: i32) -> Option<ExitStatus> {
        match code {
            0 => Some(ExitStatus::Success),
            1 => Some(ExitStatus::TestsFailed),
            2 => Some(ExitStatus::UnexpectedError),
            3 => Some(ExitStatus::PluginLoadError),
            4 => Some(ExitStatus::ExceededMemoryLimit),
            _ => None,
        }
    }

    pub fn is_success(self) -> bool {
        self == ExitStatus::Success
    }
}

impl From<ExitStatus> for std::process::ExitCode {
    fn from(status: ExitStatus) -> Self {
        std::process::ExitCode::from(u8::try_from(status.code()).unwrap_or(u8::MAX))
    }
}
