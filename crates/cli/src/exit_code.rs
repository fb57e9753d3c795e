// Consistent exit codes for the tandem CLI.
//
//   0  = success
//   1  = general error
//   2  = usage/argument error
//   10 = relay not reachable
//   13 = network error
//   20 = executed program failed

use std::process;

use tandem_client::{ExecutionError, SessionError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum ExitCode {
    Success = 0,
    Error = 1,
    Usage = 2,
    RelayDown = 10,
    Network = 13,
    ProgramFailed = 20,
}

impl ExitCode {
    pub fn code(self) -> i32 {
        self as i32
    }

    /// Map an anyhow error to an exit code by inspecting the error chain.
    pub fn from_error(err: &anyhow::Error) -> Self {
        for cause in err.chain() {
            if let Some(session_err) = cause.downcast_ref::<SessionError>() {
                return match session_err {
                    SessionError::InvalidUrl { .. } => Self::Usage,
                    SessionError::Closed => Self::RelayDown,
                    SessionError::Edit(_) | SessionError::Detached => Self::Error,
                };
            }
            if let Some(exec_err) = cause.downcast_ref::<ExecutionError>() {
                return match exec_err {
                    ExecutionError::InvalidUrl { .. } => Self::Usage,
                    ExecutionError::Rejected { status, .. } if (400..500).contains(status) => Self::Usage,
                    ExecutionError::Http(_) => Self::Network,
                    _ => Self::Error,
                };
            }
            if let Some(io_err) = cause.downcast_ref::<std::io::Error>() {
                return match io_err.kind() {
                    std::io::ErrorKind::ConnectionRefused => Self::RelayDown,
                    std::io::ErrorKind::TimedOut => Self::Network,
                    std::io::ErrorKind::NotFound => Self::Usage,
                    _ => Self::Error,
                };
            }
        }
        Self::Error
    }
}

impl From<ExitCode> for process::ExitCode {
    fn from(code: ExitCode) -> Self {
        process::ExitCode::from(code.code() as u8)
    }
}
