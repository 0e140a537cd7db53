use nix::{errno::Errno, sys::signal};
use thiserror::Error;

use crate::ids::Pid;

#[derive(Debug, Error)]
pub enum ProcessControlError {
    #[error("invalid process id")]
    InvalidPid,
    #[error("signalling process {pid} failed")]
    Signal {
        pid: Pid,
        #[source]
        source: nix::Error,
    },
}

/// Terminates and probes processes on behalf of the collaborators.
pub trait ProcessControl: Send + Sync {
    fn terminate(&self, pid: Pid) -> Result<(), ProcessControlError>;

    fn is_running(&self, pid: Pid) -> bool;
}

/// [`ProcessControl`] backed by `kill(2)`.
#[derive(Debug, Default, Clone, Copy)]
pub struct SignalProcessControl;

impl ProcessControl for SignalProcessControl {
    fn terminate(&self, pid: Pid) -> Result<(), ProcessControlError> {
        let target = pid.to_nix().ok_or(ProcessControlError::InvalidPid)?;
        match signal::kill(target, signal::Signal::SIGKILL) {
            // already gone
            Ok(()) | Err(Errno::ESRCH) => Ok(()),
            Err(source) => Err(ProcessControlError::Signal { pid, source }),
        }
    }

    fn is_running(&self, pid: Pid) -> bool {
        let Some(target) = pid.to_nix() else {
            return false;
        };
        // EPERM still proves the process exists
        matches!(signal::kill(target, None), Ok(()) | Err(Errno::EPERM))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn own_process_is_running() {
        assert!(SignalProcessControl.is_running(Pid::from_raw(std::process::id())));
        assert!(!SignalProcessControl.is_running(Pid::INVALID));
    }

    #[test]
    fn terminate_rejects_invalid_pid() {
        assert!(matches!(
            SignalProcessControl.terminate(Pid::INVALID),
            Err(ProcessControlError::InvalidPid)
        ));
    }

    #[test]
    fn pids_beyond_pid_t_are_never_signalled() {
        // u32::MAX would be kill(-1), 0x8000_0001 a process group
        for raw in [u32::MAX, 0x8000_0001, i32::MAX as u32 + 1] {
            let pid = Pid::from_raw(raw);
            assert!(!SignalProcessControl.is_running(pid));
            assert!(matches!(
                SignalProcessControl.terminate(pid),
                Err(ProcessControlError::InvalidPid)
            ));
        }
    }
}
