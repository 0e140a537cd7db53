//! Requests accepted from the management side and their mapping onto the
//! registry.

use std::{sync::Arc, time::Duration};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{
    error::{AddError, AddResultExt},
    family::RespawnPolicy,
    ids::{FileId, Pid},
    process_control::{ProcessControl, ProcessControlError},
    registry::{FamilyRegistry, WaitOutcome},
};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ControlRequest {
    RegisterFamily {
        pid: Pid,
        #[serde(default)]
        origin: FileId,
        #[serde(default)]
        policy: RespawnPolicy,
    },
    UnregisterFamily {
        pid: Pid,
    },
    TerminateFamily {
        pid: Pid,
    },
    ListMembers {
        pid: Pid,
    },
    ListFiles {
        pid: Pid,
    },
    WaitForExit {
        pid: Pid,
        /// Zero waits forever.
        #[serde(default)]
        timeout_ms: u64,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ControlResponse {
    Registered { root: Pid },
    Unregistered { removed: bool },
    Terminated { pids: Vec<Pid> },
    Members { pids: Vec<Pid> },
    Files { files: Vec<FileId> },
    Waited { timed_out: bool, removed: bool },
}

#[derive(Debug, Error)]
pub enum ControlError {
    #[error(transparent)]
    Registry(#[from] AddError),
    #[error("process {0} is not running")]
    ProcessNotRunning(Pid),
    #[error("failed to terminate process {pid}")]
    Termination {
        pid: Pid,
        #[source]
        source: ProcessControlError,
    },
}

/// Executes [`ControlRequest`]s against a shared registry.
///
/// Every call is synchronous and [`ControlRequest::WaitForExit`] may block,
/// so async callers should dispatch from a blocking task.
#[derive(Clone)]
pub struct Controller {
    registry: Arc<FamilyRegistry>,
    process_control: Arc<dyn ProcessControl>,
}

impl Controller {
    pub fn new(registry: Arc<FamilyRegistry>, process_control: Arc<dyn ProcessControl>) -> Self {
        Self {
            registry,
            process_control,
        }
    }

    pub fn registry(&self) -> &Arc<FamilyRegistry> {
        &self.registry
    }

    pub fn dispatch(&self, request: ControlRequest) -> Result<ControlResponse, ControlError> {
        log::debug!("control request: {request:?}");
        match request {
            ControlRequest::RegisterFamily {
                pid,
                origin,
                policy,
            } => self.register(pid, origin, policy),
            ControlRequest::UnregisterFamily { pid } => Ok(ControlResponse::Unregistered {
                removed: self.registry.remove_member(pid),
            }),
            ControlRequest::TerminateFamily { pid } => self.terminate(pid),
            ControlRequest::ListMembers { pid } => Ok(ControlResponse::Members {
                pids: self.registry.members(pid),
            }),
            ControlRequest::ListFiles { pid } => Ok(ControlResponse::Files {
                files: self.registry.files(pid),
            }),
            ControlRequest::WaitForExit { pid, timeout_ms } => {
                let timeout = (timeout_ms > 0).then(|| Duration::from_millis(timeout_ms));
                Ok(match self.registry.wait_for_exit(pid, timeout) {
                    WaitOutcome::Settled { removed } => ControlResponse::Waited {
                        timed_out: false,
                        removed,
                    },
                    WaitOutcome::TimedOut => ControlResponse::Waited {
                        timed_out: true,
                        removed: false,
                    },
                })
            }
        }
    }

    fn register(
        &self,
        pid: Pid,
        origin: FileId,
        policy: RespawnPolicy,
    ) -> Result<ControlResponse, ControlError> {
        if !pid.is_valid() {
            return Err(AddError::InvalidItem.into());
        }
        if !self.process_control.is_running(pid) {
            return Err(ControlError::ProcessNotRunning(pid));
        }
        let created = match self.registry.create_family(pid, origin, policy) {
            Ok(()) => true,
            // registering the same root twice is not an error
            Err(AddError::Forbidden) if self.registry.process_owner_root(pid) == pid => false,
            Err(err) => return Err(err.into()),
        };
        if origin.is_valid() {
            if let Err(err) = self.registry.claim_file(origin, pid).or_existing() {
                if created {
                    self.registry.remove_member(pid);
                }
                log::warn!("cannot register {pid}: origin {origin} unavailable: {err}");
                return Err(err.into());
            }
        }
        log::info!("watching process {pid} ({policy})");
        Ok(ControlResponse::Registered { root: pid })
    }

    fn terminate(&self, pid: Pid) -> Result<ControlResponse, ControlError> {
        let root = self.registry.process_owner_root(pid);
        if !root.is_valid() {
            return Err(AddError::NoParent.into());
        }
        // children first so the root never waits on them
        let mut members = self.registry.members(root);
        members.sort_by_key(|member| *member == root);
        let mut pids = Vec::with_capacity(members.len());
        for member in members {
            self.process_control
                .terminate(member)
                .map_err(|source| ControlError::Termination {
                    pid: member,
                    source,
                })?;
            self.registry.remove_member(member);
            pids.push(member);
        }
        log::info!("terminated family {root}: {} processes", pids.len());
        Ok(ControlResponse::Terminated { pids })
    }
}
