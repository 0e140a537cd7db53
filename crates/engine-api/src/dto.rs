use custody_core::{FileId, Pid, RespawnPolicy};
use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct RegisterFamily {
    pub pid: Pid,
    /// Image the root was started from, claimed by the family when valid.
    #[serde(default)]
    pub origin: FileId,
    #[serde(default)]
    pub policy: RespawnPolicy,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct Registered {
    pub root: Pid,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct Unregistered {
    pub removed: bool,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct Terminated {
    pub pids: Vec<Pid>,
}

#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq, Eq)]
pub struct WaitForExit {
    /// Zero waits without limit.
    #[serde(default)]
    pub timeout_ms: u64,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct ExitStatus {
    pub timed_out: bool,
    pub removed: bool,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct Version {
    pub version: String,
}
