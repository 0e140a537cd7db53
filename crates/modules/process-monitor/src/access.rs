//! Guard on handles a watched process opens to other processes.
//!
//! A watched process may tamper with its own family only. Writing another
//! process' memory, operating on its address space or starting threads in it
//! is stripped from the request. On Linux `ptrace` attach and
//! `process_vm_writev` ask for [`ProcessAccess::VM_WRITE`].

use std::{fmt, sync::Arc};

use custody_core::{FamilyRegistry, Pid, Verdict};

/// Access requested on a target process.
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct ProcessAccess(u32);

impl ProcessAccess {
    pub const TERMINATE: ProcessAccess = ProcessAccess(0x0001);
    pub const CREATE_THREAD: ProcessAccess = ProcessAccess(0x0002);
    pub const VM_OPERATION: ProcessAccess = ProcessAccess(0x0008);
    pub const VM_READ: ProcessAccess = ProcessAccess(0x0010);
    pub const VM_WRITE: ProcessAccess = ProcessAccess(0x0020);
    pub const QUERY_INFORMATION: ProcessAccess = ProcessAccess(0x0400);

    /// Rights reserved to processes of the target's own family.
    pub const TAMPER: ProcessAccess =
        ProcessAccess(Self::CREATE_THREAD.0 | Self::VM_OPERATION.0 | Self::VM_WRITE.0);

    const NAMES: [(&'static str, ProcessAccess); 6] = [
        ("TERMINATE", Self::TERMINATE),
        ("CREATE_THREAD", Self::CREATE_THREAD),
        ("VM_OPERATION", Self::VM_OPERATION),
        ("VM_READ", Self::VM_READ),
        ("VM_WRITE", Self::VM_WRITE),
        ("QUERY_INFORMATION", Self::QUERY_INFORMATION),
    ];

    pub const fn from_raw(mask: u32) -> Self {
        Self(mask)
    }

    pub const fn as_raw(self) -> u32 {
        self.0
    }

    pub fn contains(self, other: ProcessAccess) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn intersects(self, other: ProcessAccess) -> bool {
        self.0 & other.0 != 0
    }

    pub fn without(self, other: ProcessAccess) -> ProcessAccess {
        ProcessAccess(self.0 & !other.0)
    }
}

impl std::ops::BitOr for ProcessAccess {
    type Output = ProcessAccess;

    fn bitor(self, rhs: Self) -> Self::Output {
        ProcessAccess(self.0 | rhs.0)
    }
}

impl fmt::Display for ProcessAccess {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&str> = Self::NAMES
            .iter()
            .filter(|(_, flag)| self.contains(*flag))
            .map(|(name, _)| *name)
            .collect();
        if names.is_empty() {
            write!(f, "NONE")
        } else {
            write!(f, "{}", names.join(" | "))
        }
    }
}

impl fmt::Debug for ProcessAccess {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}: {}", self.0, self)
    }
}

/// A process asking for a handle to another one.
#[derive(Debug, Clone, Copy)]
pub struct ProcessOpen {
    pub source: Pid,
    pub target: Pid,
    /// [`Pid::INVALID`] when unknown.
    pub target_parent: Pid,
    pub access: ProcessAccess,
}

/// Outcome of a [`ProcessOpen`]: `Deny` when rights were stripped, with
/// `granted` holding what the handle may still be opened for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AccessDecision {
    pub verdict: Verdict,
    pub granted: ProcessAccess,
}

impl AccessDecision {
    fn allow(access: ProcessAccess) -> Self {
        Self {
            verdict: Verdict::Allow,
            granted: access,
        }
    }
}

pub struct ProcessGuard {
    registry: Arc<FamilyRegistry>,
}

impl ProcessGuard {
    pub fn new(registry: Arc<FamilyRegistry>) -> Self {
        Self { registry }
    }

    pub fn on_open_process(&self, request: ProcessOpen) -> AccessDecision {
        let ProcessOpen {
            source,
            target,
            target_parent,
            access,
        } = request;
        if !self.registry.contains_family(source) {
            return AccessDecision::allow(access);
        }
        // a freshly spawned child may not be attached yet, its parent is
        if self.registry.is_same_family(target, source)
            || self.registry.is_same_family(target_parent, source)
        {
            log::trace!("[{source}] opening family process {target}");
            return AccessDecision::allow(access);
        }
        if !access.intersects(ProcessAccess::TAMPER) {
            return AccessDecision::allow(access);
        }
        let granted = access.without(ProcessAccess::TAMPER);
        log::info!(
            "[{source}] opening foreign process {target} for {access}, reduced to {granted}"
        );
        AccessDecision {
            verdict: Verdict::Deny,
            granted,
        }
    }
}
