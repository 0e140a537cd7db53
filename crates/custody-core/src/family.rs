//! A single monitored process family.

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

use crate::{
    bounded_set::BoundedSortedSet,
    error::{AddError, AddResult},
    ids::{FileId, Pid},
};

/// What keeps a family around after all its processes are gone.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum RespawnPolicy {
    /// The family is collected as soon as its last member exits.
    #[default]
    NoRestriction,
    /// The family is retained while it still owns dropped files, so nobody
    /// else can take them over and re-executing them is recognised.
    ProtectDroppedFiles,
}

/// One root process with its members and the files it created.
///
/// A family is *live* while its root is a member. Once the root is gone no
/// new members or files are accepted, only removals.
#[derive(Debug)]
pub struct FamilyNode {
    root: Pid,
    origin: FileId,
    policy: RespawnPolicy,
    members: BoundedSortedSet<Pid>,
    files: BoundedSortedSet<FileId>,
}

impl FamilyNode {
    pub fn new(
        root: Pid,
        origin: FileId,
        policy: RespawnPolicy,
        max_members: usize,
        max_files: usize,
    ) -> Self {
        Self {
            root,
            origin,
            policy,
            members: BoundedSortedSet::new(max_members),
            files: BoundedSortedSet::new(max_files),
        }
    }

    /// Allocate both sets now instead of on first use.
    pub fn initialize(&mut self) -> AddResult {
        self.members.initialize()?;
        self.files.initialize()
    }

    pub fn root(&self) -> Pid {
        self.root
    }

    pub fn origin(&self) -> FileId {
        self.origin
    }

    pub fn policy(&self) -> RespawnPolicy {
        self.policy
    }

    pub fn is_live(&self) -> bool {
        self.members.contains(self.root)
    }

    pub fn is_collectible(&self) -> bool {
        if self.is_live() || !self.members.is_empty() {
            return false;
        }
        match self.policy {
            RespawnPolicy::NoRestriction => true,
            RespawnPolicy::ProtectDroppedFiles => self.files.is_empty(),
        }
    }

    pub fn add_member(&mut self, pid: Pid) -> AddResult {
        if pid != self.root && !self.is_live() {
            return Err(AddError::TreeDead);
        }
        self.members.add(pid)
    }

    pub fn add_file(&mut self, file_id: FileId) -> AddResult {
        if !self.is_live() {
            return Err(AddError::TreeDead);
        }
        self.files.add(file_id)
    }

    pub fn can_add_file(&self) -> bool {
        self.is_live() && self.files.has_room()
    }

    pub fn remove_member(&mut self, pid: Pid) -> bool {
        self.members.remove(pid)
    }

    pub fn remove_file(&mut self, file_id: FileId) -> bool {
        self.files.remove(file_id)
    }

    pub fn contains_member(&self, pid: Pid) -> bool {
        self.members.contains(pid)
    }

    pub fn contains_file(&self, file_id: FileId) -> bool {
        self.files.contains(file_id)
    }

    pub fn member_count(&self) -> usize {
        self.members.count()
    }

    pub fn file_count(&self) -> usize {
        self.files.count()
    }

    pub fn copy_members(&self, buf: &mut [Pid]) -> usize {
        self.members.copy_to(buf)
    }

    pub fn copy_files(&self, buf: &mut [FileId]) -> usize {
        self.files.copy_to(buf)
    }

    pub fn members(&self) -> Vec<Pid> {
        self.members.to_vec()
    }

    pub fn files(&self) -> Vec<FileId> {
        self.files.to_vec()
    }

    pub fn summary(&self) -> FamilySummary {
        FamilySummary {
            root: self.root,
            origin: self.origin,
            policy: self.policy,
            live: self.is_live(),
            members: self.member_count(),
            files: self.file_count(),
        }
    }

    /// Release both sets.
    pub fn destroy(&mut self) {
        self.members.destroy();
        self.files.destroy();
    }
}

/// Point-in-time description of a family, safe to hand out of the registry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FamilySummary {
    pub root: Pid,
    pub origin: FileId,
    pub policy: RespawnPolicy,
    pub live: bool,
    pub members: usize,
    pub files: usize,
}
