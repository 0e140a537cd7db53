//! The family registry.
//!
//! [`FamilyRegistry`] is the single source of truth for which processes
//! belong to which monitored family and which files each family owns. Every
//! operation takes the registry lock for its whole duration, nested set
//! updates included, so every caller observes a consistent snapshot.
//!
//! Families live in a dense slot table. When a family becomes collectible its
//! slot is filled with the last one (`swap_remove`), so slot order is not
//! stable. Nothing outside the registry ever holds a slot index: callers only
//! deal in [`Pid`] and [`FileId`] values.
//!
//! A condition variable is signalled whenever a family loses a member or a
//! file, or is destroyed. [`FamilyRegistry::wait_for_exit`] uses it to let an
//! exiting root wait for its children.

use std::{
    sync::{Condvar, Mutex, MutexGuard, PoisonError},
    time::{Duration, Instant},
};

use crate::{
    error::{AddError, AddResult},
    family::{FamilyNode, FamilySummary, RespawnPolicy},
    ids::{FileId, Pid},
};

/// Default size of every fixed-capacity table.
pub const MAX_ITEMS: usize = 1024;

/// Fixed capacities, decided once at construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegistryLimits {
    pub max_families: usize,
    pub max_members: usize,
    pub max_files: usize,
}

impl Default for RegistryLimits {
    fn default() -> Self {
        Self {
            max_families: MAX_ITEMS,
            max_members: MAX_ITEMS,
            max_files: MAX_ITEMS,
        }
    }
}

/// How a [`FamilyRegistry::wait_for_exit`] call ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    /// Bookkeeping settled; `removed` tells whether the pid was still
    /// tracked and has been dropped.
    Settled { removed: bool },
    /// The timeout elapsed first. Nothing was changed.
    TimedOut,
}

pub struct FamilyRegistry {
    limits: RegistryLimits,
    families: Mutex<Vec<FamilyNode>>,
    changed: Condvar,
}

impl FamilyRegistry {
    pub fn new(limits: RegistryLimits) -> Self {
        Self {
            limits,
            families: Mutex::new(Vec::with_capacity(limits.max_families)),
            changed: Condvar::new(),
        }
    }

    pub fn limits(&self) -> RegistryLimits {
        self.limits
    }

    /// Start monitoring a new family rooted at `root`.
    pub fn create_family(&self, root: Pid, origin: FileId, policy: RespawnPolicy) -> AddResult {
        if !root.is_valid() {
            return Err(AddError::InvalidItem);
        }
        let mut families = self.lock();
        if families
            .iter()
            .any(|family| family.root() == root || family.contains_member(root))
        {
            return Err(AddError::Forbidden);
        }
        if families.len() >= self.limits.max_families {
            log::warn!("cannot watch {root}: family limit ({}) reached", self.limits.max_families);
            return Err(AddError::CapacityExhausted);
        }
        let mut family = FamilyNode::new(
            root,
            origin,
            policy,
            self.limits.max_members,
            self.limits.max_files,
        );
        family.initialize()?;
        family.add_member(root)?;
        families.push(family);
        log::debug!(
            "watching family {root} (origin {origin}, {policy}), {} families",
            families.len()
        );
        Ok(())
    }

    /// Add `child` to the family containing `anchor`.
    pub fn attach_child(&self, child: Pid, anchor: Pid) -> AddResult {
        if !child.is_valid() || !anchor.is_valid() {
            return Err(AddError::InvalidItem);
        }
        let mut families = self.lock();
        let index = find_by_anchor(&families, anchor).ok_or(AddError::NoParent)?;
        if find_member(&families, child).is_some_and(|other| other != index) {
            return Err(AddError::Forbidden);
        }
        let family = &mut families[index];
        let result = family.add_member(child);
        log_add("member", child, family.root(), result);
        result
    }

    /// Record `file_id` as owned by the family of `owner`.
    ///
    /// A file still held by a family whose processes are all gone is
    /// released first; one held by any other family is refused.
    pub fn claim_file(&self, file_id: FileId, owner: Pid) -> AddResult {
        if !file_id.is_valid() || !owner.is_valid() {
            return Err(AddError::InvalidItem);
        }
        let mut families = self.lock();
        let mut index = find_by_anchor(&families, owner).ok_or(AddError::NoParent)?;
        match find_file_owner(&families, file_id) {
            Some(holder) if holder != index => {
                let abandoned = &mut families[holder];
                if abandoned.is_live() || abandoned.member_count() > 0 {
                    return Err(AddError::Forbidden);
                }
                abandoned.remove_file(file_id);
                log::debug!(
                    "file {file_id} reclaimed from exited family {}",
                    abandoned.root()
                );
                if self.settle(&mut families, holder) && index == families.len() {
                    // our family was the last slot and moved into the freed one
                    index = holder;
                }
            }
            _ => {}
        }
        let family = &mut families[index];
        let result = family.add_file(file_id);
        log_add("file", file_id, family.root(), result);
        result
    }

    /// Add `pid` to the family owning `file_id`, for a process executing a
    /// file that family dropped.
    pub fn adopt_by_file_ownership(&self, pid: Pid, file_id: FileId) -> AddResult {
        if !pid.is_valid() || !file_id.is_valid() {
            return Err(AddError::InvalidItem);
        }
        let mut families = self.lock();
        let index = find_file_owner(&families, file_id).ok_or(AddError::NoParent)?;
        if find_member(&families, pid).is_some_and(|other| other != index) {
            return Err(AddError::Forbidden);
        }
        let family = &mut families[index];
        let result = family.add_member(pid);
        log_add("member", pid, family.root(), result);
        result
    }

    /// Drop `pid` from its family, collecting the family if nothing keeps it.
    pub fn remove_member(&self, pid: Pid) -> bool {
        if !pid.is_valid() {
            return false;
        }
        let mut families = self.lock();
        self.remove_member_locked(&mut families, pid)
    }

    /// Drop `file_id` from its owner, collecting the owner if nothing keeps it.
    pub fn remove_file(&self, file_id: FileId) -> bool {
        if !file_id.is_valid() {
            return false;
        }
        let mut families = self.lock();
        let Some(index) = find_file_owner(&families, file_id) else {
            return false;
        };
        families[index].remove_file(file_id);
        self.settle(&mut families, index);
        true
    }

    /// Whether `pid` belongs to any family.
    pub fn contains_family(&self, pid: Pid) -> bool {
        pid.is_valid() && find_member(&self.lock(), pid).is_some()
    }

    pub fn is_same_family(&self, first: Pid, second: Pid) -> bool {
        if !first.is_valid() || !second.is_valid() {
            return false;
        }
        let families = self.lock();
        find_member(&families, first).is_some_and(|index| families[index].contains_member(second))
    }

    /// Root of the family owning `file_id`, or [`Pid::INVALID`].
    pub fn file_owner_root(&self, file_id: FileId) -> Pid {
        if !file_id.is_valid() {
            return Pid::INVALID;
        }
        let families = self.lock();
        find_file_owner(&families, file_id).map_or(Pid::INVALID, |index| families[index].root())
    }

    /// Root of the family `pid` belongs to, or [`Pid::INVALID`].
    pub fn process_owner_root(&self, pid: Pid) -> Pid {
        if !pid.is_valid() {
            return Pid::INVALID;
        }
        let families = self.lock();
        find_member(&families, pid).map_or(Pid::INVALID, |index| families[index].root())
    }

    /// Whether `pid` belongs to the family owning `file_id`.
    pub fn is_file_owned_by(&self, pid: Pid, file_id: FileId) -> bool {
        if !pid.is_valid() || !file_id.is_valid() {
            return false;
        }
        let families = self.lock();
        find_file_owner(&families, file_id).is_some_and(|index| families[index].contains_member(pid))
    }

    /// Whether the family of `pid` could take one more file right now.
    pub fn can_add_file(&self, pid: Pid) -> bool {
        if !pid.is_valid() {
            return false;
        }
        let families = self.lock();
        find_member(&families, pid).is_some_and(|index| families[index].can_add_file())
    }

    pub fn count_members(&self, root: Pid) -> usize {
        let families = self.lock();
        find_root(&families, root).map_or(0, |index| families[index].member_count())
    }

    pub fn family_count(&self) -> usize {
        self.lock().len()
    }

    /// Copy the members of the family rooted at `root` into `buf`.
    pub fn copy_members(&self, root: Pid, buf: &mut [Pid]) -> usize {
        let families = self.lock();
        match find_root(&families, root) {
            Some(index) => families[index].copy_members(buf),
            None => {
                buf.fill(Pid::INVALID);
                0
            }
        }
    }

    /// Copy the files owned by the family rooted at `root` into `buf`.
    pub fn copy_files(&self, root: Pid, buf: &mut [FileId]) -> usize {
        let families = self.lock();
        match find_root(&families, root) {
            Some(index) => families[index].copy_files(buf),
            None => {
                buf.fill(FileId::INVALID);
                0
            }
        }
    }

    pub fn members(&self, root: Pid) -> Vec<Pid> {
        let families = self.lock();
        find_root(&families, root).map_or_else(Vec::new, |index| families[index].members())
    }

    pub fn files(&self, root: Pid) -> Vec<FileId> {
        let families = self.lock();
        find_root(&families, root).map_or_else(Vec::new, |index| families[index].files())
    }

    pub fn snapshot(&self) -> Vec<FamilySummary> {
        self.lock().iter().map(FamilyNode::summary).collect()
    }

    /// Whether [`Self::wait_for_exit`] would currently block for `pid`.
    pub fn exit_would_block(&self, pid: Pid) -> bool {
        pid.is_valid() && is_busy_root(&self.lock(), pid)
    }

    /// Block an exiting process until its family's bookkeeping settles.
    ///
    /// While `pid` is the root of a live family that still has other members,
    /// wait for those members to go, up to `timeout` if one is given. On
    /// timeout nothing is changed. Otherwise `pid` is removed from whatever
    /// family still lists it.
    pub fn wait_for_exit(&self, pid: Pid, timeout: Option<Duration>) -> WaitOutcome {
        if !pid.is_valid() {
            return WaitOutcome::Settled { removed: false };
        }
        let deadline = timeout.map(|timeout| Instant::now() + timeout);
        let mut families = self.lock();
        let mut waited = false;
        while is_busy_root(&families, pid) {
            if !waited {
                log::debug!(
                    "[{pid}] exit requested, waiting for {} remaining members",
                    find_root(&families, pid).map_or(0, |i| families[i].member_count() - 1)
                );
                waited = true;
            }
            families = match deadline {
                None => self
                    .changed
                    .wait(families)
                    .unwrap_or_else(PoisonError::into_inner),
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        log::debug!("[{pid}] exit wait timed out");
                        return WaitOutcome::TimedOut;
                    }
                    self.changed
                        .wait_timeout(families, deadline - now)
                        .unwrap_or_else(PoisonError::into_inner)
                        .0
                }
            };
        }
        let removed = self.remove_member_locked(&mut families, pid);
        if waited {
            log::debug!("[{pid}] exit permitted");
        }
        WaitOutcome::Settled { removed }
    }

    /// Forget every family and wake every waiter.
    pub fn clear(&self) {
        let mut families = self.lock();
        for family in families.iter_mut() {
            family.destroy();
        }
        families.clear();
        self.changed.notify_all();
    }

    fn lock(&self) -> MutexGuard<'_, Vec<FamilyNode>> {
        // Every operation leaves the table consistent before it can panic,
        // so a poisoned lock still guards valid data.
        self.families.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn remove_member_locked(&self, families: &mut Vec<FamilyNode>, pid: Pid) -> bool {
        let Some(index) = find_member(families, pid) else {
            return false;
        };
        families[index].remove_member(pid);
        self.settle(families, index);
        true
    }

    /// Signal a change on the family at `index` and collect it if possible.
    /// Returns whether the slot was freed.
    fn settle(&self, families: &mut Vec<FamilyNode>, index: usize) -> bool {
        self.changed.notify_all();
        if !families[index].is_collectible() {
            return false;
        }
        let mut family = families.swap_remove(index);
        family.destroy();
        log::debug!(
            "family {} exited, {} families left",
            family.root(),
            families.len()
        );
        true
    }
}

impl Default for FamilyRegistry {
    fn default() -> Self {
        Self::new(RegistryLimits::default())
    }
}

fn find_root(families: &[FamilyNode], root: Pid) -> Option<usize> {
    if !root.is_valid() {
        return None;
    }
    families.iter().position(|family| family.root() == root)
}

fn find_member(families: &[FamilyNode], pid: Pid) -> Option<usize> {
    families.iter().position(|family| family.contains_member(pid))
}

fn find_file_owner(families: &[FamilyNode], file_id: FileId) -> Option<usize> {
    families.iter().position(|family| family.contains_file(file_id))
}

/// Exact root match first, then a scan of every member set.
fn find_by_anchor(families: &[FamilyNode], anchor: Pid) -> Option<usize> {
    find_root(families, anchor).or_else(|| find_member(families, anchor))
}

fn is_busy_root(families: &[FamilyNode], pid: Pid) -> bool {
    find_root(families, pid).is_some_and(|index| {
        let family = &families[index];
        family.is_live() && family.member_count() > 1
    })
}

fn log_add(kind: &str, key: impl std::fmt::Display, root: Pid, result: AddResult) {
    match result {
        Ok(()) => log::trace!("[{root}] added {kind} {key}"),
        Err(AddError::AlreadyExists) => {}
        Err(AddError::CapacityExhausted) => {
            log::warn!("[{root}] cannot add {kind} {key}: limit exhausted")
        }
        Err(err) => log::debug!("[{root}] cannot add {kind} {key}: {err}"),
    }
}

#[cfg(test)]
mod tests {
    use std::{collections::HashSet, sync::Arc, thread};

    use super::*;
    use crate::error::AddResultExt;

    const FILE_A: FileId = FileId::from_raw(0xa);
    const FILE_B: FileId = FileId::from_raw(0xb);
    const FILE_X: FileId = FileId::from_raw(0x42);

    fn pid(raw: u32) -> Pid {
        Pid::from_raw(raw)
    }

    fn registry() -> FamilyRegistry {
        FamilyRegistry::default()
    }

    fn create(registry: &FamilyRegistry, root: u32) {
        registry
            .create_family(pid(root), FileId::INVALID, RespawnPolicy::NoRestriction)
            .unwrap();
    }

    /// Every pid is in at most one family and every file has at most one owner.
    fn assert_single_ownership(registry: &FamilyRegistry) {
        let mut pids = HashSet::new();
        let mut files = HashSet::new();
        for family in registry.snapshot() {
            for member in registry.members(family.root) {
                assert!(pids.insert(member), "{member} in two families");
            }
            for file in registry.files(family.root) {
                assert!(files.insert(file), "{file} owned twice");
            }
        }
    }

    #[test]
    fn create_rejects_invalid_and_duplicate_roots() {
        let registry = registry();
        assert_eq!(
            registry.create_family(Pid::INVALID, FileId::INVALID, RespawnPolicy::NoRestriction),
            Err(AddError::InvalidItem)
        );
        create(&registry, 100);
        registry.attach_child(pid(101), pid(100)).unwrap();
        assert_eq!(
            registry.create_family(pid(100), FileId::INVALID, RespawnPolicy::NoRestriction),
            Err(AddError::Forbidden)
        );
        // a member of another family cannot become a root either
        assert_eq!(
            registry.create_family(pid(101), FileId::INVALID, RespawnPolicy::NoRestriction),
            Err(AddError::Forbidden)
        );
        assert_eq!(registry.family_count(), 1);
    }

    #[test]
    fn round_trip() {
        let registry = registry();
        create(&registry, 100);
        registry.attach_child(pid(101), pid(100)).unwrap();
        assert!(registry.remove_member(pid(101)));
        assert!(registry.remove_member(pid(100)));
        assert!(!registry.contains_family(pid(100)));
        assert!(!registry.contains_family(pid(101)));
        assert_eq!(registry.family_count(), 0);
    }

    #[test]
    fn attach_is_idempotent() {
        let registry = registry();
        create(&registry, 100);
        registry.attach_child(pid(101), pid(100)).unwrap();
        assert_eq!(
            registry.attach_child(pid(101), pid(100)),
            Err(AddError::AlreadyExists)
        );
        assert_eq!(registry.attach_child(pid(101), pid(100)).or_existing(), Ok(()));
        assert_eq!(registry.members(pid(100)), vec![pid(100), pid(101)]);
    }

    #[test]
    fn attach_through_grandchild() {
        let registry = registry();
        create(&registry, 100);
        registry.attach_child(pid(101), pid(100)).unwrap();
        registry.attach_child(pid(102), pid(101)).unwrap();
        assert_eq!(registry.process_owner_root(pid(102)), pid(100));
        assert!(registry.is_same_family(pid(100), pid(102)));
        assert_eq!(
            registry.attach_child(pid(103), pid(999)),
            Err(AddError::NoParent)
        );
    }

    #[test]
    fn attach_keeps_pids_in_one_family() {
        let registry = registry();
        create(&registry, 1);
        create(&registry, 2);
        registry.attach_child(pid(10), pid(1)).unwrap();
        assert_eq!(
            registry.attach_child(pid(10), pid(2)),
            Err(AddError::Forbidden)
        );
        assert!(!registry.is_same_family(pid(10), pid(2)));
        assert_single_ownership(&registry);
    }

    #[test]
    fn attach_to_dead_family() {
        let registry = registry();
        create(&registry, 100);
        registry.attach_child(pid(101), pid(100)).unwrap();
        registry.remove_member(pid(100));
        assert_eq!(
            registry.attach_child(pid(102), pid(101)),
            Err(AddError::TreeDead)
        );
        // still present while 101 runs
        assert_eq!(registry.family_count(), 1);
        assert_eq!(registry.process_owner_root(pid(101)), pid(100));
    }

    #[test]
    fn member_capacity_is_reported() {
        let registry = FamilyRegistry::new(RegistryLimits {
            max_families: 4,
            max_members: 2,
            max_files: 2,
        });
        create(&registry, 1);
        registry.attach_child(pid(2), pid(1)).unwrap();
        assert_eq!(
            registry.attach_child(pid(3), pid(1)),
            Err(AddError::CapacityExhausted)
        );
    }

    #[test]
    fn scenario_a_family_capacity() {
        let registry = FamilyRegistry::new(RegistryLimits {
            max_families: 2,
            ..Default::default()
        });
        create(&registry, 1);
        create(&registry, 2);
        assert_eq!(
            registry.create_family(pid(3), FileId::INVALID, RespawnPolicy::NoRestriction),
            Err(AddError::CapacityExhausted)
        );
        // a freed slot can be reused
        registry.remove_member(pid(1));
        create(&registry, 3);
    }

    #[test]
    fn scenario_b_reclaim_after_exit() {
        let registry = registry();
        registry
            .create_family(pid(10), FILE_A, RespawnPolicy::NoRestriction)
            .unwrap();
        registry.claim_file(FILE_A, pid(10)).unwrap();
        registry.remove_member(pid(10));
        assert!(!registry.contains_family(pid(10)));
        assert_eq!(registry.file_owner_root(FILE_A), Pid::INVALID);
        create(&registry, 20);
        registry.claim_file(FILE_A, pid(20)).unwrap();
        assert_eq!(registry.file_owner_root(FILE_A), pid(20));
    }

    #[test]
    fn scenario_b_reclaim_from_retained_family() {
        let registry = registry();
        registry
            .create_family(pid(10), FILE_A, RespawnPolicy::ProtectDroppedFiles)
            .unwrap();
        registry.claim_file(FILE_A, pid(10)).unwrap();
        create(&registry, 20);
        create(&registry, 30);
        registry.remove_member(pid(10));
        // retained for its file
        assert_eq!(registry.family_count(), 3);
        assert_eq!(registry.file_owner_root(FILE_A), pid(10));

        // 30 sits in the last slot and is moved by the collection of 10
        registry.claim_file(FILE_A, pid(30)).unwrap();
        assert_eq!(registry.family_count(), 2);
        assert_eq!(registry.file_owner_root(FILE_A), pid(30));
        assert_eq!(registry.files(pid(30)), vec![FILE_A]);
        assert!(registry.files(pid(20)).is_empty());
        assert_single_ownership(&registry);
    }

    #[test]
    fn scenario_c_forbidden_cross_claim() {
        let registry = registry();
        create(&registry, 10);
        create(&registry, 20);
        registry.claim_file(FILE_X, pid(10)).unwrap();
        assert_eq!(
            registry.claim_file(FILE_X, pid(20)),
            Err(AddError::Forbidden)
        );
        assert!(registry.is_file_owned_by(pid(10), FILE_X));
        assert!(!registry.is_file_owned_by(pid(20), FILE_X));
    }

    #[test]
    fn claim_held_by_dead_family_with_members_is_forbidden() {
        let registry = registry();
        create(&registry, 10);
        registry.attach_child(pid(11), pid(10)).unwrap();
        registry.claim_file(FILE_X, pid(11)).unwrap();
        registry.remove_member(pid(10));
        create(&registry, 20);
        assert_eq!(
            registry.claim_file(FILE_X, pid(20)),
            Err(AddError::Forbidden)
        );
    }

    #[test]
    fn claim_requirements() {
        let registry = registry();
        assert_eq!(
            registry.claim_file(FileId::INVALID, pid(1)),
            Err(AddError::InvalidItem)
        );
        assert_eq!(registry.claim_file(FILE_X, pid(1)), Err(AddError::NoParent));
        create(&registry, 1);
        registry.claim_file(FILE_X, pid(1)).unwrap();
        assert_eq!(
            registry.claim_file(FILE_X, pid(1)),
            Err(AddError::AlreadyExists)
        );
    }

    #[test]
    fn scenario_d_respawn_protection() {
        let registry = registry();
        registry
            .create_family(pid(30), FILE_B, RespawnPolicy::ProtectDroppedFiles)
            .unwrap();
        registry.claim_file(FILE_B, pid(30)).unwrap();
        registry.attach_child(pid(31), pid(30)).unwrap();
        registry.remove_member(pid(31));
        registry.remove_member(pid(30));

        assert!(!registry.contains_family(pid(30)));
        assert_eq!(registry.family_count(), 1);
        assert_eq!(registry.file_owner_root(FILE_B), pid(30));
        // re-executing the artifact hits a dead family
        assert_eq!(
            registry.adopt_by_file_ownership(pid(32), FILE_B),
            Err(AddError::TreeDead)
        );

        assert!(registry.remove_file(FILE_B));
        assert_eq!(registry.family_count(), 0);
    }

    #[test]
    fn adopt_by_file() {
        let registry = registry();
        create(&registry, 10);
        create(&registry, 20);
        registry.claim_file(FILE_X, pid(10)).unwrap();

        registry.adopt_by_file_ownership(pid(50), FILE_X).unwrap();
        assert_eq!(registry.process_owner_root(pid(50)), pid(10));

        registry.attach_child(pid(21), pid(20)).unwrap();
        assert_eq!(
            registry.adopt_by_file_ownership(pid(21), FILE_X),
            Err(AddError::Forbidden)
        );
        assert_eq!(
            registry.adopt_by_file_ownership(pid(51), FILE_A),
            Err(AddError::NoParent)
        );
    }

    #[test]
    fn can_add_file_follows_liveness_and_room() {
        let registry = FamilyRegistry::new(RegistryLimits {
            max_files: 1,
            ..Default::default()
        });
        create(&registry, 1);
        registry.attach_child(pid(2), pid(1)).unwrap();
        assert!(registry.can_add_file(pid(2)));
        registry.claim_file(FILE_A, pid(2)).unwrap();
        assert!(!registry.can_add_file(pid(2)));
        assert_eq!(
            registry.claim_file(FILE_B, pid(2)),
            Err(AddError::CapacityExhausted)
        );
        assert!(!registry.can_add_file(pid(99)));
    }

    #[test]
    fn copy_lists() {
        let registry = registry();
        create(&registry, 5);
        registry.attach_child(pid(7), pid(5)).unwrap();
        registry.attach_child(pid(6), pid(5)).unwrap();
        registry.claim_file(FILE_B, pid(6)).unwrap();
        registry.claim_file(FILE_A, pid(7)).unwrap();

        let mut members = [pid(99); 4];
        assert_eq!(registry.copy_members(pid(5), &mut members), 3);
        assert_eq!(members, [pid(5), pid(6), pid(7), Pid::INVALID]);

        let mut files = [FILE_X; 1];
        assert_eq!(registry.copy_files(pid(5), &mut files), 1);
        assert_eq!(files, [FILE_A]);

        // lookups are by root only
        assert_eq!(registry.copy_members(pid(6), &mut members), 0);
        assert_eq!(members, [Pid::INVALID; 4]);
        assert_eq!(registry.count_members(pid(5)), 3);
    }

    #[test]
    fn queries_on_unknown_keys_return_sentinels() {
        let registry = registry();
        assert!(!registry.contains_family(Pid::INVALID));
        assert!(!registry.is_same_family(pid(1), pid(1)));
        assert_eq!(registry.file_owner_root(FILE_A), Pid::INVALID);
        assert_eq!(registry.process_owner_root(pid(1)), Pid::INVALID);
        assert!(!registry.is_file_owned_by(pid(1), FileId::INVALID));
        assert!(registry.members(pid(1)).is_empty());
        assert!(!registry.remove_member(pid(1)));
        assert!(!registry.remove_file(FILE_A));
    }

    #[test]
    fn presence_follows_membership() {
        let registry = registry();
        for root in [1, 2, 3] {
            create(&registry, root);
            registry.attach_child(pid(root * 10), pid(root)).unwrap();
        }
        registry.remove_member(pid(1));
        registry.remove_member(pid(20));
        registry.remove_member(pid(2));
        registry.remove_member(pid(10));
        let roots: HashSet<_> = registry.snapshot().into_iter().map(|f| f.root).collect();
        assert_eq!(roots, HashSet::from([pid(3)]));
        for family in registry.snapshot() {
            assert!(family.members > 0);
        }
        assert_eq!(registry.process_owner_root(pid(30)), pid(3));
    }

    #[test]
    fn scenario_e_wait_for_exit_is_released_by_removal() {
        let registry = Arc::new(registry());
        create(&registry, 40);
        registry.attach_child(pid(41), pid(40)).unwrap();

        let waiter = {
            let registry = registry.clone();
            thread::spawn(move || registry.wait_for_exit(pid(40), None))
        };
        thread::sleep(Duration::from_millis(50));
        assert!(!waiter.is_finished());
        assert!(registry.contains_family(pid(40)));

        registry.remove_member(pid(41));
        assert_eq!(
            waiter.join().unwrap(),
            WaitOutcome::Settled { removed: true }
        );
        assert!(!registry.contains_family(pid(40)));
        assert_eq!(registry.family_count(), 0);
    }

    #[test]
    fn wait_for_exit_times_out_without_changes() {
        let registry = registry();
        create(&registry, 40);
        registry.attach_child(pid(41), pid(40)).unwrap();
        assert_eq!(
            registry.wait_for_exit(pid(40), Some(Duration::from_millis(20))),
            WaitOutcome::TimedOut
        );
        assert_eq!(registry.members(pid(40)), vec![pid(40), pid(41)]);
    }

    #[test]
    fn wait_for_exit_without_children_returns_at_once() {
        let registry = registry();
        create(&registry, 40);
        registry.attach_child(pid(41), pid(40)).unwrap();
        assert!(registry.exit_would_block(pid(40)));
        assert!(!registry.exit_would_block(pid(41)));
        // a non-root member is removed straight away
        assert_eq!(
            registry.wait_for_exit(pid(41), None),
            WaitOutcome::Settled { removed: true }
        );
        assert!(!registry.exit_would_block(pid(40)));
        assert_eq!(
            registry.wait_for_exit(pid(40), None),
            WaitOutcome::Settled { removed: true }
        );
        assert_eq!(
            registry.wait_for_exit(pid(40), None),
            WaitOutcome::Settled { removed: false }
        );
    }

    #[test]
    fn clear_releases_everything() {
        let registry = registry();
        create(&registry, 1);
        create(&registry, 2);
        registry.clear();
        assert_eq!(registry.family_count(), 0);
        create(&registry, 1);
    }

    #[test]
    fn concurrent_mutations_keep_invariants() {
        let registry = Arc::new(FamilyRegistry::default());
        for root in 1..=4u32 {
            create(&registry, root);
        }
        let workers: Vec<_> = (1..=4u32)
            .map(|root| {
                let registry = registry.clone();
                thread::spawn(move || {
                    for n in 0..50u32 {
                        let child = pid(root * 1000 + n);
                        let file = FileId::from_raw(u64::from(root * 1000 + n));
                        // every worker also tries to grab a shared file
                        let _ = registry.claim_file(FILE_X, pid(root));
                        registry.attach_child(child, pid(root)).unwrap();
                        registry.claim_file(file, child).unwrap();
                        if n % 2 == 0 {
                            registry.remove_member(child);
                        }
                    }
                })
            })
            .collect();
        for worker in workers {
            worker.join().unwrap();
        }
        assert_single_ownership(&registry);
        assert_eq!(registry.family_count(), 4);
        for root in 1..=4u32 {
            assert_eq!(registry.count_members(pid(root)), 26);
        }
    }
}
