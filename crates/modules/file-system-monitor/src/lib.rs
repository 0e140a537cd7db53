//! Filesystem collaborator.
//!
//! Watched processes may only write to, or delete, files their own family
//! created. Every new file a watched process creates is claimed by its family.

use std::{fmt, fs, io, os::unix::fs::MetadataExt, path::Path, sync::Arc};

use custody_core::{AddError, ConfigError, FamilyRegistry, FileId, ModuleConfig, Pid};

pub use custody_core::Verdict;
use nix::fcntl::OFlag;

pub const MODULE_NAME: &str = "file-system-monitor";

/// Desired access of an open request.
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct AccessMask(u32);

impl AccessMask {
    pub const READ_DATA: AccessMask = AccessMask(0x0001);
    pub const WRITE_DATA: AccessMask = AccessMask(0x0002);
    pub const APPEND_DATA: AccessMask = AccessMask(0x0004);
    pub const WRITE_EA: AccessMask = AccessMask(0x0010);
    pub const WRITE_ATTRIBUTES: AccessMask = AccessMask(0x0100);
    pub const DELETE: AccessMask = AccessMask(0x0001_0000);

    /// Anything that modifies the file content or its metadata.
    pub const ALL_WRITE: AccessMask = AccessMask(
        Self::WRITE_DATA.0 | Self::APPEND_DATA.0 | Self::WRITE_EA.0 | Self::WRITE_ATTRIBUTES.0,
    );

    const NAMES: [(&'static str, AccessMask); 6] = [
        ("READ_DATA", Self::READ_DATA),
        ("WRITE_DATA", Self::WRITE_DATA),
        ("APPEND_DATA", Self::APPEND_DATA),
        ("WRITE_EA", Self::WRITE_EA),
        ("WRITE_ATTRIBUTES", Self::WRITE_ATTRIBUTES),
        ("DELETE", Self::DELETE),
    ];

    pub const fn from_raw(mask: u32) -> Self {
        Self(mask)
    }

    pub const fn as_raw(self) -> u32 {
        self.0
    }

    /// Translate `open(2)` flags.
    pub fn from_open_flags(flags: OFlag) -> Self {
        let mut mask = match flags & OFlag::O_ACCMODE {
            mode if mode == OFlag::O_WRONLY => Self::WRITE_DATA,
            mode if mode == OFlag::O_RDWR => Self::READ_DATA | Self::WRITE_DATA,
            _ => Self::READ_DATA,
        };
        if flags.contains(OFlag::O_APPEND) {
            mask = mask | Self::APPEND_DATA;
        }
        if flags.contains(OFlag::O_TRUNC) {
            mask = mask | Self::WRITE_DATA;
        }
        mask
    }

    pub fn contains(self, other: AccessMask) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn intersects(self, other: AccessMask) -> bool {
        self.0 & other.0 != 0
    }

    pub fn is_write(self) -> bool {
        self.intersects(Self::ALL_WRITE)
    }
}

impl std::ops::BitOr for AccessMask {
    type Output = AccessMask;

    fn bitor(self, rhs: Self) -> Self::Output {
        AccessMask(self.0 | rhs.0)
    }
}

impl fmt::Display for AccessMask {
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

impl fmt::Debug for AccessMask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}: {}", self.0, self)
    }
}

/// An open request from a process.
#[derive(Debug, Clone, Copy)]
pub struct FileOpen {
    pub pid: Pid,
    /// `None` when the file could not be identified.
    pub file_id: Option<FileId>,
    /// The open creates the file, or replaces an empty one.
    pub is_new_file: bool,
    pub is_directory: bool,
    pub access: AccessMask,
}

#[derive(Debug, Clone)]
pub struct Config {
    /// Forget ownership of a file once its owner deletes it.
    pub release_on_delete: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            release_on_delete: true,
        }
    }
}

impl TryFrom<&ModuleConfig> for Config {
    type Error = ConfigError;

    fn try_from(config: &ModuleConfig) -> Result<Self, Self::Error> {
        Ok(Config {
            release_on_delete: config.with_default("release_on_delete", true)?,
        })
    }
}

/// Maps a path to the identifier the registry stores.
pub trait FileIdResolver: Send + Sync {
    fn resolve(&self, path: &Path) -> io::Result<FileId>;
}

/// Uses the inode number, stable for the lifetime of the file.
#[derive(Debug, Default, Clone, Copy)]
pub struct InodeResolver;

impl FileIdResolver for InodeResolver {
    fn resolve(&self, path: &Path) -> io::Result<FileId> {
        Ok(FileId::from_raw(fs::metadata(path)?.ino()))
    }
}

/// Decides on open and delete requests of watched processes.
pub struct FileGuard {
    registry: Arc<FamilyRegistry>,
    resolver: Arc<dyn FileIdResolver>,
    config: Config,
}

impl FileGuard {
    pub fn new(
        registry: Arc<FamilyRegistry>,
        resolver: Arc<dyn FileIdResolver>,
        config: Config,
    ) -> Self {
        Self {
            registry,
            resolver,
            config,
        }
    }

    pub fn on_open(&self, request: FileOpen) -> Verdict {
        let FileOpen {
            pid,
            file_id,
            is_new_file,
            is_directory,
            access,
        } = request;
        if is_directory || !self.registry.contains_family(pid) {
            return Verdict::Allow;
        }
        let Some(file_id) = file_id.filter(|id| id.is_valid()) else {
            if is_new_file || access.is_write() {
                log::info!("[{pid}] cannot identify file opened for {access}, denied");
                return Verdict::Deny;
            }
            return Verdict::Allow;
        };
        if is_new_file {
            return match self.registry.claim_file(file_id, pid) {
                Err(
                    err @ (AddError::CapacityExhausted | AddError::Forbidden | AddError::TreeDead),
                ) => {
                    log::info!("[{pid}] cannot own new file {file_id}: {err}, denied");
                    Verdict::Deny
                }
                _ => {
                    log::debug!("[{pid}] created file {file_id}");
                    Verdict::Allow
                }
            };
        }
        if !access.is_write() {
            return Verdict::Allow;
        }
        if self.registry.is_file_owned_by(pid, file_id) {
            log::debug!("[{pid}] writing owned file {file_id}");
            Verdict::Allow
        } else {
            log::info!("[{pid}] {access} on foreign file {file_id}, denied");
            Verdict::Deny
        }
    }

    /// Decide on a delete request. Ownership is kept until the feed reports
    /// the deletion through [`Self::on_deleted`], so a delete that later
    /// fails leaves the family able to write its file.
    pub fn on_delete(&self, pid: Pid, file_id: Option<FileId>) -> Verdict {
        if !self.registry.contains_family(pid) {
            return Verdict::Allow;
        }
        let Some(file_id) = file_id.filter(|id| self.registry.is_file_owned_by(pid, *id)) else {
            log::info!(
                "[{pid}] deleting foreign file {}, denied",
                file_id.unwrap_or(FileId::INVALID)
            );
            return Verdict::Deny;
        };
        log::debug!("[{pid}] deleting owned file {file_id}");
        Verdict::Allow
    }

    /// A delete completed. Releases the file when configured to, returning
    /// whether a family owned it.
    pub fn on_deleted(&self, file_id: FileId) -> bool {
        if !self.config.release_on_delete || !self.registry.remove_file(file_id) {
            return false;
        }
        log::debug!("released deleted file {file_id}");
        true
    }

    /// [`Self::on_open`] for a path, resolving its identifier first.
    pub fn on_open_path(
        &self,
        pid: Pid,
        path: &Path,
        is_new_file: bool,
        flags: OFlag,
    ) -> Verdict {
        let file_id = self.resolve(path);
        self.on_open(FileOpen {
            pid,
            file_id,
            is_new_file,
            is_directory: flags.contains(OFlag::O_DIRECTORY) || path.is_dir(),
            access: AccessMask::from_open_flags(flags),
        })
    }

    /// [`Self::on_delete`] for a path, resolving its identifier first.
    pub fn on_delete_path(&self, pid: Pid, path: &Path) -> Verdict {
        let file_id = self.resolve(path);
        self.on_delete(pid, file_id)
    }

    fn resolve(&self, path: &Path) -> Option<FileId> {
        match self.resolver.resolve(path) {
            Ok(file_id) => Some(file_id),
            Err(err) => {
                log::debug!("cannot identify {}: {err}", path.display());
                None
            }
        }
    }
}
