//! Keys stored by the registry.
//!
//! Both key types reserve one value as an "invalid" sentinel, which the
//! registry rejects on mutation and returns from queries meaning "not found".

use std::{fmt, num::ParseIntError, str::FromStr};

use serde::{Deserialize, Serialize};

/// Process identifier. `0` is never a valid tracked process.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Pid(u32);

impl Pid {
    pub const INVALID: Pid = Pid(0);

    pub const fn from_raw(pid: u32) -> Self {
        Self(pid)
    }

    pub const fn as_raw(self) -> u32 {
        self.0
    }

    pub const fn is_valid(self) -> bool {
        self.0 != Self::INVALID.0
    }

    /// Returns the value as understood by `nix`, for signalling.
    ///
    /// `None` for the invalid pid and for values outside the positive
    /// `pid_t` range, which `kill(2)` would read as a process group or as
    /// "every process".
    pub fn to_nix(self) -> Option<nix::unistd::Pid> {
        i32::try_from(self.0)
            .ok()
            .filter(|raw| *raw > 0)
            .map(nix::unistd::Pid::from_raw)
    }
}

impl fmt::Display for Pid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for Pid {
    type Err = ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim().parse().map(Self)
    }
}

impl From<u32> for Pid {
    fn from(pid: u32) -> Self {
        Self(pid)
    }
}

/// Opaque file identifier, stable for the lifetime of the file.
///
/// The all-ones value is reserved as the invalid sentinel.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FileId(u64);

impl FileId {
    pub const INVALID: FileId = FileId(u64::MAX);

    pub const fn from_raw(id: u64) -> Self {
        Self(id)
    }

    pub const fn as_raw(self) -> u64 {
        self.0
    }

    pub const fn is_valid(self) -> bool {
        self.0 != Self::INVALID.0
    }
}

// Zero-filled copy buffers use the invalid sentinel so a caller can never
// confuse padding with a real file.
impl Default for FileId {
    fn default() -> Self {
        Self::INVALID
    }
}

impl fmt::Display for FileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_valid() {
            write!(f, "{:#x}", self.0)
        } else {
            write!(f, "invalid")
        }
    }
}

/// Accepts decimal or `0x`-prefixed hexadecimal.
impl FromStr for FileId {
    type Err = ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
            Some(hex) => u64::from_str_radix(hex, 16).map(Self),
            None => s.parse().map(Self),
        }
    }
}

impl From<u64> for FileId {
    fn from(id: u64) -> Self {
        Self(id)
    }
}
