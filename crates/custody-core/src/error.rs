use thiserror::Error;

/// Outcome of every mutating registry, family or set operation.
///
/// The most specific code is forwarded unchanged from the set up to the
/// registry, so callers can react to the exact cause.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum AddError {
    #[error("invalid item")]
    InvalidItem,
    #[error("item already exists")]
    AlreadyExists,
    #[error("capacity exhausted")]
    CapacityExhausted,
    #[error("no family contains the parent process")]
    NoParent,
    #[error("operation forbidden by ownership rules")]
    Forbidden,
    #[error("storage could not be allocated")]
    Uninitialized,
    #[error("the family root has exited")]
    TreeDead,
}

pub type AddResult = Result<(), AddError>;

/// Extension for callers that treat a duplicate add as success.
pub trait AddResultExt {
    fn or_existing(self) -> AddResult;
}

impl AddResultExt for AddResult {
    fn or_existing(self) -> AddResult {
        match self {
            Err(AddError::AlreadyExists) => Ok(()),
            r => r,
        }
    }
}
