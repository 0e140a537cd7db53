/// Decision returned to a platform hook that asked whether a watched
/// process may go on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Allow,
    Deny,
}
