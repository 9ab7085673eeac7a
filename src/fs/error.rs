use libc::c_int;

use crate::state::StateError;

/// Error kinds of the filesystem core. The fuser dispatch layer is the only
/// place these are turned into errno values, and logs each once there.
#[derive(thiserror::Error, Debug)]
pub enum FsError {
    #[error("no such entry")]
    NotFound,

    #[error("entry depends on state that is not set")]
    PresenceAbsent,

    #[error("conversation already created; control file is read-only")]
    WriteAfterCommit,

    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("operation not supported on this entry")]
    Unsupported,

    #[error("backend failure: {0}")]
    Backend(#[source] anyhow::Error),

    #[error("parse failure: {0}")]
    Parse(#[source] serde_json::Error),

    #[error("request cancelled")]
    Cancelled,

    #[error("state store: {0}")]
    State(#[source] StateError),
}

impl FsError {
    pub fn backend(err: anyhow::Error) -> Self {
        FsError::Backend(err)
    }

    pub fn errno(&self) -> c_int {
        match self {
            FsError::NotFound | FsError::PresenceAbsent => libc::ENOENT,
            FsError::WriteAfterCommit => libc::EROFS,
            FsError::BadRequest(_) => libc::EINVAL,
            FsError::Unsupported => libc::EPERM,
            FsError::Backend(_) | FsError::Parse(_) => libc::EIO,
            FsError::Cancelled => libc::EINTR,
            FsError::State(inner) => match inner {
                StateError::NotFound(_) => libc::ENOENT,
                StateError::ReadOnly(_, _) => libc::EROFS,
                StateError::UnknownKey(_) => libc::EINVAL,
                StateError::RemoteIdMismatch { .. }
                | StateError::Io(_)
                | StateError::Serde(_) => libc::EIO,
            },
        }
    }

    /// Whether the translation boundary should log this at warn level.
    /// Plain lookup misses are normal traffic and stay at debug.
    pub fn is_noteworthy(&self) -> bool {
        !matches!(self, FsError::NotFound | FsError::PresenceAbsent)
    }
}

impl From<StateError> for FsError {
    fn from(err: StateError) -> Self {
        FsError::State(err)
    }
}

impl From<serde_json::Error> for FsError {
    fn from(err: serde_json::Error) -> Self {
        FsError::Parse(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn errno_table() {
        assert_eq!(FsError::NotFound.errno(), libc::ENOENT);
        assert_eq!(FsError::PresenceAbsent.errno(), libc::ENOENT);
        assert_eq!(FsError::WriteAfterCommit.errno(), libc::EROFS);
        assert_eq!(FsError::BadRequest("x".into()).errno(), libc::EINVAL);
        assert_eq!(FsError::Unsupported.errno(), libc::EPERM);
        assert_eq!(
            FsError::Backend(anyhow::anyhow!("down")).errno(),
            libc::EIO
        );
        assert_eq!(FsError::Cancelled.errno(), libc::EINTR);
    }

    #[test]
    fn state_errors_map_through() {
        assert_eq!(
            FsError::from(StateError::NotFound("x".into())).errno(),
            libc::ENOENT
        );
        assert_eq!(
            FsError::from(StateError::ReadOnly("x".into(), "ctl")).errno(),
            libc::EROFS
        );
        assert_eq!(
            FsError::from(StateError::UnknownKey("shape".into())).errno(),
            libc::EINVAL
        );
    }
}
