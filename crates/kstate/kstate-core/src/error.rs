use kstate_shm::{Errno, ShmError};

pub type Result<T> = std::result::Result<T, Error>;

/// Everything that can go wrong in the engine.
///
/// The taxonomy is deliberately small: misuse of a handle is `EINVAL`, a
/// commit that loses (or is forbidden) is `EPERM`, a missing name is
/// `ENOENT`, and anything the OS reports comes through unchanged.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("state name {name:?} is not valid: {reason}")]
    InvalidName { name: String, reason: &'static str },

    #[error("permissions must include read or write")]
    NoPermissions,

    #[error("state is already subscribed")]
    AlreadySubscribed,

    #[error("state is not subscribed")]
    NotSubscribed,

    #[error("transaction is already active")]
    TransactionActive,

    #[error("transaction is not active")]
    TransactionNotActive,

    #[error("cannot start a write transaction on a read-only state")]
    StateNotWritable,

    #[error("cannot commit a read-only transaction")]
    ReadOnlyCommit,

    #[error("state changed while the transaction was open")]
    Conflict,

    #[error(transparent)]
    Shm(#[from] ShmError),
}

impl Error {
    /// The errno this error maps to.
    pub fn errno(&self) -> Errno {
        match self {
            Error::InvalidName { .. }
            | Error::NoPermissions
            | Error::AlreadySubscribed
            | Error::NotSubscribed
            | Error::TransactionActive
            | Error::TransactionNotActive
            | Error::StateNotWritable => Errno::INVAL,
            Error::ReadOnlyCommit | Error::Conflict => Errno::PERM,
            Error::Shm(e) => e.errno(),
        }
    }

    /// The C-binding convention: a negative errno value.
    pub fn code(&self) -> i32 {
        -self.errno().raw_os_error()
    }
}
