use thiserror::Error;

pub type OcffsResult<T> = Result<T, OcffsError>;

/// Errors raised while setting up or running the mount.
///
/// Setup-time variants (`MissingDatabase`, `NoSyncClient`) are fatal and
/// abort the mount; the rest are returned to the kernel as errno values by
/// the FUSE driver and never terminate the process.
#[derive(Debug, Error)]
pub enum OcffsError {
    #[error("no placeholder database ('._sync_<hex>.db') found under {0}")]
    MissingDatabase(std::path::PathBuf),

    #[error("no process holding {0} open was found (is the sync client running?)")]
    NoSyncClient(std::path::PathBuf),

    #[error("placeholder database error: {0}")]
    Database(String),

    #[error("process introspection error: {0}")]
    Locator(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}
