use std::io;
use thiserror::Error;

pub type HalResult<T> = Result<T, HalError>;
pub type InstallResult<T> = Result<T, InstallError>;

/// Errors raised by the hardware abstraction layer (external tools, mounts,
/// device probing). These identify the collaborator that failed.
#[derive(Error, Debug)]
pub enum HalError {
    #[error("Safety lock engaged. Arm the operation to proceed.")]
    SafetyLock,

    #[error("Disk is busy (mounted or in use)")]
    DiskBusy,

    #[error("Permission denied")]
    PermissionDenied,

    #[error("Command not found: {0}")]
    CommandNotFound(String),

    #[error("Command failed: {program} (exit={code:?}): {stderr}")]
    CommandFailed {
        program: String,
        code: Option<i32>,
        stderr: String,
    },

    #[error("Command timed out: {program} after {timeout_secs}s")]
    CommandTimeout { program: String, timeout_secs: u64 },

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("nix errno: {0}")]
    Nix(#[from] nix::errno::Errno),

    #[error("UTF-8 decode error: {0}")]
    Utf8(#[from] std::string::FromUtf8Error),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("{0}")]
    Other(String),
}

/// Installer-level errors. The variants match the failure classes the
/// top-level run controller distinguishes: validation failures abort before
/// anything destructive, destructive-step failures trigger cleanup, resume
/// inconsistencies refuse to continue from a stale checkpoint.
#[derive(Error, Debug)]
pub enum InstallError {
    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("No usable block devices found; installation cannot proceed")]
    NoUsableDevices,

    #[error("Pool '{0}' already exists (imported or importable); refusing to continue. Export/destroy it or run `poolstrap restart` after cleaning up.")]
    PoolNameConflict(String),

    #[error("Destructive step '{step}' failed: {source}")]
    DestructiveStep {
        step: String,
        #[source]
        source: HalError,
    },

    #[error("Persisted install state is inconsistent: {0}")]
    ResumeInconsistent(String),

    #[error("Operation interrupted by operator")]
    Interrupted,

    #[error(transparent)]
    Hal(#[from] HalError),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Missing --yes-i-know flag. This operation is destructive!")]
    MissingYesIKnow,
}
