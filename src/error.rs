//! Error taxonomy shared by every public entry point.

/// The complete set of outcomes a PAFFS operation can report.
///
/// Mirrors `paffs::Result` from the original C++ source one-for-one; the
/// names are the Rust-cased equivalents (`nospace` -> `NoSpace`) and the
/// POSIX errno each maps to is noted where the original API exposed one.
#[derive(Debug, Eq, PartialEq, Clone, Copy, thiserror::Error)]
pub enum PaffsError {
    /// Operation failed for an unspecified reason.
    #[error("operation failed")]
    Fail,
    /// No such file or directory. (ENOENT)
    #[error("no such file or directory")]
    NotFound,
    /// File or directory already exists. (EEXIST)
    #[error("file exists")]
    Exists,
    /// Requested size exceeds what the addressing scheme can cover.
    #[error("file too big")]
    TooBig,
    /// Arguments failed a sanity check before any mutation happened.
    #[error("invalid argument")]
    InvalidInput,
    /// Gracefully unsupported path (e.g. hard/symbolic links).
    #[error("not implemented")]
    Nimpl,
    /// An internal invariant was violated.
    #[error("internal invariant violated")]
    Bug,
    /// A path component's parent does not exist.
    #[error("no such parent directory")]
    NoParent,
    /// No free area and garbage collection could not reclaim one.
    #[error("no space left on device")]
    NoSpace,
    /// An in-RAM cache is exhausted; caller should force a flush and retry.
    #[error("cache exhausted, flush required")]
    LowMem,
    /// Permission denied for the requested access mode. (EACCES)
    #[error("permission denied")]
    NoPerm,
    /// Directory is not empty. (ENOTEMPTY)
    #[error("directory not empty")]
    DirNotEmpty,
    /// An erase failed; the containing area has been retired.
    #[error("bad flash block")]
    BadFlash,
    /// Operation requires a mounted filesystem.
    #[error("filesystem not mounted")]
    NotMounted,
    /// Filesystem is already mounted.
    #[error("filesystem already mounted")]
    AlreadyMounted,
    /// Directory entry name exceeds `maxDirEntryLength`.
    #[error("object name too long")]
    ObjNameTooLong,
    /// Filesystem or file is mounted/opened read-only.
    #[error("filesystem is read-only")]
    ReadOnly,
    /// The driver's ECC corrected a bit error; the read succeeded.
    ///
    /// Propagated as a distinguished success, not a failure: callers must
    /// not fail the user operation on this variant, only log it and
    /// optionally schedule a rewrite of the affected page.
    #[error("bit error corrected by ECC")]
    BiterrorCorrected,
    /// The driver's ECC could not correct a bit error; data is lost.
    #[error("uncorrectable bit error")]
    BiterrorNotCorrected,
    /// `path` is not a directory.
    #[error("not a directory")]
    NotDirectory,
    /// `path` is a directory where a file was expected.
    #[error("is a directory")]
    IsDirectory,
}

/// Convenience alias used throughout the crate.
pub type Result<T> = core::result::Result<T, PaffsError>;
