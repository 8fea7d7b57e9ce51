// src/error.rs
//
// Unified error handling for staged-image
// Uses thiserror for simple, type-safe error handling
//
// Two layers:
// - ErrorKind: closed taxonomy of image-library load/save failures (plus the
//   local FORMAT_UNACCEPTABLE), mapped from numeric library codes and errno
// - StagedImageError: what callers see, carrying the kind plus the path or
//   the usage signature that was violated

use std::borrow::Cow;
use std::fmt;
use std::io;
use thiserror::Error;

/// Error taxonomy reported by the image library for load and save calls.
///
/// The discriminants are the library's numeric codes. `FormatUnacceptable`
/// is local to this crate and is raised when a load is restricted to a
/// whitelist of formats.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum ErrorKind {
    None = 0,
    FileDoesNotExist = 1,
    FileIsDirectory = 2,
    PermissionDeniedToRead = 3,
    NoLoaderForFileFormat = 4,
    PathTooLong = 5,
    PathComponentNonExistent = 6,
    PathComponentNotDirectory = 7,
    PathPointsOutsideAddressSpace = 8,
    TooManySymbolicLinks = 9,
    OutOfMemory = 10,
    OutOfFileDescriptors = 11,
    PermissionDeniedToWrite = 12,
    OutOfDiskSpace = 13,
    Unknown = 14,
    FormatUnacceptable = 1000,
}

/// Direction of the I/O that failed. EACCES and ENOENT mean different
/// things for a read and for a write.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Access {
    Read,
    Write,
}

impl ErrorKind {
    pub const ALL: [ErrorKind; 16] = [
        ErrorKind::None,
        ErrorKind::FileDoesNotExist,
        ErrorKind::FileIsDirectory,
        ErrorKind::PermissionDeniedToRead,
        ErrorKind::NoLoaderForFileFormat,
        ErrorKind::PathTooLong,
        ErrorKind::PathComponentNonExistent,
        ErrorKind::PathComponentNotDirectory,
        ErrorKind::PathPointsOutsideAddressSpace,
        ErrorKind::TooManySymbolicLinks,
        ErrorKind::OutOfMemory,
        ErrorKind::OutOfFileDescriptors,
        ErrorKind::PermissionDeniedToWrite,
        ErrorKind::OutOfDiskSpace,
        ErrorKind::Unknown,
        ErrorKind::FormatUnacceptable,
    ];

    /// Numeric library code for this kind
    pub fn code(self) -> i32 {
        self as i32
    }

    /// Map a numeric library code. Codes outside the taxonomy are `Unknown`.
    pub fn from_code(code: i32) -> Self {
        Self::ALL
            .iter()
            .copied()
            .find(|kind| kind.code() == code)
            .unwrap_or(ErrorKind::Unknown)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::None => "NONE",
            ErrorKind::FileDoesNotExist => "FILE_DOES_NOT_EXIST",
            ErrorKind::FileIsDirectory => "FILE_IS_DIRECTORY",
            ErrorKind::PermissionDeniedToRead => "PERMISSION_DENIED_TO_READ",
            ErrorKind::NoLoaderForFileFormat => "NO_LOADER_FOR_FILE_FORMAT",
            ErrorKind::PathTooLong => "PATH_TOO_LONG",
            ErrorKind::PathComponentNonExistent => "PATH_COMPONENT_NON_EXISTENT",
            ErrorKind::PathComponentNotDirectory => "PATH_COMPONENT_NOT_DIRECTORY",
            ErrorKind::PathPointsOutsideAddressSpace => "PATH_POINTS_OUTSIDE_ADDRESS_SPACE",
            ErrorKind::TooManySymbolicLinks => "TOO_MANY_SYMBOLIC_LINKS",
            ErrorKind::OutOfMemory => "OUT_OF_MEMORY",
            ErrorKind::OutOfFileDescriptors => "OUT_OF_FILE_DESCRIPTORS",
            ErrorKind::PermissionDeniedToWrite => "PERMISSION_DENIED_TO_WRITE",
            ErrorKind::OutOfDiskSpace => "OUT_OF_DISK_SPACE",
            ErrorKind::Unknown => "UNKNOWN",
            ErrorKind::FormatUnacceptable => "FORMAT_UNACCEPTABLE",
        }
    }

    /// Map an I/O failure onto the taxonomy.
    ///
    /// errno is consulted first because `io::ErrorKind` folds several of the
    /// distinctions the taxonomy makes (ENOTDIR, ELOOP, EFAULT, EMFILE).
    pub fn from_io_error(err: &io::Error, access: Access) -> Self {
        #[cfg(unix)]
        {
            if let Some(kind) = err
                .raw_os_error()
                .and_then(|errno| Self::from_errno(errno, access))
            {
                return kind;
            }
        }

        match err.kind() {
            io::ErrorKind::NotFound => match access {
                Access::Read => ErrorKind::FileDoesNotExist,
                Access::Write => ErrorKind::PathComponentNonExistent,
            },
            io::ErrorKind::PermissionDenied => match access {
                Access::Read => ErrorKind::PermissionDeniedToRead,
                Access::Write => ErrorKind::PermissionDeniedToWrite,
            },
            io::ErrorKind::OutOfMemory => ErrorKind::OutOfMemory,
            io::ErrorKind::UnexpectedEof | io::ErrorKind::InvalidData => {
                ErrorKind::NoLoaderForFileFormat
            }
            _ => ErrorKind::Unknown,
        }
    }

    #[cfg(unix)]
    fn from_errno(errno: i32, access: Access) -> Option<Self> {
        let kind = match errno {
            libc::ENOENT => match access {
                Access::Read => ErrorKind::FileDoesNotExist,
                Access::Write => ErrorKind::PathComponentNonExistent,
            },
            libc::EACCES | libc::EPERM => match access {
                Access::Read => ErrorKind::PermissionDeniedToRead,
                Access::Write => ErrorKind::PermissionDeniedToWrite,
            },
            libc::EROFS => ErrorKind::PermissionDeniedToWrite,
            libc::EISDIR => ErrorKind::FileIsDirectory,
            libc::ENAMETOOLONG => ErrorKind::PathTooLong,
            libc::ENOTDIR => ErrorKind::PathComponentNotDirectory,
            libc::EFAULT => ErrorKind::PathPointsOutsideAddressSpace,
            libc::ELOOP => ErrorKind::TooManySymbolicLinks,
            libc::ENOMEM => ErrorKind::OutOfMemory,
            libc::EMFILE | libc::ENFILE => ErrorKind::OutOfFileDescriptors,
            libc::ENOSPC | libc::EDQUOT => ErrorKind::OutOfDiskSpace,
            _ => return None,
        };
        Some(kind)
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which crop axis an alignment must describe.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CropAxis {
    Horizontal,
    Vertical,
}

impl fmt::Display for CropAxis {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CropAxis::Horizontal => f.write_str("horizontal"),
            CropAxis::Vertical => f.write_str("vertical"),
        }
    }
}

/// Coarse grouping used to decide whether a caller can act on an error.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Invalid input, recoverable by user
    UserError,
    /// Format/encoding issues
    CodecError,
    /// Memory/disk/descriptor limits
    ResourceLimit,
    /// Lock or worker failures (should not happen)
    InternalBug,
}

impl ErrorCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCategory::UserError => "UserError",
            ErrorCategory::CodecError => "CodecError",
            ErrorCategory::ResourceLimit => "ResourceLimit",
            ErrorCategory::InternalBug => "InternalBug",
        }
    }
}

/// staged-image error types
#[derive(Clone, Debug, Error, PartialEq)]
pub enum StagedImageError {
    #[error("Failed to load '{path}': {kind}")]
    Load {
        path: Cow<'static, str>,
        kind: ErrorKind,
    },

    #[error("Failed to save '{path}': {kind}")]
    Save {
        path: Cow<'static, str>,
        kind: ErrorKind,
    },

    /// A mutator was called with arguments outside its signature
    #[error("Invalid arguments. Expected {signature}")]
    Usage { signature: Cow<'static, str> },

    #[error("Crop needs a {required} alignment for this image (pass CropAlign::None to keep offset 0)")]
    AlignmentMismatch { required: CropAxis },

    #[error("Failed to acquire image lock: {message}")]
    LockAcquire { message: Cow<'static, str> },

    #[error("Failed to release image lock: {message}")]
    LockRelease { message: Cow<'static, str> },

    #[error("Task executor unavailable: {message}")]
    Executor { message: Cow<'static, str> },
}

// Constructor Helpers
impl StagedImageError {
    pub fn load(path: impl Into<Cow<'static, str>>, kind: ErrorKind) -> Self {
        Self::Load {
            path: path.into(),
            kind,
        }
    }

    pub fn save(path: impl Into<Cow<'static, str>>, kind: ErrorKind) -> Self {
        Self::Save {
            path: path.into(),
            kind,
        }
    }

    pub fn usage(signature: impl Into<Cow<'static, str>>) -> Self {
        Self::Usage {
            signature: signature.into(),
        }
    }

    pub fn alignment_mismatch(required: CropAxis) -> Self {
        Self::AlignmentMismatch { required }
    }

    pub fn lock_acquire(message: impl Into<Cow<'static, str>>) -> Self {
        Self::LockAcquire {
            message: message.into(),
        }
    }

    pub fn lock_release(message: impl Into<Cow<'static, str>>) -> Self {
        Self::LockRelease {
            message: message.into(),
        }
    }

    pub fn executor(message: impl Into<Cow<'static, str>>) -> Self {
        Self::Executor {
            message: message.into(),
        }
    }

    /// Library error kind, for load and save failures
    pub fn kind(&self) -> Option<ErrorKind> {
        match self {
            Self::Load { kind, .. } | Self::Save { kind, .. } => Some(*kind),
            _ => None,
        }
    }

    /// True for failures of the exclusivity lock or the worker holding it
    pub fn is_system(&self) -> bool {
        matches!(
            self,
            Self::LockAcquire { .. } | Self::LockRelease { .. } | Self::Executor { .. }
        )
    }

    /// Check if this error is recoverable (user can fix it)
    pub fn is_recoverable(&self) -> bool {
        match self.category() {
            ErrorCategory::UserError | ErrorCategory::ResourceLimit => true,
            ErrorCategory::CodecError | ErrorCategory::InternalBug => false,
        }
    }

    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::Usage { .. } | Self::AlignmentMismatch { .. } => ErrorCategory::UserError,
            Self::Load { kind, .. } | Self::Save { kind, .. } => match kind {
                ErrorKind::NoLoaderForFileFormat | ErrorKind::FormatUnacceptable => {
                    ErrorCategory::CodecError
                }
                ErrorKind::OutOfMemory
                | ErrorKind::OutOfFileDescriptors
                | ErrorKind::OutOfDiskSpace => ErrorCategory::ResourceLimit,
                ErrorKind::None | ErrorKind::Unknown => ErrorCategory::InternalBug,
                _ => ErrorCategory::UserError,
            },
            Self::LockAcquire { .. } | Self::LockRelease { .. } | Self::Executor { .. } => {
                ErrorCategory::InternalBug
            }
        }
    }
}

// Result type alias
pub type Result<T> = std::result::Result<T, StagedImageError>;
