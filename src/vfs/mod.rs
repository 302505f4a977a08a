//! The filesystem capability the embedder supplies.
//!
//! This is the blocking analog of the `virtual-fs` seam the WASI layers
//! build on, narrowed to exactly what the Go guest's `jsfs` calls need. All
//! paths handed to a `FileSystem` are absolute and POSIX-normalized (the
//! bridge resolves them against the guest's working directory first); a
//! trailing slash is preserved and signals directory intent.

mod mem;
#[cfg(unix)]
mod host;

pub use mem::MemFs;
#[cfg(unix)]
pub use host::HostFs;

use std::fmt;

use thiserror::Error;

pub type FsResult<T> = Result<T, FsError>;

/// The error kinds a filesystem (or HTTP transport) may surface to the
/// guest. Each maps onto the errno string the guest's `syscall/js` package
/// decodes from an error value's `code` property.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum FsError {
    #[error("permission denied")]
    PermissionDenied,
    #[error("resource temporarily unavailable")]
    WouldBlock,
    #[error("bad file descriptor")]
    BadFileDescriptor,
    #[error("file exists")]
    AlreadyExists,
    #[error("bad address")]
    BadAddress,
    #[error("interrupted system call")]
    Interrupted,
    #[error("invalid argument")]
    InvalidArgument,
    #[error("input/output error")]
    Io,
    #[error("is a directory")]
    IsADirectory,
    #[error("too many levels of symbolic links")]
    SymlinkLoop,
    #[error("file name too long")]
    NameTooLong,
    #[error("no such file or directory")]
    NotFound,
    #[error("function not implemented")]
    NotSupported,
    #[error("not a directory")]
    NotADirectory,
    #[error("directory not empty")]
    NotEmpty,
    #[error("operation not supported")]
    NotSupportedOp,
    #[error("operation not permitted")]
    NotPermitted,
    #[error("read-only file system")]
    ReadOnlyFilesystem,
}

impl FsError {
    /// The errno string the guest reads from the error value.
    pub fn code(self) -> &'static str {
        match self {
            FsError::PermissionDenied => "EACCES",
            FsError::WouldBlock => "EAGAIN",
            FsError::BadFileDescriptor => "EBADF",
            FsError::AlreadyExists => "EEXIST",
            FsError::BadAddress => "EFAULT",
            FsError::Interrupted => "EINTR",
            FsError::InvalidArgument => "EINVAL",
            FsError::Io => "EIO",
            FsError::IsADirectory => "EISDIR",
            FsError::SymlinkLoop => "ELOOP",
            FsError::NameTooLong => "ENAMETOOLONG",
            FsError::NotFound => "ENOENT",
            FsError::NotSupported => "ENOSYS",
            FsError::NotADirectory => "ENOTDIR",
            FsError::NotEmpty => "ENOTEMPTY",
            FsError::NotSupportedOp => "ENOTSUP",
            FsError::NotPermitted => "EPERM",
            FsError::ReadOnlyFilesystem => "EROFS",
        }
    }
}

impl From<std::io::Error> for FsError {
    fn from(err: std::io::Error) -> Self {
        #[cfg(unix)]
        if let Some(errno) = err.raw_os_error() {
            match errno {
                libc::EACCES => return FsError::PermissionDenied,
                libc::EAGAIN => return FsError::WouldBlock,
                libc::EBADF => return FsError::BadFileDescriptor,
                libc::EEXIST => return FsError::AlreadyExists,
                libc::EFAULT => return FsError::BadAddress,
                libc::EINTR => return FsError::Interrupted,
                libc::EINVAL => return FsError::InvalidArgument,
                libc::EISDIR => return FsError::IsADirectory,
                libc::ELOOP => return FsError::SymlinkLoop,
                libc::ENAMETOOLONG => return FsError::NameTooLong,
                libc::ENOENT => return FsError::NotFound,
                libc::ENOSYS => return FsError::NotSupported,
                libc::ENOTDIR => return FsError::NotADirectory,
                libc::ENOTEMPTY => return FsError::NotEmpty,
                libc::EOPNOTSUPP => return FsError::NotSupportedOp,
                libc::EPERM => return FsError::NotPermitted,
                libc::EROFS => return FsError::ReadOnlyFilesystem,
                _ => {}
            }
        }
        match err.kind() {
            std::io::ErrorKind::NotFound => FsError::NotFound,
            std::io::ErrorKind::PermissionDenied => FsError::PermissionDenied,
            std::io::ErrorKind::AlreadyExists => FsError::AlreadyExists,
            std::io::ErrorKind::InvalidInput => FsError::InvalidArgument,
            std::io::ErrorKind::Interrupted => FsError::Interrupted,
            std::io::ErrorKind::WouldBlock => FsError::WouldBlock,
            _ => FsError::Io,
        }
    }
}

/// What a file is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileKind {
    Regular,
    Directory,
    Symlink,
    CharDevice,
    BlockDevice,
    Fifo,
    Socket,
}

/// A platform-neutral file mode: kind, permission bits, special bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileMode {
    pub kind: FileKind,
    /// Permission bits, `0o000..=0o777`.
    pub perm: u32,
    pub setuid: bool,
    pub setgid: bool,
    pub sticky: bool,
}

impl FileMode {
    pub fn regular(perm: u32) -> Self {
        Self {
            kind: FileKind::Regular,
            perm: perm & 0o777,
            setuid: false,
            setgid: false,
            sticky: false,
        }
    }

    pub fn directory(perm: u32) -> Self {
        Self {
            kind: FileKind::Directory,
            ..Self::regular(perm)
        }
    }

    pub fn symlink() -> Self {
        Self {
            kind: FileKind::Symlink,
            ..Self::regular(0o777)
        }
    }
}

/// The stat record a filesystem reports. Timestamps are nanoseconds since
/// the Unix epoch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Metadata {
    pub mode: FileMode,
    pub dev: u64,
    pub ino: u64,
    pub nlink: u64,
    pub uid: u32,
    pub gid: u32,
    pub rdev: u64,
    pub size: u64,
    pub blksize: u64,
    pub blocks: u64,
    pub atime_ns: i64,
    pub mtime_ns: i64,
    pub ctime_ns: i64,
}

impl Metadata {
    pub fn is_dir(&self) -> bool {
        self.mode.kind == FileKind::Directory
    }
}

/// Decoded open disposition. The bridge translates the guest's numeric
/// `fs.constants` flags into this before calling the filesystem.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OpenFlags {
    pub read: bool,
    pub write: bool,
    pub append: bool,
    pub create: bool,
    /// `O_EXCL`: creation must not find an existing file.
    pub create_new: bool,
    pub truncate: bool,
}

/// The filesystem capability set the bridge consumes.
///
/// `link(existing, new_path)` and `symlink(target, link_path)` follow the
/// argument order of the guest's calls; a symlink target is stored verbatim.
pub trait FileSystem: fmt::Debug + Send + Sync + 'static {
    fn open(&self, path: &str, flags: OpenFlags, mode: u32) -> FsResult<Box<dyn OpenFile>>;
    fn stat(&self, path: &str) -> FsResult<Metadata>;
    fn lstat(&self, path: &str) -> FsResult<Metadata>;
    fn readdirnames(&self, path: &str) -> FsResult<Vec<String>>;
    fn mkdir(&self, path: &str, mode: u32) -> FsResult<()>;
    fn rmdir(&self, path: &str) -> FsResult<()>;
    fn rename(&self, from: &str, to: &str) -> FsResult<()>;
    fn unlink(&self, path: &str) -> FsResult<()>;
    fn utimens(&self, path: &str, atime_ns: i64, mtime_ns: i64) -> FsResult<()>;
    fn chmod(&self, path: &str, mode: u32) -> FsResult<()>;
    fn chown(&self, path: &str, uid: u32, gid: u32) -> FsResult<()>;
    fn lchown(&self, path: &str, uid: u32, gid: u32) -> FsResult<()>;
    fn truncate(&self, path: &str, size: u64) -> FsResult<()>;
    fn readlink(&self, path: &str) -> FsResult<String>;
    fn link(&self, existing: &str, new_path: &str) -> FsResult<()>;
    fn symlink(&self, target: &str, link_path: &str) -> FsResult<()>;
}

/// An open file handle. Streaming reads and writes maintain their own
/// cursor; `*_at` variants leave it untouched.
pub trait OpenFile: fmt::Debug + Send {
    fn metadata(&self) -> FsResult<Metadata>;
    fn read(&mut self, buf: &mut [u8]) -> FsResult<usize>;
    fn read_at(&mut self, buf: &mut [u8], offset: u64) -> FsResult<usize>;
    fn write(&mut self, buf: &[u8]) -> FsResult<usize>;
    fn write_at(&mut self, buf: &[u8], offset: u64) -> FsResult<usize>;
    fn truncate(&mut self, size: u64) -> FsResult<()>;
    fn chmod(&mut self, mode: u32) -> FsResult<()>;
    fn chown(&mut self, uid: u32, gid: u32) -> FsResult<()>;
    fn sync(&mut self) -> FsResult<()>;
}
