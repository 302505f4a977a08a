//! Host-passthrough filesystem rooted at an embedder-chosen directory.
//!
//! Guest-absolute paths are joined under the root; `..` cannot escape it
//! because the bridge normalizes paths before they get here.

use std::fs;
use std::io::{Read, Seek, SeekFrom, Write};
use std::os::unix::ffi::OsStrExt;
use std::os::unix::fs::{FileExt, MetadataExt, OpenOptionsExt, PermissionsExt};
use std::path::{Path, PathBuf};

use super::{
    FileKind, FileMode, FileSystem, FsError, FsResult, Metadata, OpenFile, OpenFlags,
};

/// A [`FileSystem`] over the host's `std::fs`, sandboxed under `root`.
#[derive(Debug)]
pub struct HostFs {
    root: PathBuf,
}

impl HostFs {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn host_path(&self, path: &str) -> PathBuf {
        self.root.join(path.trim_start_matches('/'))
    }
}

fn kind_of(meta: &fs::Metadata) -> FileKind {
    let ft = meta.file_type();
    if ft.is_dir() {
        FileKind::Directory
    } else if ft.is_symlink() {
        FileKind::Symlink
    } else if ft.is_file() {
        FileKind::Regular
    } else {
        use std::os::unix::fs::FileTypeExt;
        if ft.is_char_device() {
            FileKind::CharDevice
        } else if ft.is_block_device() {
            FileKind::BlockDevice
        } else if ft.is_fifo() {
            FileKind::Fifo
        } else if ft.is_socket() {
            FileKind::Socket
        } else {
            FileKind::Regular
        }
    }
}

fn metadata_of(meta: &fs::Metadata) -> Metadata {
    let raw_mode = meta.mode();
    Metadata {
        mode: FileMode {
            kind: kind_of(meta),
            perm: raw_mode & 0o777,
            setuid: raw_mode & 0o4000 != 0,
            setgid: raw_mode & 0o2000 != 0,
            sticky: raw_mode & 0o1000 != 0,
        },
        dev: meta.dev(),
        ino: meta.ino(),
        nlink: meta.nlink(),
        uid: meta.uid(),
        gid: meta.gid(),
        rdev: meta.rdev(),
        size: meta.size(),
        blksize: meta.blksize(),
        blocks: meta.blocks(),
        atime_ns: meta.atime() * 1_000_000_000 + meta.atime_nsec(),
        mtime_ns: meta.mtime() * 1_000_000_000 + meta.mtime_nsec(),
        ctime_ns: meta.ctime() * 1_000_000_000 + meta.ctime_nsec(),
    }
}

fn set_file_times(path: &Path, atime_ns: i64, mtime_ns: i64) -> FsResult<()> {
    let to_timespec = |ns: i64| libc::timespec {
        tv_sec: ns.div_euclid(1_000_000_000),
        tv_nsec: ns.rem_euclid(1_000_000_000),
    };
    let times = [to_timespec(atime_ns), to_timespec(mtime_ns)];
    let cpath = std::ffi::CString::new(path.as_os_str().as_bytes())
        .map_err(|_| FsError::InvalidArgument)?;
    // SAFETY: both pointers reference live, correctly-sized buffers.
    let rc = unsafe {
        libc::utimensat(libc::AT_FDCWD, cpath.as_ptr(), times.as_ptr(), 0)
    };
    if rc == 0 {
        Ok(())
    } else {
        Err(std::io::Error::last_os_error().into())
    }
}

impl FileSystem for HostFs {
    fn open(&self, path: &str, flags: OpenFlags, mode: u32) -> FsResult<Box<dyn OpenFile>> {
        let mut options = fs::OpenOptions::new();
        options
            .read(flags.read || !flags.write)
            .write(flags.write)
            .append(flags.append)
            .create(flags.create)
            .create_new(flags.create_new)
            .truncate(flags.truncate)
            .mode(mode);
        let file = options.open(self.host_path(path))?;
        Ok(Box::new(HostFile { file }))
    }

    fn stat(&self, path: &str) -> FsResult<Metadata> {
        Ok(metadata_of(&fs::metadata(self.host_path(path))?))
    }

    fn lstat(&self, path: &str) -> FsResult<Metadata> {
        Ok(metadata_of(&fs::symlink_metadata(self.host_path(path))?))
    }

    fn readdirnames(&self, path: &str) -> FsResult<Vec<String>> {
        let mut names = Vec::new();
        for entry in fs::read_dir(self.host_path(path))? {
            names.push(entry?.file_name().to_string_lossy().into_owned());
        }
        Ok(names)
    }

    fn mkdir(&self, path: &str, mode: u32) -> FsResult<()> {
        let host = self.host_path(path);
        fs::create_dir(&host)?;
        fs::set_permissions(&host, fs::Permissions::from_mode(mode))?;
        Ok(())
    }

    fn rmdir(&self, path: &str) -> FsResult<()> {
        Ok(fs::remove_dir(self.host_path(path))?)
    }

    fn rename(&self, from: &str, to: &str) -> FsResult<()> {
        Ok(fs::rename(self.host_path(from), self.host_path(to))?)
    }

    fn unlink(&self, path: &str) -> FsResult<()> {
        Ok(fs::remove_file(self.host_path(path))?)
    }

    fn utimens(&self, path: &str, atime_ns: i64, mtime_ns: i64) -> FsResult<()> {
        set_file_times(&self.host_path(path), atime_ns, mtime_ns)
    }

    fn chmod(&self, path: &str, mode: u32) -> FsResult<()> {
        Ok(fs::set_permissions(
            self.host_path(path),
            fs::Permissions::from_mode(mode),
        )?)
    }

    fn chown(&self, path: &str, uid: u32, gid: u32) -> FsResult<()> {
        Ok(std::os::unix::fs::chown(
            self.host_path(path),
            Some(uid),
            Some(gid),
        )?)
    }

    fn lchown(&self, path: &str, uid: u32, gid: u32) -> FsResult<()> {
        Ok(std::os::unix::fs::lchown(
            self.host_path(path),
            Some(uid),
            Some(gid),
        )?)
    }

    fn truncate(&self, path: &str, size: u64) -> FsResult<()> {
        let file = fs::OpenOptions::new().write(true).open(self.host_path(path))?;
        Ok(file.set_len(size)?)
    }

    fn readlink(&self, path: &str) -> FsResult<String> {
        let target = fs::read_link(self.host_path(path))?;
        Ok(target.to_string_lossy().into_owned())
    }

    fn link(&self, existing: &str, new_path: &str) -> FsResult<()> {
        Ok(fs::hard_link(
            self.host_path(existing),
            self.host_path(new_path),
        )?)
    }

    fn symlink(&self, target: &str, link_path: &str) -> FsResult<()> {
        Ok(std::os::unix::fs::symlink(
            target,
            self.host_path(link_path),
        )?)
    }
}

#[derive(Debug)]
struct HostFile {
    file: fs::File,
}

impl OpenFile for HostFile {
    fn metadata(&self) -> FsResult<Metadata> {
        Ok(metadata_of(&self.file.metadata()?))
    }

    fn read(&mut self, buf: &mut [u8]) -> FsResult<usize> {
        Ok(self.file.read(buf)?)
    }

    fn read_at(&mut self, buf: &mut [u8], offset: u64) -> FsResult<usize> {
        Ok(self.file.read_at(buf, offset)?)
    }

    fn write(&mut self, buf: &[u8]) -> FsResult<usize> {
        Ok(self.file.write(buf)?)
    }

    fn write_at(&mut self, buf: &[u8], offset: u64) -> FsResult<usize> {
        Ok(self.file.write_at(buf, offset)?)
    }

    fn truncate(&mut self, size: u64) -> FsResult<()> {
        let pos = self.file.stream_position()?;
        self.file.set_len(size)?;
        if pos > size {
            self.file.seek(SeekFrom::Start(size))?;
        }
        Ok(())
    }

    fn chmod(&mut self, mode: u32) -> FsResult<()> {
        Ok(self
            .file
            .set_permissions(fs::Permissions::from_mode(mode))?)
    }

    fn chown(&mut self, uid: u32, gid: u32) -> FsResult<()> {
        use std::os::fd::AsRawFd;
        // SAFETY: the descriptor is owned by `self.file` and stays open.
        let rc = unsafe { libc::fchown(self.file.as_raw_fd(), uid, gid) };
        if rc == 0 {
            Ok(())
        } else {
            Err(std::io::Error::last_os_error().into())
        }
    }

    fn sync(&mut self) -> FsResult<()> {
        Ok(self.file.sync_all()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_a_file_through_the_host() {
        let dir = tempfile::tempdir().unwrap();
        let fs = HostFs::new(dir.path());

        let mut f = fs
            .open(
                "/greeting.txt",
                OpenFlags {
                    write: true,
                    create: true,
                    ..OpenFlags::default()
                },
                0o644,
            )
            .unwrap();
        f.write(b"greet filesystem\n").unwrap();
        drop(f);

        let meta = fs.stat("/greeting.txt").unwrap();
        assert_eq!(meta.size, 17);
        assert_eq!(meta.mode.kind, FileKind::Regular);

        let mut f = fs
            .open("/greeting.txt", OpenFlags { read: true, ..OpenFlags::default() }, 0)
            .unwrap();
        let mut buf = [0u8; 5];
        assert_eq!(f.read_at(&mut buf, 6).unwrap(), 5);
        assert_eq!(&buf, b"files");
    }

    #[test]
    fn missing_files_map_to_enoent() {
        let dir = tempfile::tempdir().unwrap();
        let fs = HostFs::new(dir.path());
        assert_eq!(fs.stat("/nope"), Err(FsError::NotFound));
    }

    #[test]
    fn readdirnames_lists_entries() {
        let dir = tempfile::tempdir().unwrap();
        let fs = HostFs::new(dir.path());
        fs.mkdir("/sub", 0o755).unwrap();
        fs.open(
            "/sub/a",
            OpenFlags {
                write: true,
                create: true,
                ..OpenFlags::default()
            },
            0o644,
        )
        .unwrap();
        let mut names = fs.readdirnames("/sub").unwrap();
        names.sort();
        assert_eq!(names, ["a"]);
    }
}
