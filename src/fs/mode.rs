//! Translation between host file modes and the numeric mode word the Go
//! runtime decodes. The guest-side constants are frozen; the host-side
//! `fs.constants` open flags take the platform's own values.

use crate::vfs::{FileKind, FileMode, OpenFlags};

const S_IFMT: u32 = 0o170000;
const S_IFREG: u32 = 0o100000;
const S_IFDIR: u32 = 0o40000;
const S_IFLNK: u32 = 0o120000;
const S_IFCHR: u32 = 0o20000;
const S_IFBLK: u32 = 0o60000;
const S_IFIFO: u32 = 0o10000;
const S_IFSOCK: u32 = 0o140000;
const S_ISUID: u32 = 0o4000;
const S_ISGID: u32 = 0o2000;
const S_ISVTX: u32 = 0o1000;

/// Numeric open flags exposed through `fs.constants`.
pub(crate) mod flags {
    #[cfg(unix)]
    pub const O_WRONLY: u32 = libc::O_WRONLY as u32;
    #[cfg(unix)]
    pub const O_RDWR: u32 = libc::O_RDWR as u32;
    #[cfg(unix)]
    pub const O_CREAT: u32 = libc::O_CREAT as u32;
    #[cfg(unix)]
    pub const O_TRUNC: u32 = libc::O_TRUNC as u32;
    #[cfg(unix)]
    pub const O_APPEND: u32 = libc::O_APPEND as u32;
    #[cfg(unix)]
    pub const O_EXCL: u32 = libc::O_EXCL as u32;
    #[cfg(unix)]
    pub const O_DIRECTORY: u32 = libc::O_DIRECTORY as u32;

    // Linux values stand in on hosts without a libc to ask.
    #[cfg(not(unix))]
    pub const O_WRONLY: u32 = 0o1;
    #[cfg(not(unix))]
    pub const O_RDWR: u32 = 0o2;
    #[cfg(not(unix))]
    pub const O_CREAT: u32 = 0o100;
    #[cfg(not(unix))]
    pub const O_TRUNC: u32 = 0o1000;
    #[cfg(not(unix))]
    pub const O_APPEND: u32 = 0o2000;
    #[cfg(not(unix))]
    pub const O_EXCL: u32 = 0o200;
    #[cfg(not(unix))]
    pub const O_DIRECTORY: u32 = 0o200000;
}

/// Decodes the numeric flag word the guest hands to `fs.open`.
pub(crate) fn decode_open_flags(raw: u32) -> OpenFlags {
    let access = raw & (flags::O_WRONLY | flags::O_RDWR);
    OpenFlags {
        read: access != flags::O_WRONLY,
        write: access != 0,
        append: raw & flags::O_APPEND != 0,
        create: raw & flags::O_CREAT != 0,
        create_new: raw & flags::O_EXCL != 0,
        truncate: raw & flags::O_TRUNC != 0,
    }
}

/// Encodes a host [`FileMode`] into the guest's mode word.
pub(crate) fn to_js_mode(mode: FileMode) -> u32 {
    let kind = match mode.kind {
        FileKind::Regular => S_IFREG,
        FileKind::Directory => S_IFDIR,
        FileKind::Symlink => S_IFLNK,
        FileKind::CharDevice => S_IFCHR,
        FileKind::BlockDevice => S_IFBLK,
        FileKind::Fifo => S_IFIFO,
        FileKind::Socket => S_IFSOCK,
    };
    let mut out = kind | (mode.perm & 0o777);
    if mode.setuid {
        out |= S_ISUID;
    }
    if mode.setgid {
        out |= S_ISGID;
    }
    if mode.sticky {
        out |= S_ISVTX;
    }
    out
}

/// Decodes a guest mode word back into a host [`FileMode`]. Unknown kind
/// bits decode as a regular file.
pub(crate) fn from_js_mode(mode: u32) -> FileMode {
    let kind = match mode & S_IFMT {
        S_IFDIR => FileKind::Directory,
        S_IFLNK => FileKind::Symlink,
        S_IFCHR => FileKind::CharDevice,
        S_IFBLK => FileKind::BlockDevice,
        S_IFIFO => FileKind::Fifo,
        S_IFSOCK => FileKind::Socket,
        _ => FileKind::Regular,
    };
    FileMode {
        kind,
        perm: mode & 0o777,
        setuid: mode & S_ISUID != 0,
        setgid: mode & S_ISGID != 0,
        sticky: mode & S_ISVTX != 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mode_words_round_trip() {
        for kind in [
            FileKind::Regular,
            FileKind::Directory,
            FileKind::Symlink,
            FileKind::CharDevice,
            FileKind::BlockDevice,
            FileKind::Fifo,
            FileKind::Socket,
        ] {
            for perm in [0o000, 0o644, 0o755, 0o777] {
                for (setuid, setgid, sticky) in
                    [(false, false, false), (true, false, true), (true, true, true)]
                {
                    let mode = FileMode {
                        kind,
                        perm,
                        setuid,
                        setgid,
                        sticky,
                    };
                    let encoded = to_js_mode(mode);
                    assert_eq!(to_js_mode(from_js_mode(encoded)), encoded);
                    assert_eq!(from_js_mode(encoded), mode);
                }
            }
        }
    }

    #[test]
    fn guest_kind_constants_are_frozen() {
        assert_eq!(to_js_mode(FileMode::regular(0)) & S_IFMT, 0o100000);
        assert_eq!(to_js_mode(FileMode::directory(0)) & S_IFMT, 0o40000);
        assert_eq!(to_js_mode(FileMode::symlink()) & S_IFMT, 0o120000);
    }

    #[test]
    fn open_flag_decoding() {
        let rdonly = decode_open_flags(0);
        assert!(rdonly.read && !rdonly.write);

        let wronly = decode_open_flags(flags::O_WRONLY);
        assert!(!wronly.read && wronly.write);

        let rdwr = decode_open_flags(flags::O_RDWR);
        assert!(rdwr.read && rdwr.write);

        let creat = decode_open_flags(flags::O_WRONLY | flags::O_CREAT | flags::O_TRUNC);
        assert!(creat.create && creat.truncate && !creat.create_new);

        let excl = decode_open_flags(flags::O_RDWR | flags::O_CREAT | flags::O_EXCL);
        assert!(excl.create && excl.create_new);

        let append = decode_open_flags(flags::O_WRONLY | flags::O_APPEND);
        assert!(append.append);
    }
}
