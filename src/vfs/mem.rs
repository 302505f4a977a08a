//! An in-memory filesystem over a flat inode arena.
//!
//! Supports everything the bridge can ask for: directories, regular files,
//! symlinks (with a 40-hop loop cap), hard links, renames and metadata
//! updates. Open handles keep the file data alive across an unlink, like a
//! POSIX descriptor would.

use std::collections::{BTreeMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{SystemTime, UNIX_EPOCH};

use super::{
    FileKind, FileMode, FileSystem, FsError, FsResult, Metadata, OpenFile, OpenFlags,
};

const ROOT: usize = 0;
const MAX_SYMLINK_HOPS: u32 = 40;

fn now_ns() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as i64)
        .unwrap_or(0)
}

#[derive(Debug)]
enum NodeKind {
    File { data: Arc<Mutex<Vec<u8>>> },
    Dir { entries: BTreeMap<String, usize> },
    Symlink { target: String },
}

#[derive(Debug)]
struct Node {
    kind: NodeKind,
    mode: FileMode,
    uid: u32,
    gid: u32,
    nlink: u64,
    atime_ns: i64,
    mtime_ns: i64,
    ctime_ns: i64,
}

impl Node {
    fn new(kind: NodeKind, mode: FileMode) -> Self {
        let now = now_ns();
        Self {
            kind,
            mode,
            uid: 0,
            gid: 0,
            nlink: 1,
            atime_ns: now,
            mtime_ns: now,
            ctime_ns: now,
        }
    }

    fn entries(&self) -> FsResult<&BTreeMap<String, usize>> {
        match &self.kind {
            NodeKind::Dir { entries } => Ok(entries),
            _ => Err(FsError::NotADirectory),
        }
    }

    fn entries_mut(&mut self) -> FsResult<&mut BTreeMap<String, usize>> {
        match &mut self.kind {
            NodeKind::Dir { entries } => Ok(entries),
            _ => Err(FsError::NotADirectory),
        }
    }
}

#[derive(Debug)]
struct Inner {
    nodes: Vec<Node>,
}

/// The in-memory [`FileSystem`].
#[derive(Debug, Clone)]
pub struct MemFs {
    inner: Arc<Mutex<Inner>>,
}

impl Default for MemFs {
    fn default() -> Self {
        Self::new()
    }
}

impl MemFs {
    pub fn new() -> Self {
        let root = Node::new(
            NodeKind::Dir {
                entries: BTreeMap::new(),
            },
            FileMode::directory(0o755),
        );
        Self {
            inner: Arc::new(Mutex::new(Inner { nodes: vec![root] })),
        }
    }

    /// Creates a regular file (and any missing parent directories) holding
    /// `contents`. Convenience for seeding fixtures.
    pub fn add_file(&self, path: &str, contents: impl Into<Vec<u8>>) -> FsResult<()> {
        let mut inner = self.lock();
        let (parent, name) = ensure_parents(&mut inner, path)?;
        let node = Node::new(
            NodeKind::File {
                data: Arc::new(Mutex::new(contents.into())),
            },
            FileMode::regular(0o644),
        );
        insert_node(&mut inner, parent, name, node)?;
        Ok(())
    }

    /// Creates a directory and any missing parents.
    pub fn add_dir(&self, path: &str) -> FsResult<()> {
        let mut inner = self.lock();
        let (parent, name) = ensure_parents(&mut inner, path)?;
        let node = Node::new(
            NodeKind::Dir {
                entries: BTreeMap::new(),
            },
            FileMode::directory(0o755),
        );
        insert_node(&mut inner, parent, name, node)?;
        Ok(())
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn components(path: &str) -> VecDeque<String> {
    path.split('/')
        .filter(|c| !c.is_empty() && *c != ".")
        .map(str::to_owned)
        .collect()
}

/// Resolves `path` to a node index, following intermediate symlinks and,
/// when `follow_last` is set, a symlink in the final position too.
fn namei(inner: &Inner, path: &str, follow_last: bool) -> FsResult<usize> {
    let mut stack = vec![ROOT];
    let mut comps = components(path);
    let mut hops = 0u32;

    while let Some(comp) = comps.pop_front() {
        let is_last = comps.is_empty();
        let dir = stack.last().copied().unwrap_or(ROOT);
        if comp == ".." {
            if stack.len() > 1 {
                stack.pop();
            }
            continue;
        }
        let child = *inner.nodes[dir].entries()?.get(&comp).ok_or(FsError::NotFound)?;
        if let NodeKind::Symlink { target } = &inner.nodes[child].kind {
            if !is_last || follow_last {
                hops += 1;
                if hops > MAX_SYMLINK_HOPS {
                    return Err(FsError::SymlinkLoop);
                }
                let target_comps = components(target);
                if target.starts_with('/') {
                    stack = vec![ROOT];
                }
                for tc in target_comps.into_iter().rev() {
                    comps.push_front(tc);
                }
                continue;
            }
        }
        if is_last {
            return Ok(child);
        }
        stack.push(child);
    }
    Ok(stack.last().copied().unwrap_or(ROOT))
}

/// Resolves everything but the final component; returns the parent
/// directory index and the final name.
fn namei_parent(inner: &Inner, path: &str) -> FsResult<(usize, String)> {
    let trimmed = path.trim_end_matches('/');
    let (dir_part, name) = match trimmed.rfind('/') {
        Some(pos) => (&trimmed[..pos], &trimmed[pos + 1..]),
        None => ("", trimmed),
    };
    if name.is_empty() || name == ".." || name == "." {
        return Err(FsError::InvalidArgument);
    }
    let dir_path = if dir_part.is_empty() { "/" } else { dir_part };
    let parent = namei(inner, dir_path, true)?;
    match inner.nodes[parent].kind {
        NodeKind::Dir { .. } => Ok((parent, name.to_owned())),
        _ => Err(FsError::NotADirectory),
    }
}

fn ensure_parents(inner: &mut Inner, path: &str) -> FsResult<(usize, String)> {
    let trimmed = path.trim_end_matches('/');
    let mut comps: Vec<&str> = trimmed
        .split('/')
        .filter(|c| !c.is_empty() && *c != ".")
        .collect();
    let name = comps.pop().ok_or(FsError::InvalidArgument)?;
    let mut dir = ROOT;
    for comp in comps {
        let existing = inner.nodes[dir].entries()?.get(comp).copied();
        dir = match existing {
            Some(idx) => idx,
            None => {
                let node = Node::new(
                    NodeKind::Dir {
                        entries: BTreeMap::new(),
                    },
                    FileMode::directory(0o755),
                );
                let idx = inner.nodes.len();
                inner.nodes.push(node);
                inner.nodes[dir].entries_mut()?.insert(comp.to_owned(), idx);
                idx
            }
        };
    }
    Ok((dir, name.to_owned()))
}

fn insert_node(inner: &mut Inner, parent: usize, name: String, node: Node) -> FsResult<usize> {
    if inner.nodes[parent].entries()?.contains_key(&name) {
        return Err(FsError::AlreadyExists);
    }
    let idx = inner.nodes.len();
    inner.nodes.push(node);
    inner.nodes[parent].entries_mut()?.insert(name, idx);
    Ok(idx)
}

fn metadata_of(inner: &Inner, idx: usize) -> Metadata {
    let node = &inner.nodes[idx];
    let size = match &node.kind {
        NodeKind::File { data } => data.lock().unwrap_or_else(PoisonError::into_inner).len() as u64,
        NodeKind::Symlink { target } => target.len() as u64,
        NodeKind::Dir { .. } => 0,
    };
    Metadata {
        mode: node.mode,
        dev: 1,
        ino: idx as u64 + 1,
        nlink: node.nlink,
        uid: node.uid,
        gid: node.gid,
        rdev: 0,
        size,
        blksize: 4096,
        blocks: size.div_ceil(512),
        atime_ns: node.atime_ns,
        mtime_ns: node.mtime_ns,
        ctime_ns: node.ctime_ns,
    }
}

/// Checks the directory-intent marker: a path spelled with a trailing slash
/// must resolve to a directory.
fn check_dir_intent(inner: &Inner, path: &str, idx: usize) -> FsResult<()> {
    if path.len() > 1 && path.ends_with('/') {
        if !matches!(inner.nodes[idx].kind, NodeKind::Dir { .. }) {
            return Err(FsError::NotADirectory);
        }
    }
    Ok(())
}

impl FileSystem for MemFs {
    fn open(&self, path: &str, flags: OpenFlags, mode: u32) -> FsResult<Box<dyn OpenFile>> {
        let mut inner = self.lock();
        let found = namei(&inner, path, true);
        let idx = match found {
            Ok(idx) => {
                if flags.create_new {
                    return Err(FsError::AlreadyExists);
                }
                idx
            }
            Err(FsError::NotFound) if flags.create => {
                let (parent, name) = namei_parent(&inner, path)?;
                let node = Node::new(
                    NodeKind::File {
                        data: Arc::new(Mutex::new(Vec::new())),
                    },
                    FileMode::regular(mode),
                );
                insert_node(&mut inner, parent, name, node)?
            }
            Err(err) => return Err(err),
        };
        check_dir_intent(&inner, path, idx)?;

        let data = match &inner.nodes[idx].kind {
            NodeKind::File { data } => Some(data.clone()),
            NodeKind::Dir { .. } => {
                if flags.write {
                    return Err(FsError::IsADirectory);
                }
                None
            }
            NodeKind::Symlink { .. } => return Err(FsError::Io),
        };
        if let Some(data) = &data {
            if flags.truncate {
                data.lock().unwrap_or_else(PoisonError::into_inner).clear();
                inner.nodes[idx].mtime_ns = now_ns();
            }
        }
        Ok(Box::new(MemFile {
            inner: self.inner.clone(),
            node: idx,
            data,
            pos: 0,
            flags,
        }))
    }

    fn stat(&self, path: &str) -> FsResult<Metadata> {
        let inner = self.lock();
        let idx = namei(&inner, path, true)?;
        check_dir_intent(&inner, path, idx)?;
        Ok(metadata_of(&inner, idx))
    }

    fn lstat(&self, path: &str) -> FsResult<Metadata> {
        let inner = self.lock();
        let idx = namei(&inner, path, false)?;
        Ok(metadata_of(&inner, idx))
    }

    fn readdirnames(&self, path: &str) -> FsResult<Vec<String>> {
        let inner = self.lock();
        let idx = namei(&inner, path, true)?;
        Ok(inner.nodes[idx].entries()?.keys().cloned().collect())
    }

    fn mkdir(&self, path: &str, mode: u32) -> FsResult<()> {
        let mut inner = self.lock();
        let (parent, name) = namei_parent(&inner, path)?;
        let node = Node::new(
            NodeKind::Dir {
                entries: BTreeMap::new(),
            },
            FileMode::directory(mode),
        );
        insert_node(&mut inner, parent, name, node)?;
        Ok(())
    }

    fn rmdir(&self, path: &str) -> FsResult<()> {
        let mut inner = self.lock();
        let (parent, name) = namei_parent(&inner, path)?;
        let idx = *inner.nodes[parent].entries()?.get(&name).ok_or(FsError::NotFound)?;
        match &inner.nodes[idx].kind {
            NodeKind::Dir { entries } if entries.is_empty() => {}
            NodeKind::Dir { .. } => return Err(FsError::NotEmpty),
            _ => return Err(FsError::NotADirectory),
        }
        inner.nodes[parent].entries_mut()?.remove(&name);
        Ok(())
    }

    fn rename(&self, from: &str, to: &str) -> FsResult<()> {
        let mut inner = self.lock();
        let (from_parent, from_name) = namei_parent(&inner, from)?;
        let src = *inner.nodes[from_parent]
            .entries()?
            .get(&from_name)
            .ok_or(FsError::NotFound)?;
        let (to_parent, to_name) = namei_parent(&inner, to)?;

        if let Some(&dst) = inner.nodes[to_parent].entries()?.get(&to_name) {
            if dst == src {
                return Ok(());
            }
            let src_is_dir = matches!(inner.nodes[src].kind, NodeKind::Dir { .. });
            match &inner.nodes[dst].kind {
                NodeKind::Dir { entries } => {
                    if !src_is_dir {
                        return Err(FsError::IsADirectory);
                    }
                    if !entries.is_empty() {
                        return Err(FsError::NotEmpty);
                    }
                }
                _ if src_is_dir => return Err(FsError::NotADirectory),
                _ => {}
            }
        }
        inner.nodes[from_parent].entries_mut()?.remove(&from_name);
        inner.nodes[to_parent].entries_mut()?.insert(to_name, src);
        Ok(())
    }

    fn unlink(&self, path: &str) -> FsResult<()> {
        let mut inner = self.lock();
        let (parent, name) = namei_parent(&inner, path)?;
        let idx = *inner.nodes[parent].entries()?.get(&name).ok_or(FsError::NotFound)?;
        if matches!(inner.nodes[idx].kind, NodeKind::Dir { .. }) {
            return Err(FsError::IsADirectory);
        }
        inner.nodes[parent].entries_mut()?.remove(&name);
        inner.nodes[idx].nlink = inner.nodes[idx].nlink.saturating_sub(1);
        Ok(())
    }

    fn utimens(&self, path: &str, atime_ns: i64, mtime_ns: i64) -> FsResult<()> {
        let mut inner = self.lock();
        let idx = namei(&inner, path, true)?;
        inner.nodes[idx].atime_ns = atime_ns;
        inner.nodes[idx].mtime_ns = mtime_ns;
        Ok(())
    }

    fn chmod(&self, path: &str, mode: u32) -> FsResult<()> {
        let mut inner = self.lock();
        let idx = namei(&inner, path, true)?;
        apply_mode(&mut inner.nodes[idx], mode);
        Ok(())
    }

    fn chown(&self, path: &str, uid: u32, gid: u32) -> FsResult<()> {
        let mut inner = self.lock();
        let idx = namei(&inner, path, true)?;
        inner.nodes[idx].uid = uid;
        inner.nodes[idx].gid = gid;
        Ok(())
    }

    fn lchown(&self, path: &str, uid: u32, gid: u32) -> FsResult<()> {
        let mut inner = self.lock();
        let idx = namei(&inner, path, false)?;
        inner.nodes[idx].uid = uid;
        inner.nodes[idx].gid = gid;
        Ok(())
    }

    fn truncate(&self, path: &str, size: u64) -> FsResult<()> {
        let mut inner = self.lock();
        let idx = namei(&inner, path, true)?;
        match &inner.nodes[idx].kind {
            NodeKind::File { data } => {
                data.lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .resize(size as usize, 0);
            }
            NodeKind::Dir { .. } => return Err(FsError::IsADirectory),
            NodeKind::Symlink { .. } => return Err(FsError::Io),
        }
        inner.nodes[idx].mtime_ns = now_ns();
        Ok(())
    }

    fn readlink(&self, path: &str) -> FsResult<String> {
        let inner = self.lock();
        let idx = namei(&inner, path, false)?;
        match &inner.nodes[idx].kind {
            NodeKind::Symlink { target } => Ok(target.clone()),
            _ => Err(FsError::InvalidArgument),
        }
    }

    fn link(&self, existing: &str, new_path: &str) -> FsResult<()> {
        let mut inner = self.lock();
        let idx = namei(&inner, existing, false)?;
        if matches!(inner.nodes[idx].kind, NodeKind::Dir { .. }) {
            return Err(FsError::NotPermitted);
        }
        let (parent, name) = namei_parent(&inner, new_path)?;
        if inner.nodes[parent].entries()?.contains_key(&name) {
            return Err(FsError::AlreadyExists);
        }
        inner.nodes[parent].entries_mut()?.insert(name, idx);
        inner.nodes[idx].nlink += 1;
        Ok(())
    }

    fn symlink(&self, target: &str, link_path: &str) -> FsResult<()> {
        let mut inner = self.lock();
        let (parent, name) = namei_parent(&inner, link_path)?;
        let node = Node::new(
            NodeKind::Symlink {
                target: target.to_owned(),
            },
            FileMode::symlink(),
        );
        insert_node(&mut inner, parent, name, node)?;
        Ok(())
    }
}

fn apply_mode(node: &mut Node, mode: u32) {
    node.mode.perm = mode & 0o777;
    node.mode.setuid = mode & 0o4000 != 0;
    node.mode.setgid = mode & 0o2000 != 0;
    node.mode.sticky = mode & 0o1000 != 0;
    node.ctime_ns = now_ns();
}

#[derive(Debug)]
struct MemFile {
    inner: Arc<Mutex<Inner>>,
    node: usize,
    /// `None` for directory handles.
    data: Option<Arc<Mutex<Vec<u8>>>>,
    pos: u64,
    flags: OpenFlags,
}

impl MemFile {
    fn data(&self) -> FsResult<&Arc<Mutex<Vec<u8>>>> {
        self.data.as_ref().ok_or(FsError::IsADirectory)
    }

    fn touch_mtime(&self) {
        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(node) = inner.nodes.get_mut(self.node) {
            node.mtime_ns = now_ns();
        }
    }
}

impl OpenFile for MemFile {
    fn metadata(&self) -> FsResult<Metadata> {
        let inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(metadata_of(&inner, self.node))
    }

    fn read(&mut self, buf: &mut [u8]) -> FsResult<usize> {
        let n = self.read_at(buf, self.pos)?;
        self.pos += n as u64;
        Ok(n)
    }

    fn read_at(&mut self, buf: &mut [u8], offset: u64) -> FsResult<usize> {
        let data = self.data()?.lock().unwrap_or_else(PoisonError::into_inner);
        let offset = offset as usize;
        if offset >= data.len() {
            return Ok(0);
        }
        let n = buf.len().min(data.len() - offset);
        buf[..n].copy_from_slice(&data[offset..offset + n]);
        Ok(n)
    }

    fn write(&mut self, buf: &[u8]) -> FsResult<usize> {
        if self.flags.append {
            let len = self.data()?.lock().unwrap_or_else(PoisonError::into_inner).len();
            self.pos = len as u64;
        }
        let n = self.write_at(buf, self.pos)?;
        self.pos += n as u64;
        Ok(n)
    }

    fn write_at(&mut self, buf: &[u8], offset: u64) -> FsResult<usize> {
        if !self.flags.write {
            return Err(FsError::BadFileDescriptor);
        }
        {
            let mut data = self.data()?.lock().unwrap_or_else(PoisonError::into_inner);
            let offset = offset as usize;
            if data.len() < offset + buf.len() {
                data.resize(offset + buf.len(), 0);
            }
            data[offset..offset + buf.len()].copy_from_slice(buf);
        }
        self.touch_mtime();
        Ok(buf.len())
    }

    fn truncate(&mut self, size: u64) -> FsResult<()> {
        self.data()?
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .resize(size as usize, 0);
        self.touch_mtime();
        Ok(())
    }

    fn chmod(&mut self, mode: u32) -> FsResult<()> {
        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        apply_mode(&mut inner.nodes[self.node], mode);
        Ok(())
    }

    fn chown(&mut self, uid: u32, gid: u32) -> FsResult<()> {
        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        inner.nodes[self.node].uid = uid;
        inner.nodes[self.node].gid = gid;
        Ok(())
    }

    fn sync(&mut self) -> FsResult<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn open_flags(read: bool, write: bool) -> OpenFlags {
        OpenFlags {
            read,
            write,
            ..OpenFlags::default()
        }
    }

    #[test]
    fn create_write_read_back() {
        let fs = MemFs::new();
        let mut f = fs
            .open(
                "/hello.txt",
                OpenFlags {
                    write: true,
                    create: true,
                    ..OpenFlags::default()
                },
                0o644,
            )
            .unwrap();
        assert_eq!(f.write(b"hi there").unwrap(), 8);

        let mut f = fs.open("/hello.txt", open_flags(true, false), 0).unwrap();
        let mut buf = [0u8; 16];
        let n = f.read(&mut buf).unwrap();
        assert_eq!(&buf[..n], b"hi there");
        assert_eq!(f.read(&mut buf).unwrap(), 0);
    }

    #[test]
    fn symlinks_follow_and_loop_out() {
        let fs = MemFs::new();
        fs.add_file("/real", b"data".to_vec()).unwrap();
        fs.symlink("/real", "/alias").unwrap();
        assert_eq!(fs.stat("/alias").unwrap().size, 4);
        assert_eq!(fs.lstat("/alias").unwrap().mode.kind, FileKind::Symlink);
        assert_eq!(fs.readlink("/alias").unwrap(), "/real");

        fs.symlink("/b", "/a").unwrap();
        fs.symlink("/a", "/b").unwrap();
        assert_eq!(fs.stat("/a"), Err(FsError::SymlinkLoop));
    }

    #[test]
    fn relative_symlink_targets_resolve_from_their_directory() {
        let fs = MemFs::new();
        fs.add_file("/dir/file", b"x".to_vec()).unwrap();
        fs.symlink("file", "/dir/alias").unwrap();
        assert_eq!(fs.stat("/dir/alias").unwrap().size, 1);
    }

    #[test]
    fn rmdir_requires_empty() {
        let fs = MemFs::new();
        fs.add_file("/d/f", b"".to_vec()).unwrap();
        assert_eq!(fs.rmdir("/d"), Err(FsError::NotEmpty));
        fs.unlink("/d/f").unwrap();
        fs.rmdir("/d").unwrap();
        assert_eq!(fs.stat("/d"), Err(FsError::NotFound));
    }

    #[test]
    fn hard_links_share_content_and_count() {
        let fs = MemFs::new();
        fs.add_file("/a", b"shared".to_vec()).unwrap();
        fs.link("/a", "/b").unwrap();
        assert_eq!(fs.stat("/b").unwrap().size, 6);
        assert_eq!(fs.stat("/a").unwrap().nlink, 2);
        fs.unlink("/a").unwrap();
        assert_eq!(fs.stat("/b").unwrap().size, 6);
        assert_eq!(fs.stat("/b").unwrap().nlink, 1);
    }

    #[test]
    fn rename_replaces_files() {
        let fs = MemFs::new();
        fs.add_file("/a", b"aaa".to_vec()).unwrap();
        fs.add_file("/b", b"b".to_vec()).unwrap();
        fs.rename("/a", "/b").unwrap();
        assert_eq!(fs.stat("/a"), Err(FsError::NotFound));
        assert_eq!(fs.stat("/b").unwrap().size, 3);
    }

    #[test]
    fn trailing_slash_demands_a_directory() {
        let fs = MemFs::new();
        fs.add_file("/f", b"".to_vec()).unwrap();
        assert_eq!(fs.stat("/f/"), Err(FsError::NotADirectory));
        fs.add_dir("/d").unwrap();
        assert!(fs.stat("/d/").unwrap().is_dir());
    }

    #[test]
    fn open_excl_refuses_existing() {
        let fs = MemFs::new();
        fs.add_file("/f", b"".to_vec()).unwrap();
        let flags = OpenFlags {
            write: true,
            create: true,
            create_new: true,
            ..OpenFlags::default()
        };
        assert!(matches!(fs.open("/f", flags, 0o644), Err(FsError::AlreadyExists)));
    }

    #[test]
    fn unlinked_file_stays_readable_through_open_handle() {
        let fs = MemFs::new();
        fs.add_file("/f", b"still here".to_vec()).unwrap();
        let mut f = fs.open("/f", open_flags(true, false), 0).unwrap();
        fs.unlink("/f").unwrap();
        let mut buf = [0u8; 32];
        let n = f.read(&mut buf).unwrap();
        assert_eq!(&buf[..n], b"still here");
    }
}
