//! FUSE callback layer.
//!
//! Implements `fuser::Filesystem` over the node table, translating each
//! upcall into talker or file-handler calls. Callbacks run on the FUSE
//! session thread and bridge into the async transport through the
//! client's runtime handle. The kernel serializes callbacks on a session,
//! which is what the single state lock leans on.

use std::collections::HashMap;
use std::ffi::OsStr;
use std::os::raw::c_int;
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime};

use fuser::{
    FileType, Filesystem, KernelConfig, ReplyAttr, ReplyCreate, ReplyData, ReplyDirectory,
    ReplyEmpty, ReplyEntry, ReplyOpen, ReplyWrite, Request, TimeOrNow,
};
use tetherfs_transport::{FileStat, Opcode, Payload, ReadDirInfo, RemoteRoot};
use tracing::{debug, warn};

use crate::client::Client;
use crate::error::{FsError, Result};
use crate::node::{NodeTable, RemoteNode, ROOT_INODE};

const TTL: Duration = Duration::from_secs(1);

/// One row of a cached directory listing.
#[derive(Debug, Clone)]
pub struct DirRow {
    pub ino: u64,
    pub name: String,
    pub is_dir: bool,
}

struct FsState {
    nodes: NodeTable,
    /// Listing snapshot per open directory handle, consumed across the
    /// kernel's offset-paged readdir calls.
    dir_listings: HashMap<u64, Vec<DirRow>>,
}

/// The mounted filesystem.
pub struct TetherFs {
    client: Arc<Client>,
    state: Mutex<FsState>,
}

fn stat_to_attr(node: &RemoteNode, uid: u32, gid: u32) -> fuser::FileAttr {
    let mtime = if node.stat.mtime_nanos >= 0 {
        SystemTime::UNIX_EPOCH + Duration::from_nanos(node.stat.mtime_nanos as u64)
    } else {
        SystemTime::UNIX_EPOCH
    };
    let kind = if node.is_dir {
        FileType::Directory
    } else {
        FileType::RegularFile
    };
    fuser::FileAttr {
        ino: node.ino,
        size: node.stat.size,
        blocks: node.stat.size.div_ceil(512),
        atime: mtime,
        mtime,
        ctime: mtime,
        crtime: SystemTime::UNIX_EPOCH,
        kind,
        perm: (node.stat.mode & 0o7777) as u16,
        nlink: if node.is_dir { 2 } else { 1 },
        uid,
        gid,
        rdev: 0,
        blksize: 4096,
        flags: 0,
    }
}

impl TetherFs {
    /// Builds the filesystem over a client and the configured roots.
    pub fn new(client: Arc<Client>, roots: &[RemoteRoot]) -> Self {
        Self {
            client,
            state: Mutex::new(FsState {
                nodes: NodeTable::new(roots),
                dir_listings: HashMap::new(),
            }),
        }
    }

    fn attr_of(&self, node: &RemoteNode) -> fuser::FileAttr {
        stat_to_attr(node, self.client.uid, self.client.gid)
    }

    /// Lookup: child map first; a miss costs one enumeration round trip,
    /// after which the map is authoritative again. The root's children
    /// are the configured remote roots and never need the network.
    pub async fn do_lookup(&self, parent: u64, name: &str) -> Result<(u64, fuser::FileAttr)> {
        let parent_path = {
            let state = self.state.lock().unwrap();
            if let Some(ino) = state.nodes.lookup_child(parent, name) {
                let node = state.nodes.get(ino).ok_or(FsError::NoEntry { ino })?;
                return Ok((ino, self.attr_of(node)));
            }
            if parent == ROOT_INODE {
                return Err(FsError::NoEntry { ino: parent });
            }
            state
                .nodes
                .get(parent)
                .ok_or(FsError::NoEntry { ino: parent })?
                .path
                .clone()
        };

        let hostname = parent_path.hostname.clone();
        let resp = self
            .client
            .talker
            .send_request(Opcode::ReadDirAll, &hostname, Payload::Path(parent_path))
            .await?;
        let stats = match resp.data {
            Payload::Dir(dir) => dir.stats,
            Payload::Error(ref e) => return Err(FsError::remote(e)),
            _ => return Err(FsError::UnexpectedResponse { op: "readdir-all" }),
        };

        let mut state = self.state.lock().unwrap();
        state.nodes.set_children(parent, &stats);
        match state.nodes.lookup_child(parent, name) {
            Some(ino) => {
                let node = state.nodes.get(ino).ok_or(FsError::NoEntry { ino })?;
                Ok((ino, self.attr_of(node)))
            }
            None => Err(FsError::NoEntry { ino: parent }),
        }
    }

    /// Getattr: one attr round trip; mode, size and mtime come from the
    /// remote, ownership from the mount configuration.
    pub async fn do_getattr(&self, ino: u64) -> Result<fuser::FileAttr> {
        let path = {
            let state = self.state.lock().unwrap();
            if ino == ROOT_INODE {
                let root = state.nodes.get(ROOT_INODE).ok_or(FsError::NoEntry { ino })?;
                return Ok(self.attr_of(root));
            }
            state
                .nodes
                .get(ino)
                .ok_or(FsError::NoEntry { ino })?
                .path
                .clone()
        };

        let hostname = path.hostname.clone();
        let resp = self
            .client
            .talker
            .send_request(Opcode::Attr, &hostname, Payload::Path(path))
            .await?;
        let stat = match resp.data {
            Payload::Stat(s) => s,
            Payload::Error(ref e) => return Err(FsError::remote(e)),
            _ => return Err(FsError::UnexpectedResponse { op: "attr" }),
        };

        let mut state = self.state.lock().unwrap();
        let node = state.nodes.get_mut(ino).ok_or(FsError::NoEntry { ino })?;
        node.is_dir = stat.is_dir;
        node.stat = FileStat {
            name: node.name.clone(),
            ..stat
        };
        Ok(stat_to_attr(node, self.client.uid, self.client.gid))
    }

    /// Opens a node through the file handler; directories get a remote
    /// handle for enumeration, files are faulted into the cache.
    pub async fn do_open(&self, ino: u64, flags: i32, is_dir: bool) -> Result<u64> {
        let path = {
            let state = self.state.lock().unwrap();
            state
                .nodes
                .get(ino)
                .ok_or(FsError::NoEntry { ino })?
                .path
                .clone()
        };
        self.client.handler.open(path, flags, is_dir).await
    }

    /// Directory listing through an open handle. Repopulates the child
    /// map from the same response. The root never hits the network.
    pub async fn do_readdir(&self, ino: u64, fh: u64) -> Result<Vec<DirRow>> {
        let path = {
            let state = self.state.lock().unwrap();
            let node = state.nodes.get(ino).ok_or(FsError::NoEntry { ino })?;
            if !node.is_dir {
                return Err(FsError::NotDirectory { ino });
            }
            if ino == ROOT_INODE {
                let children = node.children.as_ref().cloned().unwrap_or_default();
                let mut rows: Vec<DirRow> = children
                    .into_iter()
                    .map(|(name, ino)| DirRow {
                        ino,
                        name,
                        is_dir: true,
                    })
                    .collect();
                rows.sort_by(|a, b| a.name.cmp(&b.name));
                return Ok(rows);
            }
            node.path.clone()
        };

        let remote_fd = self.client.handler.remote_descriptor(fh)?;
        let resp = self
            .client
            .talker
            .send_request(
                Opcode::ReadDir,
                &path.hostname,
                Payload::ReadDir(ReadDirInfo {
                    path: path.clone(),
                    fd: remote_fd,
                }),
            )
            .await?;
        let stats = match resp.data {
            Payload::Dir(dir) => dir.stats,
            Payload::Error(ref e) => return Err(FsError::remote(e)),
            _ => return Err(FsError::UnexpectedResponse { op: "readdir" }),
        };

        let mut state = self.state.lock().unwrap();
        state.nodes.set_children(ino, &stats);
        let mut rows: Vec<DirRow> = stats
            .iter()
            .filter_map(|s| {
                state.nodes.lookup_child(ino, &s.name).map(|child| DirRow {
                    ino: child,
                    name: s.name.clone(),
                    is_dir: s.is_dir,
                })
            })
            .collect();
        rows.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(rows)
    }

    pub async fn do_read(&self, fh: u64, offset: i64, size: u32) -> Result<Vec<u8>> {
        self.client.handler.read(fh, offset, size).await
    }

    pub async fn do_write(&self, ino: u64, fh: u64, offset: i64, data: &[u8]) -> Result<u32> {
        let written = self.client.handler.write(fh, data, offset).await?;
        let mut state = self.state.lock().unwrap();
        if let Some(node) = state.nodes.get_mut(ino) {
            let end = offset as u64 + written as u64;
            if end > node.stat.size {
                node.stat.size = end;
            }
        }
        Ok(written)
    }

    /// Setattr: a size change is a truncate; a mode change goes to the
    /// agent; anything else is accepted and ignored.
    pub async fn do_setattr(
        &self,
        ino: u64,
        mode: Option<u32>,
        size: Option<u64>,
    ) -> Result<fuser::FileAttr> {
        let path = {
            let state = self.state.lock().unwrap();
            state
                .nodes
                .get(ino)
                .ok_or(FsError::NoEntry { ino })?
                .path
                .clone()
        };

        if let Some(size) = size {
            self.client.handler.truncate(&path, size).await?;
        } else if let Some(mode) = mode {
            let attr = tetherfs_transport::AttrInfo {
                path: path.clone(),
                valid: tetherfs_transport::attr_valid::MODE,
                size: 0,
                mode,
                atime_nanos: 0,
                mtime_nanos: 0,
            };
            self.client.handler.set_attr(attr).await?;
        }

        let mut state = self.state.lock().unwrap();
        let node = state.nodes.get_mut(ino).ok_or(FsError::NoEntry { ino })?;
        if let Some(size) = size {
            node.stat.size = size;
        }
        if let Some(mode) = mode {
            node.stat.mode = mode;
        }
        Ok(stat_to_attr(node, self.client.uid, self.client.gid))
    }

    /// Create: remote create plus a zero-length cache entry, then the
    /// child joins the parent's map so the next lookup stays local.
    pub async fn do_create(
        &self,
        parent: u64,
        name: &str,
        mode: u32,
    ) -> Result<(u64, fuser::FileAttr, u64)> {
        let parent_path = {
            let state = self.state.lock().unwrap();
            state
                .nodes
                .get(parent)
                .ok_or(FsError::NoEntry { ino: parent })?
                .path
                .clone()
        };
        let fd = self.client.handler.create(&parent_path, name).await?;

        let mut state = self.state.lock().unwrap();
        let ino = state.nodes.alloc_child(
            parent,
            name,
            false,
            FileStat {
                name: name.to_string(),
                is_dir: false,
                size: 0,
                mode: mode & 0o7777,
                mtime_nanos: 0,
            },
        );
        let node = state.nodes.get(ino).ok_or(FsError::NoEntry { ino })?;
        Ok((ino, self.attr_of(node), fd))
    }

    pub async fn do_mkdir(
        &self,
        parent: u64,
        name: &str,
        mode: u32,
    ) -> Result<(u64, fuser::FileAttr)> {
        let parent_path = {
            let state = self.state.lock().unwrap();
            state
                .nodes
                .get(parent)
                .ok_or(FsError::NoEntry { ino: parent })?
                .path
                .clone()
        };
        self.client.handler.mkdir(&parent_path, name).await?;

        let mut state = self.state.lock().unwrap();
        let ino = state.nodes.alloc_child(
            parent,
            name,
            true,
            FileStat {
                name: name.to_string(),
                is_dir: true,
                size: 0,
                mode: mode & 0o7777,
                mtime_nanos: 0,
            },
        );
        let node = state.nodes.get(ino).ok_or(FsError::NoEntry { ino })?;
        Ok((ino, self.attr_of(node)))
    }

    async fn do_remove(&self, parent: u64, name: &str, dir: bool) -> Result<()> {
        let path = {
            let state = self.state.lock().unwrap();
            let ino = state
                .nodes
                .lookup_child(parent, name)
                .ok_or(FsError::NoEntry { ino: parent })?;
            let node = state.nodes.get(ino).ok_or(FsError::NoEntry { ino })?;
            if dir && !node.is_dir {
                return Err(FsError::NotDirectory { ino });
            }
            if !dir && node.is_dir {
                return Err(FsError::IsDirectory { ino });
            }
            node.path.clone()
        };

        self.client.handler.remove(&path).await?;

        let mut state = self.state.lock().unwrap();
        state.nodes.remove_child(parent, name);
        Ok(())
    }

    pub async fn do_unlink(&self, parent: u64, name: &str) -> Result<()> {
        self.do_remove(parent, name, false).await
    }

    pub async fn do_rmdir(&self, parent: u64, name: &str) -> Result<()> {
        self.do_remove(parent, name, true).await
    }

    /// Rename: one remote round trip, then the node moves to the new
    /// parent with its path rewritten.
    pub async fn do_rename(
        &self,
        parent: u64,
        name: &str,
        new_parent: u64,
        new_name: &str,
    ) -> Result<()> {
        let (old_path, dest_path) = {
            let state = self.state.lock().unwrap();
            let ino = state
                .nodes
                .lookup_child(parent, name)
                .ok_or(FsError::NoEntry { ino: parent })?;
            let old_path = state.nodes.get(ino).ok_or(FsError::NoEntry { ino })?.path.clone();
            let dest = state
                .nodes
                .get(new_parent)
                .ok_or(FsError::NoEntry { ino: new_parent })?
                .path
                .join(new_name);
            (old_path, dest.path)
        };

        self.client.handler.rename(&old_path, &dest_path).await?;

        let mut state = self.state.lock().unwrap();
        state.nodes.move_child(parent, name, new_parent, new_name);
        Ok(())
    }

    pub async fn do_release(&self, fh: u64) -> Result<()> {
        self.state.lock().unwrap().dir_listings.remove(&fh);
        self.client.handler.release(fh).await
    }

    /// Node count, for tests.
    pub fn node_count(&self) -> usize {
        self.state.lock().unwrap().nodes.len()
    }

    /// Child inode by name, for tests.
    pub fn child_of(&self, parent: u64, name: &str) -> Option<u64> {
        self.state.lock().unwrap().nodes.lookup_child(parent, name)
    }

    /// A node's remote path, for tests.
    pub fn path_of(&self, ino: u64) -> Option<String> {
        self.state
            .lock()
            .unwrap()
            .nodes
            .get(ino)
            .map(|n| n.path.path.clone())
    }
}

impl Filesystem for TetherFs {
    fn init(&mut self, _req: &Request<'_>, _config: &mut KernelConfig) -> std::result::Result<(), c_int> {
        debug!("tetherfs init");
        Ok(())
    }

    fn lookup(&mut self, _req: &Request<'_>, parent: u64, name: &OsStr, reply: ReplyEntry) {
        let name = name.to_string_lossy();
        debug!(parent, name = %name, "lookup");
        match self.client.block_on(self.do_lookup(parent, &name)) {
            Ok((_, attr)) => reply.entry(&TTL, &attr, 0),
            Err(e) => reply.error(e.to_errno()),
        }
    }

    fn getattr(&mut self, _req: &Request<'_>, ino: u64, _fh: Option<u64>, reply: ReplyAttr) {
        debug!(ino, "getattr");
        match self.client.block_on(self.do_getattr(ino)) {
            Ok(attr) => reply.attr(&TTL, &attr),
            Err(e) => reply.error(e.to_errno()),
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn setattr(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        mode: Option<u32>,
        _uid: Option<u32>,
        _gid: Option<u32>,
        size: Option<u64>,
        _atime: Option<TimeOrNow>,
        _mtime: Option<TimeOrNow>,
        _ctime: Option<SystemTime>,
        _fh: Option<u64>,
        _crtime: Option<SystemTime>,
        _chgtime: Option<SystemTime>,
        _bkuptime: Option<SystemTime>,
        _flags: Option<u32>,
        reply: ReplyAttr,
    ) {
        debug!(ino, ?mode, ?size, "setattr");
        match self.client.block_on(self.do_setattr(ino, mode, size)) {
            Ok(attr) => reply.attr(&TTL, &attr),
            Err(e) => reply.error(e.to_errno()),
        }
    }

    fn mkdir(
        &mut self,
        _req: &Request<'_>,
        parent: u64,
        name: &OsStr,
        mode: u32,
        _umask: u32,
        reply: ReplyEntry,
    ) {
        let name = name.to_string_lossy();
        debug!(parent, name = %name, mode, "mkdir");
        match self.client.block_on(self.do_mkdir(parent, &name, mode)) {
            Ok((_, attr)) => reply.entry(&TTL, &attr, 0),
            Err(e) => reply.error(e.to_errno()),
        }
    }

    fn unlink(&mut self, _req: &Request<'_>, parent: u64, name: &OsStr, reply: ReplyEmpty) {
        let name = name.to_string_lossy();
        debug!(parent, name = %name, "unlink");
        match self.client.block_on(self.do_unlink(parent, &name)) {
            Ok(()) => reply.ok(),
            Err(e) => reply.error(e.to_errno()),
        }
    }

    fn rmdir(&mut self, _req: &Request<'_>, parent: u64, name: &OsStr, reply: ReplyEmpty) {
        let name = name.to_string_lossy();
        debug!(parent, name = %name, "rmdir");
        match self.client.block_on(self.do_rmdir(parent, &name)) {
            Ok(()) => reply.ok(),
            Err(e) => reply.error(e.to_errno()),
        }
    }

    fn rename(
        &mut self,
        _req: &Request<'_>,
        parent: u64,
        name: &OsStr,
        newparent: u64,
        newname: &OsStr,
        _flags: u32,
        reply: ReplyEmpty,
    ) {
        let name = name.to_string_lossy();
        let newname = newname.to_string_lossy();
        debug!(parent, name = %name, newparent, newname = %newname, "rename");
        match self
            .client
            .block_on(self.do_rename(parent, &name, newparent, &newname))
        {
            Ok(()) => reply.ok(),
            Err(e) => reply.error(e.to_errno()),
        }
    }

    fn open(&mut self, _req: &Request<'_>, ino: u64, flags: i32, reply: ReplyOpen) {
        debug!(ino, flags, "open");
        match self.client.block_on(self.do_open(ino, flags, false)) {
            Ok(fh) => reply.opened(fh, 0),
            Err(e) => reply.error(e.to_errno()),
        }
    }

    fn read(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        fh: u64,
        offset: i64,
        size: u32,
        _flags: i32,
        _lock_owner: Option<u64>,
        reply: ReplyData,
    ) {
        debug!(ino, fh, offset, size, "read");
        match self.client.block_on(self.do_read(fh, offset, size)) {
            Ok(data) => reply.data(&data),
            Err(e) => reply.error(e.to_errno()),
        }
    }

    fn write(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        fh: u64,
        offset: i64,
        data: &[u8],
        _write_flags: u32,
        _flags: i32,
        _lock_owner: Option<u64>,
        reply: ReplyWrite,
    ) {
        debug!(ino, fh, offset, size = data.len(), "write");
        match self
            .client
            .block_on(self.do_write(ino, fh, offset, data))
        {
            Ok(written) => reply.written(written),
            Err(e) => reply.error(e.to_errno()),
        }
    }

    fn flush(&mut self, _req: &Request<'_>, ino: u64, _fh: u64, _lock_owner: u64, reply: ReplyEmpty) {
        // Writes reach the agent synchronously; nothing is pending here.
        debug!(ino, "flush");
        reply.ok();
    }

    fn release(
        &mut self,
        _req: &Request<'_>,
        _ino: u64,
        fh: u64,
        _flags: i32,
        _lock_owner: Option<u64>,
        _flush: bool,
        reply: ReplyEmpty,
    ) {
        debug!(fh, "release");
        if let Err(e) = self.client.block_on(self.do_release(fh)) {
            warn!(fh, error = %e, "release failed");
        }
        reply.ok();
    }

    fn fsync(&mut self, _req: &Request<'_>, ino: u64, _fh: u64, _datasync: bool, reply: ReplyEmpty) {
        // Documented no-op.
        debug!(ino, "fsync");
        reply.ok();
    }

    fn opendir(&mut self, _req: &Request<'_>, ino: u64, flags: i32, reply: ReplyOpen) {
        debug!(ino, "opendir");
        if ino == ROOT_INODE {
            // The root is synthetic: no remote handle to acquire.
            reply.opened(0, 0);
            return;
        }
        match self.client.block_on(self.do_open(ino, flags, true)) {
            Ok(fh) => reply.opened(fh, 0),
            Err(e) => reply.error(e.to_errno()),
        }
    }

    fn readdir(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        fh: u64,
        offset: i64,
        mut reply: ReplyDirectory,
    ) {
        debug!(ino, fh, offset, "readdir");

        if offset == 0 {
            match self.client.block_on(self.do_readdir(ino, fh)) {
                Ok(rows) => {
                    let mut state = self.state.lock().unwrap();
                    state.dir_listings.insert(fh, rows);
                }
                Err(e) => {
                    reply.error(e.to_errno());
                    return;
                }
            }
        }

        let state = self.state.lock().unwrap();
        let parent = state.nodes.get(ino).map(|n| n.parent).unwrap_or(ROOT_INODE);
        let rows = state.dir_listings.get(&fh).cloned().unwrap_or_default();
        drop(state);

        let mut off = offset;
        if offset == 0 {
            if reply.add(ino, 1, FileType::Directory, ".") {
                return;
            }
            off = 1;
        }
        if offset <= 1 {
            if reply.add(parent, 2, FileType::Directory, "..") {
                return;
            }
            off = 2;
        }

        for (i, row) in rows.iter().enumerate() {
            let entry_off = i as i64 + 3;
            if entry_off <= off {
                continue;
            }
            let ftype = if row.is_dir {
                FileType::Directory
            } else {
                FileType::RegularFile
            };
            if reply.add(row.ino, entry_off, ftype, &row.name) {
                return;
            }
        }
        reply.ok();
    }

    fn releasedir(&mut self, _req: &Request<'_>, ino: u64, fh: u64, _flags: i32, reply: ReplyEmpty) {
        debug!(ino, fh, "releasedir");
        if fh != 0 {
            if let Err(e) = self.client.block_on(self.do_release(fh)) {
                warn!(fh, error = %e, "releasedir failed");
            }
        } else {
            self.state.lock().unwrap().dir_listings.remove(&fh);
        }
        reply.ok();
    }

    fn create(
        &mut self,
        _req: &Request<'_>,
        parent: u64,
        name: &OsStr,
        mode: u32,
        _umask: u32,
        flags: i32,
        reply: ReplyCreate,
    ) {
        let name = name.to_string_lossy();
        debug!(parent, name = %name, mode, flags, "create");
        match self.client.block_on(self.do_create(parent, &name, mode)) {
            Ok((_, attr, fh)) => reply.created(&TTL, &attr, 0, fh, 0),
            Err(e) => reply.error(e.to_errno()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tetherfs_transport::RemotePath;

    fn node(ino: u64, is_dir: bool, size: u64, mode: u32) -> RemoteNode {
        RemoteNode {
            ino,
            parent: ROOT_INODE,
            name: "n".to_string(),
            is_dir,
            path: RemotePath::new("h1", 8080, "/data/n"),
            children: None,
            stat: FileStat {
                name: "n".to_string(),
                is_dir,
                size,
                mode,
                mtime_nanos: 1_000_000 * 1_000_000_000,
            },
        }
    }

    #[test]
    fn test_stat_to_attr_file() {
        let attr = stat_to_attr(&node(5, false, 42, 0o644), 1000, 1000);
        assert_eq!(attr.ino, 5);
        assert_eq!(attr.size, 42);
        assert_eq!(attr.perm, 0o644);
        assert_eq!(attr.kind, FileType::RegularFile);
        assert_eq!(attr.uid, 1000);
        assert_eq!(attr.gid, 1000);
        assert_eq!(
            attr.mtime,
            SystemTime::UNIX_EPOCH + Duration::from_secs(1_000_000)
        );
    }

    #[test]
    fn test_stat_to_attr_directory() {
        let attr = stat_to_attr(&node(2, true, 0, 0o755), 0, 0);
        assert_eq!(attr.kind, FileType::Directory);
        assert_eq!(attr.nlink, 2);
        assert_eq!(attr.perm, 0o755);
    }

    #[test]
    fn test_stat_to_attr_negative_mtime_clamps_to_epoch() {
        let mut n = node(3, false, 1, 0o600);
        n.stat.mtime_nanos = -5;
        let attr = stat_to_attr(&n, 0, 0);
        assert_eq!(attr.mtime, SystemTime::UNIX_EPOCH);
    }

    #[test]
    fn test_blocks_round_up() {
        let attr = stat_to_attr(&node(4, false, 513, 0o644), 0, 0);
        assert_eq!(attr.blocks, 2);
    }
}
