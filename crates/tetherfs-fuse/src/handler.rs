//! Open-file coordinator.
//!
//! Owns the local descriptor space and the descriptor-keyed open-file
//! table, and routes reads and writes through either the hoarder's backing
//! files or the transport. Descriptors are monotonic for the process
//! lifetime and never reused.

use std::collections::HashMap;
use std::os::unix::fs::FileExt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use tetherfs_transport::{
    attr_valid, AttrInfo, CloseInfo, CreateInfo, Opcode, OpenInfo, Packet, Payload, ReadInfo,
    RemotePath, RenameInfo, Talker, WriteInfo, WriteResult,
};
use tracing::{debug, warn};

use crate::error::{FsError, Result};
use crate::hoarder::Hoarder;

#[derive(Debug)]
struct OpenFile {
    path: RemotePath,
    remote_fd: u64,
    #[allow(dead_code)]
    flags: i32,
    cached: bool,
    file: Option<std::fs::File>,
}

/// Descriptor allocator plus open-file table.
pub struct FileHandler {
    talker: Arc<Talker>,
    hoarder: Arc<Hoarder>,
    next_fd: AtomicU64,
    open_files: Mutex<HashMap<u64, OpenFile>>,
}

fn expect_ack(packet: &Packet, op: &'static str) -> Result<WriteResult> {
    match &packet.data {
        Payload::WriteResult(w) => Ok(w.clone()),
        Payload::Error(e) => Err(FsError::remote(e)),
        _ => Err(FsError::UnexpectedResponse { op }),
    }
}

impl FileHandler {
    pub fn new(talker: Arc<Talker>, hoarder: Arc<Hoarder>) -> Self {
        Self {
            talker,
            hoarder,
            next_fd: AtomicU64::new(0),
            open_files: Mutex::new(HashMap::new()),
        }
    }

    fn alloc_fd(&self) -> u64 {
        self.next_fd.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Opens `path` and returns the local descriptor.
    ///
    /// The descriptor is also sent to the agent, which keys its own
    /// open-file state by it; the agent answers with its side's
    /// descriptor. Files are additionally faulted into the hoarder so
    /// reads can stay local; when the local cache cannot take the file the
    /// descriptor falls back to remote reads and writes.
    pub async fn open(&self, path: RemotePath, flags: i32, is_dir: bool) -> Result<u64> {
        let fd = self.alloc_fd();
        let resp = self
            .talker
            .send_request(
                Opcode::Open,
                &path.hostname,
                Payload::Open(OpenInfo {
                    path: path.clone(),
                    fd,
                    flags,
                }),
            )
            .await?;
        let remote_fd = expect_ack(&resp, "open")?.size;

        let (cached, file) = if is_dir {
            (false, None)
        } else {
            match self.hoarder.fetch(&self.talker, &path).await {
                Ok(_) => {
                    let writable = (flags & libc::O_ACCMODE) != libc::O_RDONLY;
                    let file = self.hoarder.open(&path, writable)?;
                    (true, Some(file))
                }
                Err(e @ FsError::Remote { .. }) => return Err(e),
                Err(e) => {
                    warn!(path = %path.path, error = %e, "cache fetch failed, serving uncached");
                    (false, None)
                }
            }
        };

        debug!(path = %path.path, fd, remote_fd, cached, is_dir, "opened");
        self.open_files.lock().unwrap().insert(
            fd,
            OpenFile {
                path,
                remote_fd,
                flags,
                cached,
                file,
            },
        );
        Ok(fd)
    }

    fn entry_info(&self, fd: u64) -> Result<(RemotePath, u64, bool, Option<std::fs::File>)> {
        let open_files = self.open_files.lock().unwrap();
        let entry = open_files
            .get(&fd)
            .ok_or(FsError::BadDescriptor { fd })?;
        let file = match &entry.file {
            Some(f) => Some(f.try_clone()?),
            None => None,
        };
        Ok((entry.path.clone(), entry.remote_fd, entry.cached, file))
    }

    /// Reads `size` bytes at `offset`, from the cache file when resident,
    /// else through the transport.
    pub async fn read(&self, fd: u64, offset: i64, size: u32) -> Result<Vec<u8>> {
        let (path, remote_fd, cached, file) = self.entry_info(fd)?;

        if cached {
            let file = file.ok_or(FsError::BadDescriptor { fd })?;
            let mut buf = vec![0u8; size as usize];
            let mut filled = 0;
            while filled < buf.len() {
                let n = file.read_at(&mut buf[filled..], offset as u64 + filled as u64)?;
                if n == 0 {
                    break;
                }
                filled += n;
            }
            buf.truncate(filled);
            return Ok(buf);
        }

        let resp = self
            .talker
            .send_request(
                Opcode::ReadFile,
                &path.hostname,
                Payload::Read(ReadInfo {
                    path: path.clone(),
                    fd: remote_fd,
                    offset,
                    size,
                }),
            )
            .await?;
        match resp.data {
            Payload::Chunk(chunk) => Ok(chunk.data),
            Payload::Error(ref e) => Err(FsError::remote(e)),
            _ => Err(FsError::UnexpectedResponse { op: "read" }),
        }
    }

    /// Write-through: the cache file first when resident, then the remote,
    /// synchronously. Returns the byte count the caller observed.
    pub async fn write(&self, fd: u64, data: &[u8], offset: i64) -> Result<u32> {
        let (path, remote_fd, cached, file) = self.entry_info(fd)?;

        let written = if cached {
            let file = file.ok_or(FsError::BadDescriptor { fd })?;
            file.write_all_at(data, offset as u64)?;
            self.hoarder
                .note_write(&path, offset as u64 + data.len() as u64);
            data.len() as u32
        } else {
            0
        };

        let resp = self
            .talker
            .send_request(
                Opcode::WriteFile,
                &path.hostname,
                Payload::Write(WriteInfo {
                    path: path.clone(),
                    fd: remote_fd,
                    offset,
                    data: data.to_vec(),
                }),
            )
            .await?;
        let ack = expect_ack(&resp, "write")?;

        Ok(if cached { written } else { ack.size as u32 })
    }

    /// Truncates the cache copy and pushes the new size to the agent.
    pub async fn truncate(&self, path: &RemotePath, size: u64) -> Result<()> {
        self.hoarder.truncate(path, size)?;
        let attr = AttrInfo {
            path: path.clone(),
            valid: attr_valid::SIZE,
            size,
            mode: 0,
            atime_nanos: 0,
            mtime_nanos: 0,
        };
        let resp = self
            .talker
            .send_request(Opcode::SetAttr, &path.hostname, Payload::Attr(attr))
            .await?;
        expect_ack(&resp, "truncate")?;
        Ok(())
    }

    /// Pushes a non-size attribute change to the agent.
    pub async fn set_attr(&self, attr: AttrInfo) -> Result<()> {
        let hostname = attr.path.hostname.clone();
        let resp = self
            .talker
            .send_request(Opcode::SetAttr, &hostname, Payload::Attr(attr))
            .await?;
        expect_ack(&resp, "setattr")?;
        Ok(())
    }

    /// Creates a file under `parent`, seeds a zero-length cache entry and
    /// returns an open descriptor for it.
    pub async fn create(&self, parent: &RemotePath, name: &str) -> Result<u64> {
        let resp = self
            .talker
            .send_request(
                Opcode::Create,
                &parent.hostname,
                Payload::Create(CreateInfo {
                    base_dir: parent.clone(),
                    name: name.to_string(),
                    is_dir: false,
                }),
            )
            .await?;
        expect_ack(&resp, "create")?;

        let child = parent.join(name);
        self.hoarder.create_empty(&child)?;

        let fd = self.alloc_fd();
        let resp = self
            .talker
            .send_request(
                Opcode::Open,
                &child.hostname,
                Payload::Open(OpenInfo {
                    path: child.clone(),
                    fd,
                    flags: libc::O_RDWR,
                }),
            )
            .await?;
        let remote_fd = expect_ack(&resp, "open")?.size;

        let file = self.hoarder.open(&child, true)?;
        self.open_files.lock().unwrap().insert(
            fd,
            OpenFile {
                path: child,
                remote_fd,
                flags: libc::O_RDWR,
                cached: true,
                file: Some(file),
            },
        );
        Ok(fd)
    }

    /// Creates a directory under `parent`.
    pub async fn mkdir(&self, parent: &RemotePath, name: &str) -> Result<()> {
        let resp = self
            .talker
            .send_request(
                Opcode::Create,
                &parent.hostname,
                Payload::Create(CreateInfo {
                    base_dir: parent.clone(),
                    name: name.to_string(),
                    is_dir: true,
                }),
            )
            .await?;
        expect_ack(&resp, "mkdir")?;
        Ok(())
    }

    /// Removes `path` on the agent and drops any cache entry for it.
    pub async fn remove(&self, path: &RemotePath) -> Result<()> {
        let resp = self
            .talker
            .send_request(Opcode::Remove, &path.hostname, Payload::Path(path.clone()))
            .await?;
        expect_ack(&resp, "remove")?;
        self.hoarder.evict(path);
        Ok(())
    }

    /// Renames `path` to `dest_path` on the agent, re-keying the cache
    /// entry and any open descriptors.
    pub async fn rename(&self, path: &RemotePath, dest_path: &str) -> Result<()> {
        let resp = self
            .talker
            .send_request(
                Opcode::Rename,
                &path.hostname,
                Payload::Rename(RenameInfo {
                    path: path.clone(),
                    dest_path: dest_path.to_string(),
                }),
            )
            .await?;
        expect_ack(&resp, "rename")?;

        let new_path = RemotePath::new(path.hostname.clone(), path.port, dest_path);
        self.hoarder.rename(path, &new_path)?;

        let mut open_files = self.open_files.lock().unwrap();
        for entry in open_files.values_mut() {
            if entry.path == *path {
                entry.path = new_path.clone();
            }
        }
        Ok(())
    }

    /// Closes a descriptor: unpins the cache entry and tells the agent.
    pub async fn release(&self, fd: u64) -> Result<()> {
        let entry = self
            .open_files
            .lock()
            .unwrap()
            .remove(&fd)
            .ok_or(FsError::BadDescriptor { fd })?;
        if entry.cached {
            self.hoarder.release(&entry.path);
        }
        let resp = self
            .talker
            .send_request(
                Opcode::Close,
                &entry.path.hostname,
                Payload::Close(CloseInfo {
                    path: entry.path.clone(),
                    fd: entry.remote_fd,
                }),
            )
            .await?;
        expect_ack(&resp, "close")?;
        debug!(path = %entry.path.path, fd, "released");
        Ok(())
    }

    /// Open descriptor count, for tests and diagnostics.
    pub fn open_count(&self) -> usize {
        self.open_files.lock().unwrap().len()
    }

    /// The path a descriptor refers to.
    pub fn descriptor_path(&self, fd: u64) -> Option<RemotePath> {
        self.open_files
            .lock()
            .unwrap()
            .get(&fd)
            .map(|e| e.path.clone())
    }

    /// The agent-side descriptor paired with a local one.
    pub fn remote_descriptor(&self, fd: u64) -> Result<u64> {
        self.open_files
            .lock()
            .unwrap()
            .get(&fd)
            .map(|e| e.remote_fd)
            .ok_or(FsError::BadDescriptor { fd })
    }
}

impl std::fmt::Debug for FileHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileHandler")
            .field("open_files", &self.open_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_descriptors_monotonic() {
        // Descriptor allocation is independent of the transport.
        let next = AtomicU64::new(0);
        let a = next.fetch_add(1, Ordering::Relaxed) + 1;
        let b = next.fetch_add(1, Ordering::Relaxed) + 1;
        assert!(b > a);
        assert_eq!(a, 1);
    }

    #[test]
    fn test_expect_ack_classifies() {
        use tetherfs_transport::{ErrorKind, ErrorMsg};

        let req = Packet::request(Opcode::Open, Payload::Empty);
        let ok = req.make_response(
            Opcode::WriteResult,
            Payload::WriteResult(WriteResult { size: 7 }),
        );
        assert_eq!(expect_ack(&ok, "open").unwrap().size, 7);

        let err = req.make_response(
            Opcode::Error,
            Payload::Error(ErrorMsg::new(ErrorKind::PermissionDenied, "no")),
        );
        assert_eq!(
            expect_ack(&err, "open").unwrap_err().to_errno(),
            libc::EACCES
        );

        let odd = req.make_response(Opcode::Pong, Payload::Empty);
        assert!(matches!(
            expect_ack(&odd, "open").unwrap_err(),
            FsError::UnexpectedResponse { .. }
        ));
    }
}
