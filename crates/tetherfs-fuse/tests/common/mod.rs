//! Mock agent and client-stack harness shared by the integration tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use tetherfs_fuse::client::Client;
use tetherfs_fuse::filesystem::TetherFs;
use tetherfs_fuse::hoarder::{Hoarder, HoarderConfig};
use tetherfs_transport::{
    Connection, DirInfo, ErrorKind, ErrorMsg, FileChunk, FileStat, Opcode, Packet, Payload,
    RemoteRoot, Talker, TalkerConfig, WriteResult,
};

/// One entry of the mock agent's filesystem.
#[derive(Debug, Clone)]
pub struct MockFile {
    pub is_dir: bool,
    pub data: Vec<u8>,
    pub mode: u32,
    pub mtime_nanos: i64,
}

impl MockFile {
    pub fn file(data: &[u8]) -> Self {
        Self {
            is_dir: false,
            data: data.to_vec(),
            mode: 0o644,
            mtime_nanos: 0,
        }
    }

    pub fn dir() -> Self {
        Self {
            is_dir: true,
            data: Vec::new(),
            mode: 0o755,
            mtime_nanos: 0,
        }
    }
}

#[derive(Default)]
struct RequestLog {
    /// Every non-ping request, in arrival order.
    requests: Vec<Packet>,
    /// Pings per accepted connection.
    pings: HashMap<usize, usize>,
}

/// A scripted agent speaking the wire protocol on a loopback listener.
pub struct MockAgent {
    pub hostname: String,
    pub port: u16,
    files: Arc<Mutex<HashMap<String, MockFile>>>,
    log: Arc<Mutex<RequestLog>>,
}

fn basename(path: &str) -> String {
    path.rsplit('/').next().unwrap_or(path).to_string()
}

fn stat_of(path: &str, file: &MockFile) -> FileStat {
    FileStat {
        name: basename(path),
        is_dir: file.is_dir,
        size: file.data.len() as u64,
        mode: file.mode,
        mtime_nanos: file.mtime_nanos,
    }
}

fn list_children(files: &HashMap<String, MockFile>, dir: &str) -> Vec<FileStat> {
    let prefix = format!("{}/", dir.trim_end_matches('/'));
    let mut stats: Vec<FileStat> = files
        .iter()
        .filter(|(path, _)| {
            path.starts_with(&prefix) && !path[prefix.len()..].contains('/')
        })
        .map(|(path, file)| stat_of(path, file))
        .collect();
    stats.sort_by(|a, b| a.name.cmp(&b.name));
    stats
}

fn not_found(req: &Packet, path: &str) -> Packet {
    req.make_response(
        Opcode::Error,
        Payload::Error(ErrorMsg::new(ErrorKind::NotFound, format!("no entry: {path}"))),
    )
}

impl MockAgent {
    pub async fn start(files: Vec<(&str, MockFile)>, chunk_size: usize) -> Self {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let files: Arc<Mutex<HashMap<String, MockFile>>> = Arc::new(Mutex::new(
            files.into_iter().map(|(p, f)| (p.to_string(), f)).collect(),
        ));
        let log = Arc::new(Mutex::new(RequestLog::default()));

        let conn_seq = Arc::new(AtomicUsize::new(0));
        {
            let files = files.clone();
            let log = log.clone();
            tokio::spawn(async move {
                loop {
                    let (stream, _) = match listener.accept().await {
                        Ok(a) => a,
                        Err(_) => break,
                    };
                    let conn_index = conn_seq.fetch_add(1, Ordering::SeqCst);
                    let files = files.clone();
                    let log = log.clone();
                    tokio::spawn(async move {
                        let conn = Connection::from_stream(stream);
                        while let Ok(req) = conn.recv_packet().await {
                            if req.op == Opcode::Ping {
                                *log.lock().unwrap().pings.entry(conn_index).or_insert(0) += 1;
                                let pong = req.make_response(Opcode::Pong, Payload::Empty);
                                if conn.send_packet(&pong).await.is_err() {
                                    break;
                                }
                                continue;
                            }
                            log.lock().unwrap().requests.push(req.clone());
                            let responses = respond(&files, &req, chunk_size);
                            let mut closed = false;
                            for resp in responses {
                                if conn.send_packet(&resp).await.is_err() {
                                    closed = true;
                                    break;
                                }
                            }
                            if closed {
                                break;
                            }
                        }
                    });
                }
            });
        }

        Self {
            hostname: addr.ip().to_string(),
            port: addr.port(),
            files,
            log,
        }
    }

    pub fn root(&self, path: &str) -> RemoteRoot {
        RemoteRoot {
            hostname: self.hostname.clone(),
            port: self.port,
            path: path.to_string(),
        }
    }

    pub fn request_count(&self) -> usize {
        self.log.lock().unwrap().requests.len()
    }

    pub fn count_of(&self, op: Opcode) -> usize {
        self.log
            .lock()
            .unwrap()
            .requests
            .iter()
            .filter(|r| r.op == op)
            .count()
    }

    pub fn requests_of(&self, op: Opcode) -> Vec<Packet> {
        self.log
            .lock()
            .unwrap()
            .requests
            .iter()
            .filter(|r| r.op == op)
            .cloned()
            .collect()
    }

    /// Ping counts keyed by accepted-connection ordinal.
    pub fn pings_per_connection(&self) -> Vec<usize> {
        let log = self.log.lock().unwrap();
        let mut counts: Vec<usize> = log.pings.values().copied().collect();
        counts.sort_unstable();
        counts
    }

    pub fn file_data(&self, path: &str) -> Option<Vec<u8>> {
        self.files.lock().unwrap().get(path).map(|f| f.data.clone())
    }
}

fn respond(
    files: &Arc<Mutex<HashMap<String, MockFile>>>,
    req: &Packet,
    chunk_size: usize,
) -> Vec<Packet> {
    let mut files = files.lock().unwrap();
    match (&req.op, &req.data) {
        (Opcode::Attr, Payload::Path(p)) => match files.get(&p.path) {
            Some(f) => vec![req.make_response(Opcode::Stat, Payload::Stat(stat_of(&p.path, f)))],
            None => vec![not_found(req, &p.path)],
        },
        (Opcode::ReadDirAll, Payload::Path(p)) => match files.get(&p.path) {
            Some(f) if f.is_dir => vec![req.make_response(
                Opcode::DirInfo,
                Payload::Dir(DirInfo {
                    stats: list_children(&files, &p.path),
                }),
            )],
            Some(_) => vec![req.make_response(
                Opcode::Error,
                Payload::Error(ErrorMsg::new(ErrorKind::NotDirectory, p.path.clone())),
            )],
            None => vec![not_found(req, &p.path)],
        },
        (Opcode::ReadDir, Payload::ReadDir(info)) => match files.get(&info.path.path) {
            Some(f) if f.is_dir => vec![req.make_response(
                Opcode::DirInfo,
                Payload::Dir(DirInfo {
                    stats: list_children(&files, &info.path.path),
                }),
            )],
            _ => vec![not_found(req, &info.path.path)],
        },
        (Opcode::FetchFile, Payload::Path(p)) => match files.get(&p.path) {
            Some(f) if !f.is_dir => {
                let data = &f.data;
                let size = if chunk_size == 0 { data.len().max(1) } else { chunk_size };
                let chunks: Vec<&[u8]> = if data.is_empty() {
                    vec![&[]]
                } else {
                    data.chunks(size).collect()
                };
                let total = chunks.len() as u64;
                chunks
                    .iter()
                    .enumerate()
                    .map(|(i, chunk)| {
                        req.make_response(
                            Opcode::FileData,
                            Payload::Chunk(FileChunk {
                                index: i as u64,
                                total,
                                data: chunk.to_vec(),
                            }),
                        )
                    })
                    .collect()
            }
            _ => vec![not_found(req, &p.path)],
        },
        (Opcode::ReadFile, Payload::Read(info)) => match files.get(&info.path.path) {
            Some(f) => {
                let start = (info.offset as usize).min(f.data.len());
                let end = (start + info.size as usize).min(f.data.len());
                vec![req.make_response(
                    Opcode::FileData,
                    Payload::Chunk(FileChunk {
                        index: 0,
                        total: 1,
                        data: f.data[start..end].to_vec(),
                    }),
                )]
            }
            None => vec![not_found(req, &info.path.path)],
        },
        (Opcode::WriteFile, Payload::Write(info)) => match files.get_mut(&info.path.path) {
            Some(f) => {
                let end = info.offset as usize + info.data.len();
                if f.data.len() < end {
                    f.data.resize(end, 0);
                }
                f.data[info.offset as usize..end].copy_from_slice(&info.data);
                vec![req.make_response(
                    Opcode::WriteResult,
                    Payload::WriteResult(WriteResult {
                        size: info.data.len() as u64,
                    }),
                )]
            }
            None => vec![not_found(req, &info.path.path)],
        },
        (Opcode::SetAttr, Payload::Attr(info)) => match files.get_mut(&info.path.path) {
            Some(f) => {
                if info.valid & tetherfs_transport::attr_valid::SIZE != 0 {
                    f.data.resize(info.size as usize, 0);
                }
                if info.valid & tetherfs_transport::attr_valid::MODE != 0 {
                    f.mode = info.mode;
                }
                vec![req.make_response(
                    Opcode::WriteResult,
                    Payload::WriteResult(WriteResult { size: 0 }),
                )]
            }
            None => vec![not_found(req, &info.path.path)],
        },
        (Opcode::Create, Payload::Create(info)) => {
            let path = format!(
                "{}/{}",
                info.base_dir.path.trim_end_matches('/'),
                info.name
            );
            if files.contains_key(&path) {
                return vec![req.make_response(
                    Opcode::Error,
                    Payload::Error(ErrorMsg::new(ErrorKind::AlreadyExists, path)),
                )];
            }
            let entry = if info.is_dir {
                MockFile::dir()
            } else {
                MockFile::file(b"")
            };
            files.insert(path, entry);
            vec![req.make_response(
                Opcode::WriteResult,
                Payload::WriteResult(WriteResult { size: 0 }),
            )]
        }
        (Opcode::Remove, Payload::Path(p)) => {
            if files.remove(&p.path).is_some() {
                vec![req.make_response(
                    Opcode::WriteResult,
                    Payload::WriteResult(WriteResult { size: 0 }),
                )]
            } else {
                vec![not_found(req, &p.path)]
            }
        }
        (Opcode::Rename, Payload::Rename(info)) => {
            let src = &info.path.path;
            if !files.contains_key(src) {
                return vec![not_found(req, src)];
            }
            let moved: Vec<(String, String)> = files
                .keys()
                .filter(|k| *k == src || k.starts_with(&format!("{}/", src)))
                .map(|k| {
                    let suffix = &k[src.len()..];
                    (k.clone(), format!("{}{}", info.dest_path, suffix))
                })
                .collect();
            for (old, new) in moved {
                if let Some(entry) = files.remove(&old) {
                    files.insert(new, entry);
                }
            }
            vec![req.make_response(
                Opcode::WriteResult,
                Payload::WriteResult(WriteResult { size: 0 }),
            )]
        }
        (Opcode::Open, Payload::Open(info)) => match files.get(&info.path.path) {
            Some(_) => vec![req.make_response(
                Opcode::WriteResult,
                Payload::WriteResult(WriteResult {
                    size: info.fd + 1000,
                }),
            )],
            None => vec![not_found(req, &info.path.path)],
        },
        (Opcode::Close, Payload::Close(_)) => vec![req.make_response(
            Opcode::WriteResult,
            Payload::WriteResult(WriteResult { size: 0 }),
        )],
        _ => vec![req.make_response(
            Opcode::Error,
            Payload::Error(ErrorMsg::new(ErrorKind::Other, "unhandled op")),
        )],
    }
}

/// The full client stack over one mock agent.
pub struct Harness {
    pub runtime: tokio::runtime::Runtime,
    pub agent: MockAgent,
    pub fs: TetherFs,
    _cache_dir: tempfile::TempDir,
}

impl Harness {
    /// Mock agent exporting `/data`, talker with `conn_count` connections,
    /// hoarder in a temp directory, filesystem over one root.
    pub fn new(files: Vec<(&str, MockFile)>, conn_count: usize) -> Self {
        Self::with_config(files, conn_count, 0, std::time::Duration::from_secs(30))
    }

    pub fn with_config(
        files: Vec<(&str, MockFile)>,
        conn_count: usize,
        chunk_size: usize,
        keepalive_interval: std::time::Duration,
    ) -> Self {
        let runtime = tokio::runtime::Runtime::new().unwrap();
        let agent = runtime.block_on(MockAgent::start(files, chunk_size));
        let roots = vec![agent.root("/data")];

        let talker = runtime
            .block_on(Talker::connect(
                &roots,
                TalkerConfig {
                    conn_count,
                    keepalive_interval,
                    ..Default::default()
                },
                None,
            ))
            .unwrap();

        let cache_dir = tempfile::tempdir().unwrap();
        let hoarder = Hoarder::new(HoarderConfig {
            cache_dir: cache_dir.path().join("cache"),
            capacity: 100,
        })
        .unwrap();

        let client = Arc::new(Client::new(
            Arc::new(talker),
            Arc::new(hoarder),
            1000,
            1000,
            runtime.handle().clone(),
        ));
        let fs = TetherFs::new(client, &roots);

        Self {
            runtime,
            agent,
            fs,
            _cache_dir: cache_dir,
        }
    }

    pub fn block_on<F: std::future::Future>(&self, f: F) -> F::Output {
        self.runtime.block_on(f)
    }

    /// Inode of the single remote root under the filesystem root.
    pub fn root_ino(&self) -> u64 {
        self.fs
            .child_of(tetherfs_fuse::node::ROOT_INODE, &self.agent.hostname)
            .unwrap()
    }
}
