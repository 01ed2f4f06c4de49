//! The one-per-mount client value.
//!
//! Owns the talker, the hoarder and the file handler, plus the identity
//! reported to the kernel and the runtime handle the synchronous VFS
//! callbacks bridge through. The filesystem holds it in an `Arc`; nodes
//! reach the transport through it rather than through globals.

use std::future::Future;
use std::sync::Arc;

use tetherfs_transport::Talker;

use crate::handler::FileHandler;
use crate::hoarder::Hoarder;

pub struct Client {
    pub talker: Arc<Talker>,
    pub hoarder: Arc<Hoarder>,
    pub handler: FileHandler,
    /// Owner uid reported for every node.
    pub uid: u32,
    /// Owner gid reported for every node.
    pub gid: u32,
    runtime: tokio::runtime::Handle,
}

impl Client {
    pub fn new(
        talker: Arc<Talker>,
        hoarder: Arc<Hoarder>,
        uid: u32,
        gid: u32,
        runtime: tokio::runtime::Handle,
    ) -> Self {
        let handler = FileHandler::new(talker.clone(), hoarder.clone());
        Self {
            talker,
            hoarder,
            handler,
            uid,
            gid,
            runtime,
        }
    }

    /// Runs a transport future to completion from a kernel callback.
    ///
    /// The FUSE session thread is not a runtime worker, so blocking here
    /// is safe; the talker's own tasks keep running on the runtime.
    pub fn block_on<F: Future>(&self, future: F) -> F::Output {
        self.runtime.block_on(future)
    }
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("uid", &self.uid)
            .field("gid", &self.gid)
            .finish()
    }
}
