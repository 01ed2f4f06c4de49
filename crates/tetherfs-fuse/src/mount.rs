//! Mount lifecycle: builds the client stack from a configuration and
//! blocks on the FUSE session until unmount.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use fuser::MountOption;
use tetherfs_transport::{Talker, TalkerConfig};
use tracing::info;

use crate::client::Client;
use crate::config::FsConfig;
use crate::error::{FsError, Result};
use crate::filesystem::TetherFs;
use crate::hoarder::{Hoarder, HoarderConfig};

/// Checks a mountpoint before handing it to the kernel.
pub fn validate_mountpoint(path: &Path) -> Result<()> {
    if !path.exists() {
        return Err(FsError::Config(format!(
            "mount point does not exist: {}",
            path.display()
        )));
    }
    if !path.is_dir() {
        return Err(FsError::Config(format!(
            "mount point is not a directory: {}",
            path.display()
        )));
    }
    Ok(())
}

/// Connects the pools, builds the client and serves the mount. Blocks the
/// calling thread until the filesystem is unmounted; the runtime handle
/// keeps transport tasks running elsewhere.
pub fn mount_and_serve(config: FsConfig, runtime: tokio::runtime::Handle) -> anyhow::Result<()> {
    config.validate()?;
    let mount_point = PathBuf::from(&config.mount_point);
    validate_mountpoint(&mount_point)?;

    let talker_config = TalkerConfig {
        conn_count: config.conn_count,
        ..TalkerConfig::default()
    };
    let talker = runtime.block_on(Talker::connect(
        &config.remote_roots,
        talker_config,
        None,
    ))?;
    info!(
        remotes = config.remote_roots.len(),
        conn_count = config.conn_count,
        "connected to remote agents"
    );

    let hoarder = Hoarder::new(HoarderConfig {
        cache_dir: PathBuf::from(&config.cache_location),
        capacity: config.cache_entries,
    })?;

    let client = Arc::new(Client::new(
        Arc::new(talker),
        Arc::new(hoarder),
        config.effective_uid(),
        config.effective_gid(),
        runtime,
    ));
    let fs = TetherFs::new(client, &config.remote_roots);

    let options = [
        MountOption::FSName("tetherfs".to_string()),
        MountOption::DefaultPermissions,
    ];
    info!(mount_point = %mount_point.display(), "mounting");
    fuser::mount2(fs, &mount_point, &options)?;
    info!("unmounted");
    Ok(())
}
