//! Network namespace operations

use crate::error::InterfaceError;
use netns_rs::{Env, NetNs};
use rtnetlink::Handle;
use std::os::fd::{AsRawFd, RawFd};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Resolves namespaces by absolute path (`/proc/<pid>/ns/net`,
/// `/var/run/netns/<name>`) instead of by name under a fixed directory.
#[derive(Debug, Clone)]
struct PathEnv {
    dir: PathBuf,
}

impl Env for PathEnv {
    fn persist_dir(&self) -> PathBuf {
        self.dir.clone()
    }

    // The directory is owned by the kernel or the runtime, never by the agent
    fn init(&self) -> netns_rs::Result<()> {
        Ok(())
    }
}

/// Network namespace opened from a path
pub struct NamespaceManager {
    path: String,
    netns: NetNs<PathEnv>,
}

impl NamespaceManager {
    pub fn open(path: &str) -> Result<Self, InterfaceError> {
        let access = |reason: String| InterfaceError::NamespaceAccess {
            path: path.to_string(),
            reason,
        };

        let full = Path::new(path);
        let (dir, name) = match (full.parent(), full.file_name()) {
            (Some(dir), Some(name)) if full.is_absolute() => (dir, name.to_string_lossy()),
            _ => return Err(access("not an absolute namespace path".to_string())),
        };

        let netns = NetNs::get_from_env(
            name.as_ref(),
            PathEnv {
                dir: dir.to_path_buf(),
            },
        )
        .map_err(|e| access(e.to_string()))?;

        Ok(Self {
            path: path.to_string(),
            netns,
        })
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /// Descriptor used to move links into this namespace
    pub fn fd(&self) -> RawFd {
        self.netns.file().as_raw_fd()
    }

    /// Opens a netlink connection whose socket lives inside the namespace.
    /// Must be called from within a tokio runtime.
    pub fn netlink_handle(&self) -> Result<Handle, InterfaceError> {
        let access = |reason: String| InterfaceError::NamespaceAccess {
            path: self.path.clone(),
            reason,
        };

        let (connection, handle, _) = self
            .netns
            .run(|_| rtnetlink::new_connection())
            .map_err(|e| access(e.to_string()))?
            .map_err(|e| access(e.to_string()))?;
        tokio::spawn(connection);

        debug!("Opened netlink connection in {}", self.path);
        Ok(handle)
    }
}
