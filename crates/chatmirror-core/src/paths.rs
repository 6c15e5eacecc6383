use std::path::{Path, PathBuf};

/// Well-known files under a store directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreLayout {
    root: PathBuf,
}

impl StoreLayout {
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Session credentials owned by the remote-session collaborator.
    pub fn session_db(&self) -> PathBuf {
        self.root.join("session.db")
    }

    /// Mirrored chats, contacts, groups and messages.
    pub fn store_db(&self) -> PathBuf {
        self.root.join("chatmirror.db")
    }

    pub fn media_dir(&self) -> PathBuf {
        self.root.join("media")
    }

    pub fn lock_file(&self) -> PathBuf {
        self.root.join("LOCK")
    }

    /// Rendezvous socket served by the process holding the live session.
    pub fn send_socket(&self) -> PathBuf {
        self.root.join("send.sock")
    }
}
