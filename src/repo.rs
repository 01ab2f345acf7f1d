use std::fs::File;
use std::path::{Path, PathBuf};

use nix::fcntl::{Flock, FlockArg};

use crate::config::Config;
use crate::error::{Error, IoResultExt, Result};
use crate::labels::LabelRegistry;
use crate::store::ContentStore;

/// a dataset repository: revision graph, branch refs and label registry,
/// backed by a (possibly shared) content store
pub struct Repo {
    path: PathBuf,
    config: Config,
    store: ContentStore,
}

impl Repo {
    /// initialize a new repository at the given path with default config
    pub fn init(path: &Path) -> Result<Self> {
        Self::init_with(path, Config::default())
    }

    /// initialize a new repository with an explicit config
    pub fn init_with(path: &Path, config: Config) -> Result<Self> {
        let config_path = path.join("config.toml");
        if config_path.exists() {
            return Err(Error::RepoExists(path.to_path_buf()));
        }

        std::fs::create_dir_all(path.join("objects/commits")).with_path(path)?;
        std::fs::create_dir_all(path.join("objects/partitions")).with_path(path)?;
        std::fs::create_dir_all(path.join("refs/heads")).with_path(path)?;
        std::fs::create_dir_all(path.join("tmp")).with_path(path)?;

        let store = ContentStore::create(&config.store_path(path))?;
        LabelRegistry::load_or_create(&config.labels_path(path), true)?;
        config.save(&config_path)?;

        tracing::info!(repo = %path.display(), store = %store.root().display(), "initialized repository");

        Ok(Self {
            path: path.to_path_buf(),
            config,
            store,
        })
    }

    /// open an existing repository
    pub fn open(path: &Path) -> Result<Self> {
        let config_path = path.join("config.toml");
        if !config_path.exists() {
            return Err(Error::NoRepo(path.to_path_buf()));
        }

        let config = Config::load(&config_path)?;
        let store = ContentStore::open(&config.store_path(path))?;

        Ok(Self {
            path: path.to_path_buf(),
            config,
            store,
        })
    }

    /// repository root path
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// repository configuration
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// content store holding asset bytes
    pub fn store(&self) -> &ContentStore {
        &self.store
    }

    /// load the label registry shared by every branch of this repository
    pub fn load_labels(&self, create_if_missing: bool) -> Result<LabelRegistry> {
        LabelRegistry::load_or_create(&self.labels_path(), create_if_missing)
    }

    /// path to config.toml
    pub fn config_path(&self) -> PathBuf {
        self.path.join("config.toml")
    }

    /// path to the label registry file
    pub fn labels_path(&self) -> PathBuf {
        self.config.labels_path(&self.path)
    }

    /// path to objects directory
    pub fn objects_path(&self) -> PathBuf {
        self.path.join("objects")
    }

    /// path to commits directory
    pub fn commits_path(&self) -> PathBuf {
        self.objects_path().join("commits")
    }

    /// path to partition payload directory
    pub fn partitions_path(&self) -> PathBuf {
        self.objects_path().join("partitions")
    }

    /// path to branch refs directory
    pub fn refs_path(&self) -> PathBuf {
        self.path.join("refs/heads")
    }

    /// path to tmp directory (for atomic writes)
    pub fn tmp_path(&self) -> PathBuf {
        self.path.join("tmp")
    }

    /// path to lock file
    pub fn lock_path(&self) -> PathBuf {
        self.path.join(".lock")
    }

    /// acquire exclusive lock on repository
    /// returns a guard that releases the lock on drop
    pub fn lock(&self) -> Result<RepoLock> {
        let lock_path = self.lock_path();
        let file = File::create(&lock_path).with_path(&lock_path)?;

        let flock = Flock::lock(file, FlockArg::LockExclusiveNonblock)
            .map_err(|_| Error::LockContention)?;

        Ok(RepoLock { flock })
    }

    /// try to acquire exclusive lock, returning None if already locked
    pub fn try_lock(&self) -> Result<Option<RepoLock>> {
        let lock_path = self.lock_path();
        let file = File::create(&lock_path).with_path(&lock_path)?;

        match Flock::lock(file, FlockArg::LockExclusiveNonblock) {
            Ok(flock) => Ok(Some(RepoLock { flock })),
            Err((_, nix::errno::Errno::EWOULDBLOCK)) => Ok(None),
            Err(_) => Err(Error::LockContention),
        }
    }
}

/// guard that holds repository lock until dropped
pub struct RepoLock {
    #[allow(dead_code)]
    flock: Flock<File>,
}
