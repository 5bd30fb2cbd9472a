//! Binary Cache Store
//!
//! Owns the on-disk layout `{base}/BinaryData/{publication}/media/{path}`,
//! the staleness check against a remote publish time, and atomic commits of
//! staged downloads. Refreshes are serialized per cache path through a
//! striped lock table, so unrelated binaries refresh concurrently.

use std::collections::hash_map::DefaultHasher;
use std::fs;
use std::hash::{Hash, Hasher};
use std::io;
use std::path::{Component, Path, PathBuf};
use std::time::SystemTime;

use parking_lot::{Mutex, MutexGuard};
use tracing::{debug, info};

use super::index::BinaryIndex;
use crate::config::ResolverConfig;
use crate::content::{ContentError, Namespace, StagedDownload};

/// Directory under the base path holding all binaries
pub const STATIC_FILES_DIR: &str = "BinaryData";

/// Per-publication media directory name
pub const MEDIA_DIR: &str = "media";

/// On-disk binary cache
pub struct CacheStore {
    /// Root directory (the web application's base path)
    base_path: PathBuf,
    /// Refresh locks, selected by a hash of the cache path
    locks: Vec<Mutex<()>>,
    /// Id index for id-addressed lookups
    index: BinaryIndex,
}

impl CacheStore {
    pub fn new(base_path: PathBuf, lock_stripes: usize, index_capacity: u64) -> Result<Self, ContentError> {
        let static_dir = base_path.join(STATIC_FILES_DIR);
        fs::create_dir_all(&static_dir).map_err(|e| ContentError::io(&static_dir, e))?;

        let locks = (0..lock_stripes.max(1)).map(|_| Mutex::new(())).collect();

        info!(
            base_path = %base_path.display(),
            lock_stripes = lock_stripes,
            "Binary cache initialized"
        );

        Ok(Self {
            base_path,
            locks,
            index: BinaryIndex::new(index_capacity),
        })
    }

    pub fn from_config(config: &ResolverConfig) -> Result<Self, ContentError> {
        Self::new(
            config.base_path.clone(),
            config.lock_stripes,
            config.index_capacity,
        )
    }

    /// Media directory of a publication
    pub fn media_dir(&self, namespace: Namespace, publication_id: u32) -> PathBuf {
        let mut dir = self.base_path.join(STATIC_FILES_DIR);
        if let Some(segment) = namespace.path_segment() {
            dir.push(segment);
        }
        dir.push(publication_id.to_string());
        dir.push(MEDIA_DIR);
        dir
    }

    /// Deterministic cache path for a binary's storage path.
    ///
    /// Leading slashes are ignored; parent, root and prefix components are
    /// rejected so every path stays inside the media directory.
    pub fn path_for(
        &self,
        namespace: Namespace,
        publication_id: u32,
        relative_path: &str,
    ) -> Result<PathBuf, ContentError> {
        let trimmed = relative_path.trim_start_matches('/');
        let relative = Path::new(trimmed);

        let mut has_name = false;
        for component in relative.components() {
            match component {
                Component::Normal(_) => has_name = true,
                Component::CurDir => {}
                _ => return Err(ContentError::InvalidPath(relative_path.to_string())),
            }
        }
        if !has_name {
            return Err(ContentError::InvalidPath(relative_path.to_string()));
        }

        Ok(self.media_dir(namespace, publication_id).join(relative))
    }

    /// Acquire the refresh lock guarding `path`
    pub fn lock(&self, path: &Path) -> MutexGuard<'_, ()> {
        let mut hasher = DefaultHasher::new();
        path.hash(&mut hasher);
        let stripe = (hasher.finish() % self.locks.len() as u64) as usize;
        self.locks[stripe].lock()
    }

    /// A file needs a refresh when it is missing or older than the remote
    /// publish time. An unknown publish time counts as now, so any existing
    /// file is stale.
    pub fn needs_refresh(&self, path: &Path, published: Option<SystemTime>) -> Result<bool, ContentError> {
        let _guard = self.lock(path);
        match fs::metadata(path) {
            Ok(metadata) => {
                let modified = metadata.modified().map_err(|e| ContentError::io(path, e))?;
                let published = published.unwrap_or_else(SystemTime::now);
                Ok(modified < published)
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(true),
            Err(e) => Err(ContentError::io(path, e)),
        }
    }

    /// Atomically move staged content onto `path`.
    ///
    /// Returns the committed file's modification time, which is never
    /// earlier than `published`.
    pub fn commit(
        &self,
        namespace: Namespace,
        publication_id: u32,
        path: &Path,
        staged: StagedDownload,
        published: Option<SystemTime>,
    ) -> Result<SystemTime, ContentError> {
        let _guard = self.lock(path);
        let size = staged.len();
        let file = staged.persist(path)?;

        let mut modified = file
            .metadata()
            .and_then(|m| m.modified())
            .map_err(|e| ContentError::io(path, e))?;
        if let Some(published) = published {
            if modified < published {
                file.set_modified(published)
                    .map_err(|e| ContentError::io(path, e))?;
                modified = published;
            }
        }

        self.index.record(namespace, publication_id, path);

        debug!(
            path = %path.display(),
            size = size,
            "Stored binary in cache"
        );
        Ok(modified)
    }

    /// Modification time of a cached file
    pub fn last_modified(&self, path: &Path) -> Result<SystemTime, ContentError> {
        fs::metadata(path)
            .and_then(|m| m.modified())
            .map_err(|e| ContentError::io(path, e))
    }

    /// Cached files carrying `binary_id` in their name, sorted by name
    pub fn find_by_id(
        &self,
        namespace: Namespace,
        publication_id: u32,
        binary_id: u64,
    ) -> Result<Vec<PathBuf>, ContentError> {
        let media_dir = self.media_dir(namespace, publication_id);
        self.index
            .lookup((namespace, publication_id, binary_id), &media_dir)
            .map_err(|e| ContentError::io(&media_dir, e))
    }

    pub fn index(&self) -> &BinaryIndex {
        &self.index
    }

    /// Get the cache root
    pub fn base_path(&self) -> &Path {
        &self.base_path
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tempfile::TempDir;

    fn store(dir: &TempDir) -> CacheStore {
        CacheStore::new(dir.path().to_path_buf(), 4, 1000).unwrap()
    }

    fn set_mtime(path: &Path, time: SystemTime) {
        fs::File::options()
            .write(true)
            .open(path)
            .unwrap()
            .set_modified(time)
            .unwrap();
    }

    #[test]
    fn test_path_layout() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        assert_eq!(
            store.path_for(Namespace::Sites, 1, "y.png").unwrap(),
            dir.path().join("BinaryData/1/media/y.png")
        );
        assert_eq!(
            store.path_for(Namespace::Sites, 1, "/img/y.png").unwrap(),
            dir.path().join("BinaryData/1/media/img/y.png")
        );
        assert_eq!(
            store.path_for(Namespace::Docs, 1, "y.png").unwrap(),
            dir.path().join("BinaryData/ish/1/media/y.png")
        );
    }

    #[test]
    fn test_namespaces_never_share_a_path() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        assert_ne!(
            store.path_for(Namespace::Sites, 7, "a.pdf").unwrap(),
            store.path_for(Namespace::Docs, 7, "a.pdf").unwrap()
        );
    }

    #[test]
    fn test_path_escape_rejected() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        for bad in ["../secret", "a/../../b", "", "/", "./"] {
            assert!(
                matches!(store.path_for(Namespace::Sites, 1, bad), Err(ContentError::InvalidPath(_))),
                "{bad:?} should be rejected"
            );
        }
    }

    #[test]
    fn test_needs_refresh() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        let path = store.path_for(Namespace::Sites, 1, "a.png").unwrap();

        assert!(store.needs_refresh(&path, None).unwrap());

        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, b"a").unwrap();
        let modified = fs::metadata(&path).unwrap().modified().unwrap();

        assert!(!store.needs_refresh(&path, Some(modified)).unwrap());
        assert!(!store.needs_refresh(&path, Some(modified - Duration::from_secs(60))).unwrap());
        assert!(store.needs_refresh(&path, Some(modified + Duration::from_secs(60))).unwrap());
    }

    #[test]
    fn test_unknown_publish_time_makes_existing_file_stale() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        let path = store.path_for(Namespace::Sites, 1, "a.png").unwrap();
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, b"a").unwrap();
        set_mtime(&path, SystemTime::now() - Duration::from_secs(1));

        assert!(store.needs_refresh(&path, None).unwrap());
    }

    #[test]
    fn test_commit_bumps_mtime_to_publish_time() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        let path = store.path_for(Namespace::Sites, 1, "a.png").unwrap();
        let future = SystemTime::now() + Duration::from_secs(3600);

        let staged = StagedDownload::from_bytes(&path, b"content").unwrap();
        let modified = store
            .commit(Namespace::Sites, 1, &path, staged, Some(future))
            .unwrap();

        assert_eq!(fs::read(&path).unwrap(), b"content");
        assert!(modified >= future);
        assert!(!store.needs_refresh(&path, Some(future)).unwrap());
    }

    #[test]
    fn test_commit_updates_index() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        let first = store.path_for(Namespace::Sites, 3, "a_tcm3-9.png").unwrap();
        let staged = StagedDownload::from_bytes(&first, b"a").unwrap();
        store.commit(Namespace::Sites, 3, &first, staged, None).unwrap();

        assert_eq!(store.find_by_id(Namespace::Sites, 3, 9).unwrap(), vec![first.clone()]);

        let second = store.path_for(Namespace::Sites, 3, "b_tcm3-9.png").unwrap();
        let staged = StagedDownload::from_bytes(&second, b"b").unwrap();
        store.commit(Namespace::Sites, 3, &second, staged, None).unwrap();

        assert_eq!(
            store.find_by_id(Namespace::Sites, 3, 9).unwrap(),
            vec![first, second]
        );
        assert_eq!(store.index().stats().0, 1);
    }

    #[test]
    fn test_staged_download_survives_rescan() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        let existing = store.path_for(Namespace::Sites, 1, "old_tcm1-5.png").unwrap();
        let staged = StagedDownload::from_bytes(&existing, b"old").unwrap();
        store.commit(Namespace::Sites, 1, &existing, staged, None).unwrap();

        let target = store.path_for(Namespace::Sites, 1, "a_tcm1-6.png").unwrap();
        let staged = StagedDownload::from_bytes(&target, b"new").unwrap();
        // a rescan of the same media directory while the download is staged
        assert!(store.find_by_id(Namespace::Sites, 1, 6).unwrap().is_empty());
        assert_eq!(store.find_by_id(Namespace::Sites, 1, 5).unwrap(), vec![existing]);

        store.commit(Namespace::Sites, 1, &target, staged, None).unwrap();
        assert_eq!(fs::read(&target).unwrap(), b"new");
        assert_eq!(store.find_by_id(Namespace::Sites, 1, 6).unwrap(), vec![target]);
    }
}
