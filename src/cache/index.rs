//! Id index for cached binaries
//!
//! Maps `(namespace, publication, binary id)` to the cached files whose
//! names carry that id (`*_<ns><pub>-<id><non-digit>*`). Entries are built
//! by scanning a publication's media directory on a miss and updated when
//! the cache commits a file.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};

use moka::sync::Cache;
use parking_lot::Mutex;
use regex::Regex;
use tracing::{debug, trace};

use crate::content::download::STAGING_PREFIX;
use crate::content::Namespace;

/// Index key: namespace, publication id, binary id
pub type IndexKey = (Namespace, u32, u64);

fn id_file_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"_([a-z]+)(\d+)-(\d+)").expect("static pattern"))
}

/// Ids are compared as written, so zero-padded digits never match
fn canonical_digits(digits: &str) -> Option<&str> {
    if digits.len() > 1 && digits.starts_with('0') {
        None
    } else {
        Some(digits)
    }
}

/// Extract every `(namespace, publication, binary id)` a file name claims.
///
/// `foo_tcm42-12345.png` yields `(Sites, 42, 12345)`. The id must be
/// followed by a non-digit, so `foo_tcm42-12345` yields nothing, and
/// `foo_tcm042-012345.png` yields nothing either.
pub fn parse_id_file_name(name: &str) -> Vec<IndexKey> {
    id_file_pattern()
        .captures_iter(name)
        .filter_map(|caps| {
            let end = caps.get(0)?.end();
            let next = name[end..].chars().next()?;
            if next.is_ascii_digit() {
                return None;
            }
            let namespace = Namespace::from_token(caps.get(1)?.as_str()).ok()?;
            let publication = canonical_digits(caps.get(2)?.as_str())?.parse().ok()?;
            let binary_id = canonical_digits(caps.get(3)?.as_str())?.parse().ok()?;
            Some((namespace, publication, binary_id))
        })
        .collect()
}

/// Whether `name` is a cached file for the given binary
pub fn matches_binary(name: &str, namespace: Namespace, publication_id: u32, binary_id: u64) -> bool {
    parse_id_file_name(name).contains(&(namespace, publication_id, binary_id))
}

/// Index of id-addressed files, with hit/miss counters
pub struct BinaryIndex {
    entries: Cache<IndexKey, Arc<Vec<PathBuf>>>,
    /// Held across a directory scan and by `record`, so a commit is either
    /// seen by the scan or extends its result
    scan_lock: Mutex<()>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl BinaryIndex {
    pub fn new(capacity: u64) -> Self {
        let entries = Cache::builder()
            .max_capacity(capacity)
            .name("binary_id_index")
            .build();

        Self {
            entries,
            scan_lock: Mutex::new(()),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// Candidate files for `key`, sorted by name.
    ///
    /// Served from the index while every indexed file still exists;
    /// otherwise `media_dir` is rescanned.
    pub fn lookup(&self, key: IndexKey, media_dir: &Path) -> io::Result<Vec<PathBuf>> {
        if let Some(files) = self.entries.get(&key) {
            if files.iter().all(|f| f.is_file()) {
                self.hits.fetch_add(1, Ordering::Relaxed);
                trace!(key = ?key, "Index HIT");
                return Ok(files.as_ref().clone());
            }
            debug!(key = ?key, "Indexed file disappeared, rescanning");
            self.entries.invalidate(&key);
        }

        self.misses.fetch_add(1, Ordering::Relaxed);
        trace!(key = ?key, "Index MISS");
        self.rebuild(key.0, key.1, media_dir)?;

        Ok(self
            .entries
            .get(&key)
            .map(|files| files.as_ref().clone())
            .unwrap_or_default())
    }

    /// Scan a publication's media directory and index every matching file
    fn rebuild(&self, namespace: Namespace, publication_id: u32, media_dir: &Path) -> io::Result<()> {
        let _guard = self.scan_lock.lock();
        let read_dir = match fs::read_dir(media_dir) {
            Ok(read_dir) => read_dir,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(e),
        };

        let mut found: std::collections::HashMap<IndexKey, Vec<PathBuf>> = Default::default();
        for entry in read_dir.flatten() {
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            if name.starts_with(STAGING_PREFIX) {
                continue;
            }
            for key in parse_id_file_name(name) {
                if key.0 == namespace && key.1 == publication_id {
                    found.entry(key).or_default().push(entry.path());
                }
            }
        }

        debug!(
            dir = %media_dir.display(),
            binaries = found.len(),
            "Rebuilt binary id index"
        );

        for (key, mut files) in found {
            files.sort();
            self.entries.insert(key, Arc::new(files));
        }
        Ok(())
    }

    /// Record a file committed to the media directory of
    /// `(namespace, publication_id)`. Keys that were never scanned are left
    /// for the next lookup to discover.
    pub fn record(&self, namespace: Namespace, publication_id: u32, path: &Path) {
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            return;
        };
        let _guard = self.scan_lock.lock();
        for key in parse_id_file_name(name) {
            if key.0 != namespace || key.1 != publication_id {
                continue;
            }
            if let Some(files) = self.entries.get(&key) {
                if files.iter().any(|f| f == path) {
                    continue;
                }
                let mut files = files.as_ref().clone();
                files.push(path.to_path_buf());
                files.sort();
                self.entries.insert(key, Arc::new(files));
                debug!(key = ?key, path = %path.display(), "Indexed committed file");
            }
        }
    }

    /// Returns (hits, misses, hit_rate)
    pub fn stats(&self) -> (u64, u64, f64) {
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let total = hits + misses;
        let hit_rate = if total > 0 {
            (hits as f64 / total as f64) * 100.0
        } else {
            0.0
        };
        (hits, misses, hit_rate)
    }

    /// Log current index metrics
    pub fn log_metrics(&self) {
        let (hits, misses, hit_rate) = self.stats();
        debug!(
            hits = hits,
            misses = misses,
            hit_rate = format!("{:.1}%", hit_rate),
            entries = self.entries.entry_count(),
            "Index metrics"
        );
    }
}
