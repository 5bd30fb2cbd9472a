//! Binary Resolver
//!
//! Maps a binary reference to a cached file, fetching metadata and content
//! from the content service only when the local copy is missing or stale.
//!
//! Two addressing schemes are supported and never compared:
//! - by path: metadata is always fetched, then the local file is refreshed
//!   if it predates the remote publish time
//! - by id: a local file named `*_<ns><pub>-<id><non-digit>*` is served
//!   without any remote call; otherwise metadata is fetched and the binary
//!   downloaded to its storage path

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;

use tokio::runtime::Handle;
use tracing::{debug, error, warn};

use crate::cache::CacheStore;
use crate::config::ResolverConfig;
use crate::content::{
    BinaryComponent, BinaryKey, ContentClient, ContentError, ContextData, Downloader,
    GraphQlClient, HttpDownloader, Namespace, Variant,
};

/// Content type used when the service reports none
pub const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";

/// Storage paths under this segment never change once published
const VERSIONED_SEGMENT: &str = "/system/";

/// Identifies one logical binary within a namespace and publication
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BinaryReference {
    pub namespace: Namespace,
    pub publication_id: u32,
    pub key: BinaryKey,
}

impl BinaryReference {
    pub fn by_id(namespace: Namespace, publication_id: u32, binary_id: u64) -> Self {
        Self {
            namespace,
            publication_id,
            key: BinaryKey::Id(binary_id),
        }
    }

    pub fn by_path(namespace: Namespace, publication_id: u32, path: impl Into<String>) -> Self {
        Self {
            namespace,
            publication_id,
            key: BinaryKey::Path(path.into()),
        }
    }
}

/// A cached binary, present on disk when returned
#[derive(Debug, Clone, PartialEq)]
pub struct CachedFile {
    pub path: PathBuf,
    pub last_modified: SystemTime,
    pub content_type: String,
    /// Safe for long-lived HTTP caching
    pub versioned: bool,
}

/// Whether a storage path lies in the reserved system area
pub fn is_versioned(storage_path: &str) -> bool {
    storage_path.contains(VERSIONED_SEGMENT)
}

/// Best-effort content type for files served without metadata
fn content_type_for(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase());
    match ext.as_deref() {
        Some("png") => "image/png",
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("gif") => "image/gif",
        Some("svg") => "image/svg+xml",
        Some("webp") => "image/webp",
        Some("ico") => "image/x-icon",
        Some("pdf") => "application/pdf",
        Some("zip") => "application/zip",
        Some("json") => "application/json",
        Some("xml") => "application/xml",
        Some("css") => "text/css",
        Some("js") => "application/javascript",
        Some("html") | Some("htm") => "text/html",
        Some("txt") => "text/plain",
        Some("mp4") => "video/mp4",
        Some("webm") => "video/webm",
        Some("mp3") => "audio/mpeg",
        Some("woff") => "font/woff",
        Some("woff2") => "font/woff2",
        _ => DEFAULT_CONTENT_TYPE,
    }
}

/// Chooses the authoritative variant of a binary
pub trait VariantSelector: Send + Sync {
    fn select<'a>(&self, variants: &'a [Variant]) -> Option<&'a Variant>;
}

/// Selects the first reported variant
#[derive(Debug, Clone, Copy, Default)]
pub struct FirstVariant;

impl VariantSelector for FirstVariant {
    fn select<'a>(&self, variants: &'a [Variant]) -> Option<&'a Variant> {
        variants.first()
    }
}

impl<F> VariantSelector for F
where
    F: for<'a> Fn(&'a [Variant]) -> Option<&'a Variant> + Send + Sync,
{
    fn select<'a>(&self, variants: &'a [Variant]) -> Option<&'a Variant> {
        self(variants)
    }
}

/// A variant that is complete enough to download
struct Selected {
    variant: Variant,
    download_url: String,
}

pub struct BinaryResolver {
    store: CacheStore,
    client: Arc<dyn ContentClient>,
    downloader: Arc<dyn Downloader>,
    selector: Box<dyn VariantSelector>,
}

impl BinaryResolver {
    pub fn new(
        store: CacheStore,
        client: Arc<dyn ContentClient>,
        downloader: Arc<dyn Downloader>,
    ) -> Self {
        Self {
            store,
            client,
            downloader,
            selector: Box::new(FirstVariant),
        }
    }

    /// Build a resolver backed by the GraphQL client and HTTP downloader
    pub fn from_config(config: &ResolverConfig, runtime: Handle) -> Result<Self, ContentError> {
        let store = CacheStore::from_config(config)?;
        let client = GraphQlClient::new(config, runtime.clone())?;
        let downloader = HttpDownloader::new(config, runtime)?;
        Ok(Self::new(store, Arc::new(client), Arc::new(downloader)))
    }

    /// Replace the variant selection policy
    pub fn with_selector(mut self, selector: impl VariantSelector + 'static) -> Self {
        self.selector = Box::new(selector);
        self
    }

    pub fn store(&self) -> &CacheStore {
        &self.store
    }

    /// Resolve a reference with either addressing scheme.
    ///
    /// `Ok(None)` means no content is available: the service knows the
    /// binary but its metadata is incomplete, or the context forbids
    /// caching and there is no local copy.
    pub fn resolve(
        &self,
        reference: &BinaryReference,
        context: &ContextData,
    ) -> Result<Option<CachedFile>, ContentError> {
        match &reference.key {
            BinaryKey::Id(id) => self.lookup_by_id(
                reference.namespace,
                reference.publication_id,
                *id,
                !context.no_media_cache,
            ),
            BinaryKey::Path(path) => {
                self.resolve_by_path(reference.namespace, reference.publication_id, path, context)
            }
        }
    }

    /// Resolve a binary by its path within the publication
    pub fn resolve_by_path(
        &self,
        namespace: Namespace,
        publication_id: u32,
        path: &str,
        context: &ContextData,
    ) -> Result<Option<CachedFile>, ContentError> {
        let target = self.store.path_for(namespace, publication_id, path)?;
        let key = BinaryKey::Path(path.to_string());

        let component = self
            .client
            .get_binary_component(namespace, publication_id, &key, context)?
            .ok_or_else(|| {
                ContentError::NotFound(format!(
                    "No binary found for pubId: [{}] and path: {}",
                    publication_id, path
                ))
            })?;

        let Some(selected) = self.select_variant(&component, namespace, &key) else {
            return Ok(None);
        };
        self.materialize(namespace, publication_id, target, selected, !context.no_media_cache)
    }

    /// Resolve a binary by id, serving any matching local file directly
    pub fn resolve_by_id(
        &self,
        namespace: Namespace,
        publication_id: u32,
        binary_id: u64,
    ) -> Result<Option<CachedFile>, ContentError> {
        self.lookup_by_id(namespace, publication_id, binary_id, true)
    }

    fn lookup_by_id(
        &self,
        namespace: Namespace,
        publication_id: u32,
        binary_id: u64,
        cache: bool,
    ) -> Result<Option<CachedFile>, ContentError> {
        let candidates = self.store.find_by_id(namespace, publication_id, binary_id)?;
        if let Some(first) = candidates.first() {
            if candidates.len() > 1 {
                warn!(
                    binary_id = binary_id,
                    publication = publication_id,
                    candidates = ?candidates,
                    "More than one cached file for binary, taking the first"
                );
            }
            debug!(binary_id = binary_id, path = %first.display(), "Binary cache HIT");
            return self.local_file(namespace, publication_id, first).map(Some);
        }

        debug!(
            binary_id = binary_id,
            publication = publication_id,
            namespace = %namespace,
            "Binary cache MISS, fetching metadata"
        );

        let key = BinaryKey::Id(binary_id);
        let component = self
            .client
            .get_binary_component(namespace, publication_id, &key, &ContextData::default())?
            .ok_or_else(|| {
                ContentError::NotFound(format!(
                    "There is no binary with binaryId: {} for publication: {}",
                    binary_id, publication_id
                ))
            })?;

        let Some(selected) = self.select_variant(&component, namespace, &key) else {
            return Ok(None);
        };
        let Some(storage_path) = selected
            .variant
            .storage_path
            .as_deref()
            .filter(|p| !p.is_empty())
        else {
            error!(
                component = ?component.id,
                namespace = %namespace,
                "Binary variant storage path is missing"
            );
            return Ok(None);
        };

        let target = self.store.path_for(namespace, publication_id, storage_path)?;
        self.materialize(namespace, publication_id, target, selected, cache)
    }

    /// Base URL of a publication
    pub fn resolve_publication_url(
        &self,
        namespace: Namespace,
        publication_id: u32,
        context: &ContextData,
    ) -> Result<String, ContentError> {
        self.client.get_publication_url(namespace, publication_id, context)
    }

    /// Pick the authoritative variant; incomplete metadata is logged and
    /// yields `None`.
    fn select_variant(
        &self,
        component: &BinaryComponent,
        namespace: Namespace,
        key: &BinaryKey,
    ) -> Option<Selected> {
        let edges = component.variants.as_ref().map(|v| v.edges.is_some());
        let variants = component.variant_list();
        if variants.is_empty() {
            let reason = match edges {
                None => "Variants null",
                Some(false) => "Edges null",
                Some(true) => "Edges empty",
            };
            error!(
                component = ?component.id,
                key = %key,
                namespace = %namespace,
                "Unable to get binary data ({})", reason
            );
            return None;
        }

        let Some(variant) = self.selector.select(&variants) else {
            error!(
                component = ?component.id,
                key = %key,
                namespace = %namespace,
                variants = variants.len(),
                "No binary variant selected"
            );
            return None;
        };

        match variant.download_url.as_deref() {
            Some(url) if !url.is_empty() => Some(Selected {
                download_url: url.to_string(),
                variant: variant.clone(),
            }),
            _ => {
                error!(
                    component = ?component.id,
                    key = %key,
                    namespace = %namespace,
                    "Binary variant download URL is missing"
                );
                None
            }
        }
    }

    /// Make sure `target` holds the selected variant's current content.
    /// With `cache` unset an existing file is served as is and nothing is
    /// downloaded.
    fn materialize(
        &self,
        namespace: Namespace,
        publication_id: u32,
        target: PathBuf,
        selected: Selected,
        cache: bool,
    ) -> Result<Option<CachedFile>, ContentError> {
        let Selected {
            variant,
            download_url,
        } = selected;
        let published = variant.last_publish.map(SystemTime::from);

        let last_modified = if !cache {
            debug!(path = %target.display(), "File cannot be cached");
            if !target.is_file() {
                return Ok(None);
            }
            self.store.last_modified(&target)?
        } else if self.store.needs_refresh(&target, published)? {
            debug!(path = %target.display(), "File needs to be refreshed");
            // Download outside the refresh lock; commit takes it again.
            let staged = self.downloader.download_content(&target, &download_url)?;
            self.store
                .commit(namespace, publication_id, &target, staged, published)?
        } else {
            debug!(path = %target.display(), "File does not need to be refreshed");
            self.store.last_modified(&target)?
        };

        let content_type = variant
            .mime_type
            .filter(|t| !t.is_empty())
            .unwrap_or_else(|| DEFAULT_CONTENT_TYPE.to_string());
        let versioned = variant.storage_path.as_deref().is_some_and(is_versioned);

        Ok(Some(CachedFile {
            path: target,
            last_modified,
            content_type,
            versioned,
        }))
    }

    /// Describe a file found by the id index, without remote metadata
    fn local_file(
        &self,
        namespace: Namespace,
        publication_id: u32,
        path: &Path,
    ) -> Result<CachedFile, ContentError> {
        let media_dir = self.store.media_dir(namespace, publication_id);
        // storage paths are reported rooted at the media directory
        let storage_path = format!(
            "/{}",
            path.strip_prefix(&media_dir)
                .unwrap_or(path)
                .to_string_lossy()
                .replace('\\', "/")
        );

        Ok(CachedFile {
            path: path.to_path_buf(),
            last_modified: self.store.last_modified(path)?,
            content_type: content_type_for(path).to_string(),
            versioned: is_versioned(&storage_path),
        })
    }
}
