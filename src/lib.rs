//! Binary content resolution and disk cache
//!
//! Serves binaries (images, documents, media) whose authoritative copies
//! live in a remote content service. A [`BinaryResolver`] maps a binary
//! reference to a file in the local cache, refreshing it from the service
//! only when it is missing or older than the remote publish time.

pub mod cache;
pub mod config;
pub mod content;
pub mod resolver;

pub use cache::CacheStore;
pub use config::ResolverConfig;
pub use content::{
    BinaryComponent, BinaryKey, ContentClient, ContentError, ContextData, Downloader,
    GraphQlClient, HttpDownloader, Namespace, StagedDownload, Variant,
};
pub use resolver::{
    is_versioned, BinaryReference, BinaryResolver, CachedFile, FirstVariant, VariantSelector,
    DEFAULT_CONTENT_TYPE,
};
