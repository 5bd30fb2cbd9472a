//! Content service access: metadata client, downloader and shared types

pub mod client;
pub mod download;
pub mod errors;
pub mod types;

pub use client::{ContentClient, GraphQlClient};
pub use download::{Downloader, HttpDownloader, StagedDownload};
pub use errors::ContentError;
pub use types::*;
