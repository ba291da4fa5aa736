//! Network utilities for HTTP operations, retries and artifact streaming.
//!
//! This module provides:
//! - One retry policy shared by every catalog request
//! - HTTP client with bearer auth and status mapping
//! - Download manager that streams into staging files

mod client;
mod download;
mod retry;

pub use client::HttpClient;
pub use download::{
    parse_content_disposition, promote, sanitize_file_name, ByteStream, DownloadManager,
    DownloadProgress, DownloadStream,
};
pub use retry::{retry_request, Attempted, RetryPolicy};
