// SPDX-License-Identifier: Apache-2.0
// Copyright © 2025 Au-Zone Technologies. All Rights Reserved.

//! Transport retry policy with URL-based classification.
//!
//! The sync layer never retries. Retries live in the reqwest client so that a
//! rate-limited server is handled below the sync operations, and they are
//! classified by request URL:
//!
//! - **Api**: REST calls under `/api/` (listings, creates, bulk deletes).
//!   Many of these are not idempotent (bulk annotation create), so they are
//!   only retried when the server signals that the request was not processed:
//!   408 Request Timeout, 429 Too Many Requests and 503 Service Unavailable.
//!   Authentication failures and other errors are returned immediately.
//! - **Media**: image downloads (`.../download/`) and anything outside the
//!   API. Downloads are idempotent, so every transient failure is retried:
//!   408, 429, 5xx and transport errors.
//!
//! The retry count comes from [`Settings::max_retries`][crate::Settings]
//! (`EXACT_MAX_RETRIES`, default 3).
//!
//! ```rust
//! use exact_sync::retry::{RetryScope, classify_url};
//!
//! assert_eq!(
//!     classify_url("https://exact.example.org/api/v1/annotations/annotations/"),
//!     RetryScope::Api
//! );
//! assert_eq!(
//!     classify_url("https://exact.example.org/api/v1/images/images/4/download/"),
//!     RetryScope::Media
//! );
//! ```

use crate::Settings;
use url::Url;

/// Retry scope classification for URL-based retry policies.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RetryScope {
    /// REST API calls, retried only when the server did not process them.
    Api,
    /// Idempotent file transfers, retried on every transient failure.
    Media,
}

/// Classifies a URL to determine which retry policy to apply.
///
/// A URL is an API call when its path is `/api` or lies below `/api/` and it
/// is not an image download. Everything else, including unparsable URLs, is
/// treated as media.
pub fn classify_url(url: &str) -> RetryScope {
    if let Ok(parsed) = Url::parse(url)
        && (parsed.scheme() == "http" || parsed.scheme() == "https")
    {
        let path = parsed.path();
        let path_is_api = path == "/api" || path.contains("/api/");
        let is_download = path.trim_end_matches('/').ends_with("/download");

        if path_is_api && !is_download {
            return RetryScope::Api;
        }
    }

    RetryScope::Media
}

/// Creates the reqwest retry policy used by [`Client`][crate::Client].
pub fn create_retry_policy(max_retries: u32) -> reqwest::retry::Builder {
    reqwest::retry::for_host("*")
        .max_retries_per_request(max_retries)
        .classify_fn(|req_rep| {
            let url = req_rep.uri().to_string();

            match classify_url(&url) {
                RetryScope::Api => match req_rep.status() {
                    Some(status) => match status.as_u16() {
                        408 | 429 | 503 => req_rep.retryable(),
                        _ => req_rep.success(),
                    },
                    // The request may have reached the server, a retry could
                    // double-create.
                    None => req_rep.success(),
                },
                RetryScope::Media => match req_rep.status() {
                    Some(status) => match status.as_u16() {
                        408 | 429 | 500..=599 => req_rep.retryable(),
                        _ => req_rep.success(),
                    },
                    None if req_rep.error().is_some() => req_rep.retryable(),
                    None => req_rep.success(),
                },
            }
        })
}

pub fn log_retry_configuration(settings: &Settings) {
    log::debug!(
        "Retry configuration - max_retries={}, timeout={}s",
        settings.max_retries,
        settings.timeout
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_url_api() {
        assert_eq!(
            classify_url("https://exact.example.org/api/v1/users/teams/"),
            RetryScope::Api
        );
        assert_eq!(
            classify_url("https://exact.example.org/api/v1/annotations/annotations/?image=3"),
            RetryScope::Api
        );
        assert_eq!(
            classify_url("http://localhost:8000/api/v1/annotations/annotations/1,2/multiple_delete/"),
            RetryScope::Api
        );
        assert_eq!(
            classify_url("https://example.org/exact/api/v1/images/image_sets/"),
            RetryScope::Api
        );
    }

    #[test]
    fn test_classify_url_media() {
        assert_eq!(
            classify_url("https://exact.example.org/api/v1/images/images/12/download/"),
            RetryScope::Media
        );
        assert_eq!(
            classify_url("https://exact.example.org/media/images/12.png"),
            RetryScope::Media
        );
        assert_eq!(
            classify_url("https://exact.example.org/apis/v1/"),
            RetryScope::Media
        );
        assert_eq!(classify_url("not a url"), RetryScope::Media);
        assert_eq!(
            classify_url("ftp://exact.example.org/api/v1/"),
            RetryScope::Media
        );
    }
}
