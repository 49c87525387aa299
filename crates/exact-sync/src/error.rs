// SPDX-License-Identifier: Apache-2.0
// Copyright © 2025 Au-Zone Technologies. All Rights Reserved.

use crate::ImageID;

/// Error type for EXACT synchronization operations.
///
/// Domain failures raised by the sync layer itself (unknown vector kinds,
/// truncated listings, labels or images missing from a resolved target) are
/// kept apart from transport failures, which are passed through unmodified.
#[derive(Debug)]
pub enum Error {
    /// An I/O error occurred during file operations.
    IoError(std::io::Error),
    /// Configuration parsing or loading error.
    ConfigError(config::ConfigError),
    /// JSON serialization or deserialization error.
    JsonError(serde_json::Error),
    /// HTTP request error from the reqwest client.
    HttpError(reqwest::Error),
    /// The server answered with a non-success status code and body.
    RemoteError(u16, String),
    /// URL parsing error.
    UrlParseError(url::ParseError),
    /// Integer parsing error.
    ParseIntError(std::num::ParseIntError),
    /// Server returned an invalid or unexpected response.
    InvalidResponse,
    /// Invalid parameters provided to an operation.
    InvalidParameters(String),
    /// Attempted to use a feature that is not enabled.
    FeatureNotEnabled(String),
    /// Requested geometry kind is not one of the supported vector kinds.
    UnsupportedVectorKind(String),
    /// A paginated listing returned exactly the request ceiling, so the
    /// result may be truncated.
    IncompleteRetrieval {
        /// Image whose annotation listing hit the ceiling.
        image: ImageID,
        /// The ceiling that was requested.
        limit: usize,
    },
    /// A listing ended before delivering the number of rows the server
    /// reported for it.
    TruncatedListing {
        /// Image whose annotations were being listed.
        image: ImageID,
        /// Rows reported by the server.
        expected: usize,
        /// Rows actually received.
        received: usize,
    },
    /// An annotation row references a label missing from the target.
    UnknownLabel(String),
    /// An annotation row references a local image with no remote id.
    UnmappedImage(String),
    /// A required remote entity does not exist.
    NotFound(String),
    /// Polars dataframe operation error (only with "polars" feature).
    #[cfg(feature = "polars")]
    PolarsError(polars::error::PolarsError),
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::IoError(err)
    }
}

impl From<config::ConfigError> for Error {
    fn from(err: config::ConfigError) -> Self {
        Error::ConfigError(err)
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::JsonError(err)
    }
}

impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        Error::HttpError(err)
    }
}

impl From<url::ParseError> for Error {
    fn from(err: url::ParseError) -> Self {
        Error::UrlParseError(err)
    }
}

impl From<std::num::ParseIntError> for Error {
    fn from(err: std::num::ParseIntError) -> Self {
        Error::ParseIntError(err)
    }
}

#[cfg(feature = "polars")]
impl From<polars::error::PolarsError> for Error {
    fn from(err: polars::error::PolarsError) -> Self {
        Error::PolarsError(err)
    }
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::IoError(e) => write!(f, "I/O error: {}", e),
            Error::ConfigError(e) => write!(f, "Configuration error: {}", e),
            Error::JsonError(e) => write!(f, "JSON error: {}", e),
            Error::HttpError(e) => write!(f, "HTTP error: {}", e),
            Error::RemoteError(status, body) => write!(f, "Remote error {}: {}", status, body),
            Error::UrlParseError(e) => write!(f, "URL parse error: {}", e),
            Error::ParseIntError(e) => write!(f, "Integer parse error: {}", e),
            Error::InvalidResponse => write!(f, "Invalid server response"),
            Error::InvalidParameters(s) => write!(f, "Invalid parameters: {}", s),
            Error::FeatureNotEnabled(s) => write!(f, "Feature not enabled: {}", s),
            Error::UnsupportedVectorKind(s) => write!(f, "Unsupported vector kind: {}", s),
            Error::IncompleteRetrieval { image, limit } => write!(
                f,
                "Incomplete retrieval for image {}: listing returned the request limit of {} rows",
                image, limit
            ),
            Error::TruncatedListing {
                image,
                expected,
                received,
            } => write!(
                f,
                "Truncated listing for image {}: received {} of {} rows",
                image, received, expected
            ),
            Error::UnknownLabel(s) => write!(f, "Unknown label: {}", s),
            Error::UnmappedImage(s) => write!(f, "Image has no remote id: {}", s),
            Error::NotFound(s) => write!(f, "Not found: {}", s),
            #[cfg(feature = "polars")]
            Error::PolarsError(e) => write!(f, "Polars error: {}", e),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::IoError(e) => Some(e),
            Error::ConfigError(e) => Some(e),
            Error::JsonError(e) => Some(e),
            Error::HttpError(e) => Some(e),
            Error::UrlParseError(e) => Some(e),
            Error::ParseIntError(e) => Some(e),
            #[cfg(feature = "polars")]
            Error::PolarsError(e) => Some(e),
            _ => None,
        }
    }
}
