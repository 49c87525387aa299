// SPDX-License-Identifier: Apache-2.0
// Copyright © 2025 Au-Zone Technologies. All Rights Reserved.

//! Remote resource gateway abstraction.
//!
//! The sync layer never talks HTTP directly. Every remote call goes through a
//! [`Gateway`], which exposes the EXACT resources (teams, image sets,
//! products, annotation types, images and annotations) as a uniform
//! `list / retrieve / create / update / delete` capability set plus the few
//! bulk and file operations the server offers.
//!
//! Two implementations ship with the crate:
//!
//! - [`Client`][crate::Client]: the reqwest based HTTP transport.
//! - [`MemoryGateway`][crate::MemoryGateway]: an in-memory server used for
//!   tests and dry runs.

use crate::{
    Error, Image, ImageID, ImageSetID, ImageSourceType,
    api::{Annotation, NewAnnotation},
};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use std::{future::Future, path::Path};

/// Page size used when walking metadata listings with [`list_all`].
pub const LIST_PAGE_SIZE: usize = 500;

/// A remote resource kind reachable through a [`Gateway`].
pub trait Resource: DeserializeOwned + Send + Sync + 'static {
    /// Collection endpoint relative to the server root, with trailing slash.
    const ENDPOINT: &'static str;
    /// Human readable kind used in log and error messages.
    const KIND: &'static str;

    /// Raw integer identity of the record.
    fn id(&self) -> u64;
}

/// A resource that is looked up by a unique name.
pub trait Named: Resource {
    fn name(&self) -> &str;
}

/// One page of a paginated listing.
///
/// `count` is the total number of matching records on the server, which may
/// be larger than `results.len()`.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct Page<R> {
    pub count: usize,
    #[serde(default)]
    pub next: Option<String>,
    #[serde(default)]
    pub previous: Option<String>,
    pub results: Vec<R>,
}

impl<R> Default for Page<R> {
    fn default() -> Self {
        Page {
            count: 0,
            next: None,
            previous: None,
            results: vec![],
        }
    }
}

/// Filter and pagination parameters for a listing.
///
/// Parameters are kept in insertion order; setting a key twice replaces the
/// earlier value.
///
/// # Examples
///
/// ```rust
/// use exact_sync::Query;
///
/// let query = Query::new().name("road").with("product", 3).limit(50);
/// assert_eq!(query.get("name"), Some("road"));
/// assert_eq!(query.get("product"), Some("3"));
/// assert_eq!(query.limit_value(), Some(50));
/// ```
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Query {
    params: Vec<(String, String)>,
}

impl Query {
    pub fn new() -> Self {
        Query::default()
    }

    /// Adds or replaces a filter parameter.
    pub fn with(mut self, key: &str, value: impl ToString) -> Self {
        let value = value.to_string();
        match self.params.iter_mut().find(|(k, _)| k == key) {
            Some((_, v)) => *v = value,
            None => self.params.push((key.to_owned(), value)),
        }
        self
    }

    pub fn name(self, name: &str) -> Self {
        self.with("name", name)
    }

    pub fn limit(self, limit: usize) -> Self {
        self.with("limit", limit)
    }

    pub fn offset(self, offset: usize) -> Self {
        self.with("offset", offset)
    }

    pub fn deleted(self, deleted: bool) -> Self {
        self.with("deleted", deleted)
    }

    pub fn pagination(self, pagination: bool) -> Self {
        self.with("pagination", pagination)
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.params
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn limit_value(&self) -> Option<usize> {
        self.get("limit").and_then(|v| v.parse().ok())
    }

    pub fn offset_value(&self) -> Option<usize> {
        self.get("offset").and_then(|v| v.parse().ok())
    }

    pub fn params(&self) -> &[(String, String)] {
        &self.params
    }
}

/// Capability set of the remote annotation server.
///
/// Implementations perform exactly one remote round trip per call and never
/// retry on their own behalf; any retry policy belongs to the underlying
/// transport.
pub trait Gateway: Send + Sync {
    /// Lists records of kind `R` matching the query.
    fn list<R: Resource>(
        &self,
        query: &Query,
    ) -> impl Future<Output = Result<Page<R>, Error>> + Send;

    /// Retrieves a single record by id.
    fn retrieve<R: Resource>(&self, id: u64) -> impl Future<Output = Result<R, Error>> + Send;

    /// Creates a record from the given body and returns the stored record.
    fn create<R: Resource, B: Serialize + Sync>(
        &self,
        body: &B,
    ) -> impl Future<Output = Result<R, Error>> + Send;

    /// Partially updates a record with the given JSON fields.
    fn update<R: Resource>(
        &self,
        id: u64,
        patch: &serde_json::Value,
    ) -> impl Future<Output = Result<R, Error>> + Send;

    /// Deletes a single record.
    fn delete<R: Resource>(&self, id: u64) -> impl Future<Output = Result<(), Error>> + Send;

    /// Uploads an image file and registers it in the image set.
    fn upload_image(
        &self,
        image_set: ImageSetID,
        path: &Path,
        source: ImageSourceType,
    ) -> impl Future<Output = Result<Image, Error>> + Send;

    /// Downloads the original bytes of an image into `target`.
    fn download_image(
        &self,
        id: ImageID,
        target: &Path,
    ) -> impl Future<Output = Result<(), Error>> + Send;

    /// Creates a batch of annotations in a single call.
    fn create_annotations(
        &self,
        body: &[NewAnnotation],
    ) -> impl Future<Output = Result<Vec<Annotation>, Error>> + Send;

    /// Deletes the annotations named by a comma-joined id list.
    fn delete_annotations(&self, ids: &str) -> impl Future<Output = Result<(), Error>> + Send;
}

/// Collects every record matching `query` by walking offset pages of
/// `page_size` rows until the reported total has been gathered.
pub async fn list_all<G, R>(gateway: &G, query: &Query, page_size: usize) -> Result<Vec<R>, Error>
where
    G: Gateway,
    R: Resource,
{
    let mut items: Vec<R> = vec![];

    loop {
        let query = query.clone().limit(page_size).offset(items.len());
        let page = gateway.list::<R>(&query).await?;
        let fetched = page.results.len();
        items.extend(page.results);

        if fetched == 0 || items.len() >= page.count {
            break;
        }
    }

    Ok(items)
}
