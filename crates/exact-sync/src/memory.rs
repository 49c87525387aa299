// SPDX-License-Identifier: Apache-2.0
// Copyright © 2025 Au-Zone Technologies. All Rights Reserved.

//! In-memory implementation of the remote gateway.
//!
//! [`MemoryGateway`] behaves like a small EXACT server: records are stored
//! as JSON objects per endpoint, listings honour name/scope filters together
//! with `limit`/`offset` pagination, and the product → image set relation is
//! mirrored into each image set's `product_set`. Every call is accounted for
//! so tests can assert on the exact remote traffic a sync operation produced,
//! and failures can be injected into the bulk annotation calls.

use crate::{
    Annotation, AnnotationID, Error, Image, ImageID, ImageSet, ImageSetID, ImageSourceType,
    Product,
    api::NewAnnotation,
    gateway::{Gateway, Page, Query, Resource},
};
use chrono::Utc;
use log::trace;
use serde::Serialize;
use serde_json::{Map, Value};
use std::{
    collections::HashMap,
    path::Path,
    sync::{Mutex, MutexGuard, PoisonError},
};

const PAGING_KEYS: [&str; 3] = ["limit", "offset", "pagination"];

#[derive(Default)]
struct Store {
    records: HashMap<&'static str, Vec<Value>>,
    files: HashMap<u64, Vec<u8>>,
    next_id: u64,
    list_calls: HashMap<&'static str, usize>,
    creates: HashMap<&'static str, usize>,
    updates: usize,
    uploads: usize,
    downloads: usize,
    annotation_batches: Vec<usize>,
    delete_batches: Vec<Vec<AnnotationID>>,
    fail_annotation_batch: Option<usize>,
    fail_delete_batch: Option<usize>,
}

impl Store {
    fn allocate_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    fn insert(&mut self, endpoint: &'static str, mut record: Map<String, Value>) -> Value {
        let id = self.allocate_id();
        record.insert("id".to_owned(), Value::from(id));
        let record = Value::Object(record);
        self.records
            .entry(endpoint)
            .or_default()
            .push(record.clone());
        *self.creates.entry(endpoint).or_default() += 1;
        record
    }

    fn find_mut(&mut self, endpoint: &'static str, id: u64) -> Option<&mut Value> {
        self.records
            .get_mut(endpoint)?
            .iter_mut()
            .find(|record| record["id"].as_u64() == Some(id))
    }

    /// Mirrors a product's `imagesets` into each image set's `product_set`.
    fn link_product(&mut self, product: &Value) {
        let Some(product_id) = product["id"].as_u64() else {
            return;
        };
        let image_sets: Vec<u64> = product["imagesets"]
            .as_array()
            .map(|ids| ids.iter().filter_map(Value::as_u64).collect())
            .unwrap_or_default();

        for image_set in image_sets {
            if let Some(record) = self.find_mut(ImageSet::ENDPOINT, image_set) {
                push_unique(record, "product_set", product_id);
            }
        }
    }
}

fn push_unique(record: &mut Value, key: &str, id: u64) {
    let Some(object) = record.as_object_mut() else {
        return;
    };
    let entry = object
        .entry(key.to_owned())
        .or_insert_with(|| Value::Array(vec![]));
    if let Some(ids) = entry.as_array_mut()
        && !ids.iter().any(|v| v.as_u64() == Some(id))
    {
        ids.push(Value::from(id));
    }
}

fn field_matches(field: Option<&Value>, expected: &str) -> bool {
    match field {
        Some(Value::String(s)) => s == expected,
        Some(Value::Number(n)) => n.to_string() == expected,
        Some(Value::Bool(b)) => b.to_string() == expected,
        Some(Value::Array(items)) => items.iter().any(|v| field_matches(Some(v), expected)),
        _ => false,
    }
}

fn to_object<B: Serialize>(body: &B) -> Result<Map<String, Value>, Error> {
    match serde_json::to_value(body)? {
        Value::Object(object) => Ok(object),
        other => Err(Error::InvalidParameters(format!(
            "Request body must be a JSON object, got {}",
            other
        ))),
    }
}

fn not_found(kind: &str, id: u64) -> Error {
    Error::RemoteError(404, format!("{} {} does not exist", kind, id))
}

/// In-memory EXACT server for tests and offline dry runs.
///
/// # Examples
///
/// ```rust
/// use exact_sync::{MemoryGateway, SyncOptions, Synchronizer, Team};
/// use exact_sync::gateway::Resource;
///
/// # #[tokio::main]
/// # async fn main() -> Result<(), exact_sync::Error> {
/// let sync = Synchronizer::new(MemoryGateway::new(), SyncOptions::default());
/// let target = sync
///     .resolve_target("T1", "S1", "P1", &["road"], "poly")
///     .await?;
/// assert_eq!(target.annotation_types().len(), 1);
/// assert_eq!(sync.gateway().creates(Team::ENDPOINT), 1);
/// # Ok(())
/// # }
/// ```
pub struct MemoryGateway {
    store: Mutex<Store>,
    default_page_size: usize,
    max_page_size: usize,
}

impl Default for MemoryGateway {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for MemoryGateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryGateway")
            .field("default_page_size", &self.default_page_size)
            .field("max_page_size", &self.max_page_size)
            .finish()
    }
}

impl MemoryGateway {
    /// Creates an empty server with a default page size of 100 rows.
    pub fn new() -> Self {
        MemoryGateway {
            store: Mutex::new(Store::default()),
            default_page_size: 100,
            max_page_size: usize::MAX,
        }
    }

    /// Number of rows returned by listings that do not pass a `limit`.
    pub fn with_default_page_size(mut self, page_size: usize) -> Self {
        self.default_page_size = page_size.max(1);
        self
    }

    /// Caps the rows of any listing page regardless of the requested `limit`.
    pub fn with_max_page_size(mut self, page_size: usize) -> Self {
        self.max_page_size = page_size.max(1);
        self
    }

    /// Makes the bulk create call with the given zero-based batch index fail.
    pub fn fail_annotation_batch(self, batch: usize) -> Self {
        self.lock().fail_annotation_batch = Some(batch);
        self
    }

    /// Makes the bulk delete call with the given zero-based batch index fail.
    pub fn fail_delete_batch(self, batch: usize) -> Self {
        self.lock().fail_delete_batch = Some(batch);
        self
    }

    /// Every stored record of kind `R`, in creation order.
    pub fn records<R: Resource>(&self) -> Vec<R> {
        self.lock()
            .records
            .get(R::ENDPOINT)
            .map(|records| {
                records
                    .iter()
                    .filter_map(|r| serde_json::from_value(r.clone()).ok())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Number of listing calls issued against an endpoint.
    pub fn list_calls(&self, endpoint: &str) -> usize {
        self.lock().list_calls.get(endpoint).copied().unwrap_or(0)
    }

    /// Number of records created on an endpoint, including uploaded images
    /// and bulk-created annotations.
    pub fn creates(&self, endpoint: &str) -> usize {
        self.lock().creates.get(endpoint).copied().unwrap_or(0)
    }

    pub fn updates(&self) -> usize {
        self.lock().updates
    }

    pub fn uploads(&self) -> usize {
        self.lock().uploads
    }

    pub fn downloads(&self) -> usize {
        self.lock().downloads
    }

    /// Sizes of the successful bulk create calls, in call order.
    pub fn annotation_batches(&self) -> Vec<usize> {
        self.lock().annotation_batches.clone()
    }

    /// Ids passed to each successful bulk delete call, in call order.
    pub fn delete_batches(&self) -> Vec<Vec<AnnotationID>> {
        self.lock().delete_batches.clone()
    }

    fn lock(&self) -> MutexGuard<'_, Store> {
        self.store.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn store(&self) -> Result<MutexGuard<'_, Store>, Error> {
        self.store.lock().map_err(|e| {
            Error::IoError(std::io::Error::other(format!(
                "Memory gateway lock poisoned: {}",
                e
            )))
        })
    }
}

impl Gateway for MemoryGateway {
    async fn list<R: Resource>(&self, query: &Query) -> Result<Page<R>, Error> {
        let mut store = self.store()?;
        *store.list_calls.entry(R::ENDPOINT).or_default() += 1;

        let filters: Vec<_> = query
            .params()
            .iter()
            .filter(|(key, _)| !PAGING_KEYS.contains(&key.as_str()))
            .collect();

        let matches: Vec<&Value> = store
            .records
            .get(R::ENDPOINT)
            .map(|records| {
                records
                    .iter()
                    .filter(|record| {
                        filters
                            .iter()
                            .all(|(key, value)| field_matches(record.get(key.as_str()), value))
                    })
                    .collect()
            })
            .unwrap_or_default();

        let count = matches.len();
        let offset = query.offset_value().unwrap_or(0);
        let limit = query
            .limit_value()
            .unwrap_or(self.default_page_size)
            .min(self.max_page_size);
        let results = matches
            .into_iter()
            .skip(offset)
            .take(limit)
            .map(|record| serde_json::from_value(record.clone()))
            .collect::<Result<Vec<R>, _>>()?;

        trace!(
            "memory list {} {:?}: {} of {}",
            R::ENDPOINT,
            query.params(),
            results.len(),
            count
        );

        let next = (offset + results.len() < count)
            .then(|| format!("{}?offset={}", R::ENDPOINT, offset + results.len()));
        let previous = (offset > 0).then(|| format!("{}?offset={}", R::ENDPOINT, offset));

        Ok(Page {
            count,
            next,
            previous,
            results,
        })
    }

    async fn retrieve<R: Resource>(&self, id: u64) -> Result<R, Error> {
        let mut store = self.store()?;
        let record = store
            .find_mut(R::ENDPOINT, id)
            .ok_or_else(|| not_found(R::KIND, id))?
            .clone();
        Ok(serde_json::from_value(record)?)
    }

    async fn create<R: Resource, B: Serialize + Sync>(&self, body: &B) -> Result<R, Error> {
        let mut object = to_object(body)?;
        if R::ENDPOINT == ImageSet::ENDPOINT {
            object
                .entry("images".to_owned())
                .or_insert_with(|| Value::Array(vec![]));
            object
                .entry("product_set".to_owned())
                .or_insert_with(|| Value::Array(vec![]));
        }

        let mut store = self.store()?;
        let record = store.insert(R::ENDPOINT, object);
        if R::ENDPOINT == Product::ENDPOINT {
            store.link_product(&record);
        }
        Ok(serde_json::from_value(record)?)
    }

    async fn update<R: Resource>(&self, id: u64, patch: &Value) -> Result<R, Error> {
        let patch = to_object(patch)?;
        let mut store = self.store()?;
        let record = store
            .find_mut(R::ENDPOINT, id)
            .ok_or_else(|| not_found(R::KIND, id))?;
        if let Some(object) = record.as_object_mut() {
            for (key, value) in patch {
                if key != "id" {
                    object.insert(key, value);
                }
            }
        }
        let record = record.clone();
        store.updates += 1;
        if R::ENDPOINT == Product::ENDPOINT {
            store.link_product(&record);
        }
        Ok(serde_json::from_value(record)?)
    }

    async fn delete<R: Resource>(&self, id: u64) -> Result<(), Error> {
        let mut store = self.store()?;
        let records = store.records.entry(R::ENDPOINT).or_default();
        let before = records.len();
        records.retain(|record| record["id"].as_u64() != Some(id));
        if records.len() == before {
            return Err(not_found(R::KIND, id));
        }
        Ok(())
    }

    async fn upload_image(
        &self,
        image_set: ImageSetID,
        path: &Path,
        source: ImageSourceType,
    ) -> Result<Image, Error> {
        let filename = path
            .file_name()
            .and_then(|name| name.to_str())
            .ok_or_else(|| Error::InvalidParameters(format!("Invalid image path {:?}", path)))?
            .to_owned();
        let bytes = tokio::fs::read(path).await?;

        let mut store = self.store()?;
        store
            .find_mut(ImageSet::ENDPOINT, image_set.value())
            .ok_or_else(|| not_found(ImageSet::KIND, image_set.value()))?;

        let mut object = Map::new();
        object.insert("name".to_owned(), Value::from(filename.clone()));
        object.insert("filename".to_owned(), Value::from(filename));
        object.insert("image_set".to_owned(), Value::from(image_set.value()));
        object.insert("image_type".to_owned(), Value::from(source.code()));
        let record = store.insert(Image::ENDPOINT, object);
        store.uploads += 1;

        let id = record["id"].as_u64().ok_or(Error::InvalidResponse)?;
        store.files.insert(id, bytes);
        if let Some(set) = store.find_mut(ImageSet::ENDPOINT, image_set.value()) {
            push_unique(set, "images", id);
        }

        Ok(serde_json::from_value(record)?)
    }

    async fn download_image(&self, id: ImageID, target: &Path) -> Result<(), Error> {
        let bytes = {
            let mut store = self.store()?;
            store
                .find_mut(Image::ENDPOINT, id.value())
                .ok_or_else(|| not_found(Image::KIND, id.value()))?;
            store.downloads += 1;
            store.files.get(&id.value()).cloned().unwrap_or_default()
        };
        tokio::fs::write(target, bytes).await?;
        Ok(())
    }

    async fn create_annotations(&self, body: &[NewAnnotation]) -> Result<Vec<Annotation>, Error> {
        let mut store = self.store()?;
        let batch = store.annotation_batches.len();
        if store.fail_annotation_batch == Some(batch) {
            store.fail_annotation_batch = None;
            return Err(Error::RemoteError(
                500,
                format!("injected failure on create batch {}", batch),
            ));
        }

        let now = Utc::now().to_rfc3339();
        let mut created = Vec::with_capacity(body.len());
        for annotation in body {
            let mut object = to_object(annotation)?;
            object.insert("deleted".to_owned(), Value::Bool(false));
            object.insert("last_edit_time".to_owned(), Value::from(now.clone()));
            let record = store.insert(Annotation::ENDPOINT, object);
            created.push(serde_json::from_value(record)?);
        }
        store.annotation_batches.push(body.len());

        Ok(created)
    }

    async fn delete_annotations(&self, ids: &str) -> Result<(), Error> {
        let ids = ids
            .split(',')
            .map(|id| id.trim().parse::<u64>())
            .collect::<Result<Vec<_>, _>>()?;

        let mut store = self.store()?;
        let batch = store.delete_batches.len();
        if store.fail_delete_batch == Some(batch) {
            store.fail_delete_batch = None;
            return Err(Error::RemoteError(
                500,
                format!("injected failure on delete batch {}", batch),
            ));
        }

        if let Some(records) = store.records.get_mut(Annotation::ENDPOINT) {
            records.retain(|record| {
                record["id"]
                    .as_u64()
                    .is_none_or(|id| !ids.contains(&id))
            });
        }
        store
            .delete_batches
            .push(ids.into_iter().map(AnnotationID::from).collect());

        Ok(())
    }
}
