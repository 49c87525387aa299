// SPDX-License-Identifier: Apache-2.0
// Copyright © 2025 Au-Zone Technologies. All Rights Reserved.

//! # EXACT Annotation Sync
//!
//! Synchronizes image annotations between local tables and an EXACT
//! annotation server. The crate resolves (and creates when missing) the
//! remote team, image set, product and annotation types, registers local
//! images exactly once, and reads, clears and uploads annotations in bounded
//! batches.
//!
//! ## Features
//!
//! - **Target resolution**: idempotent find-or-create of the remote entities
//!   an upload needs
//! - **Image sync**: filename based deduplication within an image set, and
//!   image download for the read path
//! - **Annotation read**: one listing per image awaited concurrently, with a
//!   hard failure when a listing may be truncated
//! - **Annotation write**: validated, batched bulk create and bulk delete
//! - **Tables**: JSON and (with `polars`) Arrow annotation tables with the
//!   `Image, Path, Type, Vector, Label, Product, ID, UUID, Time` columns
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use exact_sync::{Client, Error, Settings, SyncOptions, Synchronizer};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Error> {
//!     let settings = Settings::load(None)?;
//!     let client = Client::new(&settings)?;
//!     let sync = Synchronizer::new(client, SyncOptions::try_from(&settings)?);
//!
//!     let target = sync
//!         .resolve_target("Team", "Street Scenes", "Roads", &["road", "sidewalk"], "poly")
//!         .await?;
//!     println!("Using image set {}", target.image_set());
//!
//!     Ok(())
//! }
//! ```
//!
//! ## Optional Features
//!
//! - `polars`: Arrow annotation tables through Polars DataFrames (default)
//! - `profiling`: `tracing` spans around the sync operations

mod api;
mod client;
mod config;
mod error;
pub mod gateway;
mod images;
mod memory;
mod reader;
mod resolver;
pub mod retry;
mod sync;
pub mod table;
mod writer;

pub use crate::{
    api::{
        Annotation, AnnotationID, AnnotationType, AnnotationTypeID, Image, ImageEntry, ImageID,
        ImageIdMap, ImageSet, ImageSetID, ImageSourceType, NewAnnotation, Product, ProductID,
        Target, Team, TeamID, VectorType,
    },
    client::Client,
    config::{
        DEFAULT_CREATE_BATCH_SIZE, DEFAULT_DELETE_BATCH_SIZE, DEFAULT_REQUEST_CEILING, Settings,
        SyncOptions,
    },
    error::Error,
    gateway::{Gateway, Page, Query},
    memory::MemoryGateway,
    reader::ProductRef,
    sync::{Progress, Synchronizer},
    table::{AnnotationRecord, read_records, write_records},
};

#[cfg(feature = "polars")]
pub use crate::table::{annotations_dataframe, records_from_dataframe};

#[cfg(test)]
mod tests {
    #[ctor::ctor]
    fn init() {
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    }
}
