// SPDX-License-Identifier: Apache-2.0
// Copyright © 2025 Au-Zone Technologies. All Rights Reserved.

//! End-to-end session against the in-memory server: resolve, register
//! images, upload, read back, replace and read again.

use exact_sync::{
    AnnotationRecord, Error, ImageIdMap, MemoryGateway, ProductRef, SyncOptions, Synchronizer,
    gateway::Resource, read_records, write_records,
};
use serde_json::json;
use std::{collections::BTreeMap, path::PathBuf};

#[ctor::ctor]
fn init() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
}

/// Rows as `(Image, Label, Vector)` triples with the image key translated
/// to the remote id, sorted for multiset comparison.
fn triples(
    records: &[AnnotationRecord],
    images: Option<&ImageIdMap>,
) -> Vec<(String, String, String)> {
    let mut triples: Vec<_> = records
        .iter()
        .map(|r| {
            let image = match images {
                Some(images) => images
                    .get(&r.image)
                    .map(|id| id.to_string())
                    .unwrap_or_default(),
                None => r.image.clone(),
            };
            (image, r.label.clone(), r.vector.to_string())
        })
        .collect();
    triples.sort();
    triples
}

fn polygon(n: usize) -> serde_json::Value {
    json!({ "x1": n, "y1": n, "x2": n + 10, "y2": n, "x3": n + 10, "y3": n + 10 })
}

#[tokio::test]
async fn test_session_round_trip() -> Result<(), Error> {
    let sync = Synchronizer::new(MemoryGateway::new(), SyncOptions::new(1000, 4, 3)?);
    let target = sync
        .resolve_target("T1", "S1", "P1", &["sidewalk", "road"], "poly")
        .await?;

    let source = tempfile::tempdir()?;
    let mut local = vec![];
    for name in ["frame_000", "frame_001", "frame_002"] {
        let path: PathBuf = source.path().join(format!("{}.png", name));
        std::fs::write(&path, name)?;
        local.push((name.to_owned(), path));
    }
    let images = sync.sync_images(&local, &target, None).await?;
    assert_eq!(images.len(), 3);

    let uploaded: Vec<_> = (0..10)
        .map(|n| {
            let label = if n % 2 == 0 { "road" } else { "sidewalk" };
            AnnotationRecord::new(format!("frame_00{}", n % 3), label, polygon(n))
        })
        .collect();
    let created = sync
        .upload_annotations(&uploaded, &images, &target, None)
        .await?;
    assert_eq!(created, 10);
    assert_eq!(sync.gateway().annotation_batches(), vec![3, 3, 3, 1]);

    let image_sets = sync.image_sets(Some("S1")).await?;
    let folder = tempfile::tempdir()?;
    let entries = sync
        .download_images(&image_sets, folder.path(), None)
        .await?;
    assert_eq!(entries.len(), 3);

    let products = [ProductRef::from("P1")];
    let read = sync.read_annotations(&entries, &products).await?;
    assert_eq!(triples(&read, None), triples(&uploaded, Some(&images)));
    assert!(read.iter().all(|r| r.product == "P1" && r.id.is_some()));

    // Exported tables come back keyed by remote id; map them to local keys.
    let table = folder.path().join("annotations.json");
    write_records(&table, &read)?;
    let remote_to_local: BTreeMap<String, String> = images
        .iter()
        .map(|(local, remote)| (remote.to_string(), local.clone()))
        .collect();
    let mut reloaded = read_records(&table)?;
    for record in &mut reloaded {
        record.image = remote_to_local[&record.image].clone();
    }

    let (deleted, created) = sync
        .replace_annotations(&reloaded, &images, &target, None)
        .await?;
    assert_eq!((deleted, created), (10, 10));
    let delete_batches: Vec<_> = sync
        .gateway()
        .delete_batches()
        .iter()
        .map(|b| b.len())
        .collect();
    assert_eq!(delete_batches, vec![4, 4, 2]);

    let reread = sync.read_annotations(&entries, &products).await?;
    assert_eq!(triples(&reread, None), triples(&uploaded, Some(&images)));
    assert!(
        reread
            .iter()
            .zip(read.iter())
            .all(|(new, old)| new.id != old.id)
    );
    Ok(())
}

#[tokio::test]
async fn test_second_session_only_reads() -> Result<(), Error> {
    let sync = Synchronizer::new(MemoryGateway::new(), SyncOptions::default());
    let source = tempfile::tempdir()?;
    let path = source.path().join("a.png");
    std::fs::write(&path, b"pixels")?;
    let local = vec![("a".to_owned(), path)];

    let first_target = sync
        .resolve_target("T1", "S1", "P1", &["road"], "poly")
        .await?;
    let first_images = sync.sync_images(&local, &first_target, None).await?;

    let endpoints = [
        exact_sync::Team::ENDPOINT,
        exact_sync::ImageSet::ENDPOINT,
        exact_sync::Product::ENDPOINT,
        exact_sync::AnnotationType::ENDPOINT,
        exact_sync::Image::ENDPOINT,
    ];
    let creates = endpoints.map(|e| sync.gateway().creates(e));

    let second_target = sync
        .resolve_target("T1", "S1", "P1", &["road"], "poly")
        .await?;
    let second_images = sync.sync_images(&local, &second_target, None).await?;

    assert_eq!(first_target.team(), second_target.team());
    assert_eq!(
        first_target.image_set().id(),
        second_target.image_set().id()
    );
    assert_eq!(
        first_target.annotation_types(),
        second_target.annotation_types()
    );
    assert_eq!(first_images, second_images);
    assert_eq!(creates, endpoints.map(|e| sync.gateway().creates(e)));
    assert_eq!(sync.gateway().uploads(), 1);
    Ok(())
}
