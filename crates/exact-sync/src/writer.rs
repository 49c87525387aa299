// SPDX-License-Identifier: Apache-2.0
// Copyright © 2025 Au-Zone Technologies. All Rights Reserved.

use crate::{
    Annotation, AnnotationID, AnnotationRecord, Error, ImageID, ImageIdMap, Progress, Synchronizer,
    Target,
    api::NewAnnotation,
    gateway::{Gateway, Query, list_all},
    sync::report,
};
use itertools::Itertools as _;
use log::{debug, info};
use tokio::sync::mpsc::Sender;
use uuid::Uuid;

impl<G: Gateway> Synchronizer<G> {
    /// Deletes every annotation of the target's types on the mapped images.
    ///
    /// Ids are collected first, one count and one listing per image and
    /// type, then deleted in batches of
    /// [`delete_batch_size`][crate::SyncOptions::delete_batch_size]. Images
    /// mapped from several local keys are cleared once. When the server caps
    /// the page size the listing continues over offset pages; if it still
    /// ends short of the reported count the clear fails with
    /// [`Error::TruncatedListing`] before anything is deleted. A failed
    /// batch stops the operation; batches sent before it stay deleted.
    ///
    /// Progress is reported over the collection pass and then again over the
    /// delete batches. Returns the number of deleted annotations.
    #[cfg_attr(feature = "profiling", tracing::instrument(skip_all))]
    pub async fn clear_annotations(
        &self,
        images: &ImageIdMap,
        target: &Target,
        progress: Option<Sender<Progress>>,
    ) -> Result<usize, Error> {
        let remote: Vec<ImageID> = images.values().copied().unique().collect();
        let total = remote.len() * target.annotation_types().len();
        let mut current = 0;
        let mut ids: Vec<AnnotationID> = vec![];

        for image in remote {
            for annotation_type in target.annotation_types().values() {
                let query = Query::new()
                    .with("annotation_type", annotation_type.id())
                    .with("image", image);
                let count = self
                    .gateway
                    .list::<Annotation>(&query.clone().limit(1))
                    .await?
                    .count;

                if count > 0 {
                    let annotations: Vec<Annotation> =
                        list_all(&self.gateway, &query, count).await?;
                    if annotations.len() < count {
                        return Err(Error::TruncatedListing {
                            image,
                            expected: count,
                            received: annotations.len(),
                        });
                    }
                    ids.extend(annotations.iter().map(|a| a.id()));
                }

                current += 1;
                report(&progress, current, total).await;
            }
        }

        debug!("Collected {} annotations to clear", ids.len());

        let batches = ids.chunks(self.options.delete_batch_size());
        let total = batches.len();
        for (index, batch) in batches.enumerate() {
            let joined = batch.iter().join(",");
            self.gateway.delete_annotations(&joined).await?;
            debug!("Deleted batch {}/{} ({} ids)", index + 1, total, batch.len());
            report(&progress, index + 1, total).await;
        }

        if !ids.is_empty() {
            info!(
                "Cleared {} annotations from image set '{}'",
                ids.len(),
                target.image_set().name()
            );
        }

        Ok(ids.len())
    }

    /// Uploads annotation rows to the target.
    ///
    /// Every row is validated before anything is sent: its label must name
    /// one of the target's annotation types ([`Error::UnknownLabel`]) and its
    /// image must be in `images` ([`Error::UnmappedImage`]). Each row gets a
    /// fresh unique identifier. Rows are sent in input order in batches of
    /// [`create_batch_size`][crate::SyncOptions::create_batch_size]; when a
    /// batch fails, the rows before it remain uploaded.
    ///
    /// Returns the number of uploaded annotations.
    #[cfg_attr(feature = "profiling", tracing::instrument(skip_all, fields(rows = records.len())))]
    pub async fn upload_annotations(
        &self,
        records: &[AnnotationRecord],
        images: &ImageIdMap,
        target: &Target,
        progress: Option<Sender<Progress>>,
    ) -> Result<usize, Error> {
        let pending = prepare_annotations(records, images, target)?;
        self.submit_annotations(&pending, progress).await
    }

    /// Replaces the target's annotations on the mapped images with `records`.
    ///
    /// The rows are validated first, so a bad label or image leaves the
    /// server untouched. All deletes complete before the first create.
    /// Returns the deleted and uploaded counts.
    pub async fn replace_annotations(
        &self,
        records: &[AnnotationRecord],
        images: &ImageIdMap,
        target: &Target,
        progress: Option<Sender<Progress>>,
    ) -> Result<(usize, usize), Error> {
        let pending = prepare_annotations(records, images, target)?;
        let deleted = self
            .clear_annotations(images, target, progress.clone())
            .await?;
        let created = self.submit_annotations(&pending, progress).await?;
        Ok((deleted, created))
    }

    async fn submit_annotations(
        &self,
        pending: &[NewAnnotation],
        progress: Option<Sender<Progress>>,
    ) -> Result<usize, Error> {
        let total = pending.len();
        let mut created = 0;

        for batch in pending.chunks(self.options.create_batch_size()) {
            self.gateway.create_annotations(batch).await?;
            created += batch.len();
            debug!("Uploaded {}/{} annotations", created, total);
            report(&progress, created, total).await;
        }

        if created > 0 {
            info!("Uploaded {} annotations", created);
        }

        Ok(created)
    }
}

fn prepare_annotations(
    records: &[AnnotationRecord],
    images: &ImageIdMap,
    target: &Target,
) -> Result<Vec<NewAnnotation>, Error> {
    records
        .iter()
        .map(|record| -> Result<NewAnnotation, Error> {
            let annotation_type = target
                .annotation_type(&record.label)
                .ok_or_else(|| Error::UnknownLabel(record.label.clone()))?;
            let image = images
                .get(&record.image)
                .ok_or_else(|| Error::UnmappedImage(record.image.clone()))?;

            Ok(NewAnnotation {
                annotation_type: annotation_type.id(),
                vector: record.vector.clone(),
                image: *image,
                unique_identifier: Uuid::new_v4().to_string(),
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Image, MemoryGateway, SyncOptions, gateway::Resource};
    use serde_json::json;

    async fn setup(
        gateway: MemoryGateway,
        options: SyncOptions,
    ) -> Result<(Synchronizer<MemoryGateway>, Target, ImageIdMap), Error> {
        let sync = Synchronizer::new(gateway, options);
        let target = sync
            .resolve_target("T1", "S1", "P1", &["road", "lane"], "poly")
            .await?;

        let mut images = ImageIdMap::new();
        for name in ["a", "b"] {
            let image: Image = sync
                .gateway()
                .create(&json!({
                    "name": format!("{}.png", name),
                    "image_set": target.image_set().id(),
                }))
                .await?;
            images.insert(name.to_owned(), image.id());
        }

        Ok((sync, target, images))
    }

    fn rows(count: usize) -> Vec<AnnotationRecord> {
        (0..count)
            .map(|n| {
                let image = if n % 2 == 0 { "a" } else { "b" };
                let label = if n % 3 == 0 { "lane" } else { "road" };
                AnnotationRecord::new(image, label, json!({ "n": n }))
            })
            .collect()
    }

    fn stored_order(sync: &Synchronizer<MemoryGateway>) -> Vec<u64> {
        sync.gateway()
            .records::<Annotation>()
            .iter()
            .filter_map(|a| a.vector()["n"].as_u64())
            .collect()
    }

    #[tokio::test]
    async fn test_upload_batches() -> Result<(), Error> {
        let (sync, target, images) = setup(MemoryGateway::new(), SyncOptions::default()).await?;

        let created = sync
            .upload_annotations(&rows(250), &images, &target, None)
            .await?;
        assert_eq!(created, 250);
        assert_eq!(sync.gateway().annotation_batches(), vec![100, 100, 50]);
        assert_eq!(stored_order(&sync), (0..250).collect::<Vec<_>>());

        let uuids: std::collections::HashSet<_> = sync
            .gateway()
            .records::<Annotation>()
            .iter()
            .map(|a| a.unique_identifier().to_owned())
            .collect();
        assert_eq!(uuids.len(), 250);
        Ok(())
    }

    #[tokio::test]
    async fn test_upload_custom_batch_size() -> Result<(), Error> {
        let (sync, target, images) =
            setup(MemoryGateway::new(), SyncOptions::new(1000, 20, 7)?).await?;
        sync.upload_annotations(&rows(20), &images, &target, None)
            .await?;
        assert_eq!(sync.gateway().annotation_batches(), vec![7, 7, 6]);
        Ok(())
    }

    #[tokio::test]
    async fn test_unknown_label_uploads_nothing() -> Result<(), Error> {
        let (sync, target, images) = setup(MemoryGateway::new(), SyncOptions::default()).await?;
        let mut records = rows(150);
        records[120].label = "car".to_owned();

        let result = sync
            .upload_annotations(&records, &images, &target, None)
            .await;
        assert!(matches!(result, Err(Error::UnknownLabel(label)) if label == "car"));
        assert_eq!(sync.gateway().creates(Annotation::ENDPOINT), 0);
        Ok(())
    }

    #[tokio::test]
    async fn test_unmapped_image() -> Result<(), Error> {
        let (sync, target, images) = setup(MemoryGateway::new(), SyncOptions::default()).await?;
        let records = vec![AnnotationRecord::new("c", "road", json!({}))];

        let result = sync
            .upload_annotations(&records, &images, &target, None)
            .await;
        assert!(matches!(result, Err(Error::UnmappedImage(image)) if image == "c"));
        assert!(sync.gateway().annotation_batches().is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn test_failed_batch_leaves_prefix() -> Result<(), Error> {
        let gateway = MemoryGateway::new().fail_annotation_batch(1);
        let (sync, target, images) = setup(gateway, SyncOptions::default()).await?;

        let result = sync
            .upload_annotations(&rows(250), &images, &target, None)
            .await;
        assert!(matches!(result, Err(Error::RemoteError(500, _))));
        assert_eq!(stored_order(&sync), (0..100).collect::<Vec<_>>());
        Ok(())
    }

    #[tokio::test]
    async fn test_clear_annotations() -> Result<(), Error> {
        let (sync, target, images) = setup(MemoryGateway::new(), SyncOptions::default()).await?;
        sync.upload_annotations(&rows(45), &images, &target, None)
            .await?;

        let other = sync
            .resolve_target("T1", "S1", "P2", &["car"], "rect")
            .await?;
        let cars = vec![
            AnnotationRecord::new("a", "car", json!({})),
            AnnotationRecord::new("b", "car", json!({})),
        ];
        sync.upload_annotations(&cars, &images, &other, None)
            .await?;

        let deleted = sync.clear_annotations(&images, &target, None).await?;
        assert_eq!(deleted, 45);
        let batches: Vec<_> = sync
            .gateway()
            .delete_batches()
            .iter()
            .map(|b| b.len())
            .collect();
        assert_eq!(batches, vec![20, 20, 5]);

        let remaining = sync.gateway().records::<Annotation>();
        assert_eq!(remaining.len(), 2);
        assert!(
            remaining
                .iter()
                .all(|a| a.annotation_type() == other.annotation_types()["car"].id())
        );

        assert_eq!(sync.clear_annotations(&images, &target, None).await?, 0);
        assert_eq!(sync.gateway().delete_batches().len(), 3);
        Ok(())
    }

    #[tokio::test]
    async fn test_clear_shared_remote_image() -> Result<(), Error> {
        let sync = Synchronizer::new(MemoryGateway::new(), SyncOptions::default());
        let target = sync
            .resolve_target("T1", "S1", "P1", &["road"], "poly")
            .await?;

        let dir = tempfile::tempdir()?;
        let mut files = vec![];
        for (key, folder) in [("a", "d1"), ("b", "d2")] {
            let path = dir.path().join(folder).join("x.png");
            std::fs::create_dir_all(dir.path().join(folder))?;
            std::fs::write(&path, key.as_bytes())?;
            files.push((key.to_owned(), path));
        }
        let images = sync.sync_images(&files, &target, None).await?;
        assert_eq!(images["a"], images["b"]);

        let records = vec![AnnotationRecord::new("a", "road", json!({}))];
        sync.upload_annotations(&records, &images, &target, None)
            .await?;

        let deleted = sync.clear_annotations(&images, &target, None).await?;
        assert_eq!(deleted, 1);
        let batches = sync.gateway().delete_batches();
        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0].len(), 1);
        assert!(sync.gateway().records::<Annotation>().is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn test_clear_with_capped_pages() -> Result<(), Error> {
        let gateway = MemoryGateway::new().with_max_page_size(7);
        let (sync, target, images) = setup(gateway, SyncOptions::default()).await?;
        sync.upload_annotations(&rows(45), &images, &target, None)
            .await?;

        let deleted = sync.clear_annotations(&images, &target, None).await?;
        assert_eq!(deleted, 45);
        assert!(sync.gateway().records::<Annotation>().is_empty());

        let mut ids: Vec<_> = sync.gateway().delete_batches().concat();
        ids.sort();
        ids.dedup();
        assert_eq!(ids.len(), 45);
        Ok(())
    }

    #[tokio::test]
    async fn test_failed_delete_batch() -> Result<(), Error> {
        let gateway = MemoryGateway::new().fail_delete_batch(1);
        let (sync, target, images) = setup(gateway, SyncOptions::default()).await?;
        sync.upload_annotations(&rows(45), &images, &target, None)
            .await?;

        let result = sync.clear_annotations(&images, &target, None).await;
        assert!(matches!(result, Err(Error::RemoteError(500, _))));
        assert_eq!(sync.gateway().records::<Annotation>().len(), 25);

        assert_eq!(sync.clear_annotations(&images, &target, None).await?, 25);
        assert!(sync.gateway().records::<Annotation>().is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn test_replace_annotations() -> Result<(), Error> {
        let (sync, target, images) = setup(MemoryGateway::new(), SyncOptions::default()).await?;
        sync.upload_annotations(&rows(10), &images, &target, None)
            .await?;

        let mut bad = rows(3);
        bad[2].label = "car".to_owned();
        assert!(matches!(
            sync.replace_annotations(&bad, &images, &target, None).await,
            Err(Error::UnknownLabel(_))
        ));
        assert_eq!(sync.gateway().records::<Annotation>().len(), 10);

        let (deleted, created) = sync
            .replace_annotations(&rows(3), &images, &target, None)
            .await?;
        assert_eq!((deleted, created), (10, 3));
        assert_eq!(stored_order(&sync), vec![0, 1, 2]);
        Ok(())
    }

    #[tokio::test]
    async fn test_empty_input_makes_no_calls() -> Result<(), Error> {
        let (sync, target, _) = setup(MemoryGateway::new(), SyncOptions::default()).await?;
        let empty = ImageIdMap::new();
        assert_eq!(sync.upload_annotations(&[], &empty, &target, None).await?, 0);
        assert_eq!(sync.clear_annotations(&empty, &target, None).await?, 0);
        assert!(sync.gateway().annotation_batches().is_empty());
        assert_eq!(sync.gateway().list_calls(Annotation::ENDPOINT), 0);
        Ok(())
    }
}
