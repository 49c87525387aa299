// SPDX-License-Identifier: Apache-2.0
// Copyright © 2025 Au-Zone Technologies. All Rights Reserved.

use crate::{
    Error, Image, ImageEntry, ImageID, ImageIdMap, ImageSet, ImageSourceType, Progress,
    Synchronizer, Target,
    gateway::{Gateway, Query},
    sync::report,
};
use log::{debug, info, warn};
use std::{
    collections::HashMap,
    ffi::OsStr,
    path::{Path, PathBuf},
};
use tokio::sync::mpsc::Sender;

/// Turns a remote name into a single safe path component.
fn sanitize_path_component(name: &str) -> String {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        return "unnamed".to_string();
    }

    let component = Path::new(trimmed)
        .file_name()
        .unwrap_or_else(|| OsStr::new(trimmed));

    let sanitized: String = component
        .to_string_lossy()
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            _ => c,
        })
        .collect();

    if sanitized.is_empty() || sanitized == ".." {
        "unnamed".to_string()
    } else {
        sanitized
    }
}

fn basename(path: &Path) -> Result<&str, Error> {
    path.file_name()
        .and_then(|name| name.to_str())
        .ok_or_else(|| Error::InvalidParameters(format!("Invalid image path {:?}", path)))
}

impl<G: Gateway> Synchronizer<G> {
    /// Registers local images in the target's image set.
    ///
    /// Images are matched by file base name within the image set; a match is
    /// reused without sending any bytes, otherwise the file is uploaded with
    /// [`ImageSourceType::Default`]. Running the same call twice uploads
    /// nothing the second time.
    ///
    /// The returned map is keyed by the local id. When a local id repeats,
    /// the first mapping is kept and later entries are skipped.
    #[cfg_attr(feature = "profiling", tracing::instrument(skip_all))]
    pub async fn sync_images(
        &self,
        images: &[(String, PathBuf)],
        target: &Target,
        progress: Option<Sender<Progress>>,
    ) -> Result<ImageIdMap, Error> {
        let image_set = target.image_set().id();
        let total = images.len();
        let mut mapping = ImageIdMap::new();

        for (current, (local_id, path)) in images.iter().enumerate() {
            if mapping.contains_key(local_id) {
                warn!("Skipping repeated local image '{}' ({:?})", local_id, path);
                report(&progress, current + 1, total).await;
                continue;
            }

            let filename = basename(path)?;
            let query = Query::new()
                .with("image_set", image_set)
                .with("filename", filename);
            let existing = self
                .gateway
                .list::<Image>(&query)
                .await?
                .results
                .into_iter()
                .find(|image| image.filename() == filename);

            let id = match existing {
                Some(image) => {
                    debug!("Image '{}' already registered ({})", filename, image.id());
                    image.id()
                }
                None => {
                    let image = self
                        .gateway
                        .upload_image(image_set, path, ImageSourceType::Default)
                        .await?;
                    info!("Uploaded image '{}' ({})", filename, image.id());
                    image.id()
                }
            };

            mapping.insert(local_id.clone(), id);
            report(&progress, current + 1, total).await;
        }

        Ok(mapping)
    }

    /// Downloads every image of the given image sets into `folder`.
    ///
    /// Files are named after the remote image name and only downloaded when
    /// no file of that name exists yet. Remote images sharing a name share
    /// the first one's file, with a warning. The returned entries are the
    /// input of [`read_annotations`][Self::read_annotations].
    #[cfg_attr(feature = "profiling", tracing::instrument(skip_all))]
    pub async fn download_images(
        &self,
        image_sets: &[ImageSet],
        folder: &Path,
        progress: Option<Sender<Progress>>,
    ) -> Result<Vec<ImageEntry>, Error> {
        tokio::fs::create_dir_all(folder).await?;

        let total = image_sets.iter().map(|set| set.images().len()).sum();
        let mut entries = Vec::with_capacity(total);
        let mut claimed: HashMap<PathBuf, ImageID> = HashMap::new();

        for image_set in image_sets {
            for id in image_set.images() {
                let image: Image = self.gateway.retrieve(id.value()).await?;
                let path = folder.join(sanitize_path_component(image.name()));

                match claimed.get(&path) {
                    Some(owner) if owner != id => warn!(
                        "Image {} shares {:?} with image {}; keeping the existing file",
                        id, path, owner
                    ),
                    Some(_) => {}
                    None => {
                        claimed.insert(path.clone(), *id);
                    }
                }

                if tokio::fs::try_exists(&path).await? {
                    debug!("Image {} already present at {:?}", id, path);
                } else {
                    self.gateway.download_image(*id, &path).await?;
                    debug!("Downloaded image {} to {:?}", id, path);
                }

                entries.push(ImageEntry {
                    id: *id,
                    path,
                    name: image.name().to_owned(),
                });
                report(&progress, entries.len(), total).await;
            }
        }

        Ok(entries)
    }
}
