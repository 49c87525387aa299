// SPDX-License-Identifier: Apache-2.0
// Copyright © 2025 Au-Zone Technologies. All Rights Reserved.

use clap::{Parser, Subcommand};
use exact_sync::{
    Client, Error, ImageIdMap, Progress, ProductRef, Settings, SyncOptions, Synchronizer, Target,
    read_records, write_records,
};
use indicatif::{ProgressBar, ProgressStyle};
use inquire::{Password, PasswordDisplayMode};
use log::info;
use std::{
    fs::File,
    io::{BufReader, BufWriter},
    path::{Path, PathBuf},
};
use tokio::sync::mpsc::{self, Sender};
use walkdir::WalkDir;

const IMAGE_EXTENSIONS: [&str; 6] = ["png", "jpg", "jpeg", "tif", "tiff", "bmp"];

#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// EXACT Server URL
    #[clap(long, env = "EXACT_SERVER")]
    server: Option<String>,

    /// EXACT Username
    #[clap(long, env = "EXACT_USERNAME")]
    username: Option<String>,

    /// EXACT Password, prompted for when a username is given without one
    #[clap(long, env = "EXACT_PASSWORD")]
    password: Option<String>,

    /// Configuration file, defaults to config.toml in the user config
    /// directory
    #[clap(long)]
    config: Option<PathBuf>,

    /// Accept invalid TLS certificates
    #[clap(long)]
    insecure: bool,

    /// Client Command
    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand, PartialEq, Clone, Debug)]
enum Command {
    /// Find or create the team, image set, product and annotation types
    /// needed for an upload.  Running it again with the same names changes
    /// nothing on the server.
    Setup {
        /// Team name
        team: String,

        /// Image set name
        image_set: String,

        /// Product name
        product: String,

        /// Annotation type names
        #[clap(long, value_delimiter = ',', required = true)]
        labels: Vec<String>,

        /// Geometry of new annotation types: poly, fixed_rect, rect, line or
        /// point
        #[clap(long, default_value = "poly")]
        kind: String,
    },
    /// Show an existing team and image set with their annotation types.
    Target {
        /// Team name
        team: String,

        /// Image set name
        image_set: String,
    },
    /// List image sets.
    ImageSets {
        /// Only list image sets with exactly this name
        #[clap(long)]
        name: Option<String>,
    },
    /// Register the images of a local folder in an image set.  Images already
    /// present under the same file name are not uploaded again.  The local
    /// image ids (file stems) and their remote ids are written to the map
    /// file used by the annotation commands.
    UploadImages {
        /// Team name
        team: String,

        /// Image set name
        image_set: String,

        /// Folder searched recursively for images
        images: PathBuf,

        /// Image id map file (JSON)
        #[clap(long, default_value = "images.json")]
        map: PathBuf,
    },
    /// Download the images of an image set, skipping files already present.
    DownloadImages {
        /// Image set name
        image_set: String,

        /// Output folder
        #[clap(long, default_value = ".")]
        output: PathBuf,
    },
    /// Download the images of an image set and export their annotations to a
    /// .json or .arrow table.
    DownloadAnnotations {
        /// Image set name
        image_set: String,

        /// Products whose annotation types are exported, by name or as
        /// `id:<n>`; all products when empty
        #[clap(long, value_delimiter = ',')]
        products: Vec<String>,

        /// Folder holding the downloaded images
        #[clap(long, default_value = "images")]
        images: PathBuf,

        /// Annotation table (.json or .arrow)
        output: PathBuf,
    },
    /// Upload an annotation table (.json or .arrow) to an image set.
    UploadAnnotations {
        /// Team name
        team: String,

        /// Image set name
        image_set: String,

        /// Annotation table (.json or .arrow)
        annotations: PathBuf,

        /// Image id map file written by upload-images
        #[clap(long, default_value = "images.json")]
        map: PathBuf,

        /// Delete the existing annotations of the target's types first
        #[clap(long)]
        clear: bool,
    },
    /// Delete the annotations of the target's types on the mapped images.
    ClearAnnotations {
        /// Team name
        team: String,

        /// Image set name
        image_set: String,

        /// Image id map file written by upload-images
        #[clap(long, default_value = "images.json")]
        map: PathBuf,
    },
}

fn progress_bar(message: &'static str) -> Sender<Progress> {
    let bar = ProgressBar::new(0);
    if let Ok(style) = ProgressStyle::with_template(
        "[{elapsed_precise} ETA: {eta}] {msg}: {wide_bar:.yellow} {human_pos}/{human_len}",
    ) {
        bar.set_style(style.progress_chars("█▇▆▅▄▃▂▁  "));
    }
    bar.set_message(message);

    let (tx, mut rx) = mpsc::channel::<Progress>(1);

    tokio::spawn(async move {
        while let Some(progress) = rx.recv().await {
            if progress.total > 0 {
                bar.set_length(progress.total as u64);
                bar.set_position(progress.current as u64);
            }
        }
        bar.finish();
    });

    tx
}

fn prompt_password() -> Result<String, Error> {
    Password::new("EXACT Password")
        .with_display_mode(PasswordDisplayMode::Masked)
        .without_confirmation()
        .prompt()
        .map_err(|e| Error::InvalidParameters(format!("Password prompt failed: {}", e)))
}

fn print_target(target: &Target) {
    println!(
        "Team: {} [{}]",
        target.team().name(),
        target.team().id()
    );
    println!(
        "Image Set: {} [{}] with {} images",
        target.image_set().name(),
        target.image_set().id(),
        target.image_set().images().len()
    );
    for annotation_type in target.annotation_types().values() {
        println!(
            "  {} [{}] product {}",
            annotation_type,
            annotation_type.id(),
            annotation_type.product()
        );
    }
}

fn read_map(path: &Path) -> Result<ImageIdMap, Error> {
    let file = File::open(path)?;
    Ok(serde_json::from_reader(BufReader::new(file))?)
}

fn write_map(path: &Path, map: &ImageIdMap) -> Result<(), Error> {
    let file = File::create(path)?;
    serde_json::to_writer_pretty(BufWriter::new(file), map)?;
    Ok(())
}

/// Local images below `folder`, keyed by file stem, in file name order.
fn find_images(folder: &Path) -> Vec<(String, PathBuf)> {
    WalkDir::new(folder)
        .sort_by_file_name()
        .into_iter()
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_file())
        .filter(|entry| {
            entry
                .path()
                .extension()
                .and_then(|ext| ext.to_str())
                .is_some_and(|ext| IMAGE_EXTENSIONS.contains(&ext.to_lowercase().as_str()))
        })
        .filter_map(|entry| {
            let stem = entry.path().file_stem()?.to_str()?.to_owned();
            Some((stem, entry.into_path()))
        })
        .collect()
}

async fn handle_setup(
    sync: &Synchronizer<Client>,
    team: String,
    image_set: String,
    product: String,
    labels: Vec<String>,
    kind: String,
) -> Result<(), Error> {
    let target = sync
        .resolve_target(&team, &image_set, &product, &labels[..], &kind)
        .await?;
    print_target(&target);
    Ok(())
}

async fn handle_target(
    sync: &Synchronizer<Client>,
    team: String,
    image_set: String,
) -> Result<(), Error> {
    let target = sync.get_target(&team, &image_set).await?;
    print_target(&target);
    Ok(())
}

async fn handle_image_sets(sync: &Synchronizer<Client>, name: Option<String>) -> Result<(), Error> {
    for image_set in sync.image_sets(name.as_deref()).await? {
        println!(
            "[{}] {}: {} images",
            image_set.id(),
            image_set.name(),
            image_set.images().len()
        );
    }
    Ok(())
}

async fn handle_upload_images(
    sync: &Synchronizer<Client>,
    team: String,
    image_set: String,
    images: PathBuf,
    map: PathBuf,
) -> Result<(), Error> {
    let local = find_images(&images);
    if local.is_empty() {
        return Err(Error::InvalidParameters(format!(
            "No images found in {}",
            images.display()
        )));
    }

    let target = sync.get_target(&team, &image_set).await?;
    let mapping = sync
        .sync_images(&local, &target, Some(progress_bar("Uploading images")))
        .await?;
    write_map(&map, &mapping)?;

    println!(
        "Registered {} images in {}, map written to {}",
        mapping.len(),
        target.image_set(),
        map.display()
    );
    Ok(())
}

async fn handle_download_images(
    sync: &Synchronizer<Client>,
    image_set: String,
    output: PathBuf,
) -> Result<(), Error> {
    let image_sets = sync.image_sets(Some(&image_set)).await?;
    if image_sets.is_empty() {
        return Err(Error::NotFound(format!("image set '{}'", image_set)));
    }

    let entries = sync
        .download_images(&image_sets, &output, Some(progress_bar("Downloading images")))
        .await?;
    println!("{} images in {}", entries.len(), output.display());
    Ok(())
}

async fn handle_download_annotations(
    sync: &Synchronizer<Client>,
    image_set: String,
    products: Vec<String>,
    images: PathBuf,
    output: PathBuf,
) -> Result<(), Error> {
    let image_sets = sync.image_sets(Some(&image_set)).await?;
    if image_sets.is_empty() {
        return Err(Error::NotFound(format!("image set '{}'", image_set)));
    }

    let entries = sync
        .download_images(&image_sets, &images, Some(progress_bar("Downloading images")))
        .await?;

    let products: Vec<ProductRef> = products.iter().map(|p| ProductRef::from(p.as_str())).collect();
    let records = sync.read_annotations(&entries, &products).await?;
    write_records(&output, &records)?;

    println!(
        "Exported {} annotations of {} images to {}",
        records.len(),
        entries.len(),
        output.display()
    );
    Ok(())
}

async fn handle_upload_annotations(
    sync: &Synchronizer<Client>,
    team: String,
    image_set: String,
    annotations: PathBuf,
    map: PathBuf,
    clear: bool,
) -> Result<(), Error> {
    let target = sync.get_target(&team, &image_set).await?;
    let mapping = read_map(&map)?;
    let records = read_records(&annotations)?;
    info!(
        "Loaded {} annotations from {}",
        records.len(),
        annotations.display()
    );

    if clear {
        let (deleted, created) = sync
            .replace_annotations(
                &records,
                &mapping,
                &target,
                Some(progress_bar("Replacing annotations")),
            )
            .await?;
        println!("Deleted {} and uploaded {} annotations", deleted, created);
    } else {
        let created = sync
            .upload_annotations(
                &records,
                &mapping,
                &target,
                Some(progress_bar("Uploading annotations")),
            )
            .await?;
        println!("Uploaded {} annotations", created);
    }
    Ok(())
}

async fn handle_clear_annotations(
    sync: &Synchronizer<Client>,
    team: String,
    image_set: String,
    map: PathBuf,
) -> Result<(), Error> {
    let target = sync.get_target(&team, &image_set).await?;
    let mapping = read_map(&map)?;
    let deleted = sync
        .clear_annotations(&mapping, &target, Some(progress_bar("Clearing annotations")))
        .await?;
    println!("Deleted {} annotations", deleted);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Error> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let mut settings = Settings::load(args.config.as_deref())?;
    if let Some(server) = args.server {
        settings.server = server;
    }
    if args.insecure {
        settings.verify_ssl = false;
    }
    if let Some(username) = args.username {
        settings.username = Some(username);
    }
    if let Some(password) = args.password {
        settings.password = Some(password);
    }
    if settings.username.is_some() && settings.password.is_none() {
        settings.password = Some(prompt_password()?);
    }

    let client = Client::new(&settings)?;
    let sync = Synchronizer::new(client, SyncOptions::try_from(&settings)?);

    match args.cmd {
        Command::Setup {
            team,
            image_set,
            product,
            labels,
            kind,
        } => handle_setup(&sync, team, image_set, product, labels, kind).await,
        Command::Target { team, image_set } => handle_target(&sync, team, image_set).await,
        Command::ImageSets { name } => handle_image_sets(&sync, name).await,
        Command::UploadImages {
            team,
            image_set,
            images,
            map,
        } => handle_upload_images(&sync, team, image_set, images, map).await,
        Command::DownloadImages { image_set, output } => {
            handle_download_images(&sync, image_set, output).await
        }
        Command::DownloadAnnotations {
            image_set,
            products,
            images,
            output,
        } => handle_download_annotations(&sync, image_set, products, images, output).await,
        Command::UploadAnnotations {
            team,
            image_set,
            annotations,
            map,
            clear,
        } => handle_upload_annotations(&sync, team, image_set, annotations, map, clear).await,
        Command::ClearAnnotations {
            team,
            image_set,
            map,
        } => handle_clear_annotations(&sync, team, image_set, map).await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_find_images() -> Result<(), Error> {
        let dir = tempfile::tempdir()?;
        std::fs::create_dir(dir.path().join("nested"))?;
        for name in ["b.png", "a.JPG", "notes.txt", "nested/c.tiff"] {
            std::fs::write(dir.path().join(name), name)?;
        }

        let images: Vec<_> = find_images(dir.path())
            .into_iter()
            .map(|(stem, _)| stem)
            .collect();
        assert_eq!(images, vec!["a", "b", "c"]);
        Ok(())
    }

    #[test]
    fn test_map_file() -> Result<(), Error> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("images.json");
        let mut map = ImageIdMap::new();
        map.insert("frame_000".to_owned(), 12.into());
        write_map(&path, &map)?;

        assert_eq!(
            std::fs::read_to_string(&path)?.replace(char::is_whitespace, ""),
            r#"{"frame_000":12}"#
        );
        assert_eq!(read_map(&path)?, map);
        Ok(())
    }

    #[test]
    fn test_setup_arguments() {
        let args = Args::parse_from([
            "exact-sync",
            "setup",
            "T1",
            "S1",
            "P1",
            "--labels",
            "road,sidewalk",
        ]);
        assert_eq!(
            args.cmd,
            Command::Setup {
                team: "T1".to_owned(),
                image_set: "S1".to_owned(),
                product: "P1".to_owned(),
                labels: vec!["road".to_owned(), "sidewalk".to_owned()],
                kind: "poly".to_owned(),
            }
        );
    }
}
