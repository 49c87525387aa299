// SPDX-License-Identifier: Apache-2.0
// Copyright © 2025 Au-Zone Technologies. All Rights Reserved.

use assert_cmd::Command;

/// A server nothing listens on; any request would fail to connect.
const UNREACHABLE: &str = "http://127.0.0.1:9";

fn exact_sync() -> Result<Command, Box<dyn std::error::Error>> {
    let mut cmd = Command::cargo_bin("exact-sync")?;
    cmd.env_remove("EXACT_USERNAME")
        .env_remove("EXACT_PASSWORD")
        .env("EXACT_SERVER", UNREACHABLE)
        .env("EXACT_MAX_RETRIES", "0");
    Ok(cmd)
}

#[test]
fn test_help() -> Result<(), Box<dyn std::error::Error>> {
    let mut cmd = exact_sync()?;
    cmd.arg("--help");
    cmd.assert()
        .success()
        .stdout(predicates::str::contains("upload-annotations"))
        .stdout(predicates::str::contains("clear-annotations"));
    Ok(())
}

#[test]
fn test_version() -> Result<(), Box<dyn std::error::Error>> {
    let mut cmd = exact_sync()?;
    cmd.arg("--version");
    cmd.assert()
        .success()
        .stdout(predicates::str::contains(env!("CARGO_PKG_VERSION")));
    Ok(())
}

#[test]
fn test_unsupported_kind() -> Result<(), Box<dyn std::error::Error>> {
    let mut cmd = exact_sync()?;
    cmd.args(["setup", "T1", "S1", "P1", "--labels", "road", "--kind", "circle"]);
    cmd.assert()
        .failure()
        .stderr(predicates::str::contains("UnsupportedVectorKind"))
        .stderr(predicates::str::contains("circle"));
    Ok(())
}

#[test]
fn test_setup_requires_labels() -> Result<(), Box<dyn std::error::Error>> {
    let mut cmd = exact_sync()?;
    cmd.args(["setup", "T1", "S1", "P1"]);
    cmd.assert()
        .failure()
        .stderr(predicates::str::contains("--labels"));
    Ok(())
}

#[test]
fn test_upload_images_without_images() -> Result<(), Box<dyn std::error::Error>> {
    let dir = tempfile::tempdir()?;
    let mut cmd = exact_sync()?;
    cmd.arg("upload-images")
        .arg("T1")
        .arg("S1")
        .arg(dir.path())
        .arg("--map")
        .arg(dir.path().join("images.json"));
    cmd.assert()
        .failure()
        .stderr(predicates::str::contains("No images found"));
    assert!(!dir.path().join("images.json").exists());
    Ok(())
}
