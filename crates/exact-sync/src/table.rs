// SPDX-License-Identifier: Apache-2.0
// Copyright © 2025 Au-Zone Technologies. All Rights Reserved.

//! Tabular annotation exchange format.
//!
//! One [`AnnotationRecord`] per annotation with the columns
//! `Image, Path, Type, Vector, Label, Product, ID, UUID, Time`. The reader
//! produces these rows and the writer consumes them, so the column names are
//! part of the file format and never change.
//!
//! Tables are stored as JSON (an array of row objects) or, with the `polars`
//! feature, as Arrow IPC files. [`read_records`] and [`write_records`] pick
//! the format from the file extension.

use crate::{AnnotationID, AnnotationTypeID, Error};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::{fs::File, path::Path};

#[cfg(feature = "polars")]
use polars::prelude::*;

/// Column names of the exchange format, in order.
pub const COLUMNS: [&str; 9] = [
    "Image", "Path", "Type", "Vector", "Label", "Product", "ID", "UUID", "Time",
];

/// One annotation row.
///
/// Rows produced by [`read_annotations`][crate::Synchronizer::read_annotations]
/// carry every column. Rows written by hand for
/// [`upload_annotations`][crate::Synchronizer::upload_annotations] only need
/// `Image`, `Vector` and `Label`; the server assigns the rest.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct AnnotationRecord {
    /// Image key. Remote image id for downloaded rows, local image id for
    /// rows to upload.
    #[serde(rename = "Image")]
    pub image: String,
    /// Local file holding the image pixels.
    #[serde(rename = "Path", default)]
    pub path: String,
    #[serde(rename = "Type", default)]
    pub annotation_type: Option<AnnotationTypeID>,
    /// Geometry payload, passed through unchanged.
    #[serde(rename = "Vector")]
    pub vector: serde_json::Value,
    /// Annotation type name.
    #[serde(rename = "Label")]
    pub label: String,
    /// Owning product name.
    #[serde(rename = "Product", default)]
    pub product: String,
    #[serde(rename = "ID", default)]
    pub id: Option<AnnotationID>,
    #[serde(rename = "UUID", default)]
    pub uuid: String,
    /// Last edit time on the server.
    #[serde(rename = "Time", default)]
    pub time: Option<DateTime<Utc>>,
}

impl AnnotationRecord {
    /// Creates an upload row for a label on a local image.
    pub fn new(image: impl Into<String>, label: impl Into<String>, vector: serde_json::Value) -> Self {
        AnnotationRecord {
            image: image.into(),
            path: String::new(),
            annotation_type: None,
            vector,
            label: label.into(),
            product: String::new(),
            id: None,
            uuid: String::new(),
            time: None,
        }
    }
}

/// Reads rows from a JSON array.
pub fn read_json<P: AsRef<Path>>(path: P) -> Result<Vec<AnnotationRecord>, Error> {
    let file = File::open(path)?;
    Ok(serde_json::from_reader(std::io::BufReader::new(file))?)
}

/// Writes rows as a pretty-printed JSON array.
pub fn write_json<P: AsRef<Path>>(path: P, records: &[AnnotationRecord]) -> Result<(), Error> {
    let file = File::create(path)?;
    serde_json::to_writer_pretty(std::io::BufWriter::new(file), records)?;
    Ok(())
}

/// Builds a dataframe with one row per record.
///
/// `Vector` is stored as its JSON text and `Time` as RFC 3339 text.
#[cfg(feature = "polars")]
pub fn annotations_dataframe(records: &[AnnotationRecord]) -> Result<DataFrame, Error> {
    let images: Vec<&str> = records.iter().map(|r| r.image.as_str()).collect();
    let paths: Vec<&str> = records.iter().map(|r| r.path.as_str()).collect();
    let types: Vec<Option<u64>> = records
        .iter()
        .map(|r| r.annotation_type.map(u64::from))
        .collect();
    let vectors: Vec<String> = records
        .iter()
        .map(|r| serde_json::to_string(&r.vector))
        .collect::<Result<_, _>>()?;
    let labels: Vec<&str> = records.iter().map(|r| r.label.as_str()).collect();
    let products: Vec<&str> = records.iter().map(|r| r.product.as_str()).collect();
    let ids: Vec<Option<u64>> = records.iter().map(|r| r.id.map(u64::from)).collect();
    let uuids: Vec<&str> = records.iter().map(|r| r.uuid.as_str()).collect();
    let times: Vec<Option<String>> = records
        .iter()
        .map(|r| r.time.map(|t| t.to_rfc3339()))
        .collect();

    Ok(DataFrame::new(vec![
        Series::new("Image".into(), images).into(),
        Series::new("Path".into(), paths).into(),
        Series::new("Type".into(), types).into(),
        Series::new("Vector".into(), vectors).into(),
        Series::new("Label".into(), labels).into(),
        Series::new("Product".into(), products).into(),
        Series::new("ID".into(), ids).into(),
        Series::new("UUID".into(), uuids).into(),
        Series::new("Time".into(), times).into(),
    ])?)
}

#[cfg(feature = "polars")]
fn string_column(df: &DataFrame, name: &str) -> Result<Vec<Option<String>>, Error> {
    match df.column(name) {
        Ok(column) => Ok(column
            .cast(&DataType::String)?
            .str()?
            .into_iter()
            .map(|s| s.map(str::to_owned))
            .collect()),
        Err(_) => Ok(vec![None; df.height()]),
    }
}

#[cfg(feature = "polars")]
fn id_column(df: &DataFrame, name: &str) -> Result<Vec<Option<u64>>, Error> {
    match df.column(name) {
        Ok(column) => Ok(column
            .cast(&DataType::UInt64)?
            .u64()?
            .into_iter()
            .collect()),
        Err(_) => Ok(vec![None; df.height()]),
    }
}

/// Rebuilds records from a dataframe in the exchange layout.
///
/// `Image`, `Vector` and `Label` are required; the other columns may be
/// missing or null.
#[cfg(feature = "polars")]
pub fn records_from_dataframe(df: &DataFrame) -> Result<Vec<AnnotationRecord>, Error> {
    for required in ["Image", "Vector", "Label"] {
        if df.column(required).is_err() {
            return Err(Error::InvalidParameters(format!(
                "Annotation table is missing the {} column",
                required
            )));
        }
    }

    let images = string_column(df, "Image")?;
    let paths = string_column(df, "Path")?;
    let types = id_column(df, "Type")?;
    let vectors = string_column(df, "Vector")?;
    let labels = string_column(df, "Label")?;
    let products = string_column(df, "Product")?;
    let ids = id_column(df, "ID")?;
    let uuids = string_column(df, "UUID")?;
    let times = string_column(df, "Time")?;

    let mut records = Vec::with_capacity(df.height());
    for row in 0..df.height() {
        let vector = match &vectors[row] {
            Some(text) => serde_json::from_str(text)?,
            None => serde_json::Value::Null,
        };
        let time = match &times[row] {
            Some(text) => Some(
                DateTime::parse_from_rfc3339(text)
                    .map_err(|e| {
                        Error::InvalidParameters(format!("Invalid Time '{}': {}", text, e))
                    })?
                    .with_timezone(&Utc),
            ),
            None => None,
        };

        records.push(AnnotationRecord {
            image: images[row].clone().unwrap_or_default(),
            path: paths[row].clone().unwrap_or_default(),
            annotation_type: types[row].map(AnnotationTypeID::from),
            vector,
            label: labels[row].clone().unwrap_or_default(),
            product: products[row].clone().unwrap_or_default(),
            id: ids[row].map(AnnotationID::from),
            uuid: uuids[row].clone().unwrap_or_default(),
            time,
        });
    }

    Ok(records)
}

#[cfg(feature = "polars")]
fn read_arrow(path: &Path) -> Result<Vec<AnnotationRecord>, Error> {
    let mut file = File::open(path)?;
    let df = IpcReader::new(&mut file).finish()?;
    records_from_dataframe(&df)
}

#[cfg(feature = "polars")]
fn write_arrow(path: &Path, records: &[AnnotationRecord]) -> Result<(), Error> {
    let mut df = annotations_dataframe(records)?;
    let mut file = File::create(path)?;
    IpcWriter::new(&mut file).finish(&mut df)?;
    Ok(())
}

#[cfg(not(feature = "polars"))]
fn read_arrow(_path: &Path) -> Result<Vec<AnnotationRecord>, Error> {
    Err(Error::FeatureNotEnabled("polars".to_owned()))
}

#[cfg(not(feature = "polars"))]
fn write_arrow(_path: &Path, _records: &[AnnotationRecord]) -> Result<(), Error> {
    Err(Error::FeatureNotEnabled("polars".to_owned()))
}

fn extension(path: &Path) -> String {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(str::to_lowercase)
        .unwrap_or_default()
}

/// Reads an annotation table, `.json` or `.arrow`.
pub fn read_records<P: AsRef<Path>>(path: P) -> Result<Vec<AnnotationRecord>, Error> {
    let path = path.as_ref();
    match extension(path).as_str() {
        "json" => read_json(path),
        "arrow" => read_arrow(path),
        other => Err(Error::InvalidParameters(format!(
            "Unsupported annotation table extension '{}'",
            other
        ))),
    }
}

/// Writes an annotation table, `.json` or `.arrow`.
pub fn write_records<P: AsRef<Path>>(path: P, records: &[AnnotationRecord]) -> Result<(), Error> {
    let path = path.as_ref();
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent)?;
    }

    match extension(path).as_str() {
        "json" => write_json(path, records),
        "arrow" => write_arrow(path, records),
        other => Err(Error::InvalidParameters(format!(
            "Unsupported annotation table extension '{}'",
            other
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample() -> Vec<AnnotationRecord> {
        let mut full = AnnotationRecord::new("12", "road", json!({"x1": 1, "y1": 2}));
        full.path = "/data/a.png".to_owned();
        full.annotation_type = Some(AnnotationTypeID::from(4));
        full.product = "P1".to_owned();
        full.id = Some(AnnotationID::from(99));
        full.uuid = "6f1c9a1e-0000-4000-8000-000000000000".to_owned();
        full.time = DateTime::parse_from_rfc3339("2024-05-01T10:00:00Z")
            .ok()
            .map(|t| t.with_timezone(&Utc));

        vec![full, AnnotationRecord::new("a", "lane", json!({"x1": 3}))]
    }

    #[test]
    fn test_column_names() -> Result<(), Error> {
        let value = serde_json::to_value(&sample()[0])?;
        let mut keys: Vec<_> = value
            .as_object()
            .map(|o| o.keys().cloned().collect())
            .unwrap_or_default();
        let mut expected: Vec<_> = COLUMNS.iter().map(|c| c.to_string()).collect();
        keys.sort();
        expected.sort();
        assert_eq!(keys, expected);
        Ok(())
    }

    #[test]
    fn test_minimal_upload_row() -> Result<(), Error> {
        let record: AnnotationRecord = serde_json::from_str(
            r#"{"Image": "frame_001", "Label": "road", "Vector": {"x1": 0, "y1": 0}}"#,
        )?;
        assert_eq!(record, AnnotationRecord::new("frame_001", "road", json!({"x1": 0, "y1": 0})));
        Ok(())
    }

    #[test]
    fn test_json_file() -> Result<(), Error> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("nested/annotations.json");
        write_records(&path, &sample())?;
        assert_eq!(read_records(&path)?, sample());
        Ok(())
    }

    #[test]
    fn test_unknown_extension() {
        assert!(matches!(
            read_records("annotations.csv"),
            Err(Error::InvalidParameters(_))
        ));
    }

    #[cfg(feature = "polars")]
    #[test]
    fn test_arrow_file() -> Result<(), Error> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("annotations.arrow");
        write_records(&path, &sample())?;
        assert_eq!(read_records(&path)?, sample());
        Ok(())
    }

    #[cfg(feature = "polars")]
    #[test]
    fn test_dataframe_columns() -> Result<(), Error> {
        let df = annotations_dataframe(&sample())?;
        let names: Vec<_> = df
            .get_column_names()
            .into_iter()
            .map(|n| n.to_string())
            .collect();
        assert_eq!(names, COLUMNS);
        assert_eq!(df.height(), 2);
        Ok(())
    }
}
