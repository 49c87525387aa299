// SPDX-License-Identifier: Apache-2.0
// Copyright © 2025 Au-Zone Technologies. All Rights Reserved.

use crate::{
    Error,
    gateway::{Named, Resource},
};
use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::{collections::BTreeMap, fmt::Display, path::PathBuf, str::FromStr};

/// Declares an integer identifier newtype for a remote entity.
///
/// EXACT identifiers are plain integers on the wire; the newtypes keep team,
/// image set, product, annotation type, image and annotation ids from being
/// mixed up in the sync layer.
macro_rules! entity_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Serialize, Deserialize, Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
        #[serde(transparent)]
        pub struct $name(u64);

        impl Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<u64> for $name {
            fn from(id: u64) -> Self {
                $name(id)
            }
        }

        impl From<$name> for u64 {
            fn from(val: $name) -> Self {
                val.0
            }
        }

        impl $name {
            pub fn value(&self) -> u64 {
                self.0
            }
        }

        impl FromStr for $name {
            type Err = Error;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Ok($name(s.trim().parse()?))
            }
        }

        impl TryFrom<&str> for $name {
            type Error = Error;

            fn try_from(s: &str) -> Result<Self, Self::Error> {
                $name::from_str(s)
            }
        }
    };
}

entity_id!(
    /// Unique identifier for a team on the EXACT server.
    TeamID
);
entity_id!(
    /// Unique identifier for an image set.
    ImageSetID
);
entity_id!(
    /// Unique identifier for a product (a group of annotation types).
    ProductID
);
entity_id!(
    /// Unique identifier for an annotation type.
    AnnotationTypeID
);
entity_id!(
    /// Unique identifier for a remote image.
    ///
    /// ```rust
    /// use exact_sync::ImageID;
    ///
    /// let id: ImageID = "42".parse().unwrap();
    /// assert_eq!(id.value(), 42);
    /// assert_eq!(id.to_string(), "42");
    /// ```
    ImageID
);
entity_id!(
    /// Unique identifier for an annotation.
    AnnotationID
);

/// The geometric shape family an annotation type's vectors conform to.
///
/// The integer codes are those of the remote schema and must not change.
/// Vector types are chosen when an annotation type is created and are never
/// modified afterwards. Only the first five variants can be created from a
/// vector kind; types created by other tools (multi-line, global, ...) are
/// read as [`VectorType::Other`] with their raw code.
///
/// # Examples
///
/// ```rust
/// use exact_sync::VectorType;
///
/// assert_eq!(VectorType::from_kind("poly").unwrap(), VectorType::Polygon);
/// assert_eq!(VectorType::from_kind("fixed_rect").unwrap().code(), 6);
/// assert!(VectorType::from_kind("circle").is_err());
/// assert_eq!(VectorType::from(7), VectorType::Other(7));
/// ```
#[derive(Serialize, Deserialize, Copy, Clone, Debug, PartialEq, Eq, Hash)]
#[serde(into = "u8", from = "u8")]
pub enum VectorType {
    BoundingBox,
    Point,
    Line,
    Polygon,
    FixedSizeBoundingBox,
    Other(u8),
}

impl VectorType {
    /// Maps a user-facing vector kind (`poly`, `fixed_rect`, `rect`, `line`,
    /// `point`) to its vector type.
    pub fn from_kind(kind: &str) -> Result<Self, Error> {
        match kind {
            "poly" => Ok(VectorType::Polygon),
            "fixed_rect" => Ok(VectorType::FixedSizeBoundingBox),
            "rect" => Ok(VectorType::BoundingBox),
            "line" => Ok(VectorType::Line),
            "point" => Ok(VectorType::Point),
            other => Err(Error::UnsupportedVectorKind(other.to_owned())),
        }
    }

    /// The user-facing kind name accepted by [`VectorType::from_kind`], or
    /// `None` for a type that cannot be created from a kind.
    pub fn kind(&self) -> Option<&'static str> {
        match self {
            VectorType::Polygon => Some("poly"),
            VectorType::FixedSizeBoundingBox => Some("fixed_rect"),
            VectorType::BoundingBox => Some("rect"),
            VectorType::Line => Some("line"),
            VectorType::Point => Some("point"),
            VectorType::Other(_) => None,
        }
    }

    /// The integer code used by the remote schema.
    pub fn code(&self) -> u8 {
        match self {
            VectorType::BoundingBox => 1,
            VectorType::Point => 2,
            VectorType::Line => 3,
            VectorType::Polygon => 5,
            VectorType::FixedSizeBoundingBox => 6,
            VectorType::Other(code) => *code,
        }
    }
}

impl From<VectorType> for u8 {
    fn from(value: VectorType) -> Self {
        value.code()
    }
}

impl From<u8> for VectorType {
    fn from(code: u8) -> Self {
        match code {
            1 => VectorType::BoundingBox,
            2 => VectorType::Point,
            3 => VectorType::Line,
            5 => VectorType::Polygon,
            6 => VectorType::FixedSizeBoundingBox,
            other => VectorType::Other(other),
        }
    }
}

impl FromStr for VectorType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        VectorType::from_kind(s)
    }
}

impl Display for VectorType {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self.kind() {
            Some(kind) => write!(f, "{}", kind),
            None => write!(f, "code {}", self.code()),
        }
    }
}

/// How an image came to exist on the server.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ImageSourceType {
    /// Uploaded by a client.
    Default,
    /// Generated by the server itself.
    ServerGenerated,
}

impl ImageSourceType {
    pub fn code(&self) -> u8 {
        match self {
            ImageSourceType::Default => 0,
            ImageSourceType::ServerGenerated => 1,
        }
    }
}

/// A team owning image sets and products.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct Team {
    id: TeamID,
    name: String,
}

impl Display for Team {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl Team {
    pub fn id(&self) -> TeamID {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

/// A named collection of images owned by a team.
///
/// `product_set` is the reverse relation maintained by the server: every
/// product whose `imagesets` contains this image set.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct ImageSet {
    id: ImageSetID,
    name: String,
    #[serde(default)]
    team: Option<TeamID>,
    #[serde(default)]
    images: Vec<ImageID>,
    #[serde(default)]
    product_set: Vec<ProductID>,
}

impl Display for ImageSet {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl ImageSet {
    pub fn id(&self) -> ImageSetID {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn team(&self) -> Option<TeamID> {
        self.team
    }

    pub fn images(&self) -> &[ImageID] {
        &self.images
    }

    pub fn product_set(&self) -> &[ProductID] {
        &self.product_set
    }
}

/// A product groups annotation types and applies to a set of image sets.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct Product {
    id: ProductID,
    name: String,
    #[serde(default)]
    team: Option<TeamID>,
    #[serde(default)]
    imagesets: Vec<ImageSetID>,
}

impl Display for Product {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl Product {
    pub fn id(&self) -> ProductID {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn team(&self) -> Option<TeamID> {
        self.team
    }

    pub fn imagesets(&self) -> &[ImageSetID] {
        &self.imagesets
    }
}

/// A label definition scoped to a product with a fixed vector type.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct AnnotationType {
    id: AnnotationTypeID,
    name: String,
    product: ProductID,
    vector_type: VectorType,
}

impl Display for AnnotationType {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{} ({})", self.name(), self.vector_type())
    }
}

impl AnnotationType {
    pub fn id(&self) -> AnnotationTypeID {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn product(&self) -> ProductID {
        self.product
    }

    pub fn vector_type(&self) -> VectorType {
        self.vector_type
    }
}

/// An image registered on the server.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct Image {
    id: ImageID,
    name: String,
    #[serde(default)]
    filename: Option<String>,
    #[serde(default)]
    image_set: Option<ImageSetID>,
}

impl Image {
    pub fn id(&self) -> ImageID {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// The stored file name, falling back to the display name.
    pub fn filename(&self) -> &str {
        self.filename.as_deref().unwrap_or(&self.name)
    }

    pub fn image_set(&self) -> Option<ImageSetID> {
        self.image_set
    }
}

/// An annotation stored on the server.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct Annotation {
    id: AnnotationID,
    annotation_type: AnnotationTypeID,
    #[serde(default)]
    vector: serde_json::Value,
    image: ImageID,
    #[serde(default)]
    unique_identifier: String,
    #[serde(default)]
    last_edit_time: Option<DateTime<Utc>>,
    #[serde(default)]
    deleted: bool,
}

impl Annotation {
    pub fn id(&self) -> AnnotationID {
        self.id
    }

    pub fn annotation_type(&self) -> AnnotationTypeID {
        self.annotation_type
    }

    pub fn vector(&self) -> &serde_json::Value {
        &self.vector
    }

    pub fn image(&self) -> ImageID {
        self.image
    }

    pub fn unique_identifier(&self) -> &str {
        &self.unique_identifier
    }

    pub fn last_edit_time(&self) -> Option<DateTime<Utc>> {
        self.last_edit_time
    }

    pub fn deleted(&self) -> bool {
        self.deleted
    }
}

#[derive(Serialize, Clone, Debug)]
pub struct NewTeam {
    pub name: String,
}

#[derive(Serialize, Clone, Debug)]
pub struct NewImageSet {
    pub name: String,
    pub team: TeamID,
}

#[derive(Serialize, Clone, Debug)]
pub struct NewProduct {
    pub name: String,
    pub imagesets: Vec<ImageSetID>,
    pub team: TeamID,
}

#[derive(Serialize, Clone, Debug)]
pub struct NewAnnotationType {
    pub name: String,
    pub product: ProductID,
    pub vector_type: VectorType,
}

/// A pending annotation submitted through a bulk create call.
#[derive(Serialize, Clone, Debug, PartialEq)]
pub struct NewAnnotation {
    pub annotation_type: AnnotationTypeID,
    pub vector: serde_json::Value,
    pub image: ImageID,
    pub unique_identifier: String,
}

impl Resource for Team {
    const ENDPOINT: &'static str = "/api/v1/users/teams/";
    const KIND: &'static str = "team";

    fn id(&self) -> u64 {
        self.id.value()
    }
}

impl Named for Team {
    fn name(&self) -> &str {
        &self.name
    }
}

impl Resource for ImageSet {
    const ENDPOINT: &'static str = "/api/v1/images/image_sets/";
    const KIND: &'static str = "image set";

    fn id(&self) -> u64 {
        self.id.value()
    }
}

impl Named for ImageSet {
    fn name(&self) -> &str {
        &self.name
    }
}

impl Resource for Product {
    const ENDPOINT: &'static str = "/api/v1/administration/products/";
    const KIND: &'static str = "product";

    fn id(&self) -> u64 {
        self.id.value()
    }
}

impl Named for Product {
    fn name(&self) -> &str {
        &self.name
    }
}

impl Resource for AnnotationType {
    const ENDPOINT: &'static str = "/api/v1/annotations/annotation_types/";
    const KIND: &'static str = "annotation type";

    fn id(&self) -> u64 {
        self.id.value()
    }
}

impl Named for AnnotationType {
    fn name(&self) -> &str {
        &self.name
    }
}

impl Resource for Image {
    const ENDPOINT: &'static str = "/api/v1/images/images/";
    const KIND: &'static str = "image";

    fn id(&self) -> u64 {
        self.id.value()
    }
}

impl Resource for Annotation {
    const ENDPOINT: &'static str = "/api/v1/annotations/annotations/";
    const KIND: &'static str = "annotation";

    fn id(&self) -> u64 {
        self.id.value()
    }
}

/// The resolved destination of a synchronization session.
///
/// A target bundles the team, the image set and the annotation types (keyed
/// by name, in the order they were requested or listed) that annotations are
/// read from or written to. Targets are
/// rebuilt for every session through
/// [`Synchronizer::resolve_target`][crate::Synchronizer::resolve_target] or
/// [`Synchronizer::get_target`][crate::Synchronizer::get_target] and are
/// never persisted.
#[derive(Clone, Debug, PartialEq)]
pub struct Target {
    team: Team,
    image_set: ImageSet,
    annotation_types: IndexMap<String, AnnotationType>,
}

impl Target {
    pub fn new(
        team: Team,
        image_set: ImageSet,
        annotation_types: IndexMap<String, AnnotationType>,
    ) -> Self {
        Target {
            team,
            image_set,
            annotation_types,
        }
    }

    pub fn team(&self) -> &Team {
        &self.team
    }

    pub fn image_set(&self) -> &ImageSet {
        &self.image_set
    }

    pub fn annotation_types(&self) -> &IndexMap<String, AnnotationType> {
        &self.annotation_types
    }

    /// Looks up an annotation type by its label name.
    pub fn annotation_type(&self, label: &str) -> Option<&AnnotationType> {
        self.annotation_types.get(label)
    }
}

/// A remote image together with the local file holding its pixels.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ImageEntry {
    pub id: ImageID,
    pub path: PathBuf,
    pub name: String,
}

/// Local image key to remote image id, built by
/// [`Synchronizer::sync_images`][crate::Synchronizer::sync_images].
pub type ImageIdMap = BTreeMap<String, ImageID>;
