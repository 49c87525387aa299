// SPDX-License-Identifier: Apache-2.0
// Copyright © 2025 Au-Zone Technologies. All Rights Reserved.

use crate::{
    Annotation, AnnotationRecord, AnnotationType, AnnotationTypeID, Error, ImageEntry, Product,
    ProductID, Synchronizer,
    gateway::{Gateway, LIST_PAGE_SIZE, Query, list_all},
};
use futures::future::join_all;
use log::{debug, warn};
use std::{collections::BTreeMap, fmt::Display};

const ID_PREFIX: &str = "id:";

/// A product given either by id or by name.
///
/// A name refers to every product carrying exactly that name.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ProductRef {
    Id(ProductID),
    Name(String),
}

impl From<ProductID> for ProductRef {
    fn from(id: ProductID) -> Self {
        ProductRef::Id(id)
    }
}

/// `id:<n>` selects a product by id; any other string, digits included, is a
/// name.
impl From<&str> for ProductRef {
    fn from(s: &str) -> Self {
        match s.strip_prefix(ID_PREFIX).map(|id| id.trim().parse::<u64>()) {
            Some(Ok(id)) => ProductRef::Id(ProductID::from(id)),
            _ => ProductRef::Name(s.to_owned()),
        }
    }
}

impl Display for ProductRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProductRef::Id(id) => write!(f, "{}{}", ID_PREFIX, id),
            ProductRef::Name(name) => write!(f, "{}", name),
        }
    }
}

impl<G: Gateway> Synchronizer<G> {
    /// Names of every product visible to the user, keyed by id.
    pub async fn product_names(&self) -> Result<BTreeMap<ProductID, String>, Error> {
        let products: Vec<Product> = list_all(&self.gateway, &Query::new(), LIST_PAGE_SIZE).await?;
        Ok(products
            .into_iter()
            .map(|product| (product.id(), product.name().to_owned()))
            .collect())
    }

    /// Annotation types of the given products, keyed by id.
    pub async fn annotation_types(
        &self,
        products: &[ProductID],
    ) -> Result<BTreeMap<AnnotationTypeID, AnnotationType>, Error> {
        let mut annotation_types = BTreeMap::new();
        for product in products {
            let query = Query::new().with("product", product);
            let types: Vec<AnnotationType> =
                list_all(&self.gateway, &query, LIST_PAGE_SIZE).await?;
            annotation_types.extend(types.into_iter().map(|t| (t.id(), t)));
        }
        Ok(annotation_types)
    }

    fn resolve_products(
        &self,
        products: &[ProductRef],
        names: &BTreeMap<ProductID, String>,
    ) -> Vec<ProductID> {
        if products.is_empty() {
            return names.keys().copied().collect();
        }

        let mut ids = vec![];
        for product in products {
            match product {
                ProductRef::Id(id) => ids.push(*id),
                ProductRef::Name(name) => {
                    let before = ids.len();
                    ids.extend(
                        names
                            .iter()
                            .filter(|(_, n)| *n == name)
                            .map(|(id, _)| *id),
                    );
                    if ids.len() == before {
                        warn!("No product named '{}'", name);
                    }
                }
            }
        }
        ids.sort();
        ids.dedup();
        ids
    }

    /// Reads the annotations of the given images, restricted to the types of
    /// the given products.
    ///
    /// An empty product list selects every product. One listing per image is
    /// issued and all of them are awaited together; rows come out grouped by
    /// input image, then in server order. Annotations whose type belongs to
    /// another product are skipped.
    ///
    /// Each listing requests at most
    /// [`request_ceiling`][crate::SyncOptions::request_ceiling] rows. A
    /// listing that returns exactly that many fails the whole read with
    /// [`Error::IncompleteRetrieval`] since the rows may be truncated.
    #[cfg_attr(feature = "profiling", tracing::instrument(skip_all, fields(images = images.len())))]
    pub async fn read_annotations(
        &self,
        images: &[ImageEntry],
        products: &[ProductRef],
    ) -> Result<Vec<AnnotationRecord>, Error> {
        let names = self.product_names().await?;
        let scope = self.resolve_products(products, &names);
        let annotation_types = self.annotation_types(&scope).await?;
        let ceiling = self.options.request_ceiling();

        let listings = images.iter().map(|image| {
            let query = Query::new()
                .with("image", image.id)
                .deleted(false)
                .pagination(true)
                .limit(ceiling);
            async move { self.gateway.list::<Annotation>(&query).await }
        });
        let pages = join_all(listings).await;

        let mut records = vec![];
        for (image, page) in images.iter().zip(pages) {
            let page = page?;
            if page.results.len() == ceiling {
                return Err(Error::IncompleteRetrieval {
                    image: image.id,
                    limit: ceiling,
                });
            }

            let mut skipped = 0;
            for annotation in page.results {
                let Some(annotation_type) = annotation_types.get(&annotation.annotation_type())
                else {
                    skipped += 1;
                    continue;
                };

                let product = names
                    .get(&annotation_type.product())
                    .cloned()
                    .unwrap_or_else(|| annotation_type.product().to_string());

                records.push(AnnotationRecord {
                    image: image.id.to_string(),
                    path: image.path.to_string_lossy().into_owned(),
                    annotation_type: Some(annotation_type.id()),
                    vector: annotation.vector().clone(),
                    label: annotation_type.name().to_owned(),
                    product,
                    id: Some(annotation.id()),
                    uuid: annotation.unique_identifier().to_owned(),
                    time: annotation.last_edit_time(),
                });
            }

            if skipped > 0 {
                debug!(
                    "Skipped {} annotations of image {} outside the product scope",
                    skipped, image.id
                );
            }
        }

        Ok(records)
    }
}
