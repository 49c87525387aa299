// SPDX-License-Identifier: Apache-2.0
// Copyright © 2025 Au-Zone Technologies. All Rights Reserved.

//! Entity resolution: team, image set, product and annotation types.

use crate::{
    AnnotationType, Error, ImageSet, Product, Synchronizer, Target, Team, VectorType,
    api::{NewAnnotationType, NewImageSet, NewProduct, NewTeam},
    gateway::{Gateway, LIST_PAGE_SIZE, Named, Query, list_all},
};
use log::{debug, info, warn};
use indexmap::IndexMap;
use serde::Serialize;

/// Looks up a record whose name is exactly `name` within the lookup scope.
///
/// The server's name filter may match loosely, so the candidates are checked
/// again here and only an exact, case-sensitive match is accepted.
pub(crate) async fn find_by_name<G, R>(
    gateway: &G,
    lookup: Query,
    name: &str,
) -> Result<Option<R>, Error>
where
    G: Gateway,
    R: Named,
{
    let page = gateway.list::<R>(&lookup.name(name)).await?;
    Ok(page.results.into_iter().find(|record| record.name() == name))
}

/// Returns the record named `name` within the lookup scope, creating it from
/// `construct()` when absent. The flag is true when the record was created.
///
/// Lookup and creation are two separate round trips; concurrent sessions
/// resolving the same name may both create it.
pub(crate) async fn find_or_create<G, R, B, F>(
    gateway: &G,
    lookup: Query,
    name: &str,
    construct: F,
) -> Result<(R, bool), Error>
where
    G: Gateway,
    R: Named,
    B: Serialize + Sync,
    F: FnOnce() -> B,
{
    if let Some(record) = find_by_name::<G, R>(gateway, lookup, name).await? {
        debug!("Found {} '{}' ({})", R::KIND, name, record.id());
        return Ok((record, false));
    }

    let record: R = gateway.create(&construct()).await?;
    info!("Created {} '{}' ({})", R::KIND, name, record.id());
    Ok((record, true))
}

impl<G: Gateway> Synchronizer<G> {
    /// Finds or creates everything needed to upload annotations.
    ///
    /// The team, image set and product are looked up by exact name and
    /// created when missing; each annotation type is looked up within the
    /// product and created with the vector type named by `vector_kind`
    /// (`poly`, `fixed_rect`, `rect`, `line` or `point`). Duplicate type
    /// names collapse to one record.
    ///
    /// The vector kind is validated before any remote call. Repeating the
    /// call with the same names only reads.
    #[cfg_attr(
        feature = "profiling",
        tracing::instrument(skip_all, fields(team = team_name, image_set = image_set_name))
    )]
    pub async fn resolve_target(
        &self,
        team_name: &str,
        image_set_name: &str,
        product_name: &str,
        annotation_type_names: &[impl AsRef<str>],
        vector_kind: &str,
    ) -> Result<Target, Error> {
        let vector_type = VectorType::from_kind(vector_kind)?;
        let gateway = &self.gateway;

        let (team, _) = find_or_create::<_, Team, _, _>(gateway, Query::new(), team_name, || {
            NewTeam {
                name: team_name.to_owned(),
            }
        })
        .await?;

        let (image_set, _) =
            find_or_create::<_, ImageSet, _, _>(gateway, Query::new(), image_set_name, || {
                NewImageSet {
                    name: image_set_name.to_owned(),
                    team: team.id(),
                }
            })
            .await?;

        let (mut product, created) =
            find_or_create::<_, Product, _, _>(gateway, Query::new(), product_name, || {
                NewProduct {
                    name: product_name.to_owned(),
                    imagesets: vec![image_set.id()],
                    team: team.id(),
                }
            })
            .await?;

        if !created && !product.imagesets().contains(&image_set.id()) {
            let mut imagesets = product.imagesets().to_vec();
            imagesets.push(image_set.id());
            product = gateway
                .update(
                    product.id().value(),
                    &serde_json::json!({ "imagesets": imagesets }),
                )
                .await?;
            info!(
                "Attached product '{}' to image set '{}'",
                product.name(),
                image_set.name()
            );
        }

        let image_set: ImageSet = if image_set.product_set().contains(&product.id()) {
            image_set
        } else {
            gateway.retrieve(image_set.id().value()).await?
        };

        let mut annotation_types = IndexMap::new();
        for name in annotation_type_names {
            let name = name.as_ref();
            if annotation_types.contains_key(name) {
                continue;
            }

            let lookup = Query::new().with("product", product.id());
            let (annotation_type, _) =
                find_or_create::<_, AnnotationType, _, _>(gateway, lookup, name, || {
                    NewAnnotationType {
                        name: name.to_owned(),
                        product: product.id(),
                        vector_type,
                    }
                })
                .await?;

            if annotation_type.vector_type() != vector_type {
                warn!(
                    "Annotation type '{}' keeps vector type {} (requested {})",
                    name,
                    annotation_type.vector_type(),
                    vector_type
                );
            }

            annotation_types.insert(name.to_owned(), annotation_type);
        }

        Ok(Target::new(team, image_set, annotation_types))
    }

    /// Resolves an existing team and image set without creating anything.
    ///
    /// The annotation types are those of every product attached to the image
    /// set, in id order. When two products define the same type name, the
    /// type with the higher id wins.
    #[cfg_attr(
        feature = "profiling",
        tracing::instrument(skip_all, fields(team = team_name, image_set = image_set_name))
    )]
    pub async fn get_target(&self, team_name: &str, image_set_name: &str) -> Result<Target, Error> {
        let team = find_by_name::<_, Team>(&self.gateway, Query::new(), team_name)
            .await?
            .ok_or_else(|| Error::NotFound(format!("team '{}'", team_name)))?;

        let image_set = find_by_name::<_, ImageSet>(&self.gateway, Query::new(), image_set_name)
            .await?
            .ok_or_else(|| Error::NotFound(format!("image set '{}'", image_set_name)))?;

        let annotation_types = self
            .annotation_types(image_set.product_set())
            .await?
            .into_values()
            .map(|annotation_type| (annotation_type.name().to_owned(), annotation_type))
            .collect();

        Ok(Target::new(team, image_set, annotation_types))
    }

    /// Lists image sets, optionally restricted to an exact name.
    pub async fn image_sets(&self, name: Option<&str>) -> Result<Vec<ImageSet>, Error> {
        let query = match name {
            Some(name) => Query::new().name(name),
            None => Query::new(),
        };

        let image_sets: Vec<ImageSet> = list_all(&self.gateway, &query, LIST_PAGE_SIZE).await?;
        Ok(match name {
            Some(name) => image_sets
                .into_iter()
                .filter(|image_set| image_set.name() == name)
                .collect(),
            None => image_sets,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{MemoryGateway, SyncOptions, gateway::Resource};

    fn synchronizer() -> Synchronizer<MemoryGateway> {
        Synchronizer::new(MemoryGateway::new(), SyncOptions::default())
    }

    #[tokio::test]
    async fn test_resolve_target_on_empty_server() -> Result<(), Error> {
        let sync = synchronizer();
        let target = sync
            .resolve_target("T1", "S1", "P1", &["sidewalk", "road"], "poly")
            .await?;

        let gateway = sync.gateway();
        assert_eq!(gateway.creates(Team::ENDPOINT), 1);
        assert_eq!(gateway.creates(ImageSet::ENDPOINT), 1);
        assert_eq!(gateway.creates(Product::ENDPOINT), 1);
        assert_eq!(gateway.creates(AnnotationType::ENDPOINT), 2);

        let keys: Vec<_> = target.annotation_types().keys().cloned().collect();
        assert_eq!(keys, vec!["sidewalk", "road"]);
        assert!(
            target
                .annotation_types()
                .values()
                .all(|t| t.vector_type() == VectorType::Polygon)
        );
        assert_eq!(target.team().name(), "T1");
        assert_eq!(target.image_set().name(), "S1");
        assert_eq!(target.image_set().team(), Some(target.team().id()));

        let products = gateway.records::<Product>();
        assert_eq!(products.len(), 1);
        assert_eq!(products[0].imagesets(), &[target.image_set().id()]);
        assert!(
            target
                .annotation_types()
                .values()
                .all(|t| t.product() == products[0].id())
        );
        Ok(())
    }

    #[tokio::test]
    async fn test_resolve_target_is_idempotent() -> Result<(), Error> {
        let sync = synchronizer();
        let first = sync
            .resolve_target("T1", "S1", "P1", &["sidewalk", "road"], "rect")
            .await?;
        let creates = [
            Team::ENDPOINT,
            ImageSet::ENDPOINT,
            Product::ENDPOINT,
            AnnotationType::ENDPOINT,
        ]
        .map(|endpoint| sync.gateway().creates(endpoint));

        let second = sync
            .resolve_target("T1", "S1", "P1", &["sidewalk", "road"], "rect")
            .await?;

        assert_eq!(first, second);
        assert_eq!(
            creates,
            [
                Team::ENDPOINT,
                ImageSet::ENDPOINT,
                Product::ENDPOINT,
                AnnotationType::ENDPOINT,
            ]
            .map(|endpoint| sync.gateway().creates(endpoint))
        );
        assert_eq!(sync.gateway().updates(), 0);
        Ok(())
    }

    #[tokio::test]
    async fn test_duplicate_type_names_collapse() -> Result<(), Error> {
        let sync = synchronizer();
        let target = sync
            .resolve_target("T1", "S1", "P1", &["road", "road", "lane"], "line")
            .await?;
        assert_eq!(target.annotation_types().len(), 2);
        assert_eq!(sync.gateway().creates(AnnotationType::ENDPOINT), 2);
        Ok(())
    }

    #[tokio::test]
    async fn test_unsupported_kind_makes_no_calls() {
        let sync = synchronizer();
        let result = sync
            .resolve_target("T1", "S1", "P1", &["road"], "circle")
            .await;
        assert!(matches!(result, Err(Error::UnsupportedVectorKind(k)) if k == "circle"));
        assert_eq!(sync.gateway().list_calls(Team::ENDPOINT), 0);
        assert!(sync.gateway().records::<Team>().is_empty());
    }

    #[tokio::test]
    async fn test_same_type_name_in_other_product() -> Result<(), Error> {
        let sync = synchronizer();
        sync.resolve_target("T1", "S1", "P1", &["road"], "poly")
            .await?;
        sync.resolve_target("T1", "S1", "P2", &["road"], "poly")
            .await?;
        assert_eq!(sync.gateway().creates(Product::ENDPOINT), 2);
        assert_eq!(sync.gateway().creates(AnnotationType::ENDPOINT), 2);
        Ok(())
    }

    #[tokio::test]
    async fn test_existing_product_is_attached() -> Result<(), Error> {
        let sync = synchronizer();
        sync.resolve_target("T1", "S1", "P1", &["road"], "poly")
            .await?;
        let target = sync
            .resolve_target("T1", "S2", "P1", &["road"], "poly")
            .await?;

        assert_eq!(sync.gateway().updates(), 1);
        assert_eq!(sync.gateway().creates(Product::ENDPOINT), 1);
        let product = &sync.gateway().records::<Product>()[0];
        assert!(product.imagesets().contains(&target.image_set().id()));

        let reread = sync.get_target("T1", "S2").await?;
        assert!(reread.annotation_type("road").is_some());
        Ok(())
    }

    #[tokio::test]
    async fn test_get_target() -> Result<(), Error> {
        let sync = synchronizer();
        let resolved = sync
            .resolve_target("T1", "S1", "P1", &["sidewalk", "road"], "poly")
            .await?;
        sync.resolve_target("T1", "S1", "P2", &["car"], "rect")
            .await?;
        sync.resolve_target("T1", "Other", "P3", &["tree"], "point")
            .await?;

        let target = sync.get_target("T1", "S1").await?;
        assert_eq!(target.team(), resolved.team());
        let keys: Vec<_> = target.annotation_types().keys().cloned().collect();
        assert_eq!(keys, vec!["sidewalk", "road", "car"]);
        assert_eq!(
            target.annotation_type("road"),
            resolved.annotation_type("road")
        );
        Ok(())
    }

    #[tokio::test]
    async fn test_get_target_is_read_only() -> Result<(), Error> {
        let sync = synchronizer();
        assert!(matches!(
            sync.get_target("T1", "S1").await,
            Err(Error::NotFound(_))
        ));

        sync.resolve_target("T1", "S1", "P1", &["road"], "poly")
            .await?;
        assert!(matches!(
            sync.get_target("T1", "missing").await,
            Err(Error::NotFound(_))
        ));
        assert_eq!(sync.gateway().creates(ImageSet::ENDPOINT), 1);
        Ok(())
    }

    #[tokio::test]
    async fn test_image_sets_exact_name() -> Result<(), Error> {
        let sync = synchronizer();
        sync.resolve_target("T1", "Street", "P1", &["road"], "poly")
            .await?;
        sync.resolve_target("T1", "Street Night", "P1", &["road"], "poly")
            .await?;

        assert_eq!(sync.image_sets(None).await?.len(), 2);
        let street = sync.image_sets(Some("Street")).await?;
        assert_eq!(street.len(), 1);
        assert_eq!(street[0].name(), "Street");
        Ok(())
    }
}
