//! Cache-first image resolution.
//!
//! A miss triggers one batched lookup for the whole finder pattern. Every
//! entry in the response is parsed and cached, not only the one that was
//! missing, so a single query answers later lookups for sibling versions
//! and variants in the same region.

use std::sync::Arc;

use amisync_common::error::Result;

use crate::artifact::{ArtifactRecord, ImageFinder, NameMatcher, Variant};
use crate::cache::ImageCache;
use crate::lookup::ImageLookup;

/// Resolves image records through an [`ImageCache`] backed by an
/// [`ImageLookup`].
#[derive(Debug, Clone)]
pub struct ImageResolver {
    lookup: Arc<dyn ImageLookup>,
    cache: Arc<ImageCache>,
}

impl ImageResolver {
    /// Creates a resolver.
    #[must_use]
    pub fn new(lookup: Arc<dyn ImageLookup>, cache: Arc<ImageCache>) -> Self {
        Self { lookup, cache }
    }

    /// The cache this resolver fills.
    #[must_use]
    pub fn cache(&self) -> &ImageCache {
        &self.cache
    }

    /// Resolves `versions` of `product` in `region` for `variant`.
    ///
    /// Results follow the order of `versions` and are read back from the
    /// cache. A version that cannot be found is logged and left out; it never
    /// fails the call. The lookup service is queried at most once per call.
    ///
    /// # Errors
    ///
    /// Returns `AmisyncError::InvalidVersion` if a requested version cannot be
    /// coerced, or `AmisyncError::InvalidPattern` if the finder's model
    /// pattern does not compile.
    pub async fn resolve(
        &self,
        product: &str,
        finder: &ImageFinder,
        region: &str,
        versions: &[String],
        variant: Variant,
    ) -> Result<Vec<ArtifactRecord>> {
        let matcher = finder.compile()?;
        let mut refilled = false;
        let mut images = Vec::with_capacity(versions.len());

        for version in versions {
            if let Some(hit) = self.cache.get(product, region, version, variant)? {
                tracing::debug!(product, region, version = %version, %variant, "image cache hit");
                images.push(hit);
                continue;
            }
            tracing::debug!(product, region, version = %version, %variant, "image cache miss");

            if !refilled {
                self.refill(product, region, finder, &matcher).await;
                refilled = true;
            }

            match self.cache.get(product, region, version, variant)? {
                Some(image) => images.push(image),
                None => tracing::error!(
                    product,
                    region,
                    version = %version,
                    %variant,
                    "cannot find image in region, skipped it"
                ),
            }
        }

        if self.cache.is_persistent() {
            let ttl_ms = u64::try_from(self.cache.remaining_ttl().as_millis()).unwrap_or(u64::MAX);
            tracing::info!(
                count = images.len(),
                region,
                product,
                versions = ?versions,
                %variant,
                cache_ttl_ms = ttl_ms,
                "images loaded"
            );
        } else {
            tracing::info!(
                count = images.len(),
                region,
                product,
                versions = ?versions,
                %variant,
                "images loaded"
            );
        }
        Ok(images)
    }

    async fn refill(
        &self,
        product: &str,
        region: &str,
        finder: &ImageFinder,
        matcher: &NameMatcher,
    ) {
        let entries = match self.lookup.describe_images(region, &finder.filters()).await {
            Ok(entries) => entries,
            Err(e) => {
                tracing::warn!(
                    product,
                    region,
                    error = %e,
                    "image lookup failed, treating as empty"
                );
                Vec::new()
            }
        };

        let total = entries.len();
        let mut cached = 0_usize;
        for entry in entries {
            let name = entry.name.clone();
            let record = matcher.parse(entry);
            if record.is_malformed() {
                tracing::debug!(product, region, name = %name, "skipping unparsable image entry");
                continue;
            }
            if self.cache.put(product, region, record) {
                cached += 1;
            }
        }
        tracing::debug!(product, region, total, cached, "image cache back-filled");
    }
}
