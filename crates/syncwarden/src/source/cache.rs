//! Render cache for fixed commit revisions.

use std::sync::{Arc, LazyLock};
use std::time::Duration;

use async_trait::async_trait;
use moka::sync::Cache;
use regex::Regex;

use super::{ManifestRenderer, RenderRequest, RenderedManifests, SourceError};

static RE_COMMIT_SHA: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^[0-9a-f]{40}$").unwrap());

const DEFAULT_CACHE_CAPACITY: u64 = 256;
const DEFAULT_TTL_SECS: u64 = 3600;

/// Memoizes renders whose revision is a full commit SHA.
///
/// Branches and tags may move, so requests for them always reach the inner renderer.
pub struct CachingRenderer {
    inner: Arc<dyn ManifestRenderer>,
    cache: Cache<RenderRequest, Arc<RenderedManifests>>,
}

impl CachingRenderer {
    pub fn new(inner: Arc<dyn ManifestRenderer>) -> Self {
        Self::with_config(inner, DEFAULT_CACHE_CAPACITY, DEFAULT_TTL_SECS)
    }

    pub fn with_config(inner: Arc<dyn ManifestRenderer>, capacity: u64, ttl_secs: u64) -> Self {
        Self {
            inner,
            cache: Cache::builder()
                .max_capacity(capacity)
                .time_to_live(Duration::from_secs(ttl_secs))
                .build(),
        }
    }

    pub fn is_fixed_revision(revision: &str) -> bool {
        RE_COMMIT_SHA.is_match(revision)
    }

    pub fn clear(&self) {
        self.cache.invalidate_all();
    }
}

#[async_trait]
impl ManifestRenderer for CachingRenderer {
    async fn render(&self, request: &RenderRequest) -> Result<RenderedManifests, SourceError> {
        if !Self::is_fixed_revision(&request.revision) {
            return self.inner.render(request).await;
        }
        if let Some(hit) = self.cache.get(request) {
            log::debug!("Render cache hit for {}@{}", request.repo_url, request.revision);
            return Ok(RenderedManifests::clone(&hit));
        }
        let rendered = self.inner.render(request).await?;
        self.cache
            .insert(request.clone(), Arc::new(rendered.clone()));
        Ok(rendered)
    }
}
