//! Terminology lookups
//!
//! The engine resolves closed concept sets through [`TerminologyService`].
//! Within one run every `(system, codeSetId)` pair is fetched at most once:
//! [`ConceptSetCache`] coalesces concurrent lookups of the same key and bounds
//! each fetch with a timeout.

use crate::error::EngineError;
use async_trait::async_trait;
use bundlecheck_model::{CodeSystem, ConceptSet};
use moka::future::Cache;
use serde_json::Value as JsonValue;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TerminologyError {
    #[error("code system not found: {url}")]
    NotFound { url: String },

    #[error("lookup of {url} timed out after {timeout_ms} ms")]
    Timeout { url: String, timeout_ms: u64 },

    #[error("terminology service unavailable: {0}")]
    Unavailable(String),
}

/// Source of code systems, resolvable per project.
#[async_trait]
pub trait TerminologyService: Send + Sync {
    /// Concepts of the code system with canonical `url`, or `None` if the
    /// project has no such system.
    async fn get_code_system_by_url(
        &self,
        project_id: &str,
        url: &str,
    ) -> Result<Option<ConceptSet>, TerminologyError>;
}

/// Code systems held in memory.
///
/// Systems added without a project are visible to every project; a project's
/// own system shadows a shared one with the same URL.
#[derive(Debug, Default, Clone)]
pub struct InMemoryTerminology {
    shared: HashMap<String, ConceptSet>,
    projects: HashMap<String, HashMap<String, ConceptSet>>,
}

impl InMemoryTerminology {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_code_system(&mut self, code_system: &CodeSystem) {
        let set = code_system.to_concept_set();
        self.shared.insert(set.url().to_string(), set);
    }

    pub fn add_project_code_system(&mut self, project_id: &str, code_system: &CodeSystem) {
        let set = code_system.to_concept_set();
        self.projects
            .entry(project_id.to_string())
            .or_default()
            .insert(set.url().to_string(), set);
    }

    pub fn add_concept_set(&mut self, set: ConceptSet) {
        self.shared.insert(set.url().to_string(), set);
    }

    pub fn len(&self) -> usize {
        self.shared.len() + self.projects.values().map(HashMap::len).sum::<usize>()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Add one `CodeSystem` resource, or every CodeSystem entry of a Bundle.
    /// Returns the number of systems added.
    pub fn add_json(&mut self, value: &JsonValue) -> Result<usize, EngineError> {
        match value.get("resourceType").and_then(JsonValue::as_str) {
            Some("CodeSystem") => {
                self.add_code_system(&CodeSystem::from_value(value)?);
                Ok(1)
            }
            Some("Bundle") => {
                let mut added = 0;
                let resources = value
                    .get("entry")
                    .and_then(JsonValue::as_array)
                    .into_iter()
                    .flatten()
                    .filter_map(|entry| entry.get("resource"));
                for resource in resources {
                    if resource.get("resourceType").and_then(JsonValue::as_str) == Some("CodeSystem") {
                        self.add_code_system(&CodeSystem::from_value(resource)?);
                        added += 1;
                    }
                }
                Ok(added)
            }
            other => {
                tracing::debug!(resource_type = ?other, "skipping non-CodeSystem terminology input");
                Ok(0)
            }
        }
    }

    /// Load every `*.json` file directly under `dir`.
    pub fn load_dir(&mut self, dir: impl AsRef<Path>) -> Result<usize, EngineError> {
        let dir = dir.as_ref();
        let io_error = |source| EngineError::Io {
            path: dir.to_path_buf(),
            source,
        };
        let mut paths = Vec::new();
        for entry in std::fs::read_dir(dir).map_err(io_error)? {
            let path = entry.map_err(io_error)?.path();
            if path.extension().and_then(|e| e.to_str()) == Some("json") {
                paths.push(path);
            }
        }
        paths.sort();

        let mut added = 0;
        for path in paths {
            added += self.load_file(&path)?;
        }
        tracing::info!(dir = %dir.display(), code_systems = added, "loaded code systems");
        Ok(added)
    }

    pub fn load_file(&mut self, path: impl AsRef<Path>) -> Result<usize, EngineError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| EngineError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let value: JsonValue = serde_json::from_str(&text).map_err(|source| EngineError::Json {
            path: path.to_path_buf(),
            source,
        })?;
        self.add_json(&value)
    }
}

#[async_trait]
impl TerminologyService for InMemoryTerminology {
    async fn get_code_system_by_url(
        &self,
        project_id: &str,
        url: &str,
    ) -> Result<Option<ConceptSet>, TerminologyError> {
        let found = self
            .projects
            .get(project_id)
            .and_then(|systems| systems.get(url))
            .or_else(|| self.shared.get(url));
        Ok(found.cloned())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct LookupKey {
    system: String,
    code_set_id: Option<String>,
}

impl LookupKey {
    /// URL the concept set is fetched from.
    fn url(&self) -> &str {
        self.code_set_id.as_deref().unwrap_or(&self.system)
    }
}

/// Per-run concept-set cache in front of a [`TerminologyService`].
pub struct ConceptSetCache {
    service: Arc<dyn TerminologyService>,
    project_id: String,
    timeout: Duration,
    cache: Cache<LookupKey, Arc<ConceptSet>>,
}

impl ConceptSetCache {
    pub fn new(
        service: Arc<dyn TerminologyService>,
        project_id: impl Into<String>,
        timeout: Duration,
        capacity: u64,
    ) -> Self {
        Self {
            service,
            project_id: project_id.into(),
            timeout,
            cache: Cache::builder().max_capacity(capacity).build(),
        }
    }

    /// Resolve the concept set for `system`, fetched from `code_set_id` when
    /// given. Failures are not cached.
    pub async fn resolve(
        &self,
        system: &str,
        code_set_id: Option<&str>,
    ) -> Result<Arc<ConceptSet>, TerminologyError> {
        let key = LookupKey {
            system: system.to_string(),
            code_set_id: code_set_id.map(str::to_string),
        };
        let url = key.url().to_string();
        self.cache
            .try_get_with(key, self.fetch(url))
            .await
            .map_err(|e| (*e).clone())
    }

    async fn fetch(&self, url: String) -> Result<Arc<ConceptSet>, TerminologyError> {
        tracing::debug!(project = %self.project_id, url = %url, "fetching concept set");
        let lookup = self.service.get_code_system_by_url(&self.project_id, &url);
        match tokio::time::timeout(self.timeout, lookup).await {
            Ok(Ok(Some(set))) => Ok(Arc::new(set)),
            Ok(Ok(None)) => Err(TerminologyError::NotFound { url }),
            Ok(Err(e)) => Err(e),
            Err(_) => Err(TerminologyError::Timeout {
                url,
                timeout_ms: self.timeout.as_millis() as u64,
            }),
        }
    }

    pub fn entry_count(&self) -> u64 {
        self.cache.entry_count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn colors() -> CodeSystem {
        CodeSystem::from_value(&json!({
            "resourceType": "CodeSystem",
            "url": "http://example.org/cs/colors",
            "concept": [{"code": "red"}, {"code": "blue"}]
        }))
        .unwrap()
    }

    struct Counting {
        inner: InMemoryTerminology,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl TerminologyService for Counting {
        async fn get_code_system_by_url(
            &self,
            project_id: &str,
            url: &str,
        ) -> Result<Option<ConceptSet>, TerminologyError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.inner.get_code_system_by_url(project_id, url).await
        }
    }

    struct Stalled;

    #[async_trait]
    impl TerminologyService for Stalled {
        async fn get_code_system_by_url(
            &self,
            _project_id: &str,
            _url: &str,
        ) -> Result<Option<ConceptSet>, TerminologyError> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(None)
        }
    }

    #[tokio::test]
    async fn test_project_shadows_shared() {
        let mut terminology = InMemoryTerminology::new();
        terminology.add_code_system(&colors());
        terminology.add_concept_set(ConceptSet::from_codes("http://example.org/cs/sizes", ["s"]));
        terminology.add_project_code_system(
            "p1",
            &CodeSystem::from_value(&json!({
                "resourceType": "CodeSystem",
                "url": "http://example.org/cs/colors",
                "concept": [{"code": "green"}]
            }))
            .unwrap(),
        );

        let shared = terminology
            .get_code_system_by_url("p2", "http://example.org/cs/colors")
            .await
            .unwrap()
            .unwrap();
        assert!(shared.contains("red"));

        let own = terminology
            .get_code_system_by_url("p1", "http://example.org/cs/colors")
            .await
            .unwrap()
            .unwrap();
        assert!(own.contains("green"));
        assert!(!own.contains("red"));
    }

    #[tokio::test]
    async fn test_cache_fetches_once() {
        let mut inner = InMemoryTerminology::new();
        inner.add_code_system(&colors());
        let service = Arc::new(Counting {
            inner,
            calls: AtomicUsize::new(0),
        });
        let cache = ConceptSetCache::new(service.clone(), "p1", Duration::from_secs(1), 16);

        for _ in 0..3 {
            let set = cache.resolve("http://example.org/cs/colors", None).await.unwrap();
            assert!(set.contains("blue"));
        }
        assert_eq!(service.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_code_set_id_takes_precedence() {
        let mut terminology = InMemoryTerminology::new();
        terminology.add_concept_set(ConceptSet::from_codes("http://example.org/vs/warm", ["red"]));
        let cache = ConceptSetCache::new(Arc::new(terminology), "p1", Duration::from_secs(1), 16);

        let set = cache
            .resolve("http://example.org/cs/colors", Some("http://example.org/vs/warm"))
            .await
            .unwrap();
        assert_eq!(set.url(), "http://example.org/vs/warm");

        let missing = cache.resolve("http://example.org/cs/colors", None).await;
        assert_eq!(
            missing.unwrap_err(),
            TerminologyError::NotFound {
                url: "http://example.org/cs/colors".into()
            }
        );
    }

    #[tokio::test]
    async fn test_lookup_timeout() {
        let cache = ConceptSetCache::new(Arc::new(Stalled), "p1", Duration::from_millis(20), 16);
        let err = cache.resolve("http://example.org/cs/colors", None).await.unwrap_err();
        assert!(matches!(err, TerminologyError::Timeout { timeout_ms: 20, .. }));
    }

    #[test]
    fn test_add_json_bundle() {
        let mut terminology = InMemoryTerminology::new();
        let added = terminology
            .add_json(&json!({
                "resourceType": "Bundle",
                "entry": [
                    {"resource": {"resourceType": "CodeSystem", "url": "http://a", "concept": []}},
                    {"resource": {"resourceType": "ValueSet", "url": "http://b"}}
                ]
            }))
            .unwrap();
        assert_eq!(added, 1);
        assert_eq!(terminology.len(), 1);
    }
}
