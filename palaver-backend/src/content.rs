use std::collections::HashMap;
use std::env;
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use palaver_core::{ContentObject, ContentRegistry, ContentSource, ResolveError};
use serde::Deserialize;

const DEFAULT_CONTENT_MANIFEST: &str = "content_manifest.json";

/// Manifest shape: content type → object pk → entry.
///
/// ```json
/// { "blog.article": { "42": { "url": "/articles/42" } } }
/// ```
#[derive(Debug, Clone, Deserialize)]
struct ManifestEntry {
    #[serde(default)]
    url: Option<String>,
}

/// Content source backed by a static manifest file. Deployments with live
/// databases register their own `ContentSource` instead; the manifest is the
/// zero-dependency default for static sites.
struct ManifestSource {
    content_type: String,
    objects: HashMap<String, ManifestEntry>,
}

impl ContentSource for ManifestSource {
    fn resolve(&self, object_pk: &str) -> Result<ContentObject, ResolveError> {
        match self.objects.get(object_pk) {
            Some(entry) => Ok(ContentObject {
                content_type: self.content_type.clone(),
                object_pk: object_pk.to_string(),
                url: entry.url.clone(),
            }),
            None => Err(ResolveError::NotFound {
                content_type: self.content_type.clone(),
                object_pk: object_pk.to_string(),
            }),
        }
    }
}

/// Build the registry from `PALAVER_CONTENT_MANIFEST`. A missing file is not
/// fatal: the registry starts empty and every submission fails resolution
/// until content is registered.
pub fn registry_from_env() -> Result<ContentRegistry> {
    let path = env::var("PALAVER_CONTENT_MANIFEST")
        .unwrap_or_else(|_| DEFAULT_CONTENT_MANIFEST.to_string());
    registry_from_file(Path::new(&path))
}

fn registry_from_file(path: &Path) -> Result<ContentRegistry> {
    if !path.exists() {
        tracing::warn!(
            "content manifest not found at {}; starting with an empty registry",
            path.display()
        );
        return Ok(ContentRegistry::new());
    }

    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read content manifest {}", path.display()))?;
    let manifest: HashMap<String, HashMap<String, ManifestEntry>> = serde_json::from_str(&raw)
        .with_context(|| format!("invalid content manifest JSON: {}", path.display()))?;

    let mut registry = ContentRegistry::new();
    for (content_type, objects) in manifest {
        tracing::info!("registered content type {content_type} with {} objects", objects.len());
        registry = registry.register(
            content_type.clone(),
            Arc::new(ManifestSource {
                content_type,
                objects,
            }),
        );
    }
    Ok(registry)
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use palaver_core::ResolveError;

    use super::registry_from_file;

    #[test]
    fn manifest_objects_resolve_with_urls() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"blog.article": {{"42": {{"url": "/articles/42"}}, "7": {{}}}}}}"#)
            .unwrap();

        let registry = registry_from_file(file.path()).unwrap();
        let resolved = registry.resolve("blog.article", "42").unwrap();
        assert_eq!(resolved.url.as_deref(), Some("/articles/42"));
        assert_eq!(registry.resolve("blog.article", "7").unwrap().url, None);
        assert!(matches!(
            registry.resolve("blog.article", "999"),
            Err(ResolveError::NotFound { .. })
        ));
    }

    #[test]
    fn missing_manifest_yields_an_empty_registry() {
        let registry = registry_from_file(std::path::Path::new("/nonexistent/manifest.json")).unwrap();
        assert!(matches!(
            registry.resolve("blog.article", "42"),
            Err(ResolveError::UnknownType(_))
        ));
    }
}
