use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A resolved external content object that owns a comment thread. The engine
/// never stores these; it only checks they exist at submission time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentObject {
    pub content_type: String,
    pub object_pk: String,
    /// Canonical URL of the object, if the source knows one. Feeds the
    /// plain-text notification rendering.
    pub url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ResolveError {
    #[error("invalid content_type value: {0:?}")]
    InvalidReference(String),
    #[error("the given content-type {0:?} does not resolve to a registered type")]
    UnknownType(String),
    #[error("no object matching content-type {content_type:?} and object pk {object_pk:?} exists")]
    NotFound {
        content_type: String,
        object_pk: String,
    },
}

/// Capability interface for one content type: fetch an entity by its primary
/// key. Resolution is a pure read and must not mutate the entity.
pub trait ContentSource: Send + Sync {
    fn resolve(&self, object_pk: &str) -> Result<ContentObject, ResolveError>;
}

/// Maps string type identifiers of the `app.model` shape to their loaders.
/// Populated once at composition time.
#[derive(Default)]
pub struct ContentRegistry {
    sources: HashMap<String, Arc<dyn ContentSource>>,
}

impl ContentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(mut self, content_type: impl Into<String>, source: Arc<dyn ContentSource>) -> Self {
        self.sources.insert(content_type.into(), source);
        self
    }

    pub fn resolve(&self, content_type: &str, object_pk: &str) -> Result<ContentObject, ResolveError> {
        if !is_valid_type_id(content_type) {
            return Err(ResolveError::InvalidReference(content_type.to_string()));
        }
        let source = self
            .sources
            .get(content_type)
            .ok_or_else(|| ResolveError::UnknownType(content_type.to_string()))?;
        source.resolve(object_pk)
    }
}

/// Type identifiers are dotted `app_label.model` pairs, lowercase ascii
/// alphanumerics and underscores on both sides.
fn is_valid_type_id(content_type: &str) -> bool {
    let Some((app, model)) = content_type.split_once('.') else {
        return false;
    };
    let ok = |part: &str| {
        !part.is_empty()
            && part
                .bytes()
                .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'_')
    };
    ok(app) && ok(model)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::{ContentObject, ContentRegistry, ContentSource, ResolveError};

    struct FixedSource {
        known_pk: &'static str,
    }

    impl ContentSource for FixedSource {
        fn resolve(&self, object_pk: &str) -> Result<ContentObject, ResolveError> {
            if object_pk == self.known_pk {
                Ok(ContentObject {
                    content_type: "blog.article".to_string(),
                    object_pk: object_pk.to_string(),
                    url: Some(format!("/articles/{object_pk}")),
                })
            } else {
                Err(ResolveError::NotFound {
                    content_type: "blog.article".to_string(),
                    object_pk: object_pk.to_string(),
                })
            }
        }
    }

    fn registry() -> ContentRegistry {
        ContentRegistry::new().register("blog.article", Arc::new(FixedSource { known_pk: "42" }))
    }

    #[test]
    fn resolve_returns_the_live_object() {
        let resolved = registry().resolve("blog.article", "42").unwrap();
        assert_eq!(resolved.object_pk, "42");
        assert_eq!(resolved.url.as_deref(), Some("/articles/42"));
    }

    #[test]
    fn resolve_reports_unknown_types() {
        assert_eq!(
            registry().resolve("shop.product", "42"),
            Err(ResolveError::UnknownType("shop.product".to_string()))
        );
    }

    #[test]
    fn resolve_reports_missing_objects() {
        assert!(matches!(
            registry().resolve("blog.article", "999"),
            Err(ResolveError::NotFound { .. })
        ));
    }

    #[test]
    fn resolve_rejects_malformed_type_identifiers() {
        for bad in ["article", "blog.", ".article", "Blog.Article", "blog.article.extra "] {
            assert!(
                matches!(registry().resolve(bad, "42"), Err(ResolveError::InvalidReference(_))),
                "expected InvalidReference for {bad:?}"
            );
        }
    }
}
