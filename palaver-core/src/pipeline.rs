use std::sync::Arc;

use chrono::Utc;
use thiserror::Error;

use crate::comment_store::{CommentRecord, CommentStore, NewCommentInput};
use crate::content_registry::{ContentObject, ContentRegistry, ResolveError};
use crate::security_form::{SecurityData, SecurityError, SecurityForm};

/// One comment submission as it arrives from the outside: raw form fields,
/// plus the author the identity collaborator attached to the request.
#[derive(Debug, Clone)]
pub struct CommentSubmission {
    pub content_type: Option<String>,
    pub object_pk: Option<String>,
    pub timestamp: i64,
    pub security_hash: String,
    pub honeypot: String,
    pub body: String,
    pub parent_id: Option<i64>,
    pub author: Option<String>,
    pub site_id: i64,
}

/// What a before-save hook gets to inspect (and veto).
#[derive(Debug, Clone)]
pub struct PendingComment {
    pub target: ContentObject,
    pub input: NewCommentInput,
}

/// Synchronous extension points around persistence. `before_save` may veto
/// the submission by returning false; `after_save` is fire-and-forget and
/// must handle its own failures.
pub trait CommentHook: Send + Sync {
    fn name(&self) -> &str;

    fn before_save(&self, pending: &PendingComment) -> bool {
        let _ = pending;
        true
    }

    fn after_save(&self, comment: &CommentRecord) {
        let _ = comment;
    }
}

#[derive(Debug, Error)]
pub enum SubmissionError {
    #[error("missing content_type or object_pk field")]
    MissingFields,
    #[error(transparent)]
    Resolve(#[from] ResolveError),
    #[error("the comment form failed security verification: {0}")]
    Security(#[from] SecurityError),
    #[error("invalid {field}: {message}")]
    Validation {
        field: &'static str,
        message: String,
    },
    #[error("comment rejected by {hook}")]
    Rejected { hook: String },
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

#[derive(Debug, Clone)]
pub struct SubmissionOutcome {
    pub comment: CommentRecord,
    /// True when an identical same-day submission was reused instead of a
    /// new row being inserted.
    pub deduplicated: bool,
}

/// Orchestrates one submission end to end: resolve target, verify security
/// fields, validate, consult hooks, persist. Built once at composition time
/// from its collaborators.
pub struct SubmissionPipeline {
    store: Arc<CommentStore>,
    registry: Arc<ContentRegistry>,
    security: SecurityForm,
    hooks: Vec<Arc<dyn CommentHook>>,
}

impl SubmissionPipeline {
    pub fn new(
        store: Arc<CommentStore>,
        registry: Arc<ContentRegistry>,
        security: SecurityForm,
    ) -> Self {
        Self {
            store,
            registry,
            security,
            hooks: Vec::new(),
        }
    }

    pub fn with_hook(mut self, hook: Arc<dyn CommentHook>) -> Self {
        self.hooks.push(hook);
        self
    }

    pub fn store(&self) -> &Arc<CommentStore> {
        &self.store
    }

    /// Resolve the target and issue fresh security data for its submission
    /// form.
    pub fn issue_form(
        &self,
        content_type: &str,
        object_pk: &str,
    ) -> Result<SecurityData, ResolveError> {
        let target = self.registry.resolve(content_type, object_pk)?;
        Ok(self
            .security
            .issue(&target.content_type, &target.object_pk, Utc::now().timestamp()))
    }

    pub fn submit(&self, submission: CommentSubmission) -> Result<SubmissionOutcome, SubmissionError> {
        self.submit_at(submission, Utc::now().timestamp())
    }

    fn submit_at(
        &self,
        submission: CommentSubmission,
        now: i64,
    ) -> Result<SubmissionOutcome, SubmissionError> {
        let (Some(content_type), Some(object_pk)) =
            (submission.content_type.as_deref(), submission.object_pk.as_deref())
        else {
            return Err(SubmissionError::MissingFields);
        };

        let target = self.registry.resolve(content_type, object_pk)?;

        self.security.check_honeypot(&submission.honeypot)?;
        self.security.verify(
            &SecurityData {
                content_type: content_type.to_string(),
                object_pk: object_pk.to_string(),
                timestamp: submission.timestamp,
                security_hash: submission.security_hash.clone(),
            },
            now,
        )?;

        let body = submission.body.trim();
        if body.is_empty() {
            return Err(SubmissionError::Validation {
                field: "body",
                message: "comment body cannot be empty".to_string(),
            });
        }

        if let Some(parent_id) = submission.parent_id {
            let parent = self
                .store
                .get(parent_id)?
                .ok_or(SubmissionError::Validation {
                    field: "parent",
                    message: format!("parent comment {parent_id} does not exist"),
                })?;
            if parent.content_type != target.content_type || parent.object_pk != target.object_pk {
                return Err(SubmissionError::Validation {
                    field: "parent",
                    message: format!(
                        "parent comment {parent_id} belongs to a different content object"
                    ),
                });
            }
        }

        let pending = PendingComment {
            input: NewCommentInput {
                content_type: target.content_type.clone(),
                object_pk: target.object_pk.clone(),
                site_id: submission.site_id,
                user_id: submission.author.clone(),
                body: body.to_string(),
                parent_id: submission.parent_id,
            },
            target,
        };

        for hook in &self.hooks {
            if !hook.before_save(&pending) {
                tracing::warn!("comment submission killed by hook {}", hook.name());
                return Err(SubmissionError::Rejected {
                    hook: hook.name().to_string(),
                });
            }
        }

        let (comment, deduplicated) = self.store.create(pending.input)?;

        for hook in &self.hooks {
            hook.after_save(&comment);
        }

        Ok(SubmissionOutcome {
            comment,
            deduplicated,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use parking_lot::Mutex;

    use super::{CommentHook, CommentSubmission, PendingComment, SubmissionError, SubmissionPipeline};
    use crate::comment_store::{CommentRecord, CommentStore, EngineConfig};
    use crate::content_registry::{ContentObject, ContentRegistry, ContentSource, ResolveError};
    use crate::security_form::{SecurityError, SecurityForm, SecurityFormConfig};

    struct ArticleSource;

    impl ContentSource for ArticleSource {
        fn resolve(&self, object_pk: &str) -> Result<ContentObject, ResolveError> {
            if object_pk == "42" {
                Ok(ContentObject {
                    content_type: "blog.article".to_string(),
                    object_pk: object_pk.to_string(),
                    url: Some("/articles/42".to_string()),
                })
            } else {
                Err(ResolveError::NotFound {
                    content_type: "blog.article".to_string(),
                    object_pk: object_pk.to_string(),
                })
            }
        }
    }

    fn pipeline() -> SubmissionPipeline {
        let store = Arc::new(CommentStore::open_in_memory(EngineConfig::default()).unwrap());
        let registry =
            Arc::new(ContentRegistry::new().register("blog.article", Arc::new(ArticleSource)));
        let security = SecurityForm::new(SecurityFormConfig::new("pipeline-test-secret"));
        SubmissionPipeline::new(store, registry, security)
    }

    fn valid_submission(pipeline: &SubmissionPipeline, body: &str) -> CommentSubmission {
        let form = pipeline.issue_form("blog.article", "42").unwrap();
        CommentSubmission {
            content_type: Some(form.content_type),
            object_pk: Some(form.object_pk),
            timestamp: form.timestamp,
            security_hash: form.security_hash,
            honeypot: String::new(),
            body: body.to_string(),
            parent_id: None,
            author: Some("alice".to_string()),
            site_id: 1,
        }
    }

    #[test]
    fn submit_then_reply_builds_the_thread() {
        let pipeline = pipeline();

        let first = pipeline.submit(valid_submission(&pipeline, "Hello")).unwrap();
        assert!(!first.deduplicated);
        assert_eq!(first.comment.parent_id, None);
        assert_eq!(first.comment.path, first.comment.id.to_string());

        let mut reply = valid_submission(&pipeline, "Reply");
        reply.parent_id = Some(first.comment.id);
        let second = pipeline.submit(reply).unwrap();
        assert_eq!(second.comment.parent_id, Some(first.comment.id));
        assert_eq!(
            second.comment.path,
            format!("{}/{}", first.comment.id, second.comment.id)
        );

        let root = pipeline.store().get(first.comment.id).unwrap().unwrap();
        assert_eq!(root.leaf_id, Some(second.comment.id));
    }

    #[test]
    fn submit_requires_target_fields() {
        let pipeline = pipeline();
        let mut submission = valid_submission(&pipeline, "Hello");
        submission.content_type = None;
        assert!(matches!(
            pipeline.submit(submission),
            Err(SubmissionError::MissingFields)
        ));
    }

    #[test]
    fn submit_rejects_unresolvable_targets() {
        let pipeline = pipeline();
        let mut submission = valid_submission(&pipeline, "Hello");
        submission.object_pk = Some("999".to_string());
        // The hash no longer matters; resolution fails first.
        assert!(matches!(
            pipeline.submit(submission),
            Err(SubmissionError::Resolve(ResolveError::NotFound { .. }))
        ));
    }

    #[test]
    fn submit_rejects_tampered_security_fields() {
        let pipeline = pipeline();
        let mut submission = valid_submission(&pipeline, "Hello");
        submission.timestamp += 1;
        assert!(matches!(
            pipeline.submit(submission),
            Err(SubmissionError::Security(SecurityError::HashMismatch))
        ));
    }

    #[test]
    fn submit_rejects_filled_honeypot() {
        let pipeline = pipeline();
        let mut submission = valid_submission(&pipeline, "Hello");
        submission.honeypot = "cheap pills".to_string();
        assert!(matches!(
            pipeline.submit(submission),
            Err(SubmissionError::Security(SecurityError::HoneypotTriggered))
        ));
    }

    #[test]
    fn submit_surfaces_empty_body_as_field_error() {
        let pipeline = pipeline();
        let submission = valid_submission(&pipeline, "   ");
        assert!(matches!(
            pipeline.submit(submission),
            Err(SubmissionError::Validation { field: "body", .. })
        ));
    }

    #[test]
    fn submit_rejects_replies_to_unknown_parents() {
        let pipeline = pipeline();
        let mut submission = valid_submission(&pipeline, "Hello");
        submission.parent_id = Some(999);
        assert!(matches!(
            pipeline.submit(submission),
            Err(SubmissionError::Validation { field: "parent", .. })
        ));
    }

    #[test]
    fn identical_same_day_submissions_are_deduplicated() {
        let pipeline = pipeline();
        let first = pipeline.submit(valid_submission(&pipeline, "Hello")).unwrap();
        let second = pipeline.submit(valid_submission(&pipeline, "Hello")).unwrap();
        assert!(second.deduplicated);
        assert_eq!(first.comment.id, second.comment.id);
    }

    struct Veto;

    impl CommentHook for Veto {
        fn name(&self) -> &str {
            "veto"
        }

        fn before_save(&self, _pending: &PendingComment) -> bool {
            false
        }
    }

    #[derive(Default)]
    struct Recorder {
        saved: Mutex<Vec<i64>>,
    }

    impl CommentHook for Recorder {
        fn name(&self) -> &str {
            "recorder"
        }

        fn after_save(&self, comment: &CommentRecord) {
            self.saved.lock().push(comment.id);
        }
    }

    #[test]
    fn before_save_hook_can_kill_the_submission() {
        let pipeline = pipeline().with_hook(Arc::new(Veto));
        let submission = valid_submission(&pipeline, "Hello");
        let rejected = pipeline.submit(submission);
        match rejected {
            Err(SubmissionError::Rejected { hook }) => assert_eq!(hook, "veto"),
            other => panic!("expected Rejected, got {other:?}"),
        }
        // Nothing was persisted.
        assert!(pipeline
            .store()
            .list_for_target("blog.article", "42")
            .unwrap()
            .is_empty());
    }

    #[test]
    fn after_save_hook_sees_the_persisted_comment() {
        let recorder = Arc::new(Recorder::default());
        let pipeline = pipeline().with_hook(recorder.clone());
        let outcome = pipeline.submit(valid_submission(&pipeline, "Hello")).unwrap();
        assert_eq!(*recorder.saved.lock(), vec![outcome.comment.id]);
    }
}
