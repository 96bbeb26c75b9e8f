//! Pluggable threaded-comment engine: materialized-path comment tree,
//! anti-spoofing form security, moderation flags and a submission pipeline.
//! HTTP, identity and content loading live with the embedding application;
//! this crate only defines the seams they plug into.

pub mod comment_store;
pub mod content_registry;
pub mod moderation;
pub mod pipeline;
pub mod security_form;
pub mod tree_path;

pub use comment_store::{
    CommentFlagRecord, CommentRecord, CommentStore, EngineConfig, FlagOutcome, NewCommentInput,
    FLAG_MODERATOR_APPROVAL, FLAG_MODERATOR_DELETION, FLAG_SUGGEST_REMOVAL,
};
pub use content_registry::{ContentObject, ContentRegistry, ContentSource, ResolveError};
pub use moderation::{
    perform_approve, perform_delete, perform_flag, perform_remove, ModerationError, PermissionGate,
    PERM_CAN_MODERATE,
};
pub use pipeline::{
    CommentHook, CommentSubmission, PendingComment, SubmissionError, SubmissionOutcome,
    SubmissionPipeline,
};
pub use security_form::{SecurityData, SecurityError, SecurityForm, SecurityFormConfig};

/// Display-name resolution is the identity provider's job; the engine only
/// needs a lookup.
pub trait UserDirectory: Send + Sync {
    fn display_name(&self, user_id: &str) -> Option<String>;
}

/// Full name or username of a commenter, falling back to the opaque id, or
/// to an anonymous label when the author is null (deleted or never known).
pub fn user_display(directory: &dyn UserDirectory, user_id: Option<&str>) -> String {
    match user_id {
        Some(id) => directory
            .display_name(id)
            .unwrap_or_else(|| id.to_string()),
        None => "anonymous".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::{user_display, UserDirectory};

    struct OneUser;

    impl UserDirectory for OneUser {
        fn display_name(&self, user_id: &str) -> Option<String> {
            (user_id == "alice").then(|| "Alice Liddell".to_string())
        }
    }

    #[test]
    fn user_display_resolves_known_users() {
        assert_eq!(user_display(&OneUser, Some("alice")), "Alice Liddell");
    }

    #[test]
    fn user_display_falls_back_to_id_then_anonymous() {
        assert_eq!(user_display(&OneUser, Some("bob")), "bob");
        assert_eq!(user_display(&OneUser, None), "anonymous");
    }
}
