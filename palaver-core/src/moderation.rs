use thiserror::Error;

use crate::comment_store::{
    CommentRecord, CommentStore, FlagOutcome, FLAG_MODERATOR_APPROVAL, FLAG_MODERATOR_DELETION,
    FLAG_SUGGEST_REMOVAL,
};

pub const PERM_CAN_MODERATE: &str = "can_moderate";

/// Permission checks are delegated to an external collaborator; the engine
/// only asks, it never decides.
pub trait PermissionGate: Send + Sync {
    fn has_permission(&self, user_id: &str, permission: &str) -> bool;
}

#[derive(Debug, Error)]
pub enum ModerationError {
    #[error("comment {0} not found")]
    NotFound(i64),
    #[error("user {user:?} lacks the {permission:?} permission")]
    PermissionDenied { user: String, permission: String },
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

/// Suggest a comment for removal. Open to any authenticated user; flagging
/// the same comment twice is a successful no-op.
pub fn perform_flag(
    store: &CommentStore,
    user_id: &str,
    comment_id: i64,
) -> Result<FlagOutcome, ModerationError> {
    require_comment(store, comment_id)?;
    Ok(store.flag(user_id, comment_id, FLAG_SUGGEST_REMOVAL)?)
}

/// Approve a comment out of moderation: records a moderator-approval flag,
/// clears the removed state and makes it public again.
pub fn perform_approve(
    store: &CommentStore,
    gate: &dyn PermissionGate,
    user_id: &str,
    comment_id: i64,
) -> Result<CommentRecord, ModerationError> {
    require_moderator(gate, user_id)?;
    require_comment(store, comment_id)?;
    let outcome = store.flag(user_id, comment_id, FLAG_MODERATOR_APPROVAL)?;
    if outcome == FlagOutcome::AlreadyFlagged {
        tracing::debug!("comment {comment_id} already approved by {user_id}");
    }
    store.set_removed(comment_id, false)?;
    store
        .set_public(comment_id, true)?
        .ok_or(ModerationError::NotFound(comment_id))
}

/// Remove (soft-delete) a comment: records a moderator-deletion flag and
/// sets the removed state. The row itself stays.
pub fn perform_remove(
    store: &CommentStore,
    gate: &dyn PermissionGate,
    user_id: &str,
    comment_id: i64,
) -> Result<CommentRecord, ModerationError> {
    require_moderator(gate, user_id)?;
    require_comment(store, comment_id)?;
    let outcome = store.flag(user_id, comment_id, FLAG_MODERATOR_DELETION)?;
    if outcome == FlagOutcome::AlreadyFlagged {
        tracing::debug!("comment {comment_id} already removed by {user_id}");
    }
    store
        .set_removed(comment_id, true)?
        .ok_or(ModerationError::NotFound(comment_id))
}

/// Hard delete with descendant cascade. Returns how many comments went away.
pub fn perform_delete(
    store: &CommentStore,
    gate: &dyn PermissionGate,
    user_id: &str,
    comment_id: i64,
) -> Result<usize, ModerationError> {
    require_moderator(gate, user_id)?;
    require_comment(store, comment_id)?;
    Ok(store.delete(comment_id)?)
}

fn require_moderator(gate: &dyn PermissionGate, user_id: &str) -> Result<(), ModerationError> {
    if gate.has_permission(user_id, PERM_CAN_MODERATE) {
        Ok(())
    } else {
        Err(ModerationError::PermissionDenied {
            user: user_id.to_string(),
            permission: PERM_CAN_MODERATE.to_string(),
        })
    }
}

fn require_comment(store: &CommentStore, comment_id: i64) -> Result<(), ModerationError> {
    match store.get(comment_id)? {
        Some(_) => Ok(()),
        None => Err(ModerationError::NotFound(comment_id)),
    }
}
