use std::collections::HashSet;
use std::env;
use std::path::Path;
use std::sync::Arc;

use anyhow::Result;
use palaver_core::{
    CommentStore, EngineConfig, PermissionGate, SecurityForm, SecurityFormConfig,
    SubmissionPipeline,
};

use crate::{content, notify};

/// Moderators come from the deployment environment; a real identity provider
/// would supply this check instead.
pub struct ModeratorSet {
    moderators: HashSet<String>,
}

impl ModeratorSet {
    fn from_env() -> Self {
        let moderators = env::var("PALAVER_MODERATORS")
            .ok()
            .map(|value| {
                value
                    .split(',')
                    .map(str::trim)
                    .filter(|item| !item.is_empty())
                    .map(str::to_string)
                    .collect::<HashSet<_>>()
            })
            .unwrap_or_default();
        Self { moderators }
    }
}

impl PermissionGate for ModeratorSet {
    fn has_permission(&self, user_id: &str, permission: &str) -> bool {
        permission == palaver_core::PERM_CAN_MODERATE && self.moderators.contains(user_id)
    }
}

#[derive(Clone)]
pub struct AppState {
    pub pipeline: Arc<SubmissionPipeline>,
    pub store: Arc<CommentStore>,
    pub gate: Arc<ModeratorSet>,
    pub site_id: i64,
    /// Detailed security-failure reasons are only shown when this is on.
    pub debug: bool,
}

impl AppState {
    pub fn from_env(db_path: &str) -> Result<Self> {
        let engine_config = EngineConfig {
            hide_removed: parse_bool_env("PALAVER_HIDE_REMOVED", true),
            edit_window_secs: env::var("PALAVER_EDIT_WINDOW_SECS")
                .ok()
                .and_then(|value| value.parse().ok()),
            dedup_utc_offset_minutes: env::var("PALAVER_DEDUP_UTC_OFFSET_MINUTES")
                .ok()
                .and_then(|value| value.parse().ok())
                .unwrap_or(0),
            feed_limit: env::var("PALAVER_FEED_LIMIT")
                .ok()
                .and_then(|value| value.parse().ok())
                .unwrap_or(palaver_core::comment_store::DEFAULT_FEED_LIMIT),
        };
        let store = Arc::new(CommentStore::open(Path::new(db_path), engine_config)?);

        let secret_key = env::var("PALAVER_SECRET_KEY").unwrap_or_else(|_| {
            tracing::warn!("PALAVER_SECRET_KEY not set; using an insecure development secret");
            "insecure-dev-secret".to_string()
        });
        let mut security_config = SecurityFormConfig::new(secret_key);
        if let Some(timeout) = env::var("PALAVER_TOKEN_TIMEOUT_SECS")
            .ok()
            .and_then(|value| value.parse().ok())
        {
            security_config.timeout_secs = timeout;
        }
        if let Some(skew) = env::var("PALAVER_MAX_CLOCK_SKEW_SECS")
            .ok()
            .and_then(|value| value.parse().ok())
        {
            security_config.max_clock_skew_secs = skew;
        }

        let registry = Arc::new(content::registry_from_env()?);
        let notifier = notify::CommentNotifier::from_env()?;
        let sender = notify::spawn_notify_worker(notifier);

        let pipeline = Arc::new(
            SubmissionPipeline::new(
                store.clone(),
                registry,
                SecurityForm::new(security_config),
            )
            .with_hook(Arc::new(notify::NotifyHook::new(sender))),
        );

        Ok(Self {
            pipeline,
            store,
            gate: Arc::new(ModeratorSet::from_env()),
            site_id: env::var("PALAVER_SITE_ID")
                .ok()
                .and_then(|value| value.parse().ok())
                .unwrap_or(1),
            debug: parse_bool_env("PALAVER_DEBUG", false),
        })
    }
}

fn parse_bool_env(name: &str, default: bool) -> bool {
    env::var(name)
        .ok()
        .map(|raw| {
            matches!(raw.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "y" | "on")
        })
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use palaver_core::{PermissionGate, PERM_CAN_MODERATE};

    use super::ModeratorSet;

    #[test]
    fn moderator_set_only_grants_the_moderate_permission() {
        let gate = ModeratorSet {
            moderators: ["mod".to_string()].into_iter().collect(),
        };
        assert!(gate.has_permission("mod", PERM_CAN_MODERATE));
        assert!(!gate.has_permission("mod", "other"));
        assert!(!gate.has_permission("alice", PERM_CAN_MODERATE));
    }
}
