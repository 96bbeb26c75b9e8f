use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;
use thiserror::Error;

type HmacSha256 = Hmac<Sha256>;

/// Key salt for the per-form derived HMAC key. Changing it invalidates every
/// outstanding token.
const KEY_SALT: &str = "forms.CommentSecurityForm";

pub const DEFAULT_TOKEN_TIMEOUT_SECS: u64 = 3600;
pub const DEFAULT_MAX_CLOCK_SKEW_SECS: u64 = 60;

#[derive(Debug, Clone)]
pub struct SecurityFormConfig {
    pub secret_key: String,
    /// Maximum age of a token, in seconds, before submission is rejected.
    pub timeout_secs: u64,
    /// Tolerance for tokens stamped ahead of this host's clock. Anything
    /// further in the future is rejected, never accepted.
    pub max_clock_skew_secs: u64,
}

impl SecurityFormConfig {
    pub fn new(secret_key: impl Into<String>) -> Self {
        Self {
            secret_key: secret_key.into(),
            timeout_secs: DEFAULT_TOKEN_TIMEOUT_SECS,
            max_clock_skew_secs: DEFAULT_MAX_CLOCK_SKEW_SECS,
        }
    }
}

/// The hidden fields carried by a comment form: together they prove the form
/// was freshly issued for a specific content target. Self-contained; the
/// server keeps no per-token state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecurityData {
    pub content_type: String,
    pub object_pk: String,
    /// Unix seconds at issue time.
    pub timestamp: i64,
    pub security_hash: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SecurityError {
    #[error("security hash check failed")]
    HashMismatch,
    #[error("timestamp check failed: token older than the freshness window")]
    TimestampExpired,
    #[error("timestamp check failed: token stamped in the future")]
    TimestampFromFuture,
    #[error("honeypot field was not empty")]
    HoneypotTriggered,
}

pub struct SecurityForm {
    config: SecurityFormConfig,
    derived_key: [u8; 32],
}

impl SecurityForm {
    pub fn new(config: SecurityFormConfig) -> Self {
        // Salted-HMAC construction: derive a per-salt key from the master
        // secret once, then MAC each message with it.
        let mut hasher = Sha256::new();
        hasher.update(KEY_SALT.as_bytes());
        hasher.update(config.secret_key.as_bytes());
        let derived_key = hasher.finalize().into();
        Self {
            config,
            derived_key,
        }
    }

    pub fn config(&self) -> &SecurityFormConfig {
        &self.config
    }

    /// Issue fresh security data for a submission form targeting
    /// (content_type, object_pk). `now` is unix seconds.
    pub fn issue(&self, content_type: &str, object_pk: &str, now: i64) -> SecurityData {
        SecurityData {
            content_type: content_type.to_string(),
            object_pk: object_pk.to_string(),
            timestamp: now,
            security_hash: self.generate_security_hash(content_type, object_pk, now),
        }
    }

    /// 64 hex chars of HMAC-SHA256 over `"{content_type}-{object_pk}-{ts}"`.
    pub fn generate_security_hash(
        &self,
        content_type: &str,
        object_pk: &str,
        timestamp: i64,
    ) -> String {
        let info = format!("{content_type}-{object_pk}-{timestamp}");
        let mut mac = HmacSha256::new_from_slice(&self.derived_key)
            .expect("hmac accepts keys of any length");
        mac.update(info.as_bytes());
        hex::encode(mac.finalize().into_bytes())
    }

    /// Verify submitted security data against a recomputed hash and the
    /// freshness window. `now` is unix seconds.
    pub fn verify(&self, data: &SecurityData, now: i64) -> Result<(), SecurityError> {
        let expected =
            self.generate_security_hash(&data.content_type, &data.object_pk, data.timestamp);
        if !constant_time_eq(expected.as_bytes(), data.security_hash.as_bytes()) {
            return Err(SecurityError::HashMismatch);
        }

        let age = now - data.timestamp;
        if age > self.config.timeout_secs as i64 {
            return Err(SecurityError::TimestampExpired);
        }
        if age < -(self.config.max_clock_skew_secs as i64) {
            return Err(SecurityError::TimestampFromFuture);
        }
        Ok(())
    }

    /// The honeypot input must arrive empty; bots fill every field.
    pub fn check_honeypot(&self, honeypot: &str) -> Result<(), SecurityError> {
        if honeypot.is_empty() {
            Ok(())
        } else {
            Err(SecurityError::HoneypotTriggered)
        }
    }
}

fn constant_time_eq(left: &[u8], right: &[u8]) -> bool {
    // Length is public here (both sides are fixed-width hex), so the early
    // length check leaks nothing.
    left.len() == right.len() && left.ct_eq(right).into()
}

#[cfg(test)]
mod tests {
    use super::{SecurityData, SecurityError, SecurityForm, SecurityFormConfig};

    fn form() -> SecurityForm {
        SecurityForm::new(SecurityFormConfig::new("unit-test-secret"))
    }

    #[test]
    fn issue_then_verify_round_trips() {
        let form = form();
        let data = form.issue("blog.article", "42", 1_000);
        assert_eq!(data.security_hash.len(), 64);
        assert_eq!(form.verify(&data, 1_000), Ok(()));
        assert_eq!(form.verify(&data, 1_000 + 3600), Ok(()));
    }

    #[test]
    fn verify_rejects_stale_tokens() {
        let form = form();
        let data = form.issue("blog.article", "42", 1_000);
        assert_eq!(form.verify(&data, 1_000 + 3601), Err(SecurityError::TimestampExpired));
    }

    #[test]
    fn verify_rejects_future_tokens_beyond_skew() {
        let form = form();
        let data = form.issue("blog.article", "42", 2_000);
        assert_eq!(form.verify(&data, 1_950), Ok(()));
        assert_eq!(form.verify(&data, 1_900), Err(SecurityError::TimestampFromFuture));
    }

    #[test]
    fn verify_rejects_any_altered_field() {
        let form = form();
        let issued = form.issue("blog.article", "42", 1_000);

        let tampered_pk = SecurityData {
            object_pk: "43".to_string(),
            ..issued.clone()
        };
        assert_eq!(form.verify(&tampered_pk, 1_000), Err(SecurityError::HashMismatch));

        let tampered_type = SecurityData {
            content_type: "shop.product".to_string(),
            ..issued.clone()
        };
        assert_eq!(form.verify(&tampered_type, 1_000), Err(SecurityError::HashMismatch));

        // Refreshing the timestamp without recomputing the hash must fail
        // even though the new timestamp is well within the window.
        let tampered_ts = SecurityData {
            timestamp: 1_500,
            ..issued
        };
        assert_eq!(form.verify(&tampered_ts, 1_500), Err(SecurityError::HashMismatch));
    }

    #[test]
    fn verify_rejects_hash_of_wrong_width() {
        let form = form();
        let mut data = form.issue("blog.article", "42", 1_000);
        data.security_hash.truncate(40);
        assert_eq!(form.verify(&data, 1_000), Err(SecurityError::HashMismatch));
    }

    #[test]
    fn different_secrets_produce_unrelated_hashes() {
        let a = SecurityForm::new(SecurityFormConfig::new("secret-a"));
        let b = SecurityForm::new(SecurityFormConfig::new("secret-b"));
        let issued = a.issue("blog.article", "42", 1_000);
        assert_eq!(b.verify(&issued, 1_000), Err(SecurityError::HashMismatch));
    }

    #[test]
    fn check_honeypot_flags_non_empty_values() {
        let form = form();
        assert_eq!(form.check_honeypot(""), Ok(()));
        assert_eq!(form.check_honeypot("buy gold"), Err(SecurityError::HoneypotTriggered));
    }
}
