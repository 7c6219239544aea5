use regex::{Captures, Regex};
use std::fmt;
use std::sync::LazyLock;

// Provider API keys: sk-..., sk-ant-api03-..., sk-proj-...
static API_KEY_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"sk-[a-zA-Z0-9_-]{16,}").expect("valid api key pattern"));

static TOKEN_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"["']?(?:api_key|apikey|token|secret)["']?\s*[:=]\s*["']?([a-zA-Z0-9_.\-\[\]]{8,})["']?"#)
        .expect("valid token pattern")
});

static BEARER_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"Bearer\s+[a-zA-Z0-9_.\-]+").expect("valid bearer pattern"));

static PASSWORD_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"["']?password["']?\s*[:=]\s*["']?([^"'\s,}]+)["']?"#).expect("valid password pattern")
});

/// Redacts credentials from text before it leaves the kernel.
///
/// Prompts, reasoning traces and tool outputs end up in exported audit
/// records, and agents routinely echo connection strings and keys.
#[derive(Clone, Copy, Default)]
pub struct SecretScrubber;

impl SecretScrubber {
    pub fn new() -> Self {
        Self
    }

    /// Scrub a message of sensitive data
    pub fn scrub(&self, message: &str) -> String {
        let mut scrubbed = API_KEY_PATTERN
            .replace_all(message, "[API_KEY_REDACTED]")
            .to_string();
        scrubbed = BEARER_PATTERN
            .replace_all(&scrubbed, "Bearer [TOKEN_REDACTED]")
            .to_string();
        scrubbed = TOKEN_PATTERN
            .replace_all(&scrubbed, |caps: &Captures| {
                let full_match = &caps[0];
                if let Some(colon_pos) = full_match.find(':') {
                    format!("{}:[REDACTED]", &full_match[..colon_pos])
                } else if let Some(eq_pos) = full_match.find('=') {
                    format!("{}=[REDACTED]", &full_match[..eq_pos])
                } else {
                    "[REDACTED]".to_string()
                }
            })
            .to_string();
        PASSWORD_PATTERN
            .replace_all(&scrubbed, "password=[REDACTED]")
            .to_string()
    }
}

impl fmt::Debug for SecretScrubber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SecretScrubber").finish()
    }
}
