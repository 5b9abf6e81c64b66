//! Pattern-based PII scrubbing.
//!
//! Each category is replaced by a fixed sentinel. Sentinels carry no digits,
//! `@` or URL scheme. Digit patterns are ASCII-only, and the substitution pass
//! repeats until the text stops changing, so running the scrubber over its own
//! output is a no-op.

use regex::Regex;
use std::sync::OnceLock;

pub const EMAIL_SENTINEL: &str = "«EMAIL»";
pub const PHONE_SENTINEL: &str = "«PHONE»";
pub const IP_SENTINEL: &str = "«IP»";
pub const URL_SENTINEL: &str = "«URL»";

struct RedactionPatterns {
    email: Regex,
    phone: Regex,
    ipv4: Regex,
    url: Regex,
}

static PATTERNS: OnceLock<RedactionPatterns> = OnceLock::new();

fn patterns() -> &'static RedactionPatterns {
    PATTERNS.get_or_init(|| RedactionPatterns {
        email: Regex::new(r"\S+@\S+").expect("valid regex"),
        phone: Regex::new(r"(?-u:\b)[0-9]{3}[-.]?[0-9]{3}[-.]?[0-9]{4}(?-u:\b)")
            .expect("valid regex"),
        ipv4: Regex::new(r"(?-u:\b)[0-9]{1,3}\.[0-9]{1,3}\.[0-9]{1,3}\.[0-9]{1,3}(?-u:\b)")
            .expect("valid regex"),
        url: Regex::new(r"https?://(?:[A-Za-z0-9$\-_.+!*'(),@&=:;/?#~\[\]]|%[0-9A-Fa-f]{2})+")
            .expect("valid regex"),
    })
}

/// Scrubs emails, phone numbers, IPv4 addresses and http(s) URLs, in that
/// order. `None` becomes an empty string; `enable = false` returns the text
/// untouched.
pub fn redact(text: Option<&str>, enable: bool) -> String {
    let text = text.unwrap_or_default();
    if !enable {
        return text.to_string();
    }

    let mut current = scrub_pass(text);
    loop {
        let next = scrub_pass(&current);
        if next == current {
            return current;
        }
        current = next;
    }
}

// A URL sentinel can open a word boundary after digits that preceded the
// scheme, so one pass is not always a fixed point. Every pass after the
// first only shrinks the text.
fn scrub_pass(text: &str) -> String {
    let patterns = patterns();
    let text = patterns.email.replace_all(text, EMAIL_SENTINEL);
    let text = patterns.phone.replace_all(&text, PHONE_SENTINEL);
    let text = patterns.ipv4.replace_all(&text, IP_SENTINEL);
    let text = patterns.url.replace_all(&text, URL_SENTINEL);
    text.into_owned()
}

/// Redactor bound to a fixed enable flag, for callers that thread the PII
/// setting through several calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Redactor {
    enabled: bool,
}

impl Default for Redactor {
    fn default() -> Self {
        Self { enabled: true }
    }
}

impl Redactor {
    pub fn new(enabled: bool) -> Self {
        Self { enabled }
    }

    pub fn enabled(&self) -> bool {
        self.enabled
    }

    pub fn redact(&self, text: Option<&str>) -> String {
        redact(text, self.enabled)
    }
}
