//! Sensitive-substring redaction applied to every audit entry before storage.

use std::borrow::Cow;
use std::sync::LazyLock;

use regex::Regex;

/// Marker substituted for redacted material.
pub const REDACTED: &str = "[REDACTED]";

struct Rule {
    pattern: Regex,
    replacement: &'static str,
}

fn rule(pattern: &str, replacement: &'static str) -> Rule {
    Rule {
        // Patterns are compile-time constants covered by the tests below.
        pattern: Regex::new(pattern).expect("valid redaction pattern"),
        replacement,
    }
}

static RULES: LazyLock<Vec<Rule>> = LazyLock::new(|| {
    vec![
        // key=value and JSON "key": "value" pairs
        rule(
            r#"(?i)\b(access_token|refresh_token|device_code|client_secret|password|secret|token)(\s*["']?\s*[:=]\s*["']?)([^\s"'&,;}]+)"#,
            "${1}${2}[REDACTED]",
        ),
        rule(
            r"(?i)\b(bearer|authorization:\s*token)\s+[A-Za-z0-9._~+/=-]{8,}",
            "${1} [REDACTED]",
        ),
        // GitHub token families: ghp_, gho_, ghu_, ghs_, ghr_
        rule(r"\b(gh[pousr])_[A-Za-z0-9]{20,}", "${1}_[REDACTED]"),
        rule(r"\bgithub_pat_[A-Za-z0-9_]{20,}", "github_pat_[REDACTED]"),
        // Legacy 40-char hex OAuth tokens
        rule(r"\b[0-9a-fA-F]{40}\b", "[REDACTED]"),
    ]
});

/// Returns `input` with every known sensitive substring replaced.
pub fn redact(input: &str) -> String {
    let mut out: Cow<'_, str> = Cow::Borrowed(input);
    for rule in RULES.iter() {
        if let Cow::Owned(replaced) = rule.pattern.replace_all(&out, rule.replacement) {
            out = Cow::Owned(replaced);
        }
    }
    out.into_owned()
}

/// Returns `true` if `input` still contains something a rule would redact.
pub fn contains_sensitive(input: &str) -> bool {
    RULES.iter().any(|rule| {
        rule.pattern
            .captures_iter(input)
            .any(|caps| !caps[0].ends_with(REDACTED))
    })
}
