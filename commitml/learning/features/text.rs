use std::collections::HashSet;

use once_cell::sync::Lazy;
use regex::Regex;

static ISSUE_REF: Lazy<Regex> = Lazy::new(|| Regex::new(r"#\d+").expect("valid regex"));
static PR_REF: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\bPR\b|pull request").expect("valid regex"));
static PATH_TOKEN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[A-Za-z0-9_.\-]+(?:/[A-Za-z0-9_.\-]+)+$").expect("valid regex")
});
static FILE_TOKEN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[A-Za-z0-9_\-]+\.[A-Za-z][A-Za-z0-9]{0,5}$").expect("valid regex")
});

/// Email domains of CI services and dependency bots.
pub const CI_DOMAIN_SUFFIXES: [&str; 7] = [
    "dependabot.com",
    "renovateapp.com",
    "travis-ci.org",
    "travis-ci.com",
    "circleci.com",
    "jenkins-ci.org",
    "gitlab-ci.com",
];

/// Email domains counted as organisation addresses.
pub const COMPANY_EMAIL_DOMAINS: [&str; 2] = ["python.org", "github.com"];

const TOKEN_EDGES: &[char] = &[
    ',', ';', ':', '(', ')', '[', ']', '{', '}', '<', '>', '"', '\'', '`',
];

/// Character count (not bytes).
#[must_use]
pub fn char_len(text: &str) -> usize {
    text.chars().count()
}

/// Whitespace-delimited token count.
#[must_use]
pub fn word_count(text: &str) -> usize {
    text.split_whitespace().count()
}

/// `#<digits>` anywhere in the message.
#[must_use]
pub fn has_issue_reference(message: &str) -> bool {
    ISSUE_REF.is_match(message)
}

/// A standalone `PR` or the phrase "pull request", case-insensitively.
#[must_use]
pub fn has_pr_reference(message: &str) -> bool {
    PR_REF.is_match(message)
}

/// Distinct tokens that look like file paths (`src/lib.rs`, `foo/bar`) or file names (`README.md`).
#[must_use]
pub fn files_mentioned(message: &str) -> usize {
    message
        .split_whitespace()
        .map(|token| token.trim_matches(TOKEN_EDGES).trim_end_matches('.'))
        .filter(|token| !token.is_empty() && !token.contains("://"))
        .filter(|token| PATH_TOKEN.is_match(token) || FILE_TOKEN.is_match(token))
        .collect::<HashSet<_>>()
        .len()
}

/// Lower-cased text after the last `@`, empty when there is none.
#[must_use]
pub fn email_domain(email: &str) -> String {
    email
        .rsplit_once('@')
        .map(|(_, domain)| domain.trim().to_ascii_lowercase())
        .unwrap_or_default()
}

/// Domain contains one of [`COMPANY_EMAIL_DOMAINS`] (`mail.python.org` counts).
#[must_use]
pub fn is_company_email(email: &str) -> bool {
    let domain = email_domain(email);
    COMPANY_EMAIL_DOMAINS.iter().any(|known| domain.contains(known))
}

/// Bot and CI author heuristic.
///
/// Matches, case-insensitively: `[bot]` in the name or email; a name token or the
/// email local part ending in `bot` (`dependabot`, `renovate-bot`); the
/// `github-actions` name; or an email domain ending in [`CI_DOMAIN_SUFFIXES`].
#[must_use]
pub fn is_bot_author(name: &str, email: &str) -> bool {
    let name = name.to_ascii_lowercase();
    let email = email.to_ascii_lowercase();
    if name.contains("[bot]") || email.contains("[bot]") || name == "github-actions" {
        return true;
    }
    let (local, domain) = email.split_once('@').unwrap_or((email.as_str(), ""));
    let bot_token = |text: &str| {
        text.split(|c: char| !c.is_ascii_alphanumeric())
            .any(|token| token.ends_with("bot"))
    };
    if bot_token(name.as_str()) || bot_token(local) {
        return true;
    }
    CI_DOMAIN_SUFFIXES
        .iter()
        .any(|suffix| domain == *suffix || domain.ends_with(&format!(".{suffix}")))
}
