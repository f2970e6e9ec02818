//! Invite tokens, invite links and access requests.
//!
//! Tokens are secrets. The gateway only classifies pasted text so it can pick
//! the acceptance path; it never logs a token or puts one in a span.

use std::fmt;
use std::sync::OnceLock;

use chrono::{DateTime, Duration, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::ValidationError;
use crate::team::{TeamId, TeamName, TeamRole};

fn seitan_key_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)(?:^|[^a-z0-9+])([a-z0-9]{5}\+{1,2}[a-z0-9]{10,14})(?:$|[^a-z0-9+])")
            .expect("seitan key pattern is valid")
    })
}

fn invitelink_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)https?://\S+/team-invite-link/([a-z0-9+]+)").expect("invite link pattern is valid")
    })
}

fn long_duration_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^\s*(\d+)\s*([smhDWMY])\s*$").expect("duration pattern is valid"))
}

/// A seitan invite key extracted from pasted text.
///
/// `Debug` is redacted.
#[derive(Clone, PartialEq, Eq)]
pub struct SeitanToken(String);

impl SeitanToken {
    /// Returns the raw key. Callers must not log it.
    #[must_use]
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for SeitanToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SeitanToken(<redacted>)")
    }
}

/// Classification of a pasted invite token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParsedInvite {
    /// A seitan key, or an invite link carrying one.
    Seitan(SeitanToken),
    /// Anything else: a legacy server-trust (email) token.
    Legacy,
}

impl ParsedInvite {
    /// Classifies pasted text.
    ///
    /// # Examples
    ///
    /// ```
    /// use teamgate::ParsedInvite;
    ///
    /// let parsed = ParsedInvite::from_paste("join with abcde+fghjkmnpqrs please");
    /// assert!(matches!(parsed, ParsedInvite::Seitan(_)));
    /// assert_eq!(ParsedInvite::from_paste("legacy-token"), ParsedInvite::Legacy);
    /// ```
    #[must_use]
    pub fn from_paste(paste: &str) -> Self {
        if let Some(caps) = invitelink_regex().captures(paste) {
            if let Some(m) = caps.get(1) {
                return Self::Seitan(SeitanToken(m.as_str().to_ascii_lowercase()));
            }
        }
        if let Some(caps) = seitan_key_regex().captures(paste) {
            if let Some(m) = caps.get(1) {
                return Self::Seitan(SeitanToken(m.as_str().to_ascii_lowercase()));
            }
        }
        Self::Legacy
    }
}

/// Parses durations such as `"30 D"`, `"1 Y"` or `"12h"`.
///
/// Units: `s`, `m`, `h`, `D`, `W`, `M` (30 days), `Y` (365 days).
pub fn parse_long_duration(s: &str) -> Result<Duration, ValidationError> {
    let invalid = |reason: &str| ValidationError::InvalidDuration {
        value: s.to_string(),
        reason: reason.to_string(),
    };

    let caps = long_duration_regex()
        .captures(s)
        .ok_or_else(|| invalid("expected '<number> <unit>'"))?;
    let n: i64 = caps[1].parse().map_err(|_| invalid("number out of range"))?;
    let unit_secs: i64 = match &caps[2] {
        "s" => 1,
        "m" => 60,
        "h" => 3600,
        "D" => 86_400,
        "W" => 7 * 86_400,
        "M" => 30 * 86_400,
        "Y" => 365 * 86_400,
        _ => return Err(invalid("unknown unit")),
    };
    let secs = n.checked_mul(unit_secs).ok_or_else(|| invalid("duration overflows"))?;
    Duration::try_seconds(secs).ok_or_else(|| invalid("duration overflows"))
}

/// A shareable invite link.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Invitelink {
    pub invite_id: String,
    pub url: String,
    pub role: TeamRole,
    pub max_uses: Option<u32>,
    pub expires_at: Option<DateTime<Utc>>,
}

/// Result of `TeamRequestAccess`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct AccessRequestResult {
    /// The team was open and the caller joined immediately.
    pub open: bool,
}

/// Result of `TeamAcceptInviteOrRequestAccess`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct AcceptOrRequestResult {
    pub was_token: bool,
    pub was_seitan: bool,
    pub was_team_name: bool,
    pub was_open_team: bool,
}

/// A pending request to join a team.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JoinRequest {
    pub team_id: TeamId,
    pub team_name: TeamName,
    pub username: String,
    pub requested_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_seitan_key_is_extracted_from_paste() {
        let ParsedInvite::Seitan(token) = ParsedInvite::from_paste("Hey! use ABCDE+fghjkmnpqrs to join") else {
            panic!("expected seitan");
        };
        assert_eq!(token.expose(), "abcde+fghjkmnpqrs");
    }

    #[test]
    fn test_invitelink_is_seitan() {
        let parsed = ParsedInvite::from_paste("https://teams.example.com/team-invite-link/abcde+fghjkmnpqrs");
        assert!(matches!(parsed, ParsedInvite::Seitan(_)));
    }

    #[test]
    fn test_plain_tokens_are_legacy() {
        assert_eq!(ParsedInvite::from_paste("4f1c0b2e9d"), ParsedInvite::Legacy);
        assert_eq!(ParsedInvite::from_paste("acme.eng"), ParsedInvite::Legacy);
        assert_eq!(ParsedInvite::from_paste("abc+def"), ParsedInvite::Legacy);
    }

    #[test]
    fn test_seitan_debug_is_redacted() {
        let ParsedInvite::Seitan(token) = ParsedInvite::from_paste("abcde+fghjkmnpqrs") else {
            panic!("expected seitan");
        };
        let dbg = format!("{token:?}");
        assert!(!dbg.contains("abcde"));
    }

    #[test]
    fn test_parse_long_duration_units() {
        assert_eq!(parse_long_duration("30 D").unwrap(), Duration::days(30));
        assert_eq!(parse_long_duration("1 Y").unwrap(), Duration::days(365));
        assert_eq!(parse_long_duration("12h").unwrap(), Duration::hours(12));
        assert_eq!(parse_long_duration("2 M").unwrap(), Duration::days(60));
        assert_eq!(parse_long_duration("5 m").unwrap(), Duration::minutes(5));
    }

    #[test]
    fn test_parse_long_duration_rejects_garbage() {
        assert!(parse_long_duration("soon").is_err());
        assert!(parse_long_duration("10 fortnights").is_err());
        assert!(parse_long_duration("99999999999999999999 Y").is_err());
    }
}
