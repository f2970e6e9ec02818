//! Request validation.
//!
//! Everything here runs before the gateway talks to the engine. A request that
//! fails validation never produces an engine call.

use std::sync::OnceLock;

use regex::Regex;

use crate::error::ValidationError;
use crate::membership::RemovalSelector;

/// Upper bound for free-form text such as invite messages.
pub const MAX_TEXT_LEN: usize = 16 * 1024;

/// Upper bound for a single identity assertion.
pub const MAX_ASSERTION_LEN: usize = 512;

fn email_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").expect("email pattern is valid"))
}

fn phone_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^\+?[0-9]{7,15}$").expect("phone pattern is valid"))
}

/// Where a validated removal goes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemovalPath<'a> {
    /// Cancel a pending invite sent to this address.
    Email(&'a str),
    /// Cancel a pending invite by id.
    InviteId(&'a str),
    /// Remove a member. The username may be empty when nothing was set.
    Username(&'a str),
}

fn populated(v: &Option<String>) -> Option<&str> {
    v.as_deref().filter(|s| !s.is_empty())
}

/// Checks that at most one selector field is set and picks the removal path.
///
/// With no field set the username path is taken with an empty username, and
/// the engine decides what that means.
///
/// # Examples
///
/// ```
/// use teamgate::membership::RemovalSelector;
/// use teamgate::validation::{check_removal_selector, RemovalPath};
///
/// let sel = RemovalSelector::email("a@example.com");
/// assert_eq!(check_removal_selector(&sel).unwrap(), RemovalPath::Email("a@example.com"));
///
/// let both = RemovalSelector { username: Some("alice".into()), ..sel };
/// assert!(check_removal_selector(&both).is_err());
/// ```
pub fn check_removal_selector(selector: &RemovalSelector) -> Result<RemovalPath<'_>, ValidationError> {
    let username = populated(&selector.username);
    let email = populated(&selector.email);
    let invite_id = populated(&selector.invite_id);

    let fields: Vec<&'static str> = [
        ("username", username.is_some()),
        ("email", email.is_some()),
        ("invite_id", invite_id.is_some()),
    ]
    .into_iter()
    .filter_map(|(name, set)| set.then_some(name))
    .collect();
    if fields.len() > 1 {
        return Err(ValidationError::MutuallyExclusiveFields { fields });
    }

    Ok(match (email, invite_id) {
        (Some(email), _) => RemovalPath::Email(email),
        (None, Some(id)) => RemovalPath::InviteId(id),
        (None, None) => RemovalPath::Username(username.unwrap_or_default()),
    })
}

/// Rejects an empty batch on the add path.
pub fn check_non_empty_batch<T>(items: &[T]) -> Result<(), ValidationError> {
    if items.is_empty() {
        return Err(ValidationError::EmptyBatch);
    }
    Ok(())
}

/// Validates a non-empty trimmed string field.
pub fn check_non_empty(field: &'static str, value: &str) -> Result<(), ValidationError> {
    let v = value.trim();
    if v.is_empty() {
        return Err(ValidationError::MissingField {
            field: field.to_string(),
        });
    }
    if v.len() > MAX_ASSERTION_LEN {
        return Err(ValidationError::FieldTooLong {
            field: field.to_string(),
            max_length: MAX_ASSERTION_LEN,
        });
    }
    Ok(())
}

/// Validates optional free-form text.
pub fn check_optional_text(field: &'static str, value: Option<&str>) -> Result<(), ValidationError> {
    if let Some(v) = value {
        if v.len() > MAX_TEXT_LEN {
            return Err(ValidationError::FieldTooLong {
                field: field.to_string(),
                max_length: MAX_TEXT_LEN,
            });
        }
    }
    Ok(())
}

/// Builds an `email:` assertion.
pub fn email_assertion(email: &str) -> Result<String, ValidationError> {
    let email = email.trim();
    if !email_regex().is_match(email) {
        return Err(ValidationError::InvalidAssertion {
            value: email.to_string(),
            reason: "not an email address".to_string(),
        });
    }
    Ok(format!("email:{email}"))
}

/// Splits a pasted list of addresses into valid and malformed entries.
///
/// Entries are separated by commas, semicolons or newlines. A `Name <addr>`
/// entry contributes just the address. Blank entries are skipped.
#[must_use]
pub fn split_email_list(raw: &str) -> (Vec<String>, Vec<String>) {
    let mut valid = Vec::new();
    let mut malformed = Vec::new();
    for entry in raw.split([',', ';', '\n', '\r']).map(str::trim).filter(|e| !e.is_empty()) {
        let addr = match (entry.rfind('<'), entry.strip_suffix('>')) {
            (Some(open), Some(inner)) => inner[open + 1..].trim(),
            _ => entry,
        };
        if email_regex().is_match(addr) {
            valid.push(addr.to_string());
        } else {
            malformed.push(entry.to_string());
        }
    }
    (valid, malformed)
}

/// Builds a `phone:` assertion. Spaces, dashes and parentheses are stripped.
pub fn phone_assertion(phone: &str) -> Result<String, ValidationError> {
    let digits: String = phone
        .chars()
        .filter(|c| !matches!(c, ' ' | '-' | '(' | ')' | '.'))
        .collect();
    if !phone_regex().is_match(&digits) {
        return Err(ValidationError::InvalidAssertion {
            value: phone.to_string(),
            reason: "not a phone number".to_string(),
        });
    }
    Ok(format!("phone:{}", digits.trim_start_matches('+')))
}

/// Picks the identity for a single-member add.
///
/// Email wins over phone, and either wins over the username.
pub fn single_add_assertion(
    username: &str,
    email: Option<&str>,
    phone: Option<&str>,
) -> Result<String, ValidationError> {
    if let Some(email) = email.filter(|e| !e.trim().is_empty()) {
        return email_assertion(email);
    }
    if let Some(phone) = phone.filter(|p| !p.trim().is_empty()) {
        return phone_assertion(phone);
    }
    check_non_empty("username", username)?;
    Ok(username.trim().to_string())
}
