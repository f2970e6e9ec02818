//! Short, secret-free argument summaries for span fields.

/// Summarizes a batch as `0`, `'first'` or `'first' + N more`.
///
/// # Examples
///
/// ```
/// use teamgate::gateway::summary::batch;
///
/// let users = ["alice", "bob", "carol"];
/// assert_eq!(batch(&users, |u| u.to_string()), "'alice' + 2 more");
/// assert_eq!(batch(&users[..1], |u| u.to_string()), "'alice'");
/// assert_eq!(batch::<&str>(&[], |u| u.to_string()), "0");
/// ```
pub fn batch<T>(items: &[T], describe: impl Fn(&T) -> String) -> String {
    match items {
        [] => "0".to_string(),
        [only] => format!("'{}'", describe(only)),
        [first, rest @ ..] => format!("'{}' + {} more", describe(first), rest.len()),
    }
}

/// Renders an optional field, empty when unset.
pub fn opt(value: Option<&str>) -> &str {
    value.unwrap_or("")
}
