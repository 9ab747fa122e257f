//! Configuration helpers shared by Huddle components.

/// Parse a boolean flag the way service env vars spell them.
///
/// Accepts `true`/`false`, `1`/`0` and `yes`/`no` (case-insensitive).
#[must_use]
pub fn parse_bool_flag(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" => Some(true),
        "false" | "0" | "no" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_bool_flag() {
        assert_eq!(parse_bool_flag("true"), Some(true));
        assert_eq!(parse_bool_flag(" YES "), Some(true));
        assert_eq!(parse_bool_flag("0"), Some(false));
        assert_eq!(parse_bool_flag("maybe"), None);
    }
}
