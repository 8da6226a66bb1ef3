//! Redis-style glob matching for pattern subscriptions.
//!
//! Supports `*` (any run of characters, including `/`), `?` (exactly one
//! character) and `\` escapes. Character classes are not needed by any
//! channel the simulation uses and are matched literally, so identifiers
//! spliced into a pattern go through [`escape_glob`] first. Escaped input
//! then matches the same channels here and on Redis.

/// Characters with a glob meaning on Redis.
const GLOB_SPECIAL: [char; 5] = ['*', '?', '[', ']', '\\'];

/// Escape `literal` so it only matches itself inside a pattern.
pub fn escape_glob(literal: &str) -> String {
    let mut escaped = String::with_capacity(literal.len());
    for ch in literal.chars() {
        if GLOB_SPECIAL.contains(&ch) {
            escaped.push('\\');
        }
        escaped.push(ch);
    }
    escaped
}

/// Check whether `channel` matches the glob `pattern`.
pub fn glob_match(pattern: &str, channel: &str) -> bool {
    let pattern: Vec<char> = pattern.chars().collect();
    let channel: Vec<char> = channel.chars().collect();

    let (mut p, mut c) = (0usize, 0usize);
    // Position of the last `*` in the pattern and the channel index it resumed at.
    let mut backtrack: Option<(usize, usize)> = None;

    while c < channel.len() {
        match pattern.get(p) {
            Some('*') => {
                backtrack = Some((p, c));
                p += 1;
                continue;
            }
            Some('?') => {
                p += 1;
                c += 1;
                continue;
            }
            Some('\\') if p + 1 < pattern.len() => {
                if pattern[p + 1] == channel[c] {
                    p += 2;
                    c += 1;
                    continue;
                }
            }
            Some(&ch) if ch == channel[c] => {
                p += 1;
                c += 1;
                continue;
            }
            _ => {}
        }

        match backtrack {
            Some((star, resumed)) => {
                p = star + 1;
                c = resumed + 1;
                backtrack = Some((star, resumed + 1));
            }
            None => return false,
        }
    }

    pattern[p..].iter().all(|&ch| ch == '*')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_literal_match() {
        assert!(glob_match("crud_aggregator_response", "crud_aggregator_response"));
        assert!(!glob_match("crud_aggregator_response", "crud_aggregator"));
        assert!(!glob_match("crud_aggregator", "crud_aggregator_response"));
    }

    #[test]
    fn test_star_spans_segments() {
        let pattern = "external-aggregator/*/*/events/all";
        assert!(glob_match(pattern, "external-aggregator/sim-1/agg-1/events/all"));
        assert!(glob_match(pattern, "external-aggregator/a/b/c/events/all"));
        assert!(!glob_match(pattern, "external-aggregator/sim-1/events/market"));
    }

    #[test]
    fn test_question_mark() {
        assert!(glob_match("dev-?", "dev-1"));
        assert!(!glob_match("dev-?", "dev-12"));
    }

    #[test]
    fn test_escape() {
        assert!(glob_match(r"a\*b", "a*b"));
        assert!(!glob_match(r"a\*b", "axb"));
    }

    #[test]
    fn test_escaped_literal_matches_only_itself() {
        let id = r"pv[1]*?\x";
        let pattern = format!("{}/response/aggregator", escape_glob(id));
        assert_eq!(pattern, r"pv\[1\]\*\?\\x/response/aggregator");
        assert!(glob_match(&pattern, &format!("{id}/response/aggregator")));
        assert!(!glob_match(&pattern, r"pv[1]xx\x/response/aggregator"));
        assert!(!glob_match(&pattern, "pv1/response/aggregator"));
        assert_eq!(escape_glob("house-1"), "house-1");
    }

    #[test]
    fn test_trailing_and_empty() {
        assert!(glob_match("*", ""));
        assert!(glob_match("abc*", "abc"));
        assert!(!glob_match("", "abc"));
    }
}
