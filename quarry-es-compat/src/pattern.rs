/// Match `text` against a pattern where `*` stands for any run of
/// characters. Used for field lists, `_source` filters and highlight fields.
pub fn glob_match(pattern: &str, text: &str) -> bool {
    let mut parts = pattern.split('*');
    let Some(first) = parts.next() else {
        return text.is_empty();
    };
    let Some(mut rest) = text.strip_prefix(first) else {
        return false;
    };
    let mut segments: Vec<&str> = parts.collect();
    let Some(last) = segments.pop() else {
        return rest.is_empty();
    };
    for segment in segments {
        match rest.find(segment) {
            Some(at) => rest = &rest[at + segment.len()..],
            None => return false,
        }
    }
    rest.len() >= last.len() && rest.ends_with(last)
}

/// True when any pattern matches.
pub fn any_match<S: AsRef<str>>(patterns: &[S], text: &str) -> bool {
    patterns.iter().any(|p| glob_match(p.as_ref(), text))
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_glob_match() {
        assert!(glob_match("title", "title"));
        assert!(!glob_match("title", "titles"));
        assert!(glob_match("*", ""));
        assert!(glob_match("user.*", "user.name"));
        assert!(glob_match("*.name", "user.name"));
        assert!(glob_match("u*r.*e", "user.name"));
        assert!(!glob_match("a*b*c", "acb"));
        assert!(!glob_match("ab*ba", "aba"));
    }

    proptest! {
        #[test]
        fn star_matches_everything(text in "[a-z._]{0,12}") {
            prop_assert!(glob_match("*", &text));
        }

        #[test]
        fn literal_matches_only_itself(a in "[a-z]{1,8}", b in "[a-z]{1,8}") {
            prop_assert_eq!(glob_match(&a, &b), a == b);
        }
    }
}
