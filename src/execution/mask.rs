//! Secret masking for command text.

use regex::Regex;

/// Placeholder substituted for every captured span.
pub const MASK_PLACEHOLDER: &str = "<*masked*>";

/// Replace every capture group matched by `pattern` with [`MASK_PLACEHOLDER`].
///
/// Text outside capture groups (including the non-captured parts of a match)
/// is kept. Without a pattern the text is returned unchanged.
///
/// ```
/// use exec_runner::execution::mask;
/// use regex::Regex;
///
/// let re = Regex::new(r"secret\s*=\s*([A-Za-z0-9_\-]+)").unwrap();
/// let masked = mask("USE='secret=secret_pass' do task", Some(&re));
/// assert_eq!(masked, "USE='secret=<*masked*>' do task");
/// ```
pub fn mask(text: &str, pattern: Option<&Regex>) -> String {
    let Some(pattern) = pattern else {
        return text.to_string();
    };

    let mut masked = String::with_capacity(text.len());
    let mut cursor = 0;

    for caps in pattern.captures_iter(text) {
        for group in caps.iter().skip(1).flatten() {
            // Nested groups inside an already masked span.
            if group.start() < cursor {
                continue;
            }
            masked.push_str(&text[cursor..group.start()]);
            masked.push_str(MASK_PLACEHOLDER);
            cursor = group.end();
        }
    }

    masked.push_str(&text[cursor..]);
    masked
}

/// Mask a command for logging: trailing whitespace is dropped, then each
/// configured pattern is applied in order.
pub fn mask_command(command: &str, patterns: &[Option<&Regex>]) -> String {
    patterns
        .iter()
        .fold(command.trim_end().to_string(), |text, pattern| {
            mask(&text, *pattern)
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn re(pattern: &str) -> Regex {
        Regex::new(pattern).unwrap()
    }

    #[test]
    fn test_no_pattern_is_identity() {
        assert_eq!(mask("echo secret", None), "echo secret");
    }

    #[test]
    fn test_single_group() {
        let pattern = re(r"secret\s*=\s*([A-Z-a-z0-9_\-]+)");
        assert_eq!(
            mask("USE='secret=secret_pass' do task", Some(&pattern)),
            "USE='secret=<*masked*>' do task"
        );
    }

    #[test]
    fn test_multiple_matches() {
        let pattern = re(r"--password[= ]([^\s;]+)");
        assert_eq!(
            mask("login --password=abc; relogin --password xyz", Some(&pattern)),
            "login --password=<*masked*>; relogin --password <*masked*>"
        );
    }

    #[test]
    fn test_multiple_groups_in_one_match() {
        let pattern = re(r"user=(\w+) pass=(\w+)");
        assert_eq!(
            mask("connect user=admin pass=hunter2 now", Some(&pattern)),
            "connect user=<*masked*> pass=<*masked*> now"
        );
    }

    #[test]
    fn test_optional_group_not_participating() {
        let pattern = re(r"token(?:=(\w+))?");
        assert_eq!(mask("token and token=abc", Some(&pattern)), "token and token=<*masked*>");
    }

    #[test]
    fn test_nested_groups_masked_once() {
        let pattern = re(r"key=((\w+)-(\w+))");
        assert_eq!(mask("key=ab-cd end", Some(&pattern)), "key=<*masked*> end");
    }

    #[test]
    fn test_pattern_without_match() {
        let pattern = re(r"secret=(\w+)");
        assert_eq!(mask("ls -la", Some(&pattern)), "ls -la");
    }

    #[test]
    fn test_unicode_text() {
        let pattern = re(r"пароль=(\S+)");
        assert_eq!(
            mask("вход пароль=тайна конец", Some(&pattern)),
            "вход пароль=<*masked*> конец"
        );
    }

    #[test]
    fn test_mask_command_applies_all_patterns() {
        let global = re(r"secret=(\w+)");
        let local = re(r"token=(\w+)");
        let masked = mask_command(
            "run secret=one token=two  \n",
            &[Some(&global), None, Some(&local)],
        );
        assert_eq!(masked, "run secret=<*masked*> token=<*masked*>");
        assert!(!masked.contains("one"));
        assert!(!masked.contains("two"));
    }
}
