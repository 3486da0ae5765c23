//! KEYS-style glob matching and pattern invalidation
//!
//! Matching follows the Redis `KEYS`/`SCAN MATCH` dialect:
//!
//! - `*` matches any run of characters (including none)
//! - `?` matches exactly one character
//! - `[abc]`, `[a-z]`, `[^a]` match a character class
//! - `\x` matches `x` literally
//!
//! The in-memory store uses [`glob_match`] directly; the Redis store hands the
//! pattern to the server. [`invalidate_pattern`] resolves keys through the
//! [`HybridManager`] and deletes them one by one.

use super::errors::CacheResult;
use super::manager::HybridManager;
use futures::future::join_all;
use tracing::{debug, warn};

/// Outcome of a pattern invalidation
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InvalidationReport {
    /// Keys returned by the pattern scan
    pub matched: usize,
    /// Keys whose deletion succeeded
    pub deleted: usize,
    /// Keys whose deletion failed (not retried)
    pub failed: usize,
}

/// Resolve every key matching `pattern` and delete each independently.
///
/// Fails only when the scan itself fails. Individual deletions that fail are
/// counted in the report and logged; the rest still go through.
pub async fn invalidate_pattern(
    manager: &HybridManager,
    pattern: &str,
) -> CacheResult<InvalidationReport> {
    let keys = manager.keys(pattern).await?;
    if keys.is_empty() {
        debug!(pattern = pattern, "Pattern invalidation matched no keys");
        return Ok(InvalidationReport::default());
    }

    let results = join_all(keys.iter().map(|key| manager.del(key))).await;

    let mut report = InvalidationReport {
        matched: keys.len(),
        ..Default::default()
    };
    for (key, result) in keys.iter().zip(results) {
        match result {
            Ok(()) => report.deleted += 1,
            Err(e) => {
                report.failed += 1;
                warn!(key = %key, pattern = pattern, error = %e, "Failed to delete key during invalidation");
            }
        }
    }

    if report.failed > 0 {
        warn!(
            pattern = pattern,
            matched = report.matched,
            deleted = report.deleted,
            failed = report.failed,
            "Pattern invalidation partially failed"
        );
    } else {
        debug!(pattern = pattern, deleted = report.deleted, "Pattern invalidation complete");
    }

    Ok(report)
}

/// Match `key` against a KEYS-style glob `pattern`
pub fn glob_match(pattern: &str, key: &str) -> bool {
    let p: Vec<char> = pattern.chars().collect();
    let t: Vec<char> = key.chars().collect();

    let (mut pi, mut ti) = (0usize, 0usize);
    // Position of the last `*` seen and the text index it is currently absorbing up to
    let mut backtrack: Option<(usize, usize)> = None;

    while ti < t.len() {
        if pi < p.len() {
            if p[pi] == '*' {
                backtrack = Some((pi, ti));
                pi += 1;
                continue;
            }
            if let Some(next) = match_single(&p, pi, t[ti]) {
                pi = next;
                ti += 1;
                continue;
            }
        }

        match backtrack {
            Some((star_pi, star_ti)) => {
                pi = star_pi + 1;
                ti = star_ti + 1;
                backtrack = Some((star_pi, star_ti + 1));
            }
            None => return false,
        }
    }

    while pi < p.len() && p[pi] == '*' {
        pi += 1;
    }
    pi == p.len()
}

/// Try to match one (non-`*`) pattern token at `pi` against `c`.
/// Returns the index after the token on success.
fn match_single(p: &[char], pi: usize, c: char) -> Option<usize> {
    match p[pi] {
        '?' => Some(pi + 1),
        '\\' if pi + 1 < p.len() => (p[pi + 1] == c).then_some(pi + 2),
        '[' => match match_class(p, pi, c) {
            Some((true, next)) => Some(next),
            Some((false, _)) => None,
            // unterminated class: `[` is literal
            None => (c == '[').then_some(pi + 1),
        },
        literal => (literal == c).then_some(pi + 1),
    }
}

/// Evaluate the character class starting at `p[start] == '['`.
/// Returns `(matched, index after ']')`, or `None` if the class never closes.
fn match_class(p: &[char], start: usize, c: char) -> Option<(bool, usize)> {
    let mut i = start + 1;
    let negate = i < p.len() && p[i] == '^';
    if negate {
        i += 1;
    }

    let mut matched = false;
    loop {
        if i >= p.len() {
            return None;
        }
        match p[i] {
            ']' => break,
            '\\' if i + 1 < p.len() => {
                matched |= p[i + 1] == c;
                i += 2;
            }
            lo if i + 2 < p.len() && p[i + 1] == '-' && p[i + 2] != ']' => {
                let hi = p[i + 2];
                let (lo, hi) = if lo <= hi { (lo, hi) } else { (hi, lo) };
                matched |= (lo..=hi).contains(&c);
                i += 3;
            }
            single => {
                matched |= single == c;
                i += 1;
            }
        }
    }

    Some((matched != negate, i + 1))
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_star_matches_any_suffix() {
        assert!(glob_match("alunos:*", "alunos:1"));
        assert!(glob_match("alunos:*", "alunos:page:1:limit:50:sort:nome"));
        assert!(glob_match("alunos:*", "alunos:"));
        assert!(!glob_match("alunos:*", "outro:1"));
        assert!(!glob_match("alunos:*", "alunos"));
    }

    #[test]
    fn test_star_in_the_middle() {
        assert!(glob_match("turmas:*:alunos", "turmas:7:alunos"));
        assert!(glob_match("turmas:*:alunos", "turmas:7:x:alunos"));
        assert!(!glob_match("turmas:*:alunos", "turmas:7:notas"));
        assert!(glob_match("*:*", "a:b"));
        assert!(glob_match("*", ""));
    }

    #[test]
    fn test_question_mark_matches_one_char() {
        assert!(glob_match("nota:?", "nota:1"));
        assert!(!glob_match("nota:?", "nota:12"));
        assert!(!glob_match("nota:?", "nota:"));
    }

    #[test]
    fn test_character_classes() {
        assert!(glob_match("h[ae]llo", "hello"));
        assert!(glob_match("h[ae]llo", "hallo"));
        assert!(!glob_match("h[ae]llo", "hillo"));
        assert!(glob_match("h[^e]llo", "hallo"));
        assert!(!glob_match("h[^e]llo", "hello"));
        assert!(glob_match("key:[0-9]", "key:5"));
        assert!(!glob_match("key:[0-9]", "key:x"));
        assert!(glob_match("key:[9-0]", "key:5"));
    }

    #[test]
    fn test_escapes_and_unterminated_class() {
        assert!(glob_match(r"literal\*", "literal*"));
        assert!(!glob_match(r"literal\*", "literalX"));
        assert!(glob_match(r"q\?", "q?"));
        assert!(glob_match("open[", "open["));
        assert!(!glob_match("open[", "openx"));
    }

    fn escape(s: &str) -> String {
        let mut out = String::with_capacity(s.len());
        for c in s.chars() {
            if matches!(c, '*' | '?' | '[' | ']' | '\\') {
                out.push('\\');
            }
            out.push(c);
        }
        out
    }

    proptest! {
        #[test]
        fn prop_escaped_key_matches_itself(key in ".{0,24}") {
            prop_assert!(glob_match(&escape(&key), &key));
        }

        #[test]
        fn prop_prefix_star_matches_extensions(prefix in "[a-z:]{0,10}", rest in ".{0,16}") {
            let pattern = format!("{}*", escape(&prefix));
            let key = format!("{}{}", prefix, rest);
            prop_assert!(glob_match(&pattern, &key));
        }

        #[test]
        fn prop_lone_star_matches_everything(key in ".{0,32}") {
            prop_assert!(glob_match("*", &key));
        }
    }
}
