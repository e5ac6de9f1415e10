//! Compiled glob matcher with directory-prefix semantics.
//!
//! Grounded on a `wildcard_match`-style helper, but
//! promoted from one-off string matching to a compiled `Regex` per
//! pattern, since here the same pattern set is applied to every file in
//! a mirror plan rather than once per CLI invocation.

use regex::Regex;

/// One compiled ignore pattern.
struct Pattern {
    regex: Regex,
    /// True if the source pattern had a trailing `/` (directory pattern):
    /// matches the directory itself and everything underneath it.
    is_directory: bool,
    source: String,
}

/// A compiled set of ignore patterns, in source order. First match wins,
/// but since matching is boolean here order only affects nothing
/// observable — kept for parity with how drivers log the matching rule.
pub struct IgnoreMatcher {
    patterns: Vec<Pattern>,
}

impl IgnoreMatcher {
    pub fn compile(patterns: &[String]) -> Self {
        let compiled = patterns.iter().filter_map(|p| Pattern::compile(p)).collect();
        Self { patterns: compiled }
    }

    /// Normalizes `path` (backslash -> slash, strip leading slash) and
    /// tests every pattern; true on first hit.
    pub fn matches(&self, path: &str) -> bool {
        let normalized = normalize(path);
        self.patterns.iter().any(|p| p.matches(&normalized))
    }

    /// Returns only the items not matched by any pattern, preserving order.
    pub fn filter<'a, T>(&self, items: &'a [T], path_of: impl Fn(&T) -> &str) -> Vec<&'a T> {
        items.iter().filter(|item| !self.matches(path_of(item))).collect()
    }
}

fn normalize(path: &str) -> String {
    let replaced = path.replace('\\', "/");
    replaced.strip_prefix('/').map(str::to_string).unwrap_or(replaced)
}

impl Pattern {
    fn compile(source: &str) -> Option<Self> {
        if source.is_empty() {
            return None;
        }
        let is_directory = source.ends_with('/');
        let body = source.strip_suffix('/').unwrap_or(source);
        let regex_source = glob_to_regex(body);
        let regex = Regex::new(&regex_source).ok()?;
        Some(Self { regex, is_directory, source: source.to_string() })
    }

    fn matches(&self, normalized_path: &str) -> bool {
        if self.is_directory {
            // Matches the directory itself and everything underneath.
            return self.regex.is_match(normalized_path)
                || normalized_path
                    .split('/')
                    .scan(String::new(), |acc, seg| {
                        if !acc.is_empty() {
                            acc.push('/');
                        }
                        acc.push_str(seg);
                        Some(acc.clone())
                    })
                    .any(|prefix| self.regex.is_match(&prefix));
        }

        if glob_has_wildcard(&self.source) || glob_has_wildcard(self.source.trim_end_matches('/'))
        {
            return self.regex.is_match(normalized_path);
        }

        // Plain string: match the full basename OR any full path segment.
        let basename = normalized_path.rsplit('/').next().unwrap_or(normalized_path);
        if self.regex.is_match(basename) {
            return true;
        }
        normalized_path.split('/').any(|seg| self.regex.is_match(seg))
    }
}

fn glob_has_wildcard(s: &str) -> bool {
    s.contains('*') || s.contains('?')
}

/// Translates a glob pattern (with `**`/`*`/`?`) into an anchored regex
/// that matches a full string (for plain segments) or a full path (for
/// patterns containing `/`).
fn glob_to_regex(glob: &str) -> String {
    let mut out = String::from("^");
    let mut chars = glob.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '*' => {
                if chars.peek() == Some(&'*') {
                    chars.next();
                    // `**` matches any depth, including zero segments.
                    if chars.peek() == Some(&'/') {
                        chars.next();
                        out.push_str("(?:.*/)?");
                    } else {
                        out.push_str(".*");
                    }
                } else {
                    out.push_str("[^/]*");
                }
            }
            '?' => out.push_str("[^/]"),
            '.' | '+' | '(' | ')' | '|' | '^' | '$' | '{' | '}' | '[' | ']' | '\\' => {
                out.push('\\');
                out.push(c);
            }
            other => out.push(other),
        }
    }
    out.push('$');
    out
}
