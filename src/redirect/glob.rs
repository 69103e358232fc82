//! Minimal glob matcher compiled to an anchored regex.
//!
//! Supported syntax: `*` (any run without the separator), `**` (anything),
//! `?` (one non-separator char), `[...]` / `[!...]` classes with ranges,
//! `{a,b}` alternatives (nestable) and `\` escapes.

use regex::Regex;

#[derive(Debug, thiserror::Error)]
pub enum GlobError {
    #[error("unterminated character class in pattern: {0}")]
    UnclosedClass(String),

    #[error("unterminated alternatives in pattern: {0}")]
    UnclosedAlternatives(String),

    #[error("dangling escape in pattern: {0}")]
    DanglingEscape(String),

    #[error(transparent)]
    Regex(#[from] regex::Error),
}

#[derive(Clone, Debug)]
pub struct Glob {
    pattern: String,
    regex: Regex,
}

impl Glob {
    /// # Errors
    /// Returns an error for malformed patterns.
    pub fn compile(pattern: &str, separator: char) -> Result<Self, GlobError> {
        let source = translate(pattern, separator)?;
        Ok(Self {
            pattern: pattern.to_string(),
            regex: Regex::new(&source)?,
        })
    }

    #[must_use]
    pub fn is_match(&self, candidate: &str) -> bool {
        self.regex.is_match(candidate)
    }

    #[must_use]
    pub fn pattern(&self) -> &str {
        &self.pattern
    }
}

fn translate(pattern: &str, separator: char) -> Result<String, GlobError> {
    let not_sep = format!("[^{}]", regex::escape(&separator.to_string()));
    let mut out = String::from("^");
    let mut chars = pattern.chars().peekable();
    let mut depth = 0usize;

    while let Some(ch) = chars.next() {
        match ch {
            '*' => {
                if chars.peek() == Some(&'*') {
                    chars.next();
                    out.push_str(".*");
                } else {
                    out.push_str(&not_sep);
                    out.push('*');
                }
            }
            '?' => out.push_str(&not_sep),
            '[' => {
                out.push('[');
                if chars.peek() == Some(&'!') {
                    chars.next();
                    out.push('^');
                }
                let mut closed = false;
                for class_ch in chars.by_ref() {
                    match class_ch {
                        ']' => {
                            closed = true;
                            break;
                        }
                        '-' => out.push('-'),
                        other => out.push_str(&regex::escape(&other.to_string())),
                    }
                }
                if !closed {
                    return Err(GlobError::UnclosedClass(pattern.to_string()));
                }
                out.push(']');
            }
            '{' => {
                depth += 1;
                out.push_str("(?:");
            }
            ',' if depth > 0 => out.push('|'),
            '}' if depth > 0 => {
                depth -= 1;
                out.push(')');
            }
            '\\' => {
                let escaped = chars
                    .next()
                    .ok_or_else(|| GlobError::DanglingEscape(pattern.to_string()))?;
                out.push_str(&regex::escape(&escaped.to_string()));
            }
            other => out.push_str(&regex::escape(&other.to_string())),
        }
    }

    if depth > 0 {
        return Err(GlobError::UnclosedAlternatives(pattern.to_string()));
    }

    out.push('$');
    Ok(out)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn glob(pattern: &str) -> Glob {
        Glob::compile(pattern, '.').unwrap()
    }

    #[test]
    fn literal_patterns_match_exactly() {
        let g = glob("https://a.example/cb");
        assert!(g.is_match("https://a.example/cb"));
        assert!(!g.is_match("https://a.example/cb2"));
        assert!(!g.is_match("https://aXexample/cb"));
        assert_eq!(g.pattern(), "https://a.example/cb");
    }

    #[test]
    fn single_star_stops_at_separator() {
        let g = glob("https://*.example.com");
        assert!(g.is_match("https://app.example.com"));
        assert!(!g.is_match("https://evil.com.example.com"));
        assert!(!g.is_match("https://example.com"));
    }

    #[test]
    fn double_star_crosses_separators() {
        let g = glob("https://**.example.com/**");
        assert!(g.is_match("https://a.b.example.com/x/y"));
        assert!(!g.is_match("https://a.example.org/x"));
    }

    #[test]
    fn question_mark_classes_and_alternatives() {
        assert!(glob("http://localhost:300?").is_match("http://localhost:3001"));
        assert!(!glob("http://localhost:300?").is_match("http://localhost:30011"));

        let g = glob("https://[a-c]pp.example");
        assert!(g.is_match("https://bpp.example"));
        assert!(!g.is_match("https://dpp.example"));

        let g = glob("https://[!a]pp.example");
        assert!(g.is_match("https://xpp.example"));
        assert!(!g.is_match("https://app.example"));

        let g = glob("https://{app,admin}.example/{cb,callback}");
        assert!(g.is_match("https://admin.example/callback"));
        assert!(!g.is_match("https://www.example/cb"));
    }

    #[test]
    fn escapes_are_literal() {
        let g = glob(r"https://a.example/\*");
        assert!(g.is_match("https://a.example/*"));
        assert!(!g.is_match("https://a.example/x"));
    }

    #[test]
    fn malformed_patterns_fail() {
        assert!(matches!(
            Glob::compile("https://[abc", '.'),
            Err(GlobError::UnclosedClass(_))
        ));
        assert!(matches!(
            Glob::compile("https://{a,b", '.'),
            Err(GlobError::UnclosedAlternatives(_))
        ));
        assert!(matches!(
            Glob::compile("trailing\\", '.'),
            Err(GlobError::DanglingEscape(_))
        ));
    }
}
