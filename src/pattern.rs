//! Key patterns
//!
//! Both tiers speak the same glob dialect as the remote `SCAN MATCH`:
//! `*` matches any run of characters, `?` exactly one, `[abc]` / `[^a-z]`
//! a character class, and `\` escapes the next character. The fallback tier
//! compiles the glob to an anchored regex so invalidation selects the same
//! keys whichever tier is active.

use regex::Regex;

use crate::CacheError;

/// A compiled glob pattern over cache keys.
#[derive(Debug, Clone)]
pub struct KeyPattern {
    glob: String,
    regex: Regex,
}

impl KeyPattern {
    /// Compile a glob.
    pub fn new(glob: &str) -> Result<Self, CacheError> {
        let regex = Regex::new(&glob_to_regex(glob))?;
        Ok(Self {
            glob: glob.to_owned(),
            regex,
        })
    }

    /// The glob as given, suitable for the remote tier.
    pub fn as_glob(&self) -> &str {
        &self.glob
    }

    pub fn matches(&self, key: &str) -> bool {
        self.regex.is_match(key)
    }
}

fn glob_to_regex(glob: &str) -> String {
    // Remote globs match any byte, newlines included.
    let mut out = String::with_capacity(glob.len() * 2 + 6);
    out.push_str("(?s)^");

    let mut chars = glob.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '*' => out.push_str(".*"),
            '?' => out.push('.'),
            '\\' => match chars.next() {
                Some(escaped) => out.push_str(&regex::escape(&escaped.to_string())),
                None => out.push_str(r"\\"),
            },
            '[' => {
                // Collect the class body; an unterminated class is a literal '['.
                let mut body = String::new();
                let mut closed = false;
                let mut lookahead = chars.clone();
                while let Some(ch) = lookahead.next() {
                    if ch == ']' && !body.is_empty() {
                        closed = true;
                        break;
                    }
                    if ch == '\\' {
                        if let Some(next) = lookahead.next() {
                            body.push('\\');
                            body.push(next);
                        }
                        continue;
                    }
                    body.push(ch);
                }

                if closed {
                    chars = lookahead;
                    out.push('[');
                    let mut body_chars = body.chars().peekable();
                    if body_chars.peek() == Some(&'^') {
                        out.push('^');
                        body_chars.next();
                    }
                    for ch in body_chars {
                        match ch {
                            '[' | '&' | '~' | '|' => {
                                out.push('\\');
                                out.push(ch);
                            }
                            _ => out.push(ch),
                        }
                    }
                    out.push(']');
                } else {
                    out.push_str(r"\[");
                }
            }
            other => out.push_str(&regex::escape(&other.to_string())),
        }
    }

    out.push('$');
    out
}
