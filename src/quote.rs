//! Shell quoting for user-supplied configuration values.
//!
//! Every value that ends up inside a composed command string goes through one
//! of these two functions. `quote_str` turns an arbitrary string into a single
//! POSIX shell token. `quote_dir` does the same for path arguments, except
//! that a leading `~` is rewritten to `"$HOME..."` so the *remote* shell
//! expands it at execution time instead of the local process.

/// Characters that survive unquoted as a single shell token.
fn is_safe(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '@' | '%' | '_' | '-' | '+' | '=' | ':' | ',' | '.' | '/')
}

/// Single-quote escaping. Safe strings are returned bare; everything else is
/// wrapped in single quotes with embedded `'` escaped as `'\''`.
fn single_quote(s: &str) -> String {
    if s.chars().all(is_safe) {
        return s.to_string();
    }
    format!("'{}'", s.replace('\'', "'\\''"))
}

/// Strip and quote-escape a string into a single shell token.
///
/// Empty (or all-whitespace) input yields an empty string. For everything
/// else the result re-parses under POSIX tokenization rules to exactly the
/// trimmed input, no matter which metacharacters it contains.
pub fn quote_str(s: &str) -> String {
    let s = s.trim();
    if s.is_empty() {
        return String::new();
    }
    let quoted = single_quote(s);
    debug_assert_eq!(
        reparse_token(&quoted).as_deref(),
        Some(s),
        "quoted token does not round-trip",
    );
    quoted
}

/// Quote a directory path.
///
/// A path starting with `~` is rewritten to expand `$HOME` on the remote
/// shell (double quotes keep the expansion alive while still protecting
/// whitespace). Paths containing quote characters fall back to strict
/// single-quote escaping, which disables all expansion.
pub fn quote_dir(s: &str) -> String {
    let s = s.trim();
    if s.is_empty() {
        return String::new();
    }
    if !s.contains('\'') && !s.contains('"') {
        if let Some(rest) = s.strip_prefix("~/") {
            return format!("\"$HOME/{}\"", rest);
        }
        if s == "~" {
            return "\"$HOME\"".to_string();
        }
    }
    single_quote(s)
}

/// Re-parses `s` as exactly one shell token, returning the token's value.
/// Returns `None` on unterminated quotes or if tokenization would split.
/// Only used to assert the quoting invariant.
fn reparse_token(s: &str) -> Option<String> {
    let mut out = String::with_capacity(s.len());
    let mut chars = s.chars();
    while let Some(c) = chars.next() {
        match c {
            '\'' => loop {
                match chars.next() {
                    Some('\'') => break,
                    Some(c) => out.push(c),
                    None => return None,
                }
            },
            '"' => loop {
                match chars.next() {
                    Some('"') => break,
                    Some('\\') => out.push(chars.next()?),
                    Some(c) => out.push(c),
                    None => return None,
                }
            },
            '\\' => out.push(chars.next()?),
            c if c.is_whitespace() => return None,
            c if is_safe(c) => out.push(c),
            // An unquoted metacharacter means we failed to neutralize it.
            _ => return None,
        }
    }
    Some(out)
}
