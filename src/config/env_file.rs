//! Env-file syntax for the secrets object.
//!
//! Values are taken as written apart from quoting, backslash escapes and
//! `${NAME}` / `${NAME:-default}` references; any other `$` is literal. A
//! statement that does not parse is skipped with a warning instead of
//! failing the whole file, and a key with no `=` is declared without a
//! value.

use std::collections::HashMap;

/// One `KEY[=VALUE]` statement after expansion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Binding {
    pub key: String,
    pub value: Option<String>,
}

/// Parse `body` and expand `${NAME}` references.
///
/// A reference resolves to an earlier key in the same body, then to
/// `lookup`, then to its default, then to the empty string.
pub(crate) fn parse(body: &str, lookup: impl Fn(&str) -> Option<String>) -> Vec<Binding> {
    let mut resolved: HashMap<String, Option<String>> = HashMap::new();
    let mut bindings = Vec::new();

    for raw in parse_raw(body) {
        let value = raw
            .value
            .map(|value| expand(&value, &resolved, &lookup));
        resolved.insert(raw.key.clone(), value.clone());
        bindings.push(Binding {
            key: raw.key,
            value,
        });
    }
    bindings
}

fn parse_raw(body: &str) -> Vec<Binding> {
    let mut reader = Reader::new(body);
    let mut bindings = Vec::new();

    loop {
        reader.skip_while(char::is_whitespace);
        if reader.at_end() {
            break;
        }
        let line = reader.line;
        match reader.statement() {
            Ok(Some(binding)) => bindings.push(binding),
            Ok(None) => {}
            Err(()) => {
                tracing::warn!(line, "skipping env file statement that does not parse");
                reader.skip_rest_of_line();
            }
        }
    }
    bindings
}

struct Reader<'a> {
    src: &'a str,
    pos: usize,
    line: usize,
}

impl<'a> Reader<'a> {
    fn new(src: &'a str) -> Self {
        Self { src, pos: 0, line: 1 }
    }

    fn rest(&self) -> &'a str {
        &self.src[self.pos..]
    }

    fn at_end(&self) -> bool {
        self.pos >= self.src.len()
    }

    fn peek(&self) -> Option<char> {
        self.rest().chars().next()
    }

    fn advance(&mut self, len: usize) -> &'a str {
        let taken = &self.src[self.pos..self.pos + len];
        self.line += taken.matches('\n').count();
        self.pos += len;
        taken
    }

    fn skip_while(&mut self, keep: impl Fn(char) -> bool) -> &'a str {
        let len = self
            .rest()
            .find(|c: char| !keep(c))
            .unwrap_or(self.rest().len());
        self.advance(len)
    }

    fn skip_inline_whitespace(&mut self) {
        self.skip_while(is_inline_whitespace);
    }

    fn skip_rest_of_line(&mut self) {
        self.skip_while(|c| c != '\r' && c != '\n');
        if self.rest().starts_with('\r') || self.rest().starts_with('\n') {
            self.advance(1);
        }
    }

    /// `[export ]KEY [= VALUE] [# comment]` up to the end of the line.
    /// `Ok(None)` is a comment-only line.
    fn statement(&mut self) -> Result<Option<Binding>, ()> {
        let exported = self
            .rest()
            .strip_prefix("export")
            .is_some_and(|after| after.starts_with(is_inline_whitespace));
        if exported {
            self.advance("export".len());
            self.skip_inline_whitespace();
        }

        let key = self.key()?;
        self.skip_inline_whitespace();
        let value = if self.peek() == Some('=') {
            self.advance(1);
            self.skip_inline_whitespace();
            Some(self.value()?)
        } else {
            None
        };

        self.skip_inline_whitespace();
        if self.peek() == Some('#') {
            self.skip_while(|c| c != '\r' && c != '\n');
        }
        self.end_of_line()?;

        Ok(key.map(|key| Binding { key, value }))
    }

    fn key(&mut self) -> Result<Option<String>, ()> {
        match self.peek() {
            Some('#') => Ok(None),
            Some('\'') => {
                let inner = &self.rest()[1..];
                match inner.find('\'') {
                    Some(end) if end > 0 => {
                        let key = inner[..end].to_string();
                        self.advance(end + 2);
                        Ok(Some(key))
                    }
                    _ => Err(()),
                }
            }
            _ => {
                let key = self.skip_while(|c| c != '=' && c != '#' && !c.is_whitespace());
                if key.is_empty() {
                    Err(())
                } else {
                    Ok(Some(key.to_string()))
                }
            }
        }
    }

    fn value(&mut self) -> Result<String, ()> {
        match self.peek() {
            Some(quote @ ('\'' | '"')) => {
                let len = quoted_len(&self.rest()[1..], quote).ok_or(())?;
                let inner = &self.advance(len + 2)[1..=len];
                Ok(unescape(inner, quote))
            }
            _ => {
                let raw = self.skip_while(|c| c != '\r' && c != '\n');
                Ok(strip_inline_comment(raw).trim_end().to_string())
            }
        }
    }

    fn end_of_line(&mut self) -> Result<(), ()> {
        self.skip_inline_whitespace();
        let rest = self.rest();
        if rest.is_empty() {
            Ok(())
        } else if rest.starts_with("\r\n") {
            self.advance(2);
            Ok(())
        } else if rest.starts_with('\r') || rest.starts_with('\n') {
            self.advance(1);
            Ok(())
        } else {
            Err(())
        }
    }
}

fn is_inline_whitespace(c: char) -> bool {
    c.is_whitespace() && c != '\r' && c != '\n'
}

/// Byte length of a quoted value's contents, given the text after the
/// opening quote. An escaped quote does not close the value unless no
/// later quote does.
fn quoted_len(text: &str, quote: char) -> Option<usize> {
    let mut last_escaped_quote = None;
    let mut chars = text.char_indices().peekable();
    while let Some((i, c)) = chars.next() {
        if c == quote {
            return Some(i);
        }
        if c == '\\' && chars.peek().map(|&(_, next)| next) == Some(quote) {
            chars.next();
            last_escaped_quote = Some(i + 1);
        }
    }
    last_escaped_quote
}

/// Decode backslash escapes. Single quotes only know `\\` and `\'`.
fn unescape(inner: &str, quote: char) -> String {
    let mut out = String::with_capacity(inner.len());
    let mut chars = inner.chars().peekable();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        let decoded = match (quote, chars.peek().copied()) {
            (_, Some('\\')) => Some('\\'),
            (_, Some('\'')) => Some('\''),
            ('"', Some('"')) => Some('"'),
            ('"', Some('a')) => Some('\x07'),
            ('"', Some('b')) => Some('\x08'),
            ('"', Some('f')) => Some('\x0c'),
            ('"', Some('n')) => Some('\n'),
            ('"', Some('r')) => Some('\r'),
            ('"', Some('t')) => Some('\t'),
            ('"', Some('v')) => Some('\x0b'),
            _ => None,
        };
        match decoded {
            Some(d) => {
                chars.next();
                out.push(d);
            }
            None => out.push('\\'),
        }
    }
    out
}

/// Drop a trailing ` # comment`. A `#` with no whitespace before it is
/// part of the value.
fn strip_inline_comment(raw: &str) -> &str {
    let mut prev_is_space = false;
    for (i, c) in raw.char_indices() {
        if c == '#' && prev_is_space {
            return &raw[..i];
        }
        prev_is_space = c.is_whitespace();
    }
    raw
}

fn expand(
    value: &str,
    resolved: &HashMap<String, Option<String>>,
    lookup: &impl Fn(&str) -> Option<String>,
) -> String {
    let mut out = String::with_capacity(value.len());
    let mut rest = value;

    while let Some(start) = rest.find("${") {
        let after = &rest[start + 2..];
        let Some(end) = after.find('}') else {
            break;
        };
        let inner = &after[..end];
        let reference = match inner.find(':') {
            None => Some((inner, None)),
            Some(i) => inner[i..].strip_prefix(":-").map(|d| (&inner[..i], Some(d))),
        };
        let Some((name, default)) = reference else {
            out.push_str(&rest[..start + 2]);
            rest = after;
            continue;
        };

        out.push_str(&rest[..start]);
        let substituted = match resolved.get(name) {
            Some(value) => value.clone().unwrap_or_default(),
            None => lookup(name)
                .or_else(|| default.map(str::to_string))
                .unwrap_or_default(),
        };
        out.push_str(&substituted);
        rest = &after[end + 1..];
    }

    out.push_str(rest);
    out
}
