//! Constrained-XML support for the wire format.
//!
//! The wire is a *stream* of top-level XML fragments, not a single
//! well-formed document, so this module carries its own small scanner and
//! recursive-descent parser instead of a document-oriented XML library.
//! Supported: elements, single- or double-quoted attributes, character data,
//! self-closing tags, the five predefined entities plus numeric character
//! references, and skippable `<?..?>` / `<!--..-->` noise. Not supported:
//! namespaces, DOCTYPE, CDATA.

use std::fmt;

use crate::core::{Error, Result};

/// A parsed XML element: name, attributes, child elements, and character
/// data (with surrounding whitespace trimmed)
#[derive(Debug, Clone, PartialEq, Default)]
pub struct XmlElement {
    pub name: String,
    pub attrs: Vec<(String, String)>,
    pub children: Vec<XmlElement>,
    pub text: String,
}

impl XmlElement {
    /// Creates an empty element with the given tag name
    pub fn new(name: impl Into<String>) -> Self {
        XmlElement {
            name: name.into(),
            ..Default::default()
        }
    }

    /// Adds an attribute
    pub fn with_attr(mut self, name: impl Into<String>, value: impl ToString) -> Self {
        self.attrs.push((name.into(), value.to_string()));
        self
    }

    /// Adds an attribute only when the value is present
    pub fn with_opt_attr(self, name: impl Into<String>, value: Option<impl ToString>) -> Self {
        match value {
            Some(value) => self.with_attr(name, value),
            None => self,
        }
    }

    /// Sets the character data
    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.text = text.into();
        self
    }

    /// Adds a child element
    pub fn with_child(mut self, child: XmlElement) -> Self {
        self.children.push(child);
        self
    }

    /// Looks up an attribute value by name
    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attrs
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_str())
    }

    /// Looks up a required attribute, failing with a parse error
    pub fn require_attr(&self, name: &str) -> Result<&str> {
        self.attr(name)
            .ok_or_else(|| Error::parse(format!("<{}> missing '{}' attribute", self.name, name)))
    }
}

impl fmt::Display for XmlElement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<{}", self.name)?;
        for (name, value) in &self.attrs {
            write!(f, " {}=\"{}\"", name, escape(value))?;
        }
        if self.children.is_empty() && self.text.is_empty() {
            return write!(f, "/>");
        }
        write!(f, ">")?;
        if !self.text.is_empty() {
            write!(f, "{}", escape(&self.text))?;
        }
        for child in &self.children {
            write!(f, "{}", child)?;
        }
        write!(f, "</{}>", self.name)
    }
}

/// Escapes markup-significant characters for element content and attribute
/// values
pub fn escape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            other => out.push(other),
        }
    }
    out
}

fn unescape(s: &str) -> Result<String> {
    if !s.contains('&') {
        return Ok(s.to_string());
    }
    let mut out = String::with_capacity(s.len());
    let mut rest = s;
    while let Some(pos) = rest.find('&') {
        out.push_str(&rest[..pos]);
        rest = &rest[pos..];
        let end = rest
            .find(';')
            .ok_or_else(|| Error::parse("unterminated entity reference"))?;
        let entity = &rest[1..end];
        match entity {
            "amp" => out.push('&'),
            "lt" => out.push('<'),
            "gt" => out.push('>'),
            "quot" => out.push('"'),
            "apos" => out.push('\''),
            _ => {
                let code = entity
                    .strip_prefix("#x")
                    .or_else(|| entity.strip_prefix("#X"))
                    .map(|hex| u32::from_str_radix(hex, 16))
                    .or_else(|| entity.strip_prefix('#').map(|dec| dec.parse()))
                    .ok_or_else(|| Error::parse(format!("unknown entity '&{};'", entity)))?
                    .map_err(|_| Error::parse(format!("bad character reference '&{};'", entity)))?;
                out.push(
                    char::from_u32(code)
                        .ok_or_else(|| Error::parse(format!("invalid character {:#x}", code)))?,
                );
            }
        }
        rest = &rest[end + 1..];
    }
    out.push_str(rest);
    Ok(out)
}

/// Scans a buffer for one complete top-level element.
///
/// Returns the byte length of the prefix covering the element (including any
/// leading whitespace, processing instructions, or comments), `Ok(None)` when
/// more bytes are needed, and an error on stray top-level text or markup the
/// grammar does not allow. Quote-aware inside tags.
pub fn scan_fragment(buf: &[u8]) -> Result<Option<usize>> {
    let mut pos = 0;
    let mut depth: usize = 0;

    loop {
        if depth == 0 {
            // Between top-level fragments only whitespace and noise are legal
            while pos < buf.len() && buf[pos].is_ascii_whitespace() {
                pos += 1;
            }
            if pos == buf.len() {
                return Ok(None);
            }
            if buf[pos] != b'<' {
                return Err(Error::parse("stray text between wire fragments"));
            }
        } else {
            // Character data inside an element
            while pos < buf.len() && buf[pos] != b'<' {
                pos += 1;
            }
            if pos == buf.len() {
                return Ok(None);
            }
        }

        // At a '<'
        match buf.get(pos + 1) {
            None => return Ok(None),
            Some(b'?') => match find(buf, pos + 2, b"?>") {
                Some(end) => pos = end,
                None => return Ok(None),
            },
            Some(b'!') => {
                if buf.len() < pos + 4 {
                    return Ok(None);
                }
                if &buf[pos + 2..pos + 4] != b"--" {
                    return Err(Error::parse("unsupported <! markup"));
                }
                match find(buf, pos + 4, b"-->") {
                    Some(end) => pos = end,
                    None => return Ok(None),
                }
            }
            Some(b'/') => {
                match memchr(buf, pos + 2, b'>') {
                    Some(end) => {
                        pos = end + 1;
                        depth = depth
                            .checked_sub(1)
                            .ok_or_else(|| Error::parse("unbalanced closing tag"))?;
                        if depth == 0 {
                            return Ok(Some(pos));
                        }
                    }
                    None => return Ok(None),
                }
            }
            Some(_) => {
                // Opening tag: find its '>' outside quotes
                let mut i = pos + 1;
                let mut quote: Option<u8> = None;
                let self_closing;
                loop {
                    if i == buf.len() {
                        return Ok(None);
                    }
                    let b = buf[i];
                    match quote {
                        Some(q) => {
                            if b == q {
                                quote = None;
                            }
                        }
                        None => match b {
                            b'"' | b'\'' => quote = Some(b),
                            b'>' => {
                                self_closing = buf[i - 1] == b'/';
                                break;
                            }
                            _ => {}
                        },
                    }
                    i += 1;
                }
                pos = i + 1;
                if !self_closing {
                    depth += 1;
                } else if depth == 0 {
                    return Ok(Some(pos));
                }
            }
        }
    }
}

fn find(buf: &[u8], from: usize, needle: &[u8]) -> Option<usize> {
    if buf.len() < from + needle.len() {
        return None;
    }
    (from..=buf.len() - needle.len())
        .find(|&i| &buf[i..i + needle.len()] == needle)
        .map(|i| i + needle.len())
}

fn memchr(buf: &[u8], from: usize, byte: u8) -> Option<usize> {
    buf[from.min(buf.len())..]
        .iter()
        .position(|&b| b == byte)
        .map(|i| from + i)
}

/// Parses one complete fragment (as framed by [`scan_fragment`]) into an
/// element tree
pub fn parse_element(input: &str) -> Result<XmlElement> {
    let mut parser = Parser {
        input: input.as_bytes(),
        pos: 0,
    };
    parser.skip_noise();
    let element = parser.element()?;
    parser.skip_noise();
    if parser.pos != parser.input.len() {
        return Err(Error::parse("trailing data after fragment"));
    }
    Ok(element)
}

struct Parser<'a> {
    input: &'a [u8],
    pos: usize,
}

impl<'a> Parser<'a> {
    fn peek(&self) -> Option<u8> {
        self.input.get(self.pos).copied()
    }

    fn eof_err(&self) -> Error {
        Error::parse("unexpected end of fragment")
    }

    fn skip_ws(&mut self) {
        while self
            .peek()
            .map(|b| b.is_ascii_whitespace())
            .unwrap_or(false)
        {
            self.pos += 1;
        }
    }

    /// Skips whitespace, processing instructions, and comments
    fn skip_noise(&mut self) {
        loop {
            self.skip_ws();
            if self.input[self.pos..].starts_with(b"<?") {
                match find(self.input, self.pos + 2, b"?>") {
                    Some(end) => self.pos = end,
                    None => return,
                }
            } else if self.input[self.pos..].starts_with(b"<!--") {
                match find(self.input, self.pos + 4, b"-->") {
                    Some(end) => self.pos = end,
                    None => return,
                }
            } else {
                return;
            }
        }
    }

    fn expect(&mut self, byte: u8) -> Result<()> {
        if self.peek() == Some(byte) {
            self.pos += 1;
            Ok(())
        } else {
            Err(Error::parse(format!(
                "expected '{}' at offset {}",
                byte as char, self.pos
            )))
        }
    }

    fn name(&mut self) -> Result<String> {
        let start = self.pos;
        while let Some(b) = self.peek() {
            if b.is_ascii_alphanumeric() || b == b'_' || b == b'-' || b == b'.' {
                self.pos += 1;
            } else {
                break;
            }
        }
        if self.pos == start {
            return Err(Error::parse(format!("expected a name at offset {}", start)));
        }
        String::from_utf8(self.input[start..self.pos].to_vec())
            .map_err(|_| Error::parse("name is not valid UTF-8"))
    }

    fn element(&mut self) -> Result<XmlElement> {
        self.expect(b'<')?;
        let name = self.name()?;
        let mut element = XmlElement::new(name);

        // Attributes
        loop {
            self.skip_ws();
            match self.peek().ok_or_else(|| self.eof_err())? {
                b'>' => {
                    self.pos += 1;
                    break;
                }
                b'/' => {
                    self.pos += 1;
                    self.expect(b'>')?;
                    return Ok(element);
                }
                _ => {
                    let attr_name = self.name()?;
                    self.skip_ws();
                    self.expect(b'=')?;
                    self.skip_ws();
                    let quote = self.peek().ok_or_else(|| self.eof_err())?;
                    if quote != b'"' && quote != b'\'' {
                        return Err(Error::parse("attribute value must be quoted"));
                    }
                    self.pos += 1;
                    let start = self.pos;
                    while self.peek().ok_or_else(|| self.eof_err())? != quote {
                        self.pos += 1;
                    }
                    let raw = std::str::from_utf8(&self.input[start..self.pos])
                        .map_err(|_| Error::parse("attribute value is not valid UTF-8"))?;
                    element.attrs.push((attr_name, unescape(raw)?));
                    self.pos += 1;
                }
            }
        }

        // Content: child elements and character data until the closing tag
        let mut text = String::new();
        loop {
            match self.peek().ok_or_else(|| self.eof_err())? {
                b'<' => {
                    if self.input[self.pos..].starts_with(b"</") {
                        self.pos += 2;
                        let close = self.name()?;
                        if close != element.name {
                            return Err(Error::parse(format!(
                                "mismatched closing tag </{}> for <{}>",
                                close, element.name
                            )));
                        }
                        self.skip_ws();
                        self.expect(b'>')?;
                        element.text = unescape(text.trim())?;
                        return Ok(element);
                    } else if self.input[self.pos..].starts_with(b"<!--") {
                        match find(self.input, self.pos + 4, b"-->") {
                            Some(end) => self.pos = end,
                            None => return Err(self.eof_err()),
                        }
                    } else {
                        element.children.push(self.element()?);
                    }
                }
                _ => {
                    let start = self.pos;
                    while self.peek().map(|b| b != b'<').unwrap_or(false) {
                        self.pos += 1;
                    }
                    text.push_str(
                        std::str::from_utf8(&self.input[start..self.pos])
                            .map_err(|_| Error::parse("character data is not valid UTF-8"))?,
                    );
                }
            }
        }
    }
}
