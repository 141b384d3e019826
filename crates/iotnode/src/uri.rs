use alloc::borrow::Cow;
use alloc::collections::BTreeMap;
use alloc::string::String;

use log::debug;

use crate::error::{Error, ErrorKind, Result};

/// Reference size, in bytes, of the buffer a request is rendered into.
pub const DEFAULT_REQUEST_BUFFER_SIZE: usize = 2048;

const HEX_DIGITS: &[u8; 16] = b"0123456789ABCDEF";

/// How query keys and values are written into a request.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum QueryEncoding {
    /// Keys and values are written as they are.
    ///
    /// Characters such as `&`, `=` or whitespaces are **not** escaped, so
    /// they are interpreted by the collector as part of the query grammar.
    #[default]
    Raw,
    /// Keys and values are percent-encoded.
    ///
    /// Unreserved characters (`A-Z`, `a-z`, `0-9`, `-`, `.`, `_`, `~`) are
    /// written as they are, all other bytes as `%XX`.
    Percent,
}

/// A request `URI`.
///
/// A request is composed of an authority, a path, and a sequence of
/// query parameters.
///
/// Query parameters are unique by key, the last inserted value wins, and
/// they are rendered in key order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Uri {
    authority: String,
    path: String,
    params: BTreeMap<String, String>,
    encoding: QueryEncoding,
}

impl Uri {
    /// Creates a [`Uri`] from an authority and a path.
    ///
    /// The authority may contain the scheme, i.e. `http://10.0.0.2:9050`.
    #[must_use]
    pub fn new(authority: &str, path: &str) -> Self {
        Self {
            authority: authority.into(),
            path: path.into(),
            params: BTreeMap::new(),
            encoding: QueryEncoding::Raw,
        }
    }

    /// Sets the [`QueryEncoding`] of the query parameters.
    #[must_use]
    pub fn encoding(mut self, encoding: QueryEncoding) -> Self {
        self.encoding = encoding;
        self
    }

    /// Returns the authority.
    #[must_use]
    pub fn authority(&self) -> &str {
        &self.authority
    }

    /// Returns the path.
    #[must_use]
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Returns the value associated with a query key.
    #[must_use]
    pub fn param(&self, key: &str) -> Option<&str> {
        self.params.get(key).map(String::as_str)
    }

    /// Returns the number of query parameters.
    #[must_use]
    pub fn params_count(&self) -> usize {
        self.params.len()
    }

    /// Adds a `key=value` pair to the query.
    ///
    /// Both key and value are copied. A pair with an empty key or an empty
    /// value is dropped.
    pub fn add_param(&mut self, key: &str, value: &str) {
        if key.is_empty() || value.is_empty() {
            debug!("Dropping the query pair `{key}={value}` because it is incomplete.");
            return;
        }
        // The previous value, if any, is discarded.
        let _ = self.params.insert(key.into(), value.into());
    }

    /// Adds a `key=value` pair to the query, consuming and returning
    /// the [`Uri`].
    #[must_use]
    pub fn param_pair(mut self, key: &str, value: &str) -> Self {
        self.add_param(key, value);
        self
    }

    /// Returns the length, in bytes, of the complete rendered request.
    #[must_use]
    pub fn rendered_len(&self) -> usize {
        let mut counter = Counter(0);
        // Counting never fails.
        let _ = self.render(&mut counter);
        counter.0
    }

    /// Writes the rendered request into a caller-supplied buffer and returns
    /// the number of written bytes.
    ///
    /// No byte is ever written past the end of the buffer. When the request
    /// does not fit, its tail is truncated at a character boundary.
    pub fn write_into(&self, buf: &mut [u8]) -> usize {
        let mut writer = BufWriter::new(buf);
        // A truncated render is the expected outcome here.
        let _ = self.render(&mut writer);
        writer.written
    }

    /// Writes the rendered request into a caller-supplied buffer and returns
    /// the number of written bytes.
    ///
    /// # Errors
    ///
    /// An [`ErrorKind::Overflow`] error is returned when the complete
    /// request does not fit into the buffer.
    pub fn try_write_into(&self, buf: &mut [u8]) -> Result<usize> {
        let needed = self.rendered_len();
        if needed > buf.len() {
            return Err(Error::new(
                ErrorKind::Overflow,
                alloc::format!(
                    "The request needs {needed} bytes, but the buffer holds {} bytes.",
                    buf.len()
                ),
            ));
        }
        Ok(self.write_into(buf))
    }

    fn render<W: core::fmt::Write>(&self, w: &mut W) -> core::fmt::Result {
        w.write_str(&self.authority)?;
        w.write_str(&self.path)?;
        w.write_char('?')?;

        for (index, (key, value)) in self.params.iter().enumerate() {
            if index > 0 {
                w.write_char('&')?;
            }
            self.write_component(w, key)?;
            w.write_char('=')?;
            self.write_component(w, value)?;
        }

        Ok(())
    }

    fn write_component<W: core::fmt::Write>(&self, w: &mut W, component: &str) -> core::fmt::Result {
        match self.encoding {
            QueryEncoding::Raw => w.write_str(component),
            QueryEncoding::Percent => {
                for byte in component.bytes() {
                    if is_unreserved(byte) {
                        w.write_char(char::from(byte))?;
                    } else {
                        // A single write, so a bounded render never keeps
                        // half an escape.
                        let escape = [
                            b'%',
                            HEX_DIGITS[usize::from(byte >> 4)],
                            HEX_DIGITS[usize::from(byte & 0x0F)],
                        ];
                        let escape =
                            core::str::from_utf8(&escape).map_err(|_| core::fmt::Error)?;
                        w.write_str(escape)?;
                    }
                }
                Ok(())
            }
        }
    }
}

impl core::fmt::Display for Uri {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        self.render(f)
    }
}

/// Returns the request target of a `URL`, i.e. its path and query.
///
/// The scheme and the authority are stripped. A target made only of a
/// query is prefixed with `/`, and a `URL` without path nor query targets
/// `/`.
#[must_use]
pub fn request_target(url: &str) -> Cow<'_, str> {
    let without_scheme = url.split_once("://").map_or(url, |(_, rest)| rest);
    match without_scheme.find(['/', '?']) {
        Some(start) if without_scheme[start..].starts_with('?') => {
            Cow::Owned(alloc::format!("/{}", &without_scheme[start..]))
        }
        Some(start) => Cow::Borrowed(&without_scheme[start..]),
        None => Cow::Borrowed("/"),
    }
}

#[inline]
const fn is_unreserved(byte: u8) -> bool {
    matches!(byte, b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'.' | b'_' | b'~')
}

struct Counter(usize);

impl core::fmt::Write for Counter {
    fn write_str(&mut self, s: &str) -> core::fmt::Result {
        self.0 += s.len();
        Ok(())
    }
}

// Writes into a fixed buffer, stopping at the first string which does not
// fit completely.
struct BufWriter<'a> {
    buf: &'a mut [u8],
    written: usize,
}

impl<'a> BufWriter<'a> {
    fn new(buf: &'a mut [u8]) -> Self {
        Self { buf, written: 0 }
    }
}

impl core::fmt::Write for BufWriter<'_> {
    fn write_str(&mut self, s: &str) -> core::fmt::Result {
        let remaining = self.buf.len() - self.written;
        if s.len() <= remaining {
            self.buf[self.written..self.written + s.len()].copy_from_slice(s.as_bytes());
            self.written += s.len();
            return Ok(());
        }

        // Keep as much as possible without splitting a character.
        let mut end = remaining;
        while !s.is_char_boundary(end) {
            end -= 1;
        }
        self.buf[self.written..self.written + end].copy_from_slice(&s.as_bytes()[..end]);
        self.written += end;

        Err(core::fmt::Error)
    }
}
