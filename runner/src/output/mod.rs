//! Line-oriented classification of subprocess output
//!
//! [`LineClassifier`] is a `tokio_util` decoder: it buffers raw bytes, yields
//! one [`Line`] per complete line and flushes a trailing partial line at end
//! of stream. Each line keeps its terminator, so concatenating the decoded
//! lines reproduces the stream. Invalid UTF-8 is replaced rather than rejected.

use std::cmp;

use bytes::BytesMut;
use tokio_util::codec::Decoder;

/// Default cap on buffered bytes before a partial line is flushed
pub const DEFAULT_MAX_LINE_LENGTH: usize = 1024 * 1024;

/// How a decoded line ended in the stream
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineEnding {
    Lf,
    CrLf,
    /// End of stream, or a partial line flushed at the length cap
    None,
}

impl LineEnding {
    pub fn as_str(&self) -> &'static str {
        match self {
            LineEnding::Lf => "\n",
            LineEnding::CrLf => "\r\n",
            LineEnding::None => "",
        }
    }
}

/// One decoded line of output
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Line {
    text: String,
    ending: LineEnding,
    fatal: bool,
}

impl Line {
    pub fn normal(text: impl Into<String>, ending: LineEnding) -> Self {
        Self {
            text: text.into(),
            ending,
            fatal: false,
        }
    }

    /// A line containing the fatal marker
    pub fn fatal(text: impl Into<String>, ending: LineEnding) -> Self {
        Self {
            text: text.into(),
            ending,
            fatal: true,
        }
    }

    pub fn is_fatal(&self) -> bool {
        self.fatal
    }

    /// Line body as read from the stream, without its terminator
    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn ending(&self) -> LineEnding {
        self.ending
    }

    pub fn into_text(self) -> String {
        self.text
    }

    /// Text as emitted, terminator included: fatal bodies carry the error prefix
    pub fn render(&self, error_prefix: &str) -> String {
        let prefix = if self.fatal { error_prefix } else { "" };
        format!("{}{}{}", prefix, self.text, self.ending.as_str())
    }
}

/// Splits a byte stream into lines and checks each for the fatal marker
#[derive(Debug, Clone)]
pub struct LineClassifier {
    marker: String,
    max_length: usize,
    next_index: usize,
}

impl LineClassifier {
    pub fn new(marker: impl Into<String>) -> Self {
        Self::new_with_max_length(marker, DEFAULT_MAX_LINE_LENGTH)
    }

    /// Lines longer than `max_length` bytes are emitted in pieces, each
    /// without a terminator except the last
    pub fn new_with_max_length(marker: impl Into<String>, max_length: usize) -> Self {
        Self {
            marker: marker.into(),
            max_length: cmp::max(max_length, 1),
            next_index: 0,
        }
    }

    pub fn max_length(&self) -> usize {
        self.max_length
    }

    fn take_line(&mut self, buf: &mut BytesMut, len: usize) -> Line {
        self.next_index = 0;
        let raw = buf.split_to(len);

        let (body, ending) = if let Some(body) = raw.strip_suffix(b"\r\n") {
            (body, LineEnding::CrLf)
        } else if let Some(body) = raw.strip_suffix(b"\n") {
            (body, LineEnding::Lf)
        } else {
            (&raw[..], LineEnding::None)
        };

        let text = String::from_utf8_lossy(body).into_owned();
        if text.contains(&self.marker) {
            Line::fatal(text, ending)
        } else {
            Line::normal(text, ending)
        }
    }
}

/// Move a cut point back off a UTF-8 continuation byte
fn char_boundary(bytes: &[u8], at: usize) -> usize {
    let mut cut = at;
    while cut > 0 && at - cut < 3 && bytes[cut] & 0xC0 == 0x80 {
        cut -= 1;
    }
    if cut == 0 {
        at
    } else {
        cut
    }
}

impl Decoder for LineClassifier {
    type Item = Line;
    type Error = std::io::Error;

    fn decode(&mut self, buf: &mut BytesMut) -> Result<Option<Line>, Self::Error> {
        // Resume the newline scan where the previous call stopped
        let read_to = cmp::min(self.max_length.saturating_add(1), buf.len());
        let newline = buf[self.next_index..read_to].iter().position(|b| *b == b'\n');

        match newline {
            Some(offset) => {
                let end = self.next_index + offset + 1;
                Ok(Some(self.take_line(buf, end)))
            }
            None if buf.len() > self.max_length => {
                let cut = char_boundary(&buf[..], self.max_length);
                Ok(Some(self.take_line(buf, cut)))
            }
            None => {
                self.next_index = read_to;
                Ok(None)
            }
        }
    }

    fn decode_eof(&mut self, buf: &mut BytesMut) -> Result<Option<Line>, Self::Error> {
        if let Some(line) = self.decode(buf)? {
            return Ok(Some(line));
        }

        if buf.is_empty() {
            return Ok(None);
        }

        let len = buf.len();
        Ok(Some(self.take_line(buf, len)))
    }
}
