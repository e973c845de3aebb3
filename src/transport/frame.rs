//! Frame encoding and decoding for the RCP wire protocol.
//!
//! Every message is a header element declaring the byte length of the body
//! element that immediately follows it:
//!
//! ```text
//! <xmlh><xml size="34"/></xmlh><lc id="BR103" V="50" dir="true"/>
//! ```
//!
//! Decoding works one tag at a time on a [`ReceiveBuffer`], so a roster much
//! larger than the buffer can still be streamed through it. Only the tag
//! shapes used by the protocol are understood: start, end and empty-element
//! tags with quoted attributes. Text content, comments and processing
//! instructions are skipped.

use std::fmt::Write as _;

use thiserror::Error;

use super::buffer::{ReceiveBuffer, Truncation};
use crate::core::constants::{
    FUNCTION_TAG, HEADER_SIZE_ATTR, HEADER_TAG, HEADER_WRAPPER_TAG, LOCO_LIST_TAG, LOCO_TAG,
    MAX_SPEED, MODEL_TAG, SYSTEM_TAG,
};

/// Frame codec errors.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FrameError {
    /// Tag could not be parsed.
    #[error("malformed tag: {0}")]
    MalformedTag(String),

    /// Tag bytes are not valid UTF-8.
    #[error("tag is not valid utf-8")]
    InvalidUtf8,

    /// Element is not a command element.
    #[error("unexpected element <{0}>")]
    UnexpectedElement(String),

    /// Required attribute is missing.
    #[error("missing attribute `{0}`")]
    MissingAttribute(&'static str),

    /// Attribute value could not be interpreted.
    #[error("invalid value {value:?} for attribute `{attr}`")]
    InvalidValue {
        /// Attribute name.
        attr: String,
        /// Offending value.
        value: String,
    },
}

// =============================================================================
// COMMANDS
// =============================================================================

/// Outbound command.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Command {
    /// Set speed and direction of a locomotive.
    Speed {
        /// Locomotive id.
        loco_id: String,
        /// Speed, 0..=100.
        value: u8,
        /// Direction of travel, `dir="true"` on the wire.
        forward: bool,
    },
    /// Switch a locomotive function.
    Function {
        /// Locomotive id.
        loco_id: String,
        /// Function number (`fn0`, `fn1`, ...).
        index: u8,
        /// Function state.
        enabled: bool,
    },
    /// Ask the server for its locomotive list.
    RosterQuery,
    /// Lightweight exchange used to detect a vanished peer.
    Heartbeat,
}

/// What a command addresses, for repeat suppression.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommandKind {
    /// Speed/direction.
    Speed,
    /// A specific function number.
    Function(u8),
}

impl Command {
    /// Build a speed command, clamping the value to 0..=100.
    pub fn speed(loco_id: impl Into<String>, value: u8, forward: bool) -> Self {
        Command::Speed {
            loco_id: loco_id.into(),
            value: value.min(MAX_SPEED),
            forward,
        }
    }

    /// Build a function command.
    pub fn function(loco_id: impl Into<String>, index: u8, enabled: bool) -> Self {
        Command::Function {
            loco_id: loco_id.into(),
            index,
            enabled,
        }
    }

    /// Locomotive addressed by this command, if any.
    pub fn loco_id(&self) -> Option<&str> {
        match self {
            Command::Speed { loco_id, .. } | Command::Function { loco_id, .. } => Some(loco_id),
            Command::RosterQuery | Command::Heartbeat => None,
        }
    }

    /// Kind of locomotive command, `None` for system commands.
    pub fn kind(&self) -> Option<CommandKind> {
        match self {
            Command::Speed { .. } => Some(CommandKind::Speed),
            Command::Function { index, .. } => Some(CommandKind::Function(*index)),
            Command::RosterQuery | Command::Heartbeat => None,
        }
    }

    /// Value of the `name` attribute in the header, if the command needs one.
    fn header_name(&self) -> Option<&'static str> {
        match self {
            Command::RosterQuery => Some(MODEL_TAG),
            Command::Heartbeat => Some(SYSTEM_TAG),
            Command::Speed { .. } | Command::Function { .. } => None,
        }
    }

    /// Render the body element.
    pub fn encode_body(&self) -> String {
        let mut body = String::with_capacity(48);
        match self {
            Command::Speed {
                loco_id,
                value,
                forward,
            } => {
                body.push_str("<lc id=\"");
                escape_into(&mut body, loco_id);
                let _ = write!(body, "\" V=\"{value}\" dir=\"{forward}\"/>");
            }
            Command::Function {
                loco_id,
                index,
                enabled,
            } => {
                body.push_str("<fn id=\"");
                escape_into(&mut body, loco_id);
                let _ = write!(body, "\" fn{index}=\"{enabled}\"/>");
            }
            Command::RosterQuery => body.push_str("<model cmd=\"lclist\"/>"),
            Command::Heartbeat => body.push_str("<sys cmd=\"getstate\"/>"),
        }
        body
    }

    /// Encode the complete header + body message.
    pub fn encode(&self) -> EncodedFrame {
        let body = self.encode_body();
        let mut text = String::with_capacity(body.len() + 40);
        let _ = write!(text, "<{HEADER_WRAPPER_TAG}><{HEADER_TAG} {HEADER_SIZE_ATTR}=\"{}\"", body.len());
        if let Some(name) = self.header_name() {
            let _ = write!(text, " name=\"{name}\"");
        }
        let _ = write!(text, "/></{HEADER_WRAPPER_TAG}>");
        EncodedFrame::new(text, &body, body.len())
    }

    /// Rebuild a command from a decoded `lc` or `fn` element.
    pub fn from_element(element: &InboundElement) -> Result<Self, FrameError> {
        match element.name.as_str() {
            LOCO_TAG => {
                let loco_id = element.required("id")?;
                let value = element.required("V")?;
                let value = value.parse::<u8>().map_err(|_| FrameError::InvalidValue {
                    attr: "V".to_string(),
                    value: value.to_string(),
                })?;
                let forward = parse_bool("dir", element.required("dir")?)?;
                Ok(Command::speed(loco_id, value, forward))
            }
            FUNCTION_TAG => {
                let loco_id = element.required("id")?;
                let (index, enabled) = element
                    .attributes()
                    .find_map(|(name, value)| {
                        let index = name.strip_prefix("fn")?.parse::<u8>().ok()?;
                        Some((index, parse_bool(name, value)))
                    })
                    .ok_or(FrameError::MissingAttribute("fnN"))?;
                Ok(Command::function(loco_id, index, enabled?))
            }
            other => Err(FrameError::UnexpectedElement(other.to_string())),
        }
    }
}

fn parse_bool(attr: &str, value: &str) -> Result<bool, FrameError> {
    match value {
        "true" => Ok(true),
        "false" => Ok(false),
        _ => Err(FrameError::InvalidValue {
            attr: attr.to_string(),
            value: value.to_string(),
        }),
    }
}

/// An encoded header + body message ready for the socket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedFrame {
    bytes: Vec<u8>,
    body_start: usize,
    declared_size: usize,
}

impl EncodedFrame {
    fn new(header: String, body: &str, declared_size: usize) -> Self {
        let body_start = header.len();
        let mut bytes = header.into_bytes();
        bytes.extend_from_slice(body.as_bytes());
        debug_assert_eq!(
            declared_size,
            bytes.len() - body_start,
            "declared size must equal the body length"
        );
        Self {
            bytes,
            body_start,
            declared_size,
        }
    }

    /// Full message bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Body element bytes.
    pub fn body(&self) -> &[u8] {
        &self.bytes[self.body_start..]
    }

    /// Value written into the header's `size` attribute.
    pub fn declared_size(&self) -> usize {
        self.declared_size
    }

    /// Total message length.
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    /// Always false; a frame has at least a header.
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Consume into the raw bytes.
    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }
}

fn escape_into(out: &mut String, value: &str) {
    for c in value.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            c => out.push(c),
        }
    }
}

fn unescape(value: &str) -> String {
    if !value.contains('&') {
        return value.to_string();
    }
    let mut out = String::with_capacity(value.len());
    let mut rest = value;
    while let Some(amp) = rest.find('&') {
        out.push_str(&rest[..amp]);
        rest = &rest[amp..];
        let decoded = rest.find(';').and_then(|semi| {
            let entity = &rest[1..semi];
            let c = match entity {
                "amp" => Some('&'),
                "lt" => Some('<'),
                "gt" => Some('>'),
                "quot" => Some('"'),
                "apos" => Some('\''),
                _ => entity
                    .strip_prefix("#x")
                    .and_then(|hex| u32::from_str_radix(hex, 16).ok())
                    .or_else(|| entity.strip_prefix('#').and_then(|dec| dec.parse().ok()))
                    .and_then(char::from_u32),
            };
            c.map(|c| (c, semi + 1))
        });
        match decoded {
            Some((c, used)) => {
                out.push(c);
                rest = &rest[used..];
            }
            None => {
                out.push('&');
                rest = &rest[1..];
            }
        }
    }
    out.push_str(rest);
    out
}

// =============================================================================
// DECODING
// =============================================================================

/// Shape of a decoded tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElementKind {
    /// `<name ...>`
    Start,
    /// `<name .../>`
    Empty,
    /// `</name>`
    End,
}

/// One complete tag taken off the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundElement {
    /// Tag name.
    pub name: String,
    /// Tag shape.
    pub kind: ElementKind,
    attributes: Vec<(String, String)>,
}

impl InboundElement {
    /// Look up an attribute value (already unescaped).
    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }

    fn required(&self, name: &'static str) -> Result<&str, FrameError> {
        self.attr(name).ok_or(FrameError::MissingAttribute(name))
    }

    /// Iterate attributes in document order.
    pub fn attributes(&self) -> impl Iterator<Item = (&str, &str)> {
        self.attributes.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Whether this is a start or empty-element tag named `name`.
    pub fn opens(&self, name: &str) -> bool {
        self.name == name && self.kind != ElementKind::End
    }

    /// Whether this is an end tag named `name`.
    pub fn closes(&self, name: &str) -> bool {
        self.name == name && self.kind == ElementKind::End
    }

    /// Whether this element belongs to message framing rather than content.
    pub fn is_header(&self) -> bool {
        self.name == HEADER_WRAPPER_TAG || self.name == HEADER_TAG
    }

    /// Whether this element opens or closes a locomotive list.
    pub fn is_loco_list(&self) -> bool {
        self.name == LOCO_LIST_TAG
    }
}

/// Outcome of one decode step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodeResult {
    /// A complete element was removed from the buffer.
    Element(InboundElement),
    /// The buffer holds no complete tag yet.
    Incomplete,
    /// A complete but unparseable tag was removed from the buffer.
    Malformed(FrameError),
}

/// Extract the next complete element from the front of `buffer`.
///
/// Text, comments and processing instructions in front of it are consumed.
/// Partial tags stay buffered.
pub fn decode_next(buffer: &mut ReceiveBuffer) -> DecodeResult {
    loop {
        let bytes = buffer.as_bytes();
        let Some(start) = bytes.iter().position(|&b| b == b'<') else {
            let len = bytes.len();
            buffer.consume(len);
            return DecodeResult::Incomplete;
        };
        if start > 0 {
            buffer.consume(start);
            continue;
        }

        let skip = match markup_end(bytes) {
            Markup::Skip(end) => end,
            Markup::Tag(end) => {
                let parsed = parse_tag(&bytes[..end]);
                buffer.consume(end);
                return match parsed {
                    Ok(element) => DecodeResult::Element(element),
                    Err(err) => DecodeResult::Malformed(err),
                };
            }
            Markup::Incomplete => return DecodeResult::Incomplete,
        };
        buffer.consume(skip);
    }
}

/// Counters from one [`drain_elements`] pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DrainReport {
    /// Elements handed to the callback.
    pub elements: usize,
    /// Tags dropped as unparseable.
    pub malformed: usize,
    /// Bytes dropped by the overflow policy.
    pub discarded: usize,
    /// Whether the buffer had to be dropped entirely.
    pub resynchronized: bool,
}

/// Decode every complete element in `buffer`, applying the overflow policy
/// when an unterminated fragment fills it.
///
/// Work is bounded by the buffer capacity.
pub fn drain_elements<F>(buffer: &mut ReceiveBuffer, mut on_element: F) -> DrainReport
where
    F: FnMut(InboundElement),
{
    let mut report = DrainReport::default();
    loop {
        match decode_next(buffer) {
            DecodeResult::Element(element) => {
                report.elements += 1;
                on_element(element);
            }
            DecodeResult::Malformed(err) => {
                report.malformed += 1;
                tracing::warn!(error = %err, "dropping malformed tag");
            }
            DecodeResult::Incomplete if buffer.is_full() => {
                let cut = buffer.truncate_to_boundary();
                report.discarded += cut.dropped();
                if let Truncation::Resynchronized(dropped) = cut {
                    report.resynchronized = true;
                    tracing::warn!(dropped, "receive buffer resynchronized");
                } else {
                    tracing::warn!(dropped = cut.dropped(), "oversized fragment discarded");
                }
            }
            DecodeResult::Incomplete => return report,
        }
    }
}

enum Markup {
    /// Tag ending at the given exclusive offset.
    Tag(usize),
    /// Comment, declaration or processing instruction to skip.
    Skip(usize),
    Incomplete,
}

/// Locate the end of the markup starting at `bytes[0] == b'<'`.
fn markup_end(bytes: &[u8]) -> Markup {
    if bytes.len() < 2 {
        return Markup::Incomplete;
    }
    if bytes[1] == b'?' {
        return find(bytes, b"?>").map_or(Markup::Incomplete, Markup::Skip);
    }
    if bytes[1] == b'!' {
        if bytes.len() < 4 && b"<!--".starts_with(bytes) {
            return Markup::Incomplete;
        }
        let closing: &[u8] = if bytes.starts_with(b"<!--") { b"-->" } else { b">" };
        return find(bytes, closing).map_or(Markup::Incomplete, Markup::Skip);
    }

    let mut quote = None;
    for (i, &b) in bytes.iter().enumerate().skip(1) {
        match (quote, b) {
            (None, b'"' | b'\'') => quote = Some(b),
            (Some(q), b) if b == q => quote = None,
            (None, b'>') => return Markup::Tag(i + 1),
            _ => {}
        }
    }
    Markup::Incomplete
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|w| w == needle)
        .map(|p| p + needle.len())
}

fn parse_tag(raw: &[u8]) -> Result<InboundElement, FrameError> {
    let text = std::str::from_utf8(raw).map_err(|_| FrameError::InvalidUtf8)?;
    let malformed = || FrameError::MalformedTag(text.chars().take(64).collect());

    let inner = &text[1..text.len() - 1];
    let (kind, inner) = if let Some(rest) = inner.strip_prefix('/') {
        (ElementKind::End, rest)
    } else if let Some(rest) = inner.strip_suffix('/') {
        (ElementKind::Empty, rest)
    } else {
        (ElementKind::Start, inner)
    };

    let name_end = inner
        .find(|c: char| c.is_ascii_whitespace())
        .unwrap_or(inner.len());
    let name = &inner[..name_end];
    if name.is_empty() || !name.chars().all(is_name_char) {
        return Err(malformed());
    }

    let mut attributes = Vec::new();
    let mut rest = inner[name_end..].trim_start();
    if kind == ElementKind::End && !rest.is_empty() {
        return Err(malformed());
    }
    while !rest.is_empty() {
        let eq = rest.find('=').ok_or_else(malformed)?;
        let key = rest[..eq].trim_end();
        if key.is_empty() || !key.chars().all(is_name_char) {
            return Err(malformed());
        }
        let after = rest[eq + 1..].trim_start();
        let quote = after.chars().next().filter(|c| *c == '"' || *c == '\'');
        let quote = quote.ok_or_else(malformed)?;
        let close = after[1..].find(quote).ok_or_else(malformed)? + 1;
        attributes.push((key.to_string(), unescape(&after[1..close])));
        rest = after[close + 1..].trim_start();
    }

    Ok(InboundElement {
        name: name.to_string(),
        kind,
        attributes,
    })
}

fn is_name_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | ':' | '.')
}
