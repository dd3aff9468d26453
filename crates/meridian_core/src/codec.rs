//! # Message Codec
//!
//! Text framing for RPC messages. A frame is
//!
//! ```text
//! service SEP method SEP timestamp [SEP arg]*
//! ```
//!
//! where `SEP` is the ASCII record separator (`0x1E`). When several frames are
//! streamed over one byte channel each frame is terminated by `EOT` (`0x04`).
//! Neither byte may appear inside a field: encoding such a field is rejected
//! instead of producing a frame that would decode differently.

use crate::error::{CoreError, Result};

/// Field separator inside a frame.
pub const SEP: char = '\u{1e}';

/// Frame terminator for streamed batches.
pub const EOT: char = '\u{04}';

/// A decoded frame. Arguments are kept as opaque string tokens.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub service: String,
    pub method: String,
    pub timestamp: u64,
    pub args: Vec<String>,
}

impl Frame {
    pub fn new(
        service: impl Into<String>,
        method: impl Into<String>,
        timestamp: u64,
        args: Vec<String>,
    ) -> Self {
        Self {
            service: service.into(),
            method: method.into(),
            timestamp,
            args,
        }
    }

    /// Encodes this frame. See [`encode`].
    pub fn encode(&self) -> Result<String> {
        encode(&self.service, &self.method, self.timestamp, &self.args)
    }
}

fn is_reserved(c: char) -> bool {
    c == SEP || c == EOT
}

fn check_name(kind: &str, value: &str) -> Result<()> {
    if value.is_empty() {
        return Err(CoreError::MalformedFrame(format!("empty {} name", kind)));
    }
    if value.contains(is_reserved) {
        return Err(CoreError::MalformedFrame(format!(
            "{} name '{}' contains a reserved byte",
            kind,
            value.escape_debug()
        )));
    }
    Ok(())
}

/// Encodes one frame.
///
/// # Errors
///
/// Returns [`CoreError::MalformedFrame`] when the service or method name is
/// empty, or when any field contains `SEP` or `EOT`.
pub fn encode<S: AsRef<str>>(
    service: &str,
    method: &str,
    timestamp: u64,
    args: &[S],
) -> Result<String> {
    check_name("service", service)?;
    check_name("method", method)?;

    let mut capacity = service.len() + method.len() + 22;
    for (index, arg) in args.iter().enumerate() {
        let arg = arg.as_ref();
        if arg.contains(is_reserved) {
            return Err(CoreError::MalformedFrame(format!(
                "argument {} contains a reserved byte",
                index
            )));
        }
        capacity += arg.len() + 1;
    }

    let mut frame = String::with_capacity(capacity);
    frame.push_str(service);
    frame.push(SEP);
    frame.push_str(method);
    frame.push(SEP);
    frame.push_str(&timestamp.to_string());
    for arg in args {
        frame.push(SEP);
        frame.push_str(arg.as_ref());
    }
    Ok(frame)
}

/// Decodes one frame. A single trailing `EOT` is tolerated.
///
/// Decoding is all-or-nothing: any structural problem yields
/// [`CoreError::MalformedFrame`] and no partial frame.
pub fn decode(frame: &str) -> Result<Frame> {
    let frame = frame.strip_suffix(EOT).unwrap_or(frame);
    if frame.is_empty() {
        return Err(CoreError::MalformedFrame("empty frame".to_string()));
    }
    if frame.contains(EOT) {
        return Err(CoreError::MalformedFrame(
            "terminator inside frame body".to_string(),
        ));
    }

    let mut fields = frame.split(SEP);
    let service = fields.next().unwrap_or_default();
    let method = fields
        .next()
        .ok_or_else(|| CoreError::MalformedFrame("missing method field".to_string()))?;
    let timestamp = fields
        .next()
        .ok_or_else(|| CoreError::MalformedFrame("missing timestamp field".to_string()))?;

    if service.is_empty() || method.is_empty() {
        return Err(CoreError::MalformedFrame(
            "empty service or method name".to_string(),
        ));
    }
    let timestamp = timestamp.parse::<u64>().map_err(|_| {
        CoreError::MalformedFrame(format!("timestamp '{}' is not numeric", timestamp))
    })?;

    Ok(Frame {
        service: service.to_string(),
        method: method.to_string(),
        timestamp,
        args: fields.map(str::to_string).collect(),
    })
}

/// Encodes several frames into one `EOT`-terminated batch.
pub fn encode_batch(frames: &[Frame]) -> Result<String> {
    let mut batch = String::new();
    for frame in frames {
        batch.push_str(&frame.encode()?);
        batch.push(EOT);
    }
    Ok(batch)
}

/// Reassembles `EOT`-terminated frames from arbitrarily split chunks.
///
/// Trailing data without a terminator is kept until a later chunk completes
/// it.
#[derive(Debug, Default)]
pub struct FrameSplitter {
    buffer: String,
}

impl FrameSplitter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a chunk and returns every frame it completed, in order.
    pub fn push(&mut self, chunk: &str) -> Vec<String> {
        self.buffer.push_str(chunk);
        let Some(last) = self.buffer.rfind(EOT) else {
            return Vec::new();
        };

        let rest = self.buffer.split_off(last + EOT.len_utf8());
        let complete = std::mem::replace(&mut self.buffer, rest);
        complete
            .split_terminator(EOT)
            .filter(|frame| !frame.is_empty())
            .map(str::to_string)
            .collect()
    }

    /// Bytes buffered while waiting for a terminator.
    pub fn pending(&self) -> usize {
        self.buffer.len()
    }
}
