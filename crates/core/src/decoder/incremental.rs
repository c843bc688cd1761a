//! Incremental decoder over pushed byte chunks.

use serde_json::Value;

use super::config::DecoderConfig;
use super::types::{DecodeError, DecodedElement, DecoderPosition, Framing};

const BOM: &[u8] = b"\xEF\xBB\xBF";

/// Deepest bracket nesting tolerated inside one array element.
const MAX_NESTING: usize = 512;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ArrayState {
    /// Waiting for the opening `[`.
    Open,
    /// Just read `[`: an element or `]` may follow.
    AfterOpen,
    /// Just read `,`: an element must follow.
    AfterComma,
    /// Inside an element.
    Element,
    /// After an element: `,` or `]` must follow.
    CommaOrClose,
    /// After the closing `]`: only whitespace may follow.
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Detect,
    Array(ArrayState),
    Ndjson,
}

/// Scanner state for the element (or line) currently being read.
/// Persists across pushes so no byte is scanned twice.
#[derive(Debug, Default)]
struct ElementScan {
    /// Closing brackets expected, innermost last.
    stack: Vec<u8>,
    in_string: bool,
    escaped: bool,
    /// Element does not start with `{` or `[`.
    scalar: bool,
    /// Element exceeded the size limit; its bytes are dropped as scanned.
    discarding: bool,
    discarded: usize,
}

enum Scan {
    /// Element ends at this offset (exclusive, relative to the live window).
    Complete(usize),
    Incomplete,
    Broken(String),
}

/// Pull-based decoder: feed chunks with [`push`](Self::push), drain elements
/// with [`next`](Self::next), and call [`finish`](Self::finish) at end of input.
///
/// `next` returns `None` when more input is needed, or when the stream is
/// exhausted after `finish`.
pub struct RecordDecoder {
    mode: Mode,
    max_record_bytes: usize,
    buf: Vec<u8>,
    /// Start of the live window in `buf`. Bytes before it are consumed and
    /// reclaimed on the next push.
    head: usize,
    /// Bytes of the live window already scanned for the current element.
    scan: usize,
    consumed: u64,
    next_index: usize,
    element: ElementScan,
    bom_checked: bool,
    finished: bool,
    failed: bool,
}

impl RecordDecoder {
    /// Creates a decoder for the given framing.
    pub fn new(framing: Framing, config: &DecoderConfig) -> Self {
        let mode = match framing {
            Framing::Auto => Mode::Detect,
            Framing::Array => Mode::Array(ArrayState::Open),
            Framing::Ndjson => Mode::Ndjson,
        };
        Self {
            mode,
            max_record_bytes: config.max_record_bytes,
            buf: Vec::new(),
            head: 0,
            scan: 0,
            consumed: 0,
            next_index: 0,
            element: ElementScan::default(),
            bom_checked: false,
            finished: false,
            failed: false,
        }
    }

    /// Appends a chunk of input.
    pub fn push(&mut self, bytes: &[u8]) {
        if self.finished || self.failed {
            return;
        }
        if self.head > 0 {
            self.buf.drain(..self.head);
            self.head = 0;
        }
        self.buf.extend_from_slice(bytes);
    }

    /// Marks the end of input. A final line without a trailing newline is
    /// decoded; an unterminated array becomes a framing error.
    pub fn finish(&mut self) {
        self.finished = true;
    }

    /// Whether `finish` has been called.
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Framing in effect, once known.
    pub fn framing(&self) -> Option<Framing> {
        match self.mode {
            Mode::Detect => None,
            Mode::Array(_) => Some(Framing::Array),
            Mode::Ndjson => Some(Framing::Ndjson),
        }
    }

    /// Current element boundary.
    pub fn position(&self) -> DecoderPosition {
        DecoderPosition {
            elements: self.next_index,
            byte_offset: self.consumed,
        }
    }

    /// Bytes currently retained by the decoder.
    pub fn buffered_bytes(&self) -> usize {
        self.buf.len()
    }

    /// Decodes the next element, if one is complete.
    #[allow(clippy::should_implement_trait)]
    pub fn next(&mut self) -> Option<Result<DecodedElement, DecodeError>> {
        if self.failed {
            return None;
        }

        if !self.bom_checked {
            let live = self.live();
            if live.len() < BOM.len() && BOM.starts_with(live) && !self.finished {
                return None;
            }
            if live.starts_with(BOM) {
                self.advance(BOM.len());
            }
            self.bom_checked = true;
        }

        if self.mode == Mode::Detect {
            match self.skip_whitespace() {
                Some(b'[') => self.mode = Mode::Array(ArrayState::Open),
                Some(_) => self.mode = Mode::Ndjson,
                None => return None,
            }
        }

        match self.mode {
            Mode::Ndjson => self.next_line(),
            Mode::Array(_) => self.next_array_element(),
            Mode::Detect => None,
        }
    }

    fn live(&self) -> &[u8] {
        &self.buf[self.head..]
    }

    fn advance(&mut self, n: usize) {
        self.head += n;
        self.consumed += n as u64;
    }

    /// Drops leading whitespace and peeks the next byte.
    fn skip_whitespace(&mut self) -> Option<u8> {
        let n = self
            .live()
            .iter()
            .take_while(|b| b.is_ascii_whitespace())
            .count();
        self.advance(n);
        self.buf.get(self.head).copied()
    }

    fn emit(&mut self, bytes_range: std::ops::Range<usize>) -> Result<DecodedElement, DecodeError> {
        let start = self.head + bytes_range.start;
        let end = self.head + bytes_range.end;
        let parsed = serde_json::from_slice::<Value>(&self.buf[start..end]);
        let index = self.next_index;
        self.next_index += 1;
        match parsed {
            Ok(value) => Ok(DecodedElement { index, value }),
            Err(e) => Err(DecodeError::Malformed {
                index,
                reason: e.to_string(),
            }),
        }
    }

    fn too_large(&mut self, size: usize) -> DecodeError {
        let index = self.next_index;
        self.next_index += 1;
        DecodeError::TooLarge {
            index,
            size,
            limit: self.max_record_bytes,
        }
    }

    fn fail(&mut self, reason: impl Into<String>) -> DecodeError {
        self.failed = true;
        DecodeError::Framing {
            offset: self.consumed,
            reason: reason.into(),
        }
    }

    // ------------------------------------------------------------------
    // Newline-delimited framing
    // ------------------------------------------------------------------

    fn next_line(&mut self) -> Option<Result<DecodedElement, DecodeError>> {
        loop {
            let newline = self.live()[self.scan..]
                .iter()
                .position(|&b| b == b'\n')
                .map(|pos| self.scan + pos);

            if let Some(end) = newline {
                self.scan = 0;
                if self.element.discarding {
                    let size = self.element.discarded + end;
                    self.element = ElementScan::default();
                    self.advance(end + 1);
                    return Some(Err(self.too_large(size)));
                }
                let item = self.decode_line(end);
                self.advance(end + 1);
                match item {
                    Some(item) => return Some(item),
                    None => continue,
                }
            }

            let len = self.live().len();
            if self.element.discarding || len > self.max_record_bytes {
                self.element.discarding = true;
                self.element.discarded += len;
                self.advance(len);
                self.scan = 0;
            } else {
                self.scan = len;
            }

            if !self.finished {
                return None;
            }

            // End of input: the unterminated final line is a complete record.
            self.scan = 0;
            if self.element.discarding {
                let size = self.element.discarded;
                self.element = ElementScan::default();
                return Some(Err(self.too_large(size)));
            }
            let len = self.live().len();
            let item = self.decode_line(len);
            self.advance(len);
            return item;
        }
    }

    /// Decodes the line occupying `..end` of the live window. Blank lines
    /// yield `None` and do not consume an index.
    fn decode_line(&mut self, end: usize) -> Option<Result<DecodedElement, DecodeError>> {
        let line = &self.live()[..end];
        let trimmed_len = line.trim_ascii().len();
        let lead = line.len() - line.trim_ascii_start().len();
        if trimmed_len == 0 {
            return None;
        }
        if end > self.max_record_bytes {
            return Some(Err(self.too_large(end)));
        }
        Some(self.emit(lead..lead + trimmed_len))
    }

    // ------------------------------------------------------------------
    // Array framing
    // ------------------------------------------------------------------

    fn next_array_element(&mut self) -> Option<Result<DecodedElement, DecodeError>> {
        loop {
            let Mode::Array(state) = self.mode else {
                return None;
            };

            match state {
                ArrayState::Open => match self.skip_whitespace() {
                    Some(b'[') => {
                        self.advance(1);
                        self.mode = Mode::Array(ArrayState::AfterOpen);
                    }
                    Some(other) => {
                        return Some(Err(
                            self.fail(format!("expected '[' but found {:?}", other as char))
                        ))
                    }
                    None if self.finished => {
                        return Some(Err(self.fail("empty stream, expected '['")))
                    }
                    None => return None,
                },

                ArrayState::AfterOpen | ArrayState::AfterComma => match self.skip_whitespace() {
                    Some(b']') if state == ArrayState::AfterOpen => {
                        self.advance(1);
                        self.mode = Mode::Array(ArrayState::Closed);
                    }
                    Some(b']') => return Some(Err(self.fail("trailing ',' before ']'"))),
                    Some(b',') => return Some(Err(self.fail("unexpected ','"))),
                    Some(first) => {
                        self.element = ElementScan {
                            scalar: first != b'{' && first != b'[',
                            ..ElementScan::default()
                        };
                        self.scan = 0;
                        self.mode = Mode::Array(ArrayState::Element);
                    }
                    None if self.finished => {
                        return Some(Err(self.fail("unexpected end of stream inside array")))
                    }
                    None => return None,
                },

                ArrayState::Element => match self.scan_element() {
                    Scan::Complete(end) => {
                        self.mode = Mode::Array(ArrayState::CommaOrClose);
                        self.scan = 0;
                        let item = if self.element.discarding {
                            let size = self.element.discarded + end;
                            Err(self.too_large(size))
                        } else if end > self.max_record_bytes {
                            Err(self.too_large(end))
                        } else {
                            self.emit(0..end)
                        };
                        self.element = ElementScan::default();
                        self.advance(end);
                        return Some(item);
                    }
                    Scan::Incomplete if self.finished => {
                        return Some(Err(self.fail("unexpected end of stream inside array")))
                    }
                    Scan::Incomplete => return None,
                    Scan::Broken(reason) => return Some(Err(self.fail(reason))),
                },

                ArrayState::CommaOrClose => match self.skip_whitespace() {
                    Some(b',') => {
                        self.advance(1);
                        self.mode = Mode::Array(ArrayState::AfterComma);
                    }
                    Some(b']') => {
                        self.advance(1);
                        self.mode = Mode::Array(ArrayState::Closed);
                    }
                    Some(other) => {
                        return Some(Err(self.fail(format!(
                            "expected ',' or ']' after element but found {:?}",
                            other as char
                        ))))
                    }
                    None if self.finished => {
                        return Some(Err(self.fail("unexpected end of stream inside array")))
                    }
                    None => return None,
                },

                ArrayState::Closed => {
                    return match self.skip_whitespace() {
                        Some(_) => Some(Err(self.fail("trailing data after closing ']'"))),
                        None => None,
                    }
                }
            }
        }
    }

    /// Scans forward from where the last call stopped until the current
    /// element's end.
    fn scan_element(&mut self) -> Scan {
        let start = self.head + self.scan;
        let element = &mut self.element;
        let mut end = None;

        for (offset, &b) in self.buf[start..].iter().enumerate() {
            let pos = self.scan + offset;

            if element.in_string {
                if element.escaped {
                    element.escaped = false;
                } else if b == b'\\' {
                    element.escaped = true;
                } else if b == b'"' {
                    element.in_string = false;
                }
                continue;
            }

            match b {
                b'"' => element.in_string = true,
                b'{' | b'[' => {
                    element.stack.push(if b == b'{' { b'}' } else { b']' });
                    if element.stack.len() > MAX_NESTING {
                        return Scan::Broken("element nesting too deep".to_string());
                    }
                }
                b'}' | b']' => match element.stack.pop() {
                    Some(expected) if expected == b => {
                        if element.stack.is_empty() && !element.scalar {
                            end = Some(pos + 1);
                            break;
                        }
                    }
                    Some(_) => return Scan::Broken("mismatched bracket in element".to_string()),
                    None if element.scalar && b == b']' => {
                        end = Some(pos);
                        break;
                    }
                    None => return Scan::Broken("unexpected closing bracket".to_string()),
                },
                b',' if element.stack.is_empty() => {
                    end = Some(pos);
                    break;
                }
                _ if element.scalar && element.stack.is_empty() && b.is_ascii_whitespace() => {
                    end = Some(pos);
                    break;
                }
                _ => {}
            }
        }

        if let Some(end) = end {
            return Scan::Complete(end);
        }

        let scanned = self.live().len();
        if self.element.discarding || scanned > self.max_record_bytes {
            self.element.discarding = true;
            self.element.discarded += scanned;
            self.advance(scanned);
            self.scan = 0;
        } else {
            self.scan = scanned;
        }
        Scan::Incomplete
    }
}
