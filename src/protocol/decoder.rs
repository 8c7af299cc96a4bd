//! Incremental STOMP 1.0 frame decoder.
//!
//! One decoder instance per connection; `decode` is fed raw transport bytes
//! and produces at most one frame per call, retaining any partial state in
//! between. The decoder never re-scans consumed bytes: after a frame is
//! emitted the unconsumed tail is compacted to the front of the working
//! buffer, so total work is linear in bytes received.
//!
//! This decoder implements the 1.0 framing (`LF` line endings). When it sees
//! a `CR LF` ending it fails with [`StompError::InvalidEol`], the signal the
//! connection layer uses to switch to a newer-version decoder.

use std::collections::HashMap;

use bytes::Bytes;
use thiserror::Error;

use super::frame::{Command, Frame, CONTENT_LENGTH_HEADER};

const INITIAL_BUFFER_SIZE: usize = 1024;

/// Frame decode failures. `InvalidEol` doubles as the version-selection
/// signal: the offending byte is carried so the connection can hand the
/// buffered bytes to a 1.1+ decoder.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StompError {
    #[error("invalid STOMP frame command in buffer: {0}")]
    InvalidCommand(String),

    #[error("end-of-line byte 0x{byte:02x} is not valid in STOMP 1.0 framing")]
    InvalidEol { byte: u8 },

    #[error("two consecutive carriage returns in frame end-of-line")]
    TwoCarriageReturns,

    #[error("carriage return not followed by a line feed")]
    BadCarriageReturns,

    #[error("invalid content-length header value '{0}'")]
    InvalidContentLength(String),
}

#[cfg(test)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum DecoderPhase {
    Command,
    Headers,
    Body,
}

/// Resumable frame parser over a growable working buffer.
///
/// Between calls, bytes `[pos, data)` of the working buffer are the
/// unconsumed tail of the stream. Not safe for concurrent use; transports
/// own one decoder per connection.
pub struct StompDecoder {
    working: Vec<u8>,
    /// Read position within the working buffer.
    pos: usize,
    /// End of valid data within the working buffer.
    data: usize,

    command: Option<Command>,
    headers: HashMap<String, String>,
    /// Start of the bytes to capture for the current header name or value.
    line_start: Option<usize>,
    reading_headers: bool,
    in_header_name: bool,
    /// Leading-whitespace trim is active for the current header value.
    trim_value_whitespace: bool,
    /// The current line so far holds nothing but whitespace; a newline now
    /// is the blank line terminating the header block.
    whitespace_only: bool,
    header_name: Option<String>,
    content_length: Option<usize>,
    body_start: Option<usize>,
}

impl StompDecoder {
    pub fn new() -> Self {
        Self::with_initial_capacity(INITIAL_BUFFER_SIZE)
    }

    /// Decoder with a configured initial working-buffer capacity; the buffer
    /// still grows on demand.
    pub fn with_initial_capacity(capacity: usize) -> Self {
        StompDecoder {
            working: vec![0; capacity],
            pos: 0,
            data: 0,
            command: None,
            headers: HashMap::new(),
            line_start: None,
            reading_headers: true,
            in_header_name: true,
            trim_value_whitespace: false,
            whitespace_only: true,
            header_name: None,
            content_length: None,
            body_start: None,
        }
    }

    /// Whether unconsumed bytes remain from previous calls. When true after
    /// a frame was returned, the caller should decode again with an empty
    /// chunk before reading more from the transport.
    pub fn has_buffered_bytes(&self) -> bool {
        self.data > self.pos
    }

    /// Append `chunk` and try to complete a frame. `Ok(None)` means the
    /// buffered bytes do not yet form a full frame; no input is ever lost.
    pub fn decode(&mut self, chunk: &[u8]) -> Result<Option<Frame>, StompError> {
        let needed = self.data + chunk.len();
        if needed >= self.working.len() {
            self.working.resize(needed, 0);
        }
        self.working[self.data..needed].copy_from_slice(chunk);
        self.data = needed;

        if self.command.is_none() && !self.parse_command()? {
            return Ok(None);
        }
        if self.reading_headers && !self.parse_headers()? {
            return Ok(None);
        }
        self.parse_body()
    }

    /// Consume leading end-of-line bytes, identify the command from its
    /// first distinguishing bytes, and advance past its terminating newline.
    /// Returns `Ok(false)` when more bytes are needed.
    fn parse_command(&mut self) -> Result<bool, StompError> {
        let mut offset = 0;
        let mut prev_cr = false;

        // Tolerate end-of-lines trailing the previous frame. A CR decides
        // nothing by itself: CR LF is the 1.0 version signal, CR CR and
        // CR-then-other are malformed, and CR at the end of the data waits
        // for the next byte so results do not depend on chunk boundaries.
        while offset < self.data {
            match self.working[offset] {
                b'\n' => {
                    if prev_cr {
                        return Err(StompError::InvalidEol { byte: b'\r' });
                    }
                }
                b'\r' => {
                    if prev_cr {
                        return Err(StompError::TwoCarriageReturns);
                    }
                    prev_cr = true;
                }
                _ => {
                    if prev_cr {
                        return Err(StompError::BadCarriageReturns);
                    }
                    break;
                }
            }
            offset += 1;
        }

        // Up to three bytes of command lookahead plus an end-of-line byte.
        if prev_cr || self.data < offset + 4 {
            return Ok(false);
        }

        let command = match self.working[offset] {
            b'A' => {
                if self.working[offset + 1] == b'B' {
                    self.advance_past(offset, Command::Abort)
                } else {
                    self.advance_past(offset, Command::Ack)
                }
            }
            b'B' => self.advance_past(offset, Command::Begin),
            b'C' => {
                if self.working[offset + 2] == b'M' {
                    self.advance_past(offset, Command::Commit)
                } else if offset + 7 < self.data && self.working[offset + 7] == b'E' {
                    self.advance_past(offset, Command::Connected)
                } else {
                    self.advance_past(offset, Command::Connect)
                }
            }
            b'D' => self.advance_past(offset, Command::Disconnect),
            b'E' => self.advance_past(offset, Command::Error),
            b'M' => self.advance_past(offset, Command::Message),
            b'R' => self.advance_past(offset, Command::Receipt),
            b'S' => match self.working[offset + 1] {
                b'E' => self.advance_past(offset, Command::Send),
                b'T' => self.advance_past(offset, Command::Stomp),
                _ => self.advance_past(offset, Command::Subscribe),
            },
            b'U' => self.advance_past(offset, Command::Unsubscribe),
            _ => return Err(StompError::InvalidCommand(self.dump_buffer())),
        };

        let command = match command {
            Some(command) => command,
            None => return Ok(false),
        };

        // The byte before the new read position must be the command line's
        // newline; anything else is the higher-version framing signal.
        let terminator = self.working[self.pos - 1];
        if terminator != b'\n' {
            return Err(StompError::InvalidEol { byte: terminator });
        }

        self.command = Some(command);
        Ok(true)
    }

    /// Advance past `command`'s name and terminating newline, requiring one
    /// spare byte beyond it so header parsing always has a byte to read.
    fn advance_past(&mut self, offset: usize, command: Command) -> Option<Command> {
        let advance = offset + command.as_str().len() + 1;
        if self.pos + advance >= self.data {
            None
        } else {
            self.pos += advance;
            Some(command)
        }
    }

    /// Byte-at-a-time header scan; resumable at any byte offset.
    fn parse_headers(&mut self) -> Result<bool, StompError> {
        if self.line_start.is_none() {
            self.line_start = Some(self.pos);
        }

        while self.pos < self.data {
            let b = self.working[self.pos];
            self.pos += 1;
            match b {
                b':' => {
                    if self.in_header_name {
                        let start = self.line_start.unwrap_or(0);
                        let name =
                            String::from_utf8_lossy(&self.working[start..self.pos - 1])
                                .into_owned();
                        self.header_name = Some(name);
                        self.in_header_name = false;
                        self.line_start = Some(self.pos);
                        self.trim_value_whitespace = true;
                    }
                    self.whitespace_only = false;
                }
                b'\n' => {
                    if self.whitespace_only {
                        // Headers are terminated by a blank line.
                        self.reading_headers = false;
                        return Ok(true);
                    }

                    let start = self.line_start.unwrap_or(0);
                    let value = String::from_utf8_lossy(&self.working[start..self.pos - 1])
                        .into_owned();
                    let name = self.header_name.clone().unwrap_or_default();
                    self.headers.insert(name.clone(), value.clone());
                    if name == CONTENT_LENGTH_HEADER {
                        let length = value
                            .parse::<usize>()
                            .map_err(|_| StompError::InvalidContentLength(value.clone()))?;
                        self.content_length = Some(length);
                    }

                    self.whitespace_only = true;
                    self.line_start = Some(self.pos);
                    self.in_header_name = true;
                    self.trim_value_whitespace = false;
                }
                b' ' | b'\t' => {
                    if self.trim_value_whitespace {
                        // Shrink the captured value from the left.
                        self.line_start = self.line_start.map(|start| start + 1);
                    }
                }
                _ => {
                    self.whitespace_only = false;
                    self.trim_value_whitespace = false;
                }
            }
        }

        Ok(false)
    }

    /// Take the body, consume its NUL terminator (and one optional trailing
    /// newline), compact the leftover tail to offset 0, and emit the frame.
    fn parse_body(&mut self) -> Result<Option<Frame>, StompError> {
        let mut content: Option<Bytes> = None;

        match self.content_length {
            Some(length) => {
                if self.pos + length + 1 <= self.data {
                    content = Some(Bytes::copy_from_slice(
                        &self.working[self.pos..self.pos + length],
                    ));
                    self.pos += length + 1;
                }
            }
            None => {
                if self.body_start.is_none() {
                    self.body_start = Some(self.pos);
                }
                while self.pos < self.data {
                    let b = self.working[self.pos];
                    self.pos += 1;
                    if b == 0 {
                        let start = self.body_start.unwrap_or(0);
                        content = Some(Bytes::copy_from_slice(
                            &self.working[start..self.pos - 1],
                        ));
                        break;
                    }
                }
            }
        }

        let body = match content {
            Some(body) => body,
            None => return Ok(None),
        };

        if self.data > self.pos {
            if self.working[self.pos] == b'\n' {
                self.pos += 1;
            }
            if self.data > self.pos {
                // Bytes of the next frame already arrived; shift them down.
                self.working.copy_within(self.pos..self.data, 0);
            }
        }
        self.data -= self.pos;

        let frame = Frame {
            // parse_body only runs after parse_command succeeded
            command: self.command.take().unwrap(),
            headers: std::mem::take(&mut self.headers),
            body,
        };
        self.reset();
        Ok(Some(frame))
    }

    fn reset(&mut self) {
        self.pos = 0;
        self.command = None;
        self.headers.clear();
        self.line_start = None;
        self.reading_headers = true;
        self.in_header_name = true;
        self.trim_value_whitespace = false;
        self.whitespace_only = true;
        self.header_name = None;
        self.content_length = None;
        self.body_start = None;
    }

    /// Readable rendering of the buffered bytes for command diagnostics.
    fn dump_buffer(&self) -> String {
        let mut out = String::new();
        for (i, &b) in self.working[..self.data].iter().enumerate() {
            if i > 0 {
                out.push(',');
            }
            if (33..=126).contains(&b) {
                out.push(b as char);
            } else {
                out.push_str(&b.to_string());
            }
        }
        out
    }

    #[cfg(test)]
    pub(crate) fn phase(&self) -> DecoderPhase {
        if self.command.is_none() {
            DecoderPhase::Command
        } else if self.reading_headers {
            DecoderPhase::Headers
        } else {
            DecoderPhase::Body
        }
    }

    #[cfg(test)]
    pub(crate) fn trimming_value_whitespace(&self) -> bool {
        self.trim_value_whitespace
    }
}

impl Default for StompDecoder {
    fn default() -> Self {
        Self::new()
    }
}
