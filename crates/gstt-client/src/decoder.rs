//! Incremental decoding of the response body.
//!
//! Bytes are pushed as they arrive from the transport; every complete unit is
//! turned into an event immediately. A unit split across reads is held until
//! its remaining bytes arrive.

use crate::config::OutputEncoding;
use crate::error::ErrorKind;
use crate::protocol::{RecognitionResponse, decode_pb_unit};
use crate::types::RecognitionEvent;
use bytes::{Buf, BytesMut};
use tracing::{debug, trace};

/// Largest binary unit accepted before the stream is considered corrupt.
pub const MAX_UNIT_LEN: usize = 1 << 20;

const LEN_PREFIX: usize = 4;

#[derive(Debug)]
pub struct FrameDecoder {
    encoding: OutputEncoding,
    buf: BytesMut,
    units: u64,
    failed: bool,
}

impl FrameDecoder {
    pub fn new(encoding: OutputEncoding) -> Self {
        Self {
            encoding,
            buf: BytesMut::new(),
            units: 0,
            failed: false,
        }
    }

    /// Number of units decoded so far, heartbeats included.
    pub fn units(&self) -> u64 {
        self.units
    }

    pub fn has_failed(&self) -> bool {
        self.failed
    }

    /// Feeds one read of the response body.
    ///
    /// After a malformed unit the returned events end with an `Error` of kind
    /// `Decode` and every later call returns nothing.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<RecognitionEvent> {
        if self.failed {
            return Vec::new();
        }

        self.buf.extend_from_slice(chunk);
        let mut events = Vec::new();
        match self.encoding {
            OutputEncoding::Binary => self.drain_binary(&mut events),
            OutputEncoding::Text => self.drain_text(&mut events),
        }
        events
    }

    /// Called once the body is closed.
    pub fn finish(&mut self) -> Vec<RecognitionEvent> {
        if self.failed {
            return Vec::new();
        }

        let leftover = match self.encoding {
            OutputEncoding::Binary => self.buf.len(),
            OutputEncoding::Text => self
                .buf
                .iter()
                .filter(|b| !b.is_ascii_whitespace())
                .count(),
        };
        self.buf.clear();

        if leftover > 0 {
            return vec![self.fail(format!(
                "response closed in the middle of a unit ({leftover} bytes pending)"
            ))];
        }

        debug!(units = self.units, "response body complete");
        vec![RecognitionEvent::EndOfStream]
    }

    fn fail(&mut self, message: String) -> RecognitionEvent {
        self.failed = true;
        self.buf.clear();
        RecognitionEvent::Error {
            kind: ErrorKind::Decode,
            message,
        }
    }

    fn drain_binary(&mut self, events: &mut Vec<RecognitionEvent>) {
        while self.buf.len() >= LEN_PREFIX {
            let len = (&self.buf[..LEN_PREFIX]).get_u32() as usize;
            if len > MAX_UNIT_LEN {
                events.push(self.fail(format!(
                    "unit length {len} exceeds limit of {MAX_UNIT_LEN} bytes"
                )));
                return;
            }
            if self.buf.len() < LEN_PREFIX + len {
                trace!(have = self.buf.len() - LEN_PREFIX, need = len, "waiting for unit");
                return;
            }

            self.buf.advance(LEN_PREFIX);
            let unit = self.buf.split_to(len);
            self.units += 1;
            match decode_pb_unit(&unit) {
                Ok(response) => events.extend(response.into_event()),
                Err(err) => {
                    events.push(self.fail(err.to_string()));
                    return;
                }
            }
        }
    }

    fn drain_text(&mut self, events: &mut Vec<RecognitionEvent>) {
        let mut consumed = 0;
        let mut failure = None;
        {
            let mut stream =
                serde_json::Deserializer::from_slice(&self.buf).into_iter::<RecognitionResponse>();
            loop {
                match stream.next() {
                    Some(Ok(response)) => {
                        consumed = stream.byte_offset();
                        self.units += 1;
                        events.extend(response.into_event());
                    }
                    // Incomplete value: wait for the next read.
                    Some(Err(err)) if err.is_eof() => break,
                    Some(Err(err)) => {
                        failure = Some(err.to_string());
                        break;
                    }
                    None => {
                        consumed = self.buf.len();
                        break;
                    }
                }
            }
        }

        if let Some(message) = failure {
            events.push(self.fail(message));
            return;
        }
        self.buf.advance(consumed);
    }
}
