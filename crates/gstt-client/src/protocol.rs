//! Response unit schema shared by both output encodings, and the mapping from
//! a decoded unit to a [`RecognitionEvent`].
//!
//! Binary units are protobuf messages:
//!
//! ```text
//! RecognitionEvent   { status = 1 (enum), result = 2 (repeated), endpoint = 4 (enum) }
//! RecognitionResult  { alternative = 1 (repeated), final = 2 (bool), stability = 3 (float) }
//! Alternative        { transcript = 1 (string), confidence = 2 (float) }
//! ```
//!
//! Text units carry the same shape as JSON objects.

use crate::error::{ErrorKind, Result, SpeechError};
use crate::types::{Alternative, RecognitionEvent};
use bytes::Buf;
use serde::Deserialize;

pub const STATUS_SUCCESS: i32 = 0;
pub const STATUS_NO_SPEECH: i32 = 1;

fn status_name(code: i32) -> &'static str {
    match code {
        0 => "success",
        1 => "no speech",
        2 => "aborted",
        3 => "audio capture",
        4 => "network",
        5 => "not allowed",
        6 => "service not allowed",
        7 => "bad grammar",
        8 => "language not supported",
        _ => "unknown status",
    }
}

#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
pub struct RecognitionResponse {
    #[serde(default)]
    pub status: i32,
    #[serde(default)]
    pub result: Vec<RecognitionResult>,
    #[serde(default)]
    pub result_index: Option<u32>,
    #[serde(default)]
    pub endpoint: Option<i32>,
}

#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
pub struct RecognitionResult {
    #[serde(default)]
    pub alternative: Vec<AlternativeUnit>,
    #[serde(default, rename = "final")]
    pub is_final: bool,
    #[serde(default)]
    pub stability: Option<f32>,
}

#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
pub struct AlternativeUnit {
    #[serde(default)]
    pub transcript: String,
    #[serde(default)]
    pub confidence: Option<f32>,
}

impl RecognitionResult {
    fn alternatives(self) -> Vec<Alternative> {
        self.alternative
            .into_iter()
            .map(|a| Alternative::new(a.transcript, a.confidence))
            .collect()
    }
}

impl RecognitionResponse {
    /// `None` for heartbeat units that carry no results.
    pub fn into_event(self) -> Option<RecognitionEvent> {
        match self.status {
            STATUS_SUCCESS => {}
            STATUS_NO_SPEECH => return Some(RecognitionEvent::EndOfStream),
            code => {
                return Some(RecognitionEvent::Error {
                    kind: ErrorKind::Remote,
                    message: format!("{} (status {code})", status_name(code)),
                });
            }
        }

        let mut results = self.result;
        if let Some(idx) = results.iter().position(|r| r.is_final) {
            let result = results.swap_remove(idx);
            return Some(RecognitionEvent::Final {
                alternatives: result.alternatives(),
            });
        }

        results.retain(|r| !r.alternative.is_empty());
        match results.len() {
            0 => None,
            1 => {
                let result = results.swap_remove(0);
                Some(RecognitionEvent::Partial {
                    alternatives: result.alternatives(),
                })
            }
            // Interim units split the hypothesis into a stable prefix and
            // an unstable tail; surface them as one running transcript.
            _ => {
                let transcript: String = results
                    .iter()
                    .map(|r| r.alternative[0].transcript.as_str())
                    .collect();
                Some(RecognitionEvent::Partial {
                    alternatives: vec![Alternative::new(transcript, None)],
                })
            }
        }
    }
}

pub fn decode_pb_unit(bytes: &[u8]) -> Result<RecognitionResponse> {
    let mut reader = WireReader::new(bytes);
    let mut out = RecognitionResponse::default();

    while let Some((field, wire)) = reader.key()? {
        match (field, wire) {
            (1, WireType::Varint) => out.status = reader.varint()? as i32,
            (2, WireType::Len) => out.result.push(decode_pb_result(reader.len_delimited()?)?),
            (4, WireType::Varint) => out.endpoint = Some(reader.varint()? as i32),
            (_, wire) => reader.skip(wire)?,
        }
    }

    Ok(out)
}

fn decode_pb_result(bytes: &[u8]) -> Result<RecognitionResult> {
    let mut reader = WireReader::new(bytes);
    let mut out = RecognitionResult::default();

    while let Some((field, wire)) = reader.key()? {
        match (field, wire) {
            (1, WireType::Len) => out
                .alternative
                .push(decode_pb_alternative(reader.len_delimited()?)?),
            (2, WireType::Varint) => out.is_final = reader.varint()? != 0,
            (3, WireType::Fixed32) => out.stability = Some(reader.float()?),
            (_, wire) => reader.skip(wire)?,
        }
    }

    Ok(out)
}

fn decode_pb_alternative(bytes: &[u8]) -> Result<AlternativeUnit> {
    let mut reader = WireReader::new(bytes);
    let mut out = AlternativeUnit::default();

    while let Some((field, wire)) = reader.key()? {
        match (field, wire) {
            (1, WireType::Len) => {
                out.transcript = String::from_utf8(reader.len_delimited()?.to_vec())
                    .map_err(|e| SpeechError::Decode(format!("transcript is not utf-8: {e}")))?;
            }
            (2, WireType::Fixed32) => out.confidence = Some(reader.float()?),
            (_, wire) => reader.skip(wire)?,
        }
    }

    Ok(out)
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum WireType {
    Varint,
    Fixed64,
    Len,
    Fixed32,
}

struct WireReader<'a> {
    buf: &'a [u8],
}

impl<'a> WireReader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf }
    }

    fn key(&mut self) -> Result<Option<(u64, WireType)>> {
        if !self.buf.has_remaining() {
            return Ok(None);
        }
        let key = self.varint()?;
        let wire = match key & 0x7 {
            0 => WireType::Varint,
            1 => WireType::Fixed64,
            2 => WireType::Len,
            5 => WireType::Fixed32,
            other => {
                return Err(SpeechError::Decode(format!(
                    "unsupported wire type {other}"
                )));
            }
        };
        Ok(Some((key >> 3, wire)))
    }

    fn varint(&mut self) -> Result<u64> {
        let mut value = 0u64;
        for shift in (0..64).step_by(7) {
            if !self.buf.has_remaining() {
                return Err(SpeechError::Decode("truncated varint".to_string()));
            }
            let byte = self.buf.get_u8();
            value |= u64::from(byte & 0x7f) << shift;
            if byte & 0x80 == 0 {
                return Ok(value);
            }
        }
        Err(SpeechError::Decode("varint too long".to_string()))
    }

    fn len_delimited(&mut self) -> Result<&'a [u8]> {
        let len = self.varint()? as usize;
        if self.buf.remaining() < len {
            return Err(SpeechError::Decode(format!(
                "field length {len} exceeds remaining {}",
                self.buf.remaining()
            )));
        }
        let (field, rest) = self.buf.split_at(len);
        self.buf = rest;
        Ok(field)
    }

    fn float(&mut self) -> Result<f32> {
        if self.buf.remaining() < 4 {
            return Err(SpeechError::Decode("truncated float".to_string()));
        }
        Ok(self.buf.get_f32_le())
    }

    fn skip(&mut self, wire: WireType) -> Result<()> {
        let width = match wire {
            WireType::Varint => {
                self.varint()?;
                return Ok(());
            }
            WireType::Len => {
                self.len_delimited()?;
                return Ok(());
            }
            WireType::Fixed64 => 8,
            WireType::Fixed32 => 4,
        };
        if self.buf.remaining() < width {
            return Err(SpeechError::Decode("truncated fixed-width field".to_string()));
        }
        self.buf.advance(width);
        Ok(())
    }
}
