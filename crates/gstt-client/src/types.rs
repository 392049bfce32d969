use crate::error::ErrorKind;

/// One candidate transcript for an utterance.
#[derive(Clone, Debug, PartialEq)]
pub struct Alternative {
    pub transcript: String,
    pub confidence: Option<f32>,
}

impl Alternative {
    pub fn new(transcript: impl Into<String>, confidence: Option<f32>) -> Self {
        Self {
            transcript: transcript.into(),
            confidence,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum RecognitionEvent {
    /// Interim hypothesis; revisable until the utterance's `Final`.
    Partial { alternatives: Vec<Alternative> },
    Final { alternatives: Vec<Alternative> },
    EndOfStream,
    Error { kind: ErrorKind, message: String },
}

impl RecognitionEvent {
    pub fn is_final(&self) -> bool {
        matches!(self, Self::Final { .. })
    }

    /// Top-ranked transcript of a `Partial` or `Final`.
    pub fn best_transcript(&self) -> Option<&str> {
        match self {
            Self::Partial { alternatives } | Self::Final { alternatives } => {
                alternatives.first().map(|a| a.transcript.as_str())
            }
            _ => None,
        }
    }
}

/// Lifecycle of one connection session.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Connecting,
    Streaming,
    Draining,
    Closed,
}
