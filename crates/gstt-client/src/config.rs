//! Recognition options, accumulated through [`ConfigBuilder`] and frozen into a
//! [`Config`] before a stream starts.

use crate::error::{Result, SpeechError};
use http::HeaderValue;
use std::fmt;
use std::str::FromStr;

pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/119.0.0.0 Safari/537.36";
pub const DEFAULT_SAMPLE_RATE_HZ: u32 = 16_000;
pub const AUTO_LANGUAGE: &str = "auto";

/// Format the server uses for the response body.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum OutputEncoding {
    /// Length-prefixed protobuf units (`output=pb`).
    #[default]
    Binary,
    /// Concatenated JSON values (`output=json`).
    Text,
}

impl OutputEncoding {
    /// Unrecognized names fall back to [`OutputEncoding::Binary`].
    pub fn from_name(name: &str) -> Self {
        match name.trim().to_ascii_lowercase().as_str() {
            "json" | "text" => Self::Text,
            _ => Self::Binary,
        }
    }

    pub fn query_value(self) -> &'static str {
        match self {
            Self::Binary => "pb",
            Self::Text => "json",
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord)]
pub enum ProfanityFilter {
    Off = 0,
    Medium = 1,
    #[default]
    Strict = 2,
}

impl ProfanityFilter {
    pub fn level(self) -> u8 {
        self as u8
    }
}

impl FromStr for ProfanityFilter {
    type Err = SpeechError;

    fn from_str(s: &str) -> Result<Self> {
        let level: u64 = s.trim().parse().map_err(|e| {
            SpeechError::invalid_option(
                "profanityFilter",
                s,
                format!("not a non-negative integer ({e})"),
            )
        })?;
        match level {
            0 => Ok(Self::Off),
            1 => Ok(Self::Medium),
            2 => Ok(Self::Strict),
            other => Err(SpeechError::invalid_option(
                "profanityFilter",
                s,
                format!("level {other} out of range, expected 0 (off), 1 (medium) or 2 (strict)"),
            )),
        }
    }
}

/// Codec of the uploaded bytes, declared through the `Content-Type` header.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum AudioEncoding {
    #[default]
    Flac,
    /// Raw signed 16-bit little-endian mono PCM.
    Linear16,
}

impl AudioEncoding {
    pub fn content_type(self, sample_rate_hz: u32) -> String {
        match self {
            Self::Flac => format!("audio/x-flac; rate={sample_rate_hz}"),
            Self::Linear16 => format!("audio/l16; rate={sample_rate_hz}"),
        }
    }
}

impl FromStr for AudioEncoding {
    type Err = SpeechError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "flac" => Ok(Self::Flac),
            "l16" | "linear16" | "pcm" => Ok(Self::Linear16),
            _ => Err(SpeechError::invalid_option(
                "audioEncoding",
                s,
                "expected flac or l16",
            )),
        }
    }
}

/// Immutable recognition options for one stream.
#[derive(Clone, PartialEq)]
pub struct Config {
    language: String,
    continuous: bool,
    interim: bool,
    max_alternatives: u32,
    profanity_filter: ProfanityFilter,
    output_encoding: OutputEncoding,
    credential: String,
    user_agent: String,
    sample_rate_hz: u32,
    audio_encoding: AudioEncoding,
}

impl Config {
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::new()
    }

    pub fn language(&self) -> &str {
        &self.language
    }

    pub fn is_auto_language(&self) -> bool {
        self.language == AUTO_LANGUAGE
    }

    pub fn continuous(&self) -> bool {
        self.continuous
    }

    pub fn interim(&self) -> bool {
        self.interim
    }

    pub fn max_alternatives(&self) -> u32 {
        self.max_alternatives
    }

    pub fn profanity_filter(&self) -> ProfanityFilter {
        self.profanity_filter
    }

    pub fn output_encoding(&self) -> OutputEncoding {
        self.output_encoding
    }

    pub fn credential(&self) -> &str {
        &self.credential
    }

    pub fn user_agent(&self) -> &str {
        &self.user_agent
    }

    pub fn sample_rate_hz(&self) -> u32 {
        self.sample_rate_hz
    }

    pub fn audio_encoding(&self) -> AudioEncoding {
        self.audio_encoding
    }
}

impl Default for Config {
    fn default() -> Self {
        ConfigBuilder::new().build()
    }
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("language", &self.language)
            .field("continuous", &self.continuous)
            .field("interim", &self.interim)
            .field("max_alternatives", &self.max_alternatives)
            .field("profanity_filter", &self.profanity_filter)
            .field("output_encoding", &self.output_encoding)
            .field("credential", &"REDACTED")
            .field("user_agent", &self.user_agent)
            .field("sample_rate_hz", &self.sample_rate_hz)
            .field("audio_encoding", &self.audio_encoding)
            .finish()
    }
}

/// Accumulates options; every setter validates its own input.
#[derive(Clone, Debug)]
pub struct ConfigBuilder {
    inner: Config,
}

impl Default for ConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ConfigBuilder {
    pub fn new() -> Self {
        Self {
            inner: Config {
                language: AUTO_LANGUAGE.to_string(),
                continuous: false,
                interim: false,
                max_alternatives: 1,
                profanity_filter: ProfanityFilter::default(),
                output_encoding: OutputEncoding::default(),
                credential: String::new(),
                user_agent: DEFAULT_USER_AGENT.to_string(),
                sample_rate_hz: DEFAULT_SAMPLE_RATE_HZ,
                audio_encoding: AudioEncoding::default(),
            },
        }
    }

    /// IETF language tag; empty selects [`AUTO_LANGUAGE`].
    pub fn language(mut self, language: impl Into<String>) -> Self {
        let language = language.into();
        let language = language.trim();
        self.inner.language = if language.is_empty() {
            AUTO_LANGUAGE.to_string()
        } else {
            language.to_string()
        };
        self
    }

    pub fn continuous(mut self, continuous: bool) -> Self {
        self.inner.continuous = continuous;
        self
    }

    pub fn interim(mut self, interim: bool) -> Self {
        self.inner.interim = interim;
        self
    }

    pub fn max_alternatives(mut self, value: &str) -> Result<Self> {
        let n: u32 = value.trim().parse().map_err(|e| {
            SpeechError::invalid_option(
                "maxAlternatives",
                value,
                format!("not a non-negative integer ({e})"),
            )
        })?;
        if n == 0 {
            return Err(SpeechError::invalid_option(
                "maxAlternatives",
                value,
                "must be at least 1",
            ));
        }
        self.inner.max_alternatives = n;
        Ok(self)
    }

    pub fn profanity_filter(mut self, value: &str) -> Result<Self> {
        self.inner.profanity_filter = value.parse()?;
        Ok(self)
    }

    /// Lenient: `json`/`text` select text output, anything else binary.
    pub fn output(mut self, name: &str) -> Self {
        self.inner.output_encoding = OutputEncoding::from_name(name);
        self
    }

    pub fn output_encoding(mut self, encoding: OutputEncoding) -> Self {
        self.inner.output_encoding = encoding;
        self
    }

    pub fn credential(mut self, credential: impl Into<String>) -> Self {
        self.inner.credential = credential.into();
        self
    }

    /// Empty selects [`DEFAULT_USER_AGENT`].
    pub fn user_agent(mut self, user_agent: impl Into<String>) -> Result<Self> {
        let user_agent = user_agent.into();
        if user_agent.trim().is_empty() {
            self.inner.user_agent = DEFAULT_USER_AGENT.to_string();
            return Ok(self);
        }
        HeaderValue::from_str(&user_agent)
            .map_err(|e| SpeechError::invalid_option("userAgent", user_agent.as_str(), e))?;
        self.inner.user_agent = user_agent;
        Ok(self)
    }

    pub fn sample_rate_hz(mut self, sample_rate_hz: u32) -> Result<Self> {
        if sample_rate_hz == 0 {
            return Err(SpeechError::invalid_option(
                "sampleRateHz",
                "0",
                "must be positive",
            ));
        }
        self.inner.sample_rate_hz = sample_rate_hz;
        Ok(self)
    }

    pub fn audio_encoding(mut self, encoding: AudioEncoding) -> Self {
        self.inner.audio_encoding = encoding;
        self
    }

    pub fn build(self) -> Config {
        self.inner
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn defaults_match_cli_defaults() {
        let config = Config::default();
        assert_eq!(config.language(), AUTO_LANGUAGE);
        assert!(config.is_auto_language());
        assert!(!config.continuous());
        assert!(!config.interim());
        assert_eq!(config.max_alternatives(), 1);
        assert_eq!(config.profanity_filter(), ProfanityFilter::Strict);
        assert_eq!(config.output_encoding(), OutputEncoding::Binary);
        assert_eq!(config.user_agent(), DEFAULT_USER_AGENT);
        assert_eq!(config.sample_rate_hz(), DEFAULT_SAMPLE_RATE_HZ);
        assert_eq!(config.audio_encoding(), AudioEncoding::Flac);
    }

    #[test]
    fn numeric_options_reject_garbage() {
        let err = ConfigBuilder::new().max_alternatives("three").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidOption);

        let err = ConfigBuilder::new().max_alternatives("-1").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidOption);

        let err = ConfigBuilder::new().max_alternatives("0").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidOption);

        let err = ConfigBuilder::new().profanity_filter("strict").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidOption);

        let err = ConfigBuilder::new().profanity_filter("3").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidOption);
    }

    #[test]
    fn numeric_options_accept_padded_input() {
        let config = ConfigBuilder::new()
            .max_alternatives(" 3 ")
            .unwrap()
            .profanity_filter("0")
            .unwrap()
            .build();
        assert_eq!(config.max_alternatives(), 3);
        assert_eq!(config.profanity_filter(), ProfanityFilter::Off);
    }

    #[test]
    fn output_falls_back_to_binary() {
        assert_eq!(OutputEncoding::from_name("json"), OutputEncoding::Text);
        assert_eq!(OutputEncoding::from_name("JSON"), OutputEncoding::Text);
        assert_eq!(OutputEncoding::from_name("pb"), OutputEncoding::Binary);
        assert_eq!(OutputEncoding::from_name("xml"), OutputEncoding::Binary);
        assert_eq!(OutputEncoding::from_name(""), OutputEncoding::Binary);
    }

    #[test]
    fn empty_user_agent_and_language_fall_back() {
        let config = ConfigBuilder::new()
            .user_agent("  ")
            .unwrap()
            .language("")
            .build();
        assert_eq!(config.user_agent(), DEFAULT_USER_AGENT);
        assert_eq!(config.language(), AUTO_LANGUAGE);
    }

    #[test]
    fn user_agent_must_be_a_valid_header() {
        let err = ConfigBuilder::new().user_agent("bad\nagent").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidOption);
    }

    #[test]
    fn zero_sample_rate_is_rejected() {
        let err = ConfigBuilder::new().sample_rate_hz(0).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidOption);
    }

    #[test]
    fn debug_output_redacts_credential() {
        let config = ConfigBuilder::new().credential("secret-key").build();
        let rendered = format!("{config:?}");
        assert!(!rendered.contains("secret-key"));
        assert!(rendered.contains("REDACTED"));
    }

    #[test]
    fn content_type_declares_rate() {
        assert_eq!(
            AudioEncoding::Flac.content_type(44_100),
            "audio/x-flac; rate=44100"
        );
        assert_eq!(
            AudioEncoding::Linear16.content_type(16_000),
            "audio/l16; rate=16000"
        );
        assert_eq!("l16".parse::<AudioEncoding>().unwrap(), AudioEncoding::Linear16);
        assert!("mp3".parse::<AudioEncoding>().is_err());
    }
}
