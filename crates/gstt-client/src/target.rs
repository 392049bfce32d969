//! Request target and headers derived from a [`Config`].

use crate::config::Config;
use crate::error::{Result, SpeechError};
use http::header::{CONTENT_TYPE, USER_AGENT};
use http::{HeaderMap, HeaderValue};
use url::Url;

pub const DEFAULT_ENDPOINT: &str = "https://www.google.com/speech-api/v2/recognize";

const CLIENT_NAME: &str = "chromium";
const KEY_PARAM: &str = "key";

/// Everything the transport needs to open the upload, minus the body.
#[derive(Clone, Debug)]
pub struct RequestTarget {
    pub url: Url,
    pub headers: HeaderMap,
}

impl RequestTarget {
    pub fn new(endpoint: &Url, config: &Config, sample_rate_hz: u32) -> Result<Self> {
        let url = build_target_url(endpoint, config);

        let mut headers = HeaderMap::new();
        let content_type = config.audio_encoding().content_type(sample_rate_hz);
        headers.insert(
            CONTENT_TYPE,
            HeaderValue::from_str(&content_type)
                .map_err(|e| SpeechError::invalid_option("sampleRateHz", content_type, e))?,
        );
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(config.user_agent())
                .map_err(|e| SpeechError::invalid_option("userAgent", config.user_agent(), e))?,
        );

        Ok(Self { url, headers })
    }

    pub fn redacted(&self) -> String {
        redact_url(&self.url)
    }
}

/// The sample rate is not part of the query; it travels in `Content-Type`.
pub fn build_target_url(endpoint: &Url, config: &Config) -> Url {
    let mut url = endpoint.clone();

    {
        let mut pairs = url.query_pairs_mut();
        if !config.credential().is_empty() {
            pairs.append_pair(KEY_PARAM, config.credential());
        }
        if !config.is_auto_language() {
            pairs.append_pair("lang", config.language());
        }
        if config.continuous() {
            pairs.append_key_only("continuous");
        }
        if config.interim() {
            pairs.append_key_only("interim");
        }
        pairs.append_pair("maxAlternatives", &config.max_alternatives().to_string());
        pairs.append_pair("pFilter", &config.profanity_filter().level().to_string());
        pairs.append_pair("output", config.output_encoding().query_value());
        pairs.append_pair("client", CLIENT_NAME);
    }

    url
}

pub fn redact_url(url: &Url) -> String {
    let mut url = url.clone();
    let pairs: Vec<(String, String)> = url
        .query_pairs()
        .map(|(k, v)| {
            if k == KEY_PARAM {
                (k.to_string(), "REDACTED".to_string())
            } else {
                (k.to_string(), v.to_string())
            }
        })
        .collect();

    if !pairs.is_empty() {
        url.query_pairs_mut().clear().extend_pairs(pairs);
    }
    url.to_string()
}
