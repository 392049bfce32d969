mod error;

pub mod config;
pub mod decoder;
pub mod feeder;
pub mod policy;
pub mod protocol;
pub mod session;
pub mod target;

mod types;

pub use config::{AudioEncoding, Config, ConfigBuilder, OutputEncoding, ProfanityFilter};
pub use error::{ErrorKind, Result, SpeechError};
pub use feeder::{FeedReader, FeedWriter};
pub use session::{RecognitionStream, Recognizer, RecognizerBuilder};
pub use target::DEFAULT_ENDPOINT;
pub use types::{Alternative, RecognitionEvent, SessionState};
