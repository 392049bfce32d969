//! One recognition session: a streaming upload, a response decoded as it
//! arrives, and the event stream handed back to the caller.

use crate::config::Config;
use crate::decoder::FrameDecoder;
use crate::error::{Result, SpeechError};
use crate::feeder::{self, FeedEnd, FeedGuard, FeedReader};
use crate::policy::EventPolicy;
use crate::target::{DEFAULT_ENDPOINT, RequestTarget};
use crate::types::{RecognitionEvent, SessionState};

use futures_util::{Stream, StreamExt};
use std::io;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::io::AsyncRead;
use tokio::sync::oneshot::error::{RecvError, TryRecvError};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{Instrument, Span, debug, info, info_span, trace, warn};
use url::Url;

pub const DEFAULT_EVENT_BUFFER: usize = 64;

const ERROR_BODY_EXCERPT: usize = 256;
const ERROR_BODY_TIMEOUT: Duration = Duration::from_secs(5);

static NEXT_SESSION_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Clone, Debug)]
pub struct RecognizerBuilder {
    endpoint: Option<String>,
    connect_timeout: Option<Duration>,
    idle_timeout: Option<Duration>,
    event_buffer: usize,
    parent_span: Option<Span>,
    http: Option<reqwest::Client>,
}

impl Default for RecognizerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl RecognizerBuilder {
    pub fn new() -> Self {
        Self {
            endpoint: None,
            connect_timeout: None,
            idle_timeout: None,
            event_buffer: DEFAULT_EVENT_BUFFER,
            parent_span: None,
            http: None,
        }
    }

    /// Base URL the query is appended to. Defaults to [`DEFAULT_ENDPOINT`].
    pub fn endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = Some(endpoint.into());
        self
    }

    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = Some(timeout);
        self
    }

    /// Fails the session when the response stays silent for `timeout`.
    pub fn idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = Some(timeout);
        self
    }

    /// Events buffered before the session stops reading the response.
    pub fn event_buffer(mut self, events: usize) -> Self {
        self.event_buffer = events.max(1);
        self
    }

    /// Parent for every session span; the current span is used otherwise.
    pub fn parent_span(mut self, span: Span) -> Self {
        self.parent_span = Some(span);
        self
    }

    /// Reuses an existing client. `connect_timeout` is ignored then.
    pub fn http_client(mut self, client: reqwest::Client) -> Self {
        self.http = Some(client);
        self
    }

    pub fn build(self) -> Result<Recognizer> {
        let raw = self
            .endpoint
            .unwrap_or_else(|| DEFAULT_ENDPOINT.to_string());
        let endpoint = Url::parse(&raw)
            .map_err(|e| SpeechError::invalid_option("endpoint", raw.as_str(), e))?;
        if !matches!(endpoint.scheme(), "http" | "https") {
            return Err(SpeechError::invalid_option(
                "endpoint",
                raw.as_str(),
                "scheme must be http or https",
            ));
        }

        let http = match self.http {
            Some(http) => http,
            None => {
                let mut builder = reqwest::Client::builder();
                if let Some(timeout) = self.connect_timeout {
                    builder = builder.connect_timeout(timeout);
                }
                builder.build()?
            }
        };

        Ok(Recognizer {
            http,
            endpoint,
            idle_timeout: self.idle_timeout,
            event_buffer: self.event_buffer,
            parent_span: self.parent_span,
        })
    }
}

/// Opens recognition sessions against one endpoint.
///
/// Cheap to clone; sessions share the underlying connection pool.
#[derive(Clone, Debug)]
pub struct Recognizer {
    http: reqwest::Client,
    endpoint: Url,
    idle_timeout: Option<Duration>,
    event_buffer: usize,
    parent_span: Option<Span>,
}

impl Recognizer {
    pub fn builder() -> RecognizerBuilder {
        RecognizerBuilder::new()
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    /// Starts a session that uploads everything written to `source`.
    ///
    /// `sample_rate_hz` is declared in the request's `Content-Type` and takes
    /// precedence over [`Config::sample_rate_hz`]. Option problems are
    /// reported here, before any connection is attempted. Must be called from
    /// within a Tokio runtime.
    pub fn stream(
        &self,
        mut source: FeedReader,
        sample_rate_hz: u32,
        config: &Config,
    ) -> Result<RecognitionStream> {
        if sample_rate_hz == 0 {
            return Err(SpeechError::invalid_option(
                "sampleRateHz",
                "0",
                "must be a positive integer",
            ));
        }
        let target = RequestTarget::new(&self.endpoint, config, sample_rate_hz)?;

        let id = NEXT_SESSION_ID.fetch_add(1, Ordering::Relaxed);
        let continuous = config.continuous();
        let interim = config.interim();
        let span = match &self.parent_span {
            Some(parent) => info_span!(parent: parent, "gstt.session", id, continuous, interim),
            None => info_span!("gstt.session", id, continuous, interim),
        };

        let (events_tx, events_rx) = mpsc::channel(self.event_buffer);
        let (state_tx, state_rx) = watch::channel(SessionState::Idle);
        let (cancel_tx, cancel_rx) = oneshot::channel();

        let upload = Upload::new(source.watch_end());
        let driver = SessionDriver {
            http: self.http.clone(),
            target,
            _guard: source.guard(),
            decoder: FrameDecoder::new(config.output_encoding()),
            policy: EventPolicy::for_config(config),
            events: events_tx,
            state: state_tx,
            idle_timeout: self.idle_timeout,
            outcome: None,
        };
        let task = tokio::spawn(driver.run(source, upload, cancel_rx).instrument(span));

        Ok(RecognitionStream {
            events: events_rx,
            state: state_rx,
            cancel: Some(cancel_tx),
            driver: task,
        })
    }

    /// Starts a session fed from `reader` by a separate pump task.
    ///
    /// The pump resolves with the number of bytes uploaded, or with
    /// `ConduitClosed` if the session ended first.
    pub fn stream_reader<R>(
        &self,
        reader: R,
        sample_rate_hz: u32,
        config: &Config,
    ) -> Result<(RecognitionStream, JoinHandle<Result<u64>>)>
    where
        R: AsyncRead + Send + Unpin + 'static,
    {
        let (writer, source) = feeder::channel(feeder::DEFAULT_CAPACITY);
        let stream = self.stream(source, sample_rate_hz, config)?;
        let pump = tokio::spawn(writer.pump(reader).in_current_span());
        Ok((stream, pump))
    }
}

/// Caller's handle on a running session.
///
/// Events arrive in server order and always end with exactly one
/// [`RecognitionEvent::EndOfStream`]. Dropping the handle cancels the session.
#[derive(Debug)]
pub struct RecognitionStream {
    events: mpsc::Receiver<RecognitionEvent>,
    state: watch::Receiver<SessionState>,
    cancel: Option<oneshot::Sender<()>>,
    driver: JoinHandle<Result<()>>,
}

impl RecognitionStream {
    /// `None` once the session is closed and every event was taken.
    pub async fn recv(&mut self) -> Option<RecognitionEvent> {
        self.events.recv().await
    }

    pub fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    pub fn state_changes(&self) -> watch::Receiver<SessionState> {
        self.state.clone()
    }

    /// Stops the session. Pending events are still delivered, followed by
    /// `EndOfStream` if the session had not ended yet.
    pub fn cancel(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            let _ = cancel.send(());
        }
    }

    /// Discards remaining events and waits for the session to close.
    ///
    /// Returns the error behind the session's `Error` event, if any.
    /// Cancellation is not an error.
    pub async fn finish(mut self) -> Result<()> {
        while self.events.recv().await.is_some() {}
        join_driver(&mut self.driver).await
    }

    /// Collects every remaining event, then the session outcome.
    pub async fn into_events(mut self) -> (Vec<RecognitionEvent>, Result<()>) {
        let mut events = Vec::new();
        while let Some(event) = self.events.recv().await {
            events.push(event);
        }
        let outcome = join_driver(&mut self.driver).await;
        (events, outcome)
    }
}

impl Stream for RecognitionStream {
    type Item = RecognitionEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.events.poll_recv(cx)
    }
}

async fn join_driver(driver: &mut JoinHandle<Result<()>>) -> Result<()> {
    match driver.await {
        Ok(outcome) => outcome,
        Err(err) => Err(SpeechError::Transport(format!("session task failed: {err}"))),
    }
}

/// How far the upload got, as seen from the session.
struct Upload {
    end: oneshot::Receiver<FeedEnd>,
    done: bool,
    failure: Option<String>,
}

impl Upload {
    fn new(end: oneshot::Receiver<FeedEnd>) -> Self {
        Self {
            end,
            done: false,
            failure: None,
        }
    }

    /// `None` when the body was dropped by the transport before the
    /// producer finished.
    fn record(&mut self, end: std::result::Result<FeedEnd, RecvError>) -> Option<FeedEnd> {
        self.done = true;
        let end = end.ok()?;
        if let FeedEnd::Failed(message) = &end {
            self.failure = Some(message.clone());
        }
        Some(end)
    }

    /// Picks up a producer failure that was signalled but not yet observed.
    fn source_failure(&mut self) -> Option<SpeechError> {
        if !self.done {
            match self.end.try_recv() {
                Ok(end) => {
                    self.record(Ok(end));
                }
                Err(TryRecvError::Closed) => self.done = true,
                Err(TryRecvError::Empty) => {}
            }
        }
        self.failure
            .take()
            .map(|message| SpeechError::SourceRead(io::Error::other(message)))
    }

    /// A transport error caused by the audio source is a source failure.
    fn classify(&mut self, err: reqwest::Error) -> SpeechError {
        self.source_failure().unwrap_or_else(|| err.into())
    }
}

struct SessionDriver {
    http: reqwest::Client,
    target: RequestTarget,
    _guard: FeedGuard,
    decoder: FrameDecoder,
    policy: EventPolicy,
    events: mpsc::Sender<RecognitionEvent>,
    state: watch::Sender<SessionState>,
    idle_timeout: Option<Duration>,
    outcome: Option<SpeechError>,
}

impl SessionDriver {
    async fn run(
        mut self,
        source: FeedReader,
        mut upload: Upload,
        mut cancel: oneshot::Receiver<()>,
    ) -> Result<()> {
        info!(url = %self.target.redacted(), "opening recognition stream");
        self.set_state(SessionState::Connecting);

        let request = self
            .http
            .post(self.target.url.clone())
            .headers(self.target.headers.clone())
            .body(reqwest::Body::wrap_stream(source))
            .send();
        tokio::pin!(request);

        let response = loop {
            tokio::select! {
                _ = &mut cancel => return self.cancelled().await,
                end = &mut upload.end, if !upload.done => {
                    upload.record(end);
                }
                res = &mut request => break res,
            }
        };

        let response = match response {
            Ok(response) => response,
            Err(err) => {
                let err = upload.classify(err);
                return self.terminate(err).await;
            }
        };

        let status = response.status();
        if let Some(err) = upload.source_failure() {
            return self.terminate(err).await;
        }
        if !status.is_success() {
            let body = tokio::time::timeout(ERROR_BODY_TIMEOUT, response.text())
                .await
                .ok()
                .and_then(|body| body.ok())
                .unwrap_or_default();
            let err = SpeechError::Transport(format!(
                "unexpected HTTP status {status}: {}",
                excerpt(&body)
            ));
            return self.terminate(err).await;
        }

        debug!(%status, "response headers received");
        self.set_state(SessionState::Streaming);
        if upload.done {
            self.set_state(SessionState::Draining);
        }

        let body = response.bytes_stream();
        tokio::pin!(body);

        loop {
            tokio::select! {
                _ = &mut cancel => return self.cancelled().await,
                end = &mut upload.end, if !upload.done => {
                    match upload.record(end) {
                        Some(FeedEnd::Closed) => {
                            info!("upload complete, draining responses");
                            self.set_state(SessionState::Draining);
                        }
                        Some(FeedEnd::Failed(message)) => {
                            let err = SpeechError::SourceRead(io::Error::other(message));
                            return self.terminate(err).await;
                        }
                        None => {}
                    }
                }
                chunk = body.next() => match chunk {
                    Some(Ok(bytes)) => {
                        trace!(len = bytes.len(), "response chunk");
                        let events = self.decoder.push(&bytes);
                        if self.deliver(events).await {
                            return self.close();
                        }
                    }
                    Some(Err(err)) => {
                        let err = upload.classify(err);
                        return self.terminate(err).await;
                    }
                    None => {
                        let events = self.decoder.finish();
                        self.deliver(events).await;
                        return self.close();
                    }
                },
                () = idle(self.idle_timeout) => {
                    let err = SpeechError::Transport(format!(
                        "no response data within {:?}",
                        self.idle_timeout.unwrap_or_default()
                    ));
                    return self.terminate(err).await;
                }
            }
        }
    }

    fn set_state(&self, state: SessionState) {
        let previous = self.state.send_replace(state);
        if previous != state {
            debug!(from = ?previous, to = ?state, "session state");
        }
    }

    /// Returns true once nothing more will be delivered.
    async fn deliver(&mut self, events: Vec<RecognitionEvent>) -> bool {
        for event in events {
            for out in self.policy.apply(event) {
                match &out {
                    RecognitionEvent::Error { kind, message } => {
                        warn!(%kind, %message, "session failed");
                        if self.outcome.is_none() {
                            self.outcome = Some(SpeechError::from_kind(*kind, message.clone()));
                        }
                    }
                    RecognitionEvent::Final { .. } => {
                        debug!(
                            transcript = out.best_transcript().unwrap_or_default(),
                            "final result"
                        );
                    }
                    _ => {}
                }

                if self.events.send(out).await.is_err() {
                    debug!("event receiver dropped");
                    return true;
                }
            }
        }
        self.policy.is_done()
    }

    async fn terminate(mut self, err: SpeechError) -> Result<()> {
        let event = RecognitionEvent::Error {
            kind: err.kind(),
            message: err.to_string(),
        };
        if self.outcome.is_none() {
            self.outcome = Some(err);
        }
        self.deliver(vec![event]).await;
        self.close()
    }

    async fn cancelled(mut self) -> Result<()> {
        info!("session cancelled");
        self.deliver(vec![RecognitionEvent::EndOfStream]).await;
        self.close()
    }

    fn close(mut self) -> Result<()> {
        self.set_state(SessionState::Closed);
        info!(
            units = self.decoder.units(),
            finals = self.policy.finals(),
            "session closed"
        );
        match self.outcome.take() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

async fn idle(timeout: Option<Duration>) {
    match timeout {
        Some(timeout) => tokio::time::sleep(timeout).await,
        None => std::future::pending().await,
    }
}

fn excerpt(body: &str) -> &str {
    let body = body.trim();
    match body.char_indices().nth(ERROR_BODY_EXCERPT) {
        Some((idx, _)) => &body[..idx],
        None => body,
    }
}
