use anyhow::{Context, Result, bail};
use clap::Parser;
use gstt_client::config::DEFAULT_SAMPLE_RATE_HZ;
use gstt_client::{
    Alternative, AudioEncoding, Config, ConfigBuilder, DEFAULT_ENDPOINT, ErrorKind,
    RecognitionEvent, Recognizer, SpeechError,
};
use std::io::{IsTerminal, Write};
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

mod source;

#[derive(Parser, Debug)]
#[command(author, version, about = "Stream audio to a speech recognition endpoint")]
struct Args {
    /// Log at debug level (overrides RUST_LOG)
    #[arg(long)]
    verbose: bool,

    /// FLAC file to transcribe; audio is read from stdin when omitted
    #[arg(long)]
    file: Option<PathBuf>,

    /// API key sent with the request
    #[arg(long, env = "GSTT_API_KEY", hide_env_values = true)]
    key: Option<String>,

    /// Response encoding: 'pb' for binary or 'json' for text
    #[arg(long, default_value = "pb", value_parser = ["pb", "json"])]
    output: String,

    /// IETF language tag of the recording, e.g. 'en-US'; 'auto' lets the server detect it
    #[arg(long, default_value = "auto")]
    language: String,

    /// Keep transcribing across pauses instead of stopping after the first utterance
    #[arg(long)]
    continuous: bool,

    /// Show interim hypotheses while audio is still being processed
    #[arg(long)]
    interim: bool,

    /// Number of alternative transcriptions to request
    #[arg(long, default_value = "1")]
    max_alts: String,

    /// Profanity filter ('0'=off, '1'=medium, '2'=strict)
    #[arg(long, default_value = "2")]
    pfilter: String,

    /// User-Agent header sent with the request
    #[arg(long)]
    user_agent: Option<String>,

    /// Recognition endpoint
    #[arg(long, env = "GSTT_ENDPOINT", default_value = DEFAULT_ENDPOINT)]
    endpoint: String,

    /// Codec of the audio read from stdin ('flac' or 'l16')
    #[arg(long, default_value = "flac")]
    encoding: AudioEncoding,

    /// Sample rate of the audio read from stdin
    #[arg(long, default_value_t = DEFAULT_SAMPLE_RATE_HZ)]
    sample_rate: u32,

    #[arg(long, default_value = "10")]
    connect_timeout_secs: u64,

    /// Fail when the server sends nothing for this long
    #[arg(long)]
    idle_timeout_secs: Option<u64>,
}

fn main() -> ExitCode {
    let _ = dotenvy::dotenv();
    let args = Args::parse();
    init_tracing(args.verbose);

    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(err) => {
            eprintln!("error: cannot start runtime: {err}");
            return ExitCode::FAILURE;
        }
    };
    let outcome = runtime.block_on(run(args));
    // A pending stdin read would otherwise keep the process alive.
    runtime.shutdown_background();

    match outcome {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("error: {err:#}");
            ExitCode::from(exit_status(&err))
        }
    }
}

fn init_tracing(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

/// Distinct status per failure kind; 1 for anything outside the client.
fn exit_status(err: &anyhow::Error) -> u8 {
    let kind = err
        .chain()
        .find_map(|cause| cause.downcast_ref::<SpeechError>())
        .map(SpeechError::kind);
    match kind {
        Some(ErrorKind::InvalidOption) => 2,
        Some(ErrorKind::SourceRead) => 3,
        Some(ErrorKind::Transport) => 4,
        Some(ErrorKind::Decode) => 5,
        Some(ErrorKind::ConduitClosed) => 6,
        Some(ErrorKind::Remote) => 7,
        None => 1,
    }
}

fn build_config(args: &Args) -> Result<Config> {
    let mut builder = ConfigBuilder::new()
        .language(args.language.as_str())
        .continuous(args.continuous)
        .interim(args.interim)
        .output(&args.output)
        .audio_encoding(args.encoding)
        .max_alternatives(&args.max_alts)?
        .profanity_filter(&args.pfilter)?
        .sample_rate_hz(args.sample_rate)?;

    if let Some(key) = &args.key {
        builder = builder.credential(key.as_str());
    }
    if let Some(user_agent) = &args.user_agent {
        builder = builder.user_agent(user_agent.as_str())?;
    }
    Ok(builder.build())
}

fn build_recognizer(args: &Args) -> Result<Recognizer> {
    let mut builder = Recognizer::builder()
        .endpoint(args.endpoint.as_str())
        .connect_timeout(Duration::from_secs(args.connect_timeout_secs));
    if let Some(secs) = args.idle_timeout_secs {
        builder = builder.idle_timeout(Duration::from_secs(secs));
    }
    Ok(builder.build()?)
}

async fn run(args: Args) -> Result<()> {
    let config = build_config(&args)?;
    let recognizer = build_recognizer(&args)?;
    info!(endpoint = %recognizer.endpoint(), language = config.language(), "gstt starting");

    let (mut stream, pump) = match &args.file {
        Some(path) => {
            if config.audio_encoding() != AudioEncoding::Flac {
                bail!("--file uploads FLAC as-is; --encoding must be flac");
            }
            let flac = source::probe_flac(path)?;
            info!(
                path = %path.display(),
                sample_rate_hz = flac.sample_rate_hz,
                channels = flac.channels,
                "done parsing file"
            );
            let file = tokio::fs::File::open(path)
                .await
                .with_context(|| format!("cannot open audio file {}", path.display()))?;
            recognizer.stream_reader(file, flac.sample_rate_hz, &config)?
        }
        None => {
            info!(sample_rate_hz = config.sample_rate_hz(), "reading audio from stdin");
            recognizer.stream_reader(tokio::io::stdin(), config.sample_rate_hz(), &config)?
        }
    };

    let stderr_is_tty = std::io::stderr().is_terminal();
    let mut transcript = TranscriptOutput::new(config.max_alternatives() > 1);
    let mut cancelled = false;

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c(), if !cancelled => {
                cancelled = true;
                clear_status_line(stderr_is_tty);
                eprintln!("Stopping...");
                stream.cancel();
            }
            event = stream.recv() => {
                let Some(event) = event else {
                    break;
                };
                match event {
                    RecognitionEvent::Partial { alternatives } => {
                        if stderr_is_tty
                            && let Some(best) = alternatives.first()
                        {
                            render_status_line(&best.transcript);
                        }
                    }
                    RecognitionEvent::Final { alternatives } => {
                        clear_status_line(stderr_is_tty);
                        transcript.write_final(&alternatives)?;
                    }
                    RecognitionEvent::Error { kind, message } => {
                        clear_status_line(stderr_is_tty);
                        debug!(%kind, %message, "session reported an error");
                    }
                    RecognitionEvent::EndOfStream => {
                        clear_status_line(stderr_is_tty);
                    }
                }
            }
        }
    }

    transcript.flush()?;
    let outcome = stream.finish().await;
    if pump.is_finished() {
        match pump.await {
            Ok(Ok(bytes)) => debug!(bytes, "upload finished"),
            Ok(Err(err)) => debug!(error = %err, "upload stopped"),
            Err(err) => debug!(error = %err, "upload task failed"),
        }
    }
    outcome?;
    Ok(())
}

fn render_status_line(text: &str) {
    eprint!("\r\x1b[2K{text}");
    let _ = std::io::stderr().flush();
}

fn clear_status_line(stderr_is_tty: bool) {
    if stderr_is_tty {
        eprint!("\r\x1b[2K");
        let _ = std::io::stderr().flush();
    }
}

struct TranscriptOutput {
    writer: std::io::BufWriter<std::io::Stdout>,
    show_alternatives: bool,
}

impl TranscriptOutput {
    fn new(show_alternatives: bool) -> Self {
        Self {
            writer: std::io::BufWriter::new(std::io::stdout()),
            show_alternatives,
        }
    }

    fn write_final(&mut self, alternatives: &[Alternative]) -> std::io::Result<()> {
        format_final(&mut self.writer, alternatives, self.show_alternatives)?;
        self.writer.flush()
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.writer.flush()
    }
}

fn format_final(
    out: &mut impl Write,
    alternatives: &[Alternative],
    show_alternatives: bool,
) -> std::io::Result<()> {
    if !show_alternatives {
        if let Some(best) = alternatives.first() {
            writeln!(out, "{}", best.transcript)?;
        }
        return Ok(());
    }

    for (rank, alt) in alternatives.iter().enumerate() {
        match alt.confidence {
            Some(confidence) => {
                writeln!(out, "{}. {} ({confidence:.2})", rank + 1, alt.transcript)?
            }
            None => writeln!(out, "{}. {}", rank + 1, alt.transcript)?,
        }
    }
    Ok(())
}
