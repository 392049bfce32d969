use anyhow::{Context, Result, bail};
use std::path::Path;
use symphonia::core::codecs::CODEC_TYPE_FLAC;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;

/// Stream parameters read from a FLAC file's header.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FlacInfo {
    pub sample_rate_hz: u32,
    pub channels: usize,
    pub frames: Option<u64>,
}

/// Reads the header of the file at `path`. The file is uploaded verbatim, so
/// anything other than FLAC is rejected.
pub fn probe_flac(path: &Path) -> Result<FlacInfo> {
    let file = std::fs::File::open(path)
        .with_context(|| format!("cannot open audio file {}", path.display()))?;
    let mss = MediaSourceStream::new(Box::new(file), Default::default());

    let mut hint = Hint::new();
    if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
        hint.with_extension(ext);
    }

    let probed = symphonia::default::get_probe()
        .format(
            &hint,
            mss,
            &FormatOptions::default(),
            &MetadataOptions::default(),
        )
        .with_context(|| format!("cannot parse audio file {}", path.display()))?;

    let Some(track) = probed.format.default_track() else {
        bail!("{} contains no audio track", path.display());
    };
    let params = &track.codec_params;
    if params.codec != CODEC_TYPE_FLAC {
        bail!(
            "{} is not FLAC; only FLAC files can be streamed as-is",
            path.display()
        );
    }
    let Some(sample_rate_hz) = params.sample_rate else {
        bail!("{} does not declare a sample rate", path.display());
    };

    Ok(FlacInfo {
        sample_rate_hz,
        channels: params.channels.map(|c| c.count()).unwrap_or(1),
        frames: params.n_frames,
    })
}
