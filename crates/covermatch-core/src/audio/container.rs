//! Fallback decoding through symphonia's format probe

use super::{AudioData, AudioFormat};
use crate::error::LoadError;
use std::io::Cursor;
use symphonia::core::audio::{AudioBufferRef, Signal};
use symphonia::core::codecs::{DecoderOptions, CODEC_TYPE_NULL};
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;

/// Decode the first audio track of any stream symphonia recognizes
pub fn decode_with_probe(bytes: &[u8], format: AudioFormat) -> Result<AudioData, LoadError> {
    let source = Cursor::new(bytes.to_vec());
    let mss = MediaSourceStream::new(Box::new(source), Default::default());

    let mut hint = Hint::new();
    match format {
        AudioFormat::Mp4 => {
            hint.with_extension("m4a");
        }
        AudioFormat::Matroska => {
            hint.with_extension("mkv");
        }
        _ => {}
    }

    let format_opts = FormatOptions {
        enable_gapless: true,
        ..Default::default()
    };

    let probed = symphonia::default::get_probe()
        .format(&hint, mss, &format_opts, &MetadataOptions::default())
        .map_err(|e| {
            log::debug!("Probe failed: {}", e);
            LoadError::UnsupportedFormat
        })?;

    let mut reader = probed.format;

    let track = reader
        .tracks()
        .iter()
        .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
        .ok_or_else(|| LoadError::corrupt(format.name(), "no audio track found"))?;

    let track_id = track.id;
    let codec_params = track.codec_params.clone();

    let mut sample_rate = codec_params.sample_rate.unwrap_or(0);
    let mut channels = codec_params.channels.map(|c| c.count()).unwrap_or(0) as u16;

    let mut decoder = symphonia::default::get_codecs()
        .make(&codec_params, &DecoderOptions::default())
        .map_err(|e| LoadError::corrupt(format.name(), e))?;

    let mut samples = Vec::new();

    loop {
        let packet = match reader.next_packet() {
            Ok(packet) => packet,
            Err(symphonia::core::errors::Error::IoError(e))
                if e.kind() == std::io::ErrorKind::UnexpectedEof =>
            {
                break
            }
            Err(e) => return Err(LoadError::corrupt(format.name(), e)),
        };

        if packet.track_id() != track_id {
            continue;
        }

        let decoded = match decoder.decode(&packet) {
            Ok(decoded) => decoded,
            Err(e) => {
                // Skip corrupted packets and continue
                log::trace!("Skipping undecodable packet: {}", e);
                continue;
            }
        };

        if sample_rate == 0 {
            sample_rate = decoded.spec().rate;
        }
        if channels == 0 {
            channels = decoded.spec().channels.count() as u16;
        }

        append_interleaved(&decoded, &mut samples)?;
    }

    Ok(AudioData {
        samples,
        sample_rate,
        channels: channels.max(1),
    })
}

/// Interleave a decoded buffer as f32 into `out`
fn append_interleaved(decoded: &AudioBufferRef<'_>, out: &mut Vec<f32>) -> Result<(), LoadError> {
    macro_rules! interleave {
        ($buf:expr, $convert:expr) => {{
            let count = $buf.spec().channels.count();
            for frame_idx in 0..$buf.frames() {
                for ch in 0..count {
                    out.push($convert($buf.chan(ch)[frame_idx]));
                }
            }
        }};
    }

    match decoded {
        AudioBufferRef::F32(buf) => interleave!(buf, |s: f32| s),
        AudioBufferRef::F64(buf) => interleave!(buf, |s: f64| s as f32),
        AudioBufferRef::S32(buf) => interleave!(buf, |s: i32| s as f32 / i32::MAX as f32),
        AudioBufferRef::S16(buf) => interleave!(buf, |s: i16| s as f32 / i16::MAX as f32),
        AudioBufferRef::U8(buf) => interleave!(buf, |s: u8| (s as f32 - 128.0) / 128.0),
        _ => return Err(LoadError::corrupt("container", "unsupported sample format")),
    }
    Ok(())
}
