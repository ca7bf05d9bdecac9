//! Audio decoding for multiple formats

use super::{container, normalize_peak, resample_to_target, AudioFormat, AudioSignal};
use crate::error::LoadError;
use std::io::Cursor;
use std::path::Path;

/// Interleaved audio as it comes out of a decoder
#[derive(Debug, Clone)]
pub struct AudioData {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
    pub channels: u16,
}

impl AudioData {
    /// Convert to mono by averaging channels
    pub fn to_mono(&self) -> Vec<f32> {
        if self.channels <= 1 {
            return self.samples.clone();
        }

        let mut mono = Vec::with_capacity(self.samples.len() / self.channels as usize);
        for chunk in self.samples.chunks(self.channels as usize) {
            let avg: f32 = chunk.iter().sum::<f32>() / chunk.len() as f32;
            mono.push(avg);
        }
        mono
    }

    pub fn duration_ms(&self) -> u32 {
        if self.sample_rate == 0 || self.channels == 0 {
            return 0;
        }
        (self.samples.len() as f64 / (self.sample_rate * self.channels as u32) as f64 * 1000.0) as u32
    }
}

/// Decode an encoded byte buffer into a mono signal at `target_sample_rate`
pub fn decode_bytes(bytes: &[u8], target_sample_rate: u32) -> Result<AudioSignal, LoadError> {
    if bytes.is_empty() {
        return Err(LoadError::Empty);
    }

    let format = AudioFormat::sniff(bytes);
    log::debug!("Detected {} stream ({} bytes)", format.name(), bytes.len());

    let audio_data = match format {
        AudioFormat::Wav => decode_wav(bytes)?,
        AudioFormat::Mp3 => decode_mp3(bytes)?,
        AudioFormat::Flac => decode_flac(bytes)?,
        AudioFormat::Ogg => decode_ogg(bytes)?,
        AudioFormat::Mp4 | AudioFormat::Matroska | AudioFormat::Unknown => {
            container::decode_with_probe(bytes, format)?
        }
    };

    if audio_data.sample_rate == 0 {
        return Err(LoadError::corrupt(format.name(), "stream reports a zero sample rate"));
    }

    log::debug!(
        "Decoded {:.1}s @ {}Hz, {} channel(s)",
        audio_data.duration_ms() as f64 / 1000.0,
        audio_data.sample_rate,
        audio_data.channels
    );

    let mono = audio_data.to_mono();
    let resampled = resample_to_target(&mono, audio_data.sample_rate, target_sample_rate)?;

    Ok(AudioSignal::new(normalize_peak(resampled), target_sample_rate))
}

/// Read a file and decode it
pub fn decode_file(path: &Path, target_sample_rate: u32) -> Result<AudioSignal, LoadError> {
    if !path.exists() {
        return Err(LoadError::NotFound(path.display().to_string()));
    }
    let bytes = std::fs::read(path)?;
    decode_bytes(&bytes, target_sample_rate)
}

/// Decode WAV data
fn decode_wav(bytes: &[u8]) -> Result<AudioData, LoadError> {
    let mut reader =
        hound::WavReader::new(Cursor::new(bytes)).map_err(|e| LoadError::corrupt("wav", e))?;

    let spec = reader.spec();

    let samples: Vec<f32> = match spec.sample_format {
        hound::SampleFormat::Float => reader
            .samples::<f32>()
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| LoadError::corrupt("wav", e))?,
        hound::SampleFormat::Int => {
            let max_val = (1i64 << (spec.bits_per_sample - 1)) as f32;
            reader
                .samples::<i32>()
                .map(|s| s.map(|v| v as f32 / max_val))
                .collect::<Result<Vec<_>, _>>()
                .map_err(|e| LoadError::corrupt("wav", e))?
        }
    };

    Ok(AudioData {
        samples,
        sample_rate: spec.sample_rate,
        channels: spec.channels,
    })
}

/// Decode MP3 data
fn decode_mp3(bytes: &[u8]) -> Result<AudioData, LoadError> {
    let mut decoder = minimp3::Decoder::new(bytes);
    let mut samples = Vec::new();
    let mut sample_rate = 0;
    let mut channels = 0;

    loop {
        match decoder.next_frame() {
            Ok(frame) => {
                if sample_rate == 0 {
                    sample_rate = frame.sample_rate as u32;
                    channels = frame.channels as u16;
                }
                samples.extend(frame.data.iter().map(|&s| s as f32 / 32768.0));
            }
            Err(minimp3::Error::Eof) => break,
            Err(e) => return Err(LoadError::corrupt("mp3", e)),
        }
    }

    if sample_rate == 0 {
        return Err(LoadError::corrupt("mp3", "no decodable frames"));
    }

    Ok(AudioData {
        samples,
        sample_rate,
        channels,
    })
}

/// Decode FLAC data
fn decode_flac(bytes: &[u8]) -> Result<AudioData, LoadError> {
    let mut reader =
        claxon::FlacReader::new(Cursor::new(bytes)).map_err(|e| LoadError::corrupt("flac", e))?;

    let info = reader.streaminfo();
    let max_val = (1i64 << (info.bits_per_sample - 1)) as f32;
    let samples: Vec<f32> = reader
        .samples()
        .map(|s| s.map(|v| v as f32 / max_val))
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| LoadError::corrupt("flac", e))?;

    Ok(AudioData {
        samples,
        sample_rate: info.sample_rate,
        channels: info.channels as u16,
    })
}

/// Decode OGG Vorbis data
fn decode_ogg(bytes: &[u8]) -> Result<AudioData, LoadError> {
    let mut reader = lewton::inside_ogg::OggStreamReader::new(Cursor::new(bytes))
        .map_err(|e| LoadError::corrupt("ogg", e))?;

    let sample_rate = reader.ident_hdr.audio_sample_rate;
    let channels = reader.ident_hdr.audio_channels as u16;

    let mut samples = Vec::new();
    while let Some(packet) = reader
        .read_dec_packet_itl()
        .map_err(|e| LoadError::corrupt("ogg", e))?
    {
        samples.extend(packet.iter().map(|&s| s as f32 / 32768.0));
    }

    Ok(AudioData {
        samples,
        sample_rate,
        channels,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn wav_bytes(samples: &[i16], sample_rate: u32, channels: u16) -> Vec<u8> {
        let spec = hound::WavSpec {
            channels,
            sample_rate,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut cursor = Cursor::new(Vec::new());
        {
            let mut writer = hound::WavWriter::new(&mut cursor, spec).unwrap();
            for &s in samples {
                writer.write_sample(s).unwrap();
            }
            writer.finalize().unwrap();
        }
        cursor.into_inner()
    }

    #[test]
    fn test_stereo_to_mono() {
        let audio = AudioData {
            samples: vec![1.0, 0.0, 0.5, 0.5],
            sample_rate: 8000,
            channels: 2,
        };
        assert_eq!(audio.to_mono(), vec![0.5, 0.5]);
    }

    #[test]
    fn test_decode_wav_normalizes_peak() {
        let bytes = wav_bytes(&[0, 8192, -16384, 4096], 22050, 1);
        let signal = decode_bytes(&bytes, 22050).unwrap();
        assert_eq!(signal.len(), 4);
        assert_eq!(signal.sample_rate(), 22050);
        let peak = signal.samples().iter().fold(0.0f32, |a, &s| a.max(s.abs()));
        assert!((peak - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_decode_stereo_wav_downmixes() {
        let bytes = wav_bytes(&[1000, 3000, 1000, 3000], 22050, 2);
        let signal = decode_bytes(&bytes, 22050).unwrap();
        assert_eq!(signal.len(), 2);
    }

    #[test]
    fn test_empty_and_garbage_input() {
        assert!(matches!(decode_bytes(&[], 22050), Err(LoadError::Empty)));
        assert!(decode_bytes(b"definitely not audio at all", 22050).is_err());
    }

    #[test]
    fn test_truncated_wav_is_corrupt() {
        let mut bytes = wav_bytes(&[0; 64], 22050, 1);
        bytes.truncate(20);
        assert!(matches!(
            decode_bytes(&bytes, 22050),
            Err(LoadError::Corrupt { format: "wav", .. })
        ));
    }

    #[test]
    fn test_missing_file() {
        let result = decode_file(Path::new("/nonexistent/covermatch/track.wav"), 22050);
        assert!(matches!(result, Err(LoadError::NotFound(_))));
    }
}
