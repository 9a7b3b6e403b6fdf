use crate::core::state::AudioBuffer;
use anyhow::{anyhow, Context, Result};
use log::debug;
use std::io::{Cursor, Read, Seek, SeekFrom, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

pub const DEFAULT_SAMPLE_RATE: u32 = 24000;

/// Speech services hand back headerless 16-bit mono PCM.
const PCM_CHANNELS: u16 = 1;
const PCM_BITS_PER_SAMPLE: u16 = 16;

/// Creates decoding contexts. A run asks for one lazily and reuses it for
/// every segment.
pub trait AudioBackend: Send + Sync {
    fn create_context(&self) -> Result<Arc<dyn AudioContext>>;
}

pub trait AudioContext: Send + Sync {
    /// Decodes a complete container (WAV) into a playable buffer.
    fn decode_audio_data(&self, data: &[u8]) -> Result<AudioBuffer>;
    fn close(&self);
}

/// Reads the `rate=<n>` parameter of a media type such as
/// `audio/L16;codec=pcm;rate=24000`.
pub fn parse_sample_rate(mime_type: Option<&str>) -> u32 {
    mime_type
        .into_iter()
        .flat_map(|m| m.split(';'))
        .filter_map(|param| param.trim().strip_prefix("rate="))
        .find_map(|rate| rate.trim().parse::<u32>().ok())
        .filter(|rate| *rate > 0)
        .unwrap_or(DEFAULT_SAMPLE_RATE)
}

/// Wraps raw little-endian 16-bit mono PCM in a RIFF/WAVE container. A
/// trailing odd byte is dropped.
pub fn pcm_to_wav(pcm: &[u8], sample_rate: u32) -> Result<Vec<u8>> {
    let spec = hound::WavSpec {
        channels: PCM_CHANNELS,
        sample_rate,
        bits_per_sample: PCM_BITS_PER_SAMPLE,
        sample_format: hound::SampleFormat::Int,
    };
    let samples = pcm
        .chunks_exact(2)
        .map(|pair| i16::from_le_bytes([pair[0], pair[1]]));
    write_wav(spec, samples)
}

/// Encodes a decoded buffer back to 16-bit WAV for writing to disk.
pub fn encode_wav(buffer: &AudioBuffer) -> Result<Vec<u8>> {
    let spec = hound::WavSpec {
        channels: buffer.channels,
        sample_rate: buffer.sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let samples = buffer
        .samples
        .iter()
        .map(|sample| (sample.clamp(-1.0, 1.0) * i16::MAX as f32) as i16);
    write_wav(spec, samples)
}

fn write_wav(spec: hound::WavSpec, samples: impl Iterator<Item = i16>) -> Result<Vec<u8>> {
    let mut cursor = Cursor::new(Vec::new());
    {
        let mut writer = hound::WavWriter::new(&mut cursor, spec)?;
        for sample in samples {
            writer.write_sample(sample)?;
        }
        writer.finalize()?;
    }
    Ok(cursor.into_inner())
}

pub struct WavBackend;

impl AudioBackend for WavBackend {
    fn create_context(&self) -> Result<Arc<dyn AudioContext>> {
        debug!("Opening WAV decoding context");
        Ok(Arc::new(WavContext::default()))
    }
}

#[derive(Default)]
pub struct WavContext {
    closed: AtomicBool,
}

impl WavContext {
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

impl AudioContext for WavContext {
    fn decode_audio_data(&self, data: &[u8]) -> Result<AudioBuffer> {
        if self.is_closed() {
            return Err(anyhow!("Audio context is closed"));
        }

        let reader = hound::WavReader::new(Cursor::new(data)).context("Failed to read WAV")?;
        let spec = reader.spec();

        let samples: Vec<f32> = match spec.sample_format {
            hound::SampleFormat::Int => {
                let max_val = (1i64 << (spec.bits_per_sample - 1)) as f32;
                reader
                    .into_samples::<i32>()
                    .map(|s| s.map(|v| v as f32 / max_val))
                    .collect::<std::result::Result<Vec<_>, _>>()?
            }
            hound::SampleFormat::Float => reader
                .into_samples::<f32>()
                .collect::<std::result::Result<Vec<_>, _>>()?,
        };

        if samples.is_empty() {
            return Err(anyhow!("WAV contains no samples"));
        }

        Ok(AudioBuffer {
            sample_rate: spec.sample_rate,
            channels: spec.channels,
            samples: Arc::from(samples),
        })
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

struct WavInfo {
    fmt_content: Vec<u8>,
    data_offset: u64,
    data_size: u32,
}

fn scan_wav<R: Read + Seek>(f: &mut R) -> Result<WavInfo> {
    let mut id = [0u8; 4];
    f.read_exact(&mut id)?;
    if &id != b"RIFF" {
        return Err(anyhow!("Not a RIFF file"));
    }

    // Skip File Size
    f.seek(SeekFrom::Current(4))?;

    f.read_exact(&mut id)?;
    if &id != b"WAVE" {
        return Err(anyhow!("Not a WAVE file"));
    }

    let mut fmt_content: Option<Vec<u8>> = None;
    let mut data_offset: Option<u64> = None;
    let mut data_size: Option<u32> = None;

    loop {
        let mut chunk_id = [0u8; 4];
        let n = f.read(&mut chunk_id)?;
        if n == 0 {
            break;
        }
        if n < 4 {
            return Err(anyhow!("Unexpected EOF reading chunk ID"));
        }

        let mut size_buf = [0u8; 4];
        f.read_exact(&mut size_buf)?;
        let chunk_size = u32::from_le_bytes(size_buf);

        if &chunk_id == b"fmt " {
            let mut buf = vec![0u8; chunk_size as usize];
            f.read_exact(&mut buf)?;
            fmt_content = Some(buf);
        } else if &chunk_id == b"data" {
            data_offset = Some(f.stream_position()?);
            data_size = Some(chunk_size);
            break;
        } else {
            f.seek(SeekFrom::Current(chunk_size as i64))?;
        }
    }

    Ok(WavInfo {
        fmt_content: fmt_content.ok_or_else(|| anyhow!("Missing fmt chunk"))?,
        data_offset: data_offset.ok_or_else(|| anyhow!("Missing data chunk"))?,
        data_size: data_size.ok_or_else(|| anyhow!("Missing data chunk size"))?,
    })
}

/// Joins WAV files by concatenating their data chunks. All inputs must share
/// the same fmt chunk.
pub fn merge_wav(inputs: &[Vec<u8>]) -> Result<Vec<u8>> {
    let Some(first) = inputs.first() else {
        return Ok(Vec::new());
    };

    let base_fmt = scan_wav(&mut Cursor::new(first))?.fmt_content;

    let mut total_data_size: u32 = 0;
    let mut infos = Vec::with_capacity(inputs.len());
    for (i, input) in inputs.iter().enumerate() {
        let info = scan_wav(&mut Cursor::new(input))
            .with_context(|| format!("Failed to parse WAV #{}", i + 1))?;
        if info.fmt_content != base_fmt {
            return Err(anyhow!(
                "WAV format mismatch in input #{}. All segments must have same sample rate/channels.",
                i + 1
            ));
        }
        total_data_size += info.data_size;
        infos.push(info);
    }

    let mut out = Cursor::new(Vec::new());
    out.write_all(b"RIFF")?;
    // File Size = 4 (WAVE) + 8 (fmt hdr) + fmt_len + 8 (data hdr) + data_len
    let chunk_size = 4 + 8 + base_fmt.len() as u32 + 8 + total_data_size;
    out.write_all(&chunk_size.to_le_bytes())?;
    out.write_all(b"WAVE")?;

    out.write_all(b"fmt ")?;
    out.write_all(&(base_fmt.len() as u32).to_le_bytes())?;
    out.write_all(&base_fmt)?;

    out.write_all(b"data")?;
    out.write_all(&total_data_size.to_le_bytes())?;

    for (input, info) in inputs.iter().zip(&infos) {
        let start = info.data_offset as usize;
        let end = (start + info.data_size as usize).min(input.len());
        out.write_all(&input[start..end])?;
    }

    Ok(out.into_inner())
}
