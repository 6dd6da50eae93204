use anyhow::Result;
use rubato::{FftFixedIn, Resampler};

const CHUNK: usize = 1024;
const SUB_CHUNKS: usize = 2;

/// Resample planar PCM (one `Vec` per channel) from `sr_in` to `sr_out`.
///
/// The resampler's output delay is trimmed and the result is cut to the
/// exact expected length, so durations survive the conversion.
pub(crate) fn resample(planes: &[Vec<f32>], sr_in: u32, sr_out: u32) -> Result<Vec<Vec<f32>>> {
    if sr_in == sr_out || planes.is_empty() {
        return Ok(planes.to_vec());
    }

    let len = planes[0].len();
    let expected = (len as f64 * sr_out as f64 / sr_in as f64).round() as usize;
    if expected == 0 {
        return Ok(vec![Vec::new(); planes.len()]);
    }

    let mut resampler =
        FftFixedIn::<f32>::new(sr_in as usize, sr_out as usize, CHUNK, SUB_CHUNKS, planes.len())?;
    let delay = resampler.output_delay();

    let mut out = vec![Vec::with_capacity(expected + delay + CHUNK); planes.len()];
    let mut pos = 0;
    while out[0].len() < expected + delay {
        let end = (pos + CHUNK).min(len);
        // Zero-padded input keeps flushing the resampler once input runs out
        let block: Vec<Vec<f32>> = planes
            .iter()
            .map(|plane| {
                let mut chunk = vec![0.0; CHUNK];
                if pos < end {
                    chunk[..end - pos].copy_from_slice(&plane[pos..end]);
                }
                chunk
            })
            .collect();

        let frames = resampler.process(&block, None)?;
        for (o, f) in out.iter_mut().zip(frames) {
            o.extend_from_slice(&f);
        }
        pos += CHUNK;
    }

    for plane in out.iter_mut() {
        plane.drain(..delay);
        plane.truncate(expected);
    }
    Ok(out)
}
