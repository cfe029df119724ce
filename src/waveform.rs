//! Waveform synthesis for the playback buffer.
//!
//! Stateless generators producing digital-code arrays sized exactly to the
//! circular playback buffer ([`BufferLayout::sample_size`] samples). Any
//! other length produces a glitch at the DDR wraparound, so every function
//! here either fills the buffer exactly or fails before any hardware is
//! touched.
//!
//! Conversion from volts to digital codes is the caller's business; all
//! parameters here are codes.

use crate::ddr::BufferLayout;
use crate::error::{Error, Result};
use std::f64::consts::PI;
use std::ops::Range;

/// One segment of a [`chirp`] waveform.
#[derive(Debug, Clone, PartialEq)]
pub struct ChirpSegment {
    /// Realized (possibly grid-snapped) frequency of the segment in Hz.
    pub frequency: f64,
    /// Sample index range `[start, end)` the segment occupies.
    pub range: Range<usize>,
}

/// Finds the grid frequency closest to `freq`.
///
/// A grid frequency fits an integer number of periods into the playback
/// buffer, so the waveform is continuous across the DDR wraparound.
/// Fails when fewer than two samples per period would remain.
pub fn closest_frequency(layout: &BufferLayout, freq: f64) -> Result<f64> {
    closest_frequency_for(layout, freq, layout.sample_size)
}

/// Finds the closest frequency fitting an integer number of periods into
/// `length` samples.
pub fn closest_frequency_for(layout: &BufferLayout, freq: f64, length: usize) -> Result<f64> {
    if !freq.is_finite() || freq <= 0.0 {
        return Err(Error::Configuration(format!(
            "frequency must be positive, got {freq}"
        )));
    }
    let samples_per_period = (1.0 / freq) / layout.update_period;
    if samples_per_period <= 2.0 {
        return Err(Error::Range(format!(
            "frequency {freq} Hz is too high for the {:.0} ns update period",
            layout.update_period * 1e9
        )));
    }
    let total_periods = (length as f64 / samples_per_period).round();
    let samples_per_period = length as f64 / total_periods;
    Ok(1.0 / (layout.update_period * samples_per_period))
}

/// Generates a sine wave filling the playback buffer.
///
/// Produces `amplitude * sin(2*pi*f*t) + offset` sampled at the DAC update
/// period. With `snap_to_grid` the frequency is first moved to the closest
/// grid frequency. Returns the buffer and the realized frequency.
///
/// Fails with [`Error::Range`] when `amplitude > offset` or any sample
/// leaves the 16-bit code range.
pub fn sine(
    layout: &BufferLayout,
    amplitude: u16,
    frequency: f64,
    offset: u16,
    snap_to_grid: bool,
) -> Result<(Vec<u16>, f64)> {
    if amplitude > offset {
        return Err(Error::Range(format!(
            "sine amplitude {amplitude} exceeds offset {offset}"
        )));
    }
    let frequency = if snap_to_grid {
        closest_frequency(layout, frequency)?
    } else {
        frequency
    };
    let seq = sine_segment(layout, amplitude, frequency, offset, layout.sample_size)?;
    Ok((seq, frequency))
}

/// Generates a chirp: consecutive sine segments at different frequencies.
///
/// Each segment spans `periods[i]` periods of its own (possibly snapped)
/// frequency, except the final segment, which exactly fills the remaining
/// buffer. The returned segments partition `[0, sample_size)` with no gap
/// or overlap.
pub fn chirp(
    layout: &BufferLayout,
    amplitude: u16,
    frequencies: &[f64],
    periods: &[u32],
    offset: u16,
    snap_to_grid: bool,
) -> Result<(Vec<u16>, Vec<ChirpSegment>)> {
    if amplitude > offset {
        return Err(Error::Range(format!(
            "chirp amplitude {amplitude} exceeds offset {offset}"
        )));
    }
    if frequencies.is_empty() {
        return Err(Error::Configuration(
            "chirp needs at least one frequency".to_string(),
        ));
    }
    if frequencies.len() != periods.len() {
        return Err(Error::Configuration(format!(
            "chirp got {} frequencies but {} period counts",
            frequencies.len(),
            periods.len()
        )));
    }
    let mut out = Vec::with_capacity(layout.sample_size);
    let mut segments = Vec::with_capacity(frequencies.len());
    for (i, (&freq, &count)) in frequencies.iter().zip(periods.iter()).enumerate() {
        let last = i == frequencies.len() - 1;
        let length = if last {
            layout.sample_size - out.len()
        } else {
            (f64::from(count) * (1.0 / freq) / layout.update_period) as usize
        };
        if !last && out.len() + length > layout.sample_size {
            return Err(Error::Configuration(format!(
                "chirp segment {i} overruns the playback buffer"
            )));
        }
        let freq = if snap_to_grid && length > 0 {
            closest_frequency_for(layout, freq, length)?
        } else {
            freq
        };
        let start = out.len();
        out.extend(sine_segment(layout, amplitude, freq, offset, length)?);
        segments.push(ChirpSegment {
            frequency: freq,
            range: start..out.len(),
        });
    }
    Ok((out, segments))
}

/// Generates a repeating ramp filling the playback buffer.
///
/// Builds the arithmetic sequence from `start` towards `stop` in steps of
/// `step`. With `snap_to_length` the sequence is first resized to the
/// nearest integer divisor of the buffer length, avoiding a truncated
/// final tile; it is then tiled across the whole buffer.
pub fn ramp(
    layout: &BufferLayout,
    start: u16,
    stop: u16,
    step: i32,
    snap_to_length: bool,
) -> Result<Vec<u16>> {
    if step == 0 {
        return Err(Error::Configuration("ramp step must be nonzero".to_string()));
    }
    let base = arange(i64::from(start), i64::from(stop), i64::from(step));
    if base.is_empty() {
        return Err(Error::Configuration(
            "ramp start, stop and step give an empty pattern".to_string(),
        ));
    }
    let base = if snap_to_length {
        let length = snapped_length(layout.sample_size, base.len());
        let stop = i64::from(start) + length as i64 * i64::from(step);
        arange(i64::from(start), stop, i64::from(step))
    } else {
        base
    };
    Ok(tile(layout.sample_size, &base))
}

/// Generates a square wave filling the playback buffer.
///
/// One cycle is `length` samples split by the `duty` percentage into a low
/// then a high phase, length-snapped and tiled like [`ramp`].
pub fn step_wave(
    layout: &BufferLayout,
    low: u16,
    high: u16,
    length: usize,
    duty: f64,
    snap_to_length: bool,
) -> Result<Vec<u16>> {
    if !(0.0..=100.0).contains(&duty) {
        return Err(Error::Configuration(format!(
            "duty cycle must be a percentage in [0, 100], got {duty}"
        )));
    }
    if length == 0 {
        return Err(Error::Configuration(
            "step pattern length must be nonzero".to_string(),
        ));
    }
    let length = if snap_to_length {
        snapped_length(layout.sample_size, length)
    } else {
        length
    };
    let n_low = (length as f64 / 100.0 * duty) as usize;
    let n_high = (length as f64 / 100.0 * (100.0 - duty)) as usize;
    if n_low + n_high == 0 {
        return Err(Error::Configuration(
            "step pattern rounds to zero samples".to_string(),
        ));
    }
    let mut base = vec![low; n_low];
    base.resize(n_low + n_high, high);
    Ok(tile(layout.sample_size, &base))
}

/// Constant-level buffer.
pub fn flat(layout: &BufferLayout, level: u16) -> Vec<u16> {
    vec![level; layout.sample_size]
}

fn sine_segment(
    layout: &BufferLayout,
    amplitude: u16,
    frequency: f64,
    offset: u16,
    length: usize,
) -> Result<Vec<u16>> {
    let amp = f64::from(amplitude);
    let off = f64::from(offset);
    let w = 2.0 * PI * frequency;
    let mut out = Vec::with_capacity(length);
    for n in 0..length {
        let t = n as f64 * layout.update_period;
        let v = amp * (w * t).sin() + off;
        if !(0.0..=65535.0).contains(&v) {
            return Err(Error::Range(format!(
                "sine sample {v:.1} does not fit a 16-bit code"
            )));
        }
        out.push(v as u16);
    }
    Ok(out)
}

// Resize a base pattern length to the nearest integer divisor of the
// buffer, so tiling ends exactly at the wrap address.
fn snapped_length(sample_size: usize, len: usize) -> usize {
    let divisor = (sample_size as f64 / len as f64).round().max(1.0);
    (sample_size as f64 / divisor) as usize
}

fn arange(start: i64, stop: i64, step: i64) -> Vec<u16> {
    let mut out = Vec::new();
    let mut v = start;
    while (step > 0 && v < stop) || (step < 0 && v > stop) {
        out.push(v as u16);
        v += step;
    }
    out
}

// Whole tiles plus a partial remainder prefix.
fn tile(sample_size: usize, base: &[u16]) -> Vec<u16> {
    let mut out = Vec::with_capacity(sample_size);
    while out.len() + base.len() <= sample_size {
        out.extend_from_slice(base);
    }
    let rest = sample_size - out.len();
    out.extend_from_slice(&base[..rest]);
    out
}

#[cfg(test)]
mod test {
    use super::*;

    fn small_layout() -> BufferLayout {
        BufferLayout {
            sample_size: 4096,
            ..BufferLayout::default()
        }
    }

    #[test]
    fn closest_frequency_is_on_grid() {
        let layout = small_layout();
        for freq in [1e4, 2.5e4, 3.33e4, 1e5] {
            let snapped = closest_frequency(&layout, freq).unwrap();
            let periods = layout.sample_size as f64 * layout.update_period * snapped;
            assert!(
                (periods - periods.round()).abs() < 1e-6,
                "{snapped} Hz gives {periods} periods"
            );
            // One grid step is one period over the whole buffer.
            let grid_step = 1.0 / (layout.sample_size as f64 * layout.update_period);
            assert!((snapped - freq).abs() <= grid_step / 2.0 + 1e-9);
        }
    }

    #[test]
    fn closest_frequency_rejects_too_high() {
        let layout = small_layout();
        // 2 samples per period at 400 ns is 1.25 MHz.
        assert!(matches!(
            closest_frequency(&layout, 1.3e6),
            Err(Error::Range(_))
        ));
        assert!(closest_frequency(&layout, 1.2e6).is_ok());
    }

    #[test]
    fn closest_frequency_rejects_nonpositive() {
        let layout = small_layout();
        assert!(matches!(
            closest_frequency(&layout, -10.0),
            Err(Error::Configuration(_))
        ));
    }

    #[test]
    fn sine_fills_buffer_within_range() {
        let layout = BufferLayout::default();
        let (seq, freq) = sine(&layout, 1000, 10e3, 8192, true).unwrap();
        assert_eq!(seq.len(), layout.sample_size);
        assert!(seq.iter().all(|&v| (7192..=9192).contains(&v)));
        let grid_step = 1.0 / (layout.sample_size as f64 * layout.update_period);
        assert!((freq - 10e3).abs() < grid_step);
    }

    #[test]
    fn sine_rejects_amplitude_over_offset() {
        let layout = small_layout();
        assert!(matches!(
            sine(&layout, 9000, 10e3, 8192, true),
            Err(Error::Range(_))
        ));
    }

    #[test]
    fn sine_rejects_code_overflow() {
        let layout = small_layout();
        // Peaks at 40000 + 30000 = 70000, over the 16-bit range.
        assert!(matches!(
            sine(&layout, 30000, 10e3, 40000, true),
            Err(Error::Range(_))
        ));
    }

    #[test]
    fn chirp_segments_partition_buffer() {
        let layout = small_layout();
        let (seq, segments) = chirp(&layout, 500, &[1e5, 2e5, 4e5], &[10, 10, 10], 8192, true).unwrap();
        assert_eq!(seq.len(), layout.sample_size);
        assert_eq!(segments.len(), 3);
        let mut expected_start = 0;
        for seg in &segments {
            assert_eq!(seg.range.start, expected_start);
            expected_start = seg.range.end;
        }
        assert_eq!(expected_start, layout.sample_size);
    }

    #[test]
    fn chirp_final_segment_fills_remainder() {
        let layout = small_layout();
        let (_, segments) = chirp(&layout, 500, &[1e5, 1e5], &[10, 1], 8192, true).unwrap();
        // 10 periods of 100 kHz at 400 ns are 250 samples.
        assert_eq!(segments[0].range, 0..250);
        assert_eq!(segments[1].range, 250..layout.sample_size);
    }

    #[test]
    fn chirp_rejects_length_mismatch() {
        let layout = small_layout();
        assert!(matches!(
            chirp(&layout, 500, &[1e5, 2e5], &[10], 8192, true),
            Err(Error::Configuration(_))
        ));
    }

    #[test]
    fn chirp_rejects_overrun() {
        let layout = small_layout();
        // 1000 periods of 100 kHz are 250k samples, far over the buffer.
        assert!(matches!(
            chirp(&layout, 500, &[1e5, 2e5], &[1000, 1], 8192, true),
            Err(Error::Configuration(_))
        ));
    }

    #[test]
    fn ramp_fills_buffer() {
        let layout = small_layout();
        for snap in [false, true] {
            let seq = ramp(&layout, 0, 1000, 10, snap).unwrap();
            assert_eq!(seq.len(), layout.sample_size);
            assert_eq!(seq[0], 0);
            assert_eq!(seq[1], 10);
        }
    }

    #[test]
    fn ramp_snap_avoids_truncated_tile() {
        let layout = small_layout();
        // 100-sample base does not divide 4096; the snapped base (4096/41
        // = 99 samples) restarts cleanly... check the tile boundary.
        let seq = ramp(&layout, 0, 1000, 10, true).unwrap();
        let base_len = snapped_length(layout.sample_size, 100);
        assert_eq!(seq[base_len], 0);
        assert_eq!(seq[base_len - 1], seq[2 * base_len - 1]);
    }

    #[test]
    fn ramp_descending() {
        let layout = small_layout();
        let seq = ramp(&layout, 1000, 0, -10, false).unwrap();
        assert_eq!(seq[0], 1000);
        assert_eq!(seq[1], 990);
        assert_eq!(seq.len(), layout.sample_size);
    }

    #[test]
    fn ramp_rejects_empty_pattern() {
        let layout = small_layout();
        assert!(ramp(&layout, 100, 100, 10, false).is_err());
        assert!(ramp(&layout, 0, 1000, 0, false).is_err());
    }

    #[test]
    fn step_wave_duty_split() {
        let layout = small_layout();
        let seq = step_wave(&layout, 100, 200, 128, 25.0, false).unwrap();
        assert_eq!(seq.len(), layout.sample_size);
        assert!(seq[..32].iter().all(|&v| v == 100));
        assert!(seq[32..128].iter().all(|&v| v == 200));
        // Next tile starts low again.
        assert_eq!(seq[128], 100);
    }

    #[test]
    fn step_wave_rejects_bad_duty() {
        let layout = small_layout();
        assert!(step_wave(&layout, 0, 1, 128, 150.0, false).is_err());
    }

    #[test]
    fn flat_is_constant() {
        let layout = small_layout();
        let seq = flat(&layout, 0x2000);
        assert_eq!(seq.len(), layout.sample_size);
        assert!(seq.iter().all(|&v| v == 0x2000));
    }
}
