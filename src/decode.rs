//! Capture stream decoder.
//!
//! The capture buffer stripes every 16-bit source into one wide DDR word,
//! so a raw block read from the transfer FIFO interleaves all sources byte
//! by byte. This module deswizzles a raw block back into logical channels
//! and, for the current stream layout, reconstructs the derived fields:
//! 48-bit timestamps, DAC readback sub-channels, the slow ADC pair, the
//! sequence counters, and the constant check words.
//!
//! Two historical stream layouts exist and are selected once at
//! construction:
//!
//! * [`Dialect::Legacy`] — four fast ADC channels, nothing else.
//! * [`Dialect::Full`] — eight logical channels carrying fast ADC data,
//!   DAC readback, the slow ADC pair and timestamps.
//!
//! Decoding is total: a malformed block never fails, it decodes as far as
//! the data allows and records integrity problems as flags on the result.

/// Closed set of raw stream layouts.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum Dialect {
    /// Four fast ADC channels, stride 8, no derived fields.
    Legacy,
    /// Eight logical channels with timestamps and derived fields.
    Full,
}

/// Decoder for one capture stream.
///
/// Fixed to a dialect and a producer bitstream version at construction;
/// the version selects the tap positions that moved across hardware
/// revisions and is never inferred from the data.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct Decoder {
    dialect: Dialect,
    version: u32,
}

/// Result of decoding one raw capture block.
///
/// `channels` always holds the deswizzled logical channels. The derived
/// fields are filled for [`Dialect::Full`] and empty for
/// [`Dialect::Legacy`]. The flags record problems found during decoding;
/// severity judgment is left to the caller.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct DecodedBlock {
    /// Deswizzled logical channels (4 or 8).
    pub channels: Vec<Vec<u16>>,
    /// 48-bit timestamps, one per slow-ADC cycle.
    pub timestamps: Vec<u64>,
    /// DAC readback sub-channels: four at the DAC rate, three 1-MSPS
    /// observer taps.
    pub dac: Vec<Vec<u16>>,
    /// Slow ADC channel A.
    pub ads_a: Vec<i16>,
    /// Slow ADC channel B.
    pub ads_b: Vec<i16>,
    /// The two interleaved 5-bit sequence counters, together cycling 0..23.
    pub sequence_counts: [Vec<u8>; 2],
    /// A constant check word did not match its expected value.
    pub integrity_error: bool,
    /// Consecutive timestamps did not advance by a single unique interval.
    pub timing_skip: bool,
}

// Logical channel i is slot PERMUTATION[i] of the striped DDR word.
const LEGACY_PERMUTATION: [usize; 4] = [2, 3, 0, 1];
const FULL_PERMUTATION: [usize; 8] = [6, 7, 5, 4, 2, 3, 0, 1];

// Slow-ADC fields repeat every 5 fast samples, check words every 10.
const ADS_STRIDE: usize = 5;
const CHECK_STRIDE: usize = 10;

// Check-word taps into channel 7: (offset, expected, mask). The low five
// bits of the masked-out words carry the sequence counters.
const CONSTANT_CHECKS: [(usize, u16, u16); 4] = [
    (3, 0xaa55, 0xffff),
    (4, 0x28b << 5, 0xffe0),
    (8, 0x77bb, 0xffff),
    (9, 0x28c << 5, 0xffe0),
];
const SEQUENCE_TAPS: [usize; 2] = [4, 9];
const SEQUENCE_MASK: u16 = 0x001f;

/// Position of one derived field: logical channel and offset within the
/// modulo-5 cycle.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
struct Tap {
    channel: usize,
    offset: usize,
}

/// Tap set for the Full dialect of one hardware revision range.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
struct FullTaps {
    ts_lsb: Tap,
    ts_mid: Tap,
    ts_msb: Tap,
    ads_a: Tap,
    ads_b: Tap,
}

// Versioned tap table: each entry applies from its version onwards.
// Revision 2 swapped the timestamp LSB word and the ADS B channel.
const TAP_TABLE: [(u32, FullTaps); 2] = [
    (
        0,
        FullTaps {
            ts_lsb: Tap { channel: 6, offset: 0 },
            ts_mid: Tap { channel: 6, offset: 1 },
            ts_msb: Tap { channel: 7, offset: 2 },
            ads_a: Tap { channel: 7, offset: 0 },
            ads_b: Tap { channel: 7, offset: 1 },
        },
    ),
    (
        2,
        FullTaps {
            ts_lsb: Tap { channel: 7, offset: 1 },
            ts_mid: Tap { channel: 6, offset: 1 },
            ts_msb: Tap { channel: 7, offset: 2 },
            ads_a: Tap { channel: 7, offset: 0 },
            ads_b: Tap { channel: 6, offset: 0 },
        },
    ),
];

fn taps_for(version: u32) -> &'static FullTaps {
    TAP_TABLE
        .iter()
        .rev()
        .find(|(from, _)| *from <= version)
        .map(|(_, taps)| taps)
        .unwrap_or(&TAP_TABLE[0].1)
}

/// Reinterprets raw 16-bit codes as two's-complement samples.
pub fn as_signed(samples: &[u16]) -> Vec<i16> {
    samples.iter().map(|&v| v as i16).collect()
}

impl Decoder {
    /// Creates a decoder for the given dialect and producer version.
    pub fn new(dialect: Dialect, producer_version: u32) -> Decoder {
        Decoder {
            dialect,
            version: producer_version,
        }
    }

    /// The dialect this decoder was built for.
    pub fn dialect(&self) -> Dialect {
        self.dialect
    }

    /// The producer version this decoder was built for.
    pub fn producer_version(&self) -> u32 {
        self.version
    }

    /// Number of logical channels the dialect carries.
    pub fn num_channels(&self) -> usize {
        match self.dialect {
            Dialect::Legacy => LEGACY_PERMUTATION.len(),
            Dialect::Full => FULL_PERMUTATION.len(),
        }
    }

    /// Decodes one raw capture block.
    ///
    /// Never fails: trailing bytes that do not fill a whole striped word
    /// are ignored, and integrity problems are recorded as flags on the
    /// returned block.
    pub fn decode(&self, raw: &[u8]) -> DecodedBlock {
        match self.dialect {
            Dialect::Legacy => DecodedBlock {
                channels: deswizzle(raw, &LEGACY_PERMUTATION),
                ..DecodedBlock::default()
            },
            Dialect::Full => self.decode_full(raw),
        }
    }

    fn decode_full(&self, raw: &[u8]) -> DecodedBlock {
        let channels = deswizzle(raw, &FULL_PERMUTATION);
        let taps = taps_for(self.version);

        let lsb = strided(&channels[taps.ts_lsb.channel], taps.ts_lsb.offset, ADS_STRIDE);
        let mid = strided(&channels[taps.ts_mid.channel], taps.ts_mid.offset, ADS_STRIDE);
        let msb = strided(&channels[taps.ts_msb.channel], taps.ts_msb.offset, ADS_STRIDE);
        // The last cycle of a block may be cut off mid-word; drop it.
        let cycles = msb.len().saturating_sub(1);
        let timestamps: Vec<u64> = (0..cycles)
            .map(|k| u64::from(lsb[k]) | u64::from(mid[k]) << 16 | u64::from(msb[k]) << 32)
            .collect();

        let mut integrity_error = false;
        for (offset, expected, mask) in CONSTANT_CHECKS {
            let bad = strided(&channels[7], offset, CHECK_STRIDE)
                .iter()
                .filter(|&&v| v & mask != expected)
                .count();
            if bad > 0 {
                tracing::warn!(
                    offset,
                    expected = format!("{expected:#06x}"),
                    errors = bad,
                    "constant check word mismatch"
                );
                integrity_error = true;
            }
        }

        let sequence_counts = SEQUENCE_TAPS.map(|offset| {
            strided(&channels[7], offset, CHECK_STRIDE)
                .iter()
                .map(|&v| (v & SEQUENCE_MASK) as u8)
                .collect()
        });

        let dac = vec![
            strided(&channels[4], 0, 2),
            strided(&channels[4], 1, 2),
            strided(&channels[5], 0, 2),
            strided(&channels[5], 1, 2),
            // 1-MSPS observer taps, each delayed by one fast sample.
            strided(&channels[6], 2, ADS_STRIDE),
            strided(&channels[6], 3, ADS_STRIDE),
            strided(&channels[6], 4, ADS_STRIDE),
        ];

        let ads_a = as_signed(&strided(
            &channels[taps.ads_a.channel],
            taps.ads_a.offset,
            ADS_STRIDE,
        ));
        let ads_b = as_signed(&strided(
            &channels[taps.ads_b.channel],
            taps.ads_b.offset,
            ADS_STRIDE,
        ));

        let mut timing_skip = false;
        if timestamps.len() >= 2 {
            let mut intervals: Vec<u64> = timestamps
                .windows(2)
                .map(|w| w[1].wrapping_sub(w[0]))
                .collect();
            intervals.sort_unstable();
            intervals.dedup();
            if intervals.len() > 1 {
                tracing::warn!(?intervals, "multiple timestamp intervals in capture block");
                timing_skip = true;
            }
        }

        DecodedBlock {
            channels,
            timestamps,
            dac,
            ads_a,
            ads_b,
            sequence_counts,
            integrity_error,
            timing_skip,
        }
    }
}

// One striped word holds one 16-bit little-endian sample per slot; the
// permutation maps logical channels onto slots.
fn deswizzle(raw: &[u8], permutation: &[usize]) -> Vec<Vec<u16>> {
    let stride = permutation.len() * 2;
    let groups = raw.len() / stride;
    permutation
        .iter()
        .map(|&slot| {
            (0..groups)
                .map(|g| {
                    let b = g * stride + slot * 2;
                    u16::from_le_bytes([raw[b], raw[b + 1]])
                })
                .collect()
        })
        .collect()
}

fn strided(samples: &[u16], offset: usize, stride: usize) -> Vec<u16> {
    samples.iter().skip(offset).step_by(stride).copied().collect()
}
