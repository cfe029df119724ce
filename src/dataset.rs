//! Capture dataset and metadata.
//!
//! [`CaptureDataset`] is the in-memory, append-only channel-by-sample
//! store the capture session accumulates into. It grows in fixed chunks
//! and carries the producer format-version of the bitstream that produced
//! it; appends from a different producer are refused so mixed-layout data
//! never ends up in one dataset.
//!
//! [`Metadata`] describes a capture for the JSON sidecar written next to
//! the raw data.

use crate::error::{Error, Result};
use chrono::prelude::*;
use serde::Serialize;
use std::io::Write;
use std::ops::Range;

/// Append-only channel-by-sample capture store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptureDataset {
    name: String,
    chunk_samples: usize,
    version: u32,
    data: Vec<Vec<u16>>,
}

impl CaptureDataset {
    /// Creates an empty dataset.
    ///
    /// `chunk_samples` is the fixed number of samples per channel of every
    /// future append; `version` is the producer format-version tag.
    pub fn new(
        name: &str,
        channels: usize,
        chunk_samples: usize,
        version: u32,
    ) -> Result<CaptureDataset> {
        if channels == 0 || chunk_samples == 0 {
            return Err(Error::Configuration(
                "dataset needs at least one channel and a nonzero chunk".to_string(),
            ));
        }
        Ok(CaptureDataset {
            name: name.to_string(),
            chunk_samples,
            version,
            data: vec![Vec::with_capacity(chunk_samples); channels],
        })
    }

    /// Dataset name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Number of channels.
    pub fn channels(&self) -> usize {
        self.data.len()
    }

    /// Samples per channel per append.
    pub fn chunk_samples(&self) -> usize {
        self.chunk_samples
    }

    /// Producer format-version tag.
    pub fn version(&self) -> u32 {
        self.version
    }

    /// Current length of the sample axis.
    pub fn samples(&self) -> usize {
        self.data[0].len()
    }

    /// One channel of the dataset.
    ///
    /// # Panics
    ///
    /// Panics if `channel` is out of range.
    pub fn channel(&self, channel: usize) -> &[u16] {
        &self.data[channel]
    }

    /// Appends one chunk of per-channel data.
    ///
    /// `version` must equal the dataset's stored tag and the chunk must
    /// have the dataset's channel count and chunk length; otherwise
    /// nothing is mutated. Returns the sample range the chunk now
    /// occupies.
    pub fn append(&mut self, channels: &[Vec<u16>], version: u32) -> Result<Range<usize>> {
        if version != self.version {
            return Err(Error::VersionMismatch {
                dataset: self.version,
                producer: version,
            });
        }
        if channels.len() != self.channels() {
            return Err(Error::Configuration(format!(
                "append of {} channels into a {}-channel dataset",
                channels.len(),
                self.channels()
            )));
        }
        if channels.iter().any(|ch| ch.len() != self.chunk_samples) {
            return Err(Error::Configuration(format!(
                "dataset grows in fixed chunks of {} samples",
                self.chunk_samples
            )));
        }
        let start = self.samples();
        for (stored, chunk) in self.data.iter_mut().zip(channels) {
            // Grow in whole chunks, like the backing file would.
            stored.reserve(self.chunk_samples);
            stored.extend_from_slice(chunk);
        }
        Ok(start..start + self.chunk_samples)
    }

    /// Writes the dataset channel-major as little-endian 16-bit words.
    pub fn write_raw<W: Write>(&self, writer: &mut W) -> std::io::Result<()> {
        for channel in &self.data {
            for &sample in channel {
                writer.write_all(&sample.to_le_bytes())?;
            }
        }
        Ok(())
    }
}

/// Capture metadata for the JSON sidecar.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Metadata {
    name: String,
    producer_version: u32,
    channels: usize,
    sample_rate: f64,
    description: String,
    author: String,
    recorder: String,
    datetime: DateTime<Utc>,
}

impl Metadata {
    /// Creates metadata for a capture.
    ///
    /// The datetime is set to the current time; description and author
    /// start empty.
    pub fn new(name: &str, producer_version: u32, channels: usize, sample_rate: f64) -> Metadata {
        Metadata {
            name: name.to_string(),
            producer_version,
            channels,
            sample_rate,
            description: String::new(),
            author: String::new(),
            recorder: concat!("ddrdaq v", env!("CARGO_PKG_VERSION")).to_string(),
            datetime: Utc::now(),
        }
    }

    /// Sets the description field.
    pub fn set_description(&mut self, description: &str) {
        self.description.replace_range(.., description);
    }

    /// Sets the author field.
    pub fn set_author(&mut self, author: &str) {
        self.author.replace_range(.., author);
    }

    /// Sets the datetime field.
    pub fn set_datetime(&mut self, datetime: DateTime<Utc>) {
        self.datetime = datetime;
    }

    /// Returns the metadata as pretty-printed JSON.
    pub fn to_json(&self) -> String {
        // to_string_pretty cannot fail on this struct and does not emit a
        // final newline.
        let mut s = serde_json::to_string_pretty(self).unwrap();
        s.push('\n');
        s
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn append_grows_in_chunks() {
        let mut ds = CaptureDataset::new("adc", 2, 4, 3).unwrap();
        let chunk = vec![vec![1, 2, 3, 4], vec![5, 6, 7, 8]];
        assert_eq!(ds.append(&chunk, 3).unwrap(), 0..4);
        assert_eq!(ds.append(&chunk, 3).unwrap(), 4..8);
        assert_eq!(ds.samples(), 8);
        assert_eq!(ds.channel(1), &[5, 6, 7, 8, 5, 6, 7, 8]);
    }

    #[test]
    fn append_rejects_version_mismatch_without_mutating() {
        let mut ds = CaptureDataset::new("adc", 1, 2, 3).unwrap();
        ds.append(&[vec![1, 2]], 3).unwrap();
        let err = ds.append(&[vec![3, 4]], 4).unwrap_err();
        assert_eq!(
            err,
            Error::VersionMismatch {
                dataset: 3,
                producer: 4
            }
        );
        assert_eq!(ds.channel(0), &[1, 2]);
    }

    #[test]
    fn append_rejects_wrong_shape() {
        let mut ds = CaptureDataset::new("adc", 2, 4, 1).unwrap();
        assert!(ds.append(&[vec![0; 4]], 1).is_err());
        assert!(ds.append(&[vec![0; 3], vec![0; 3]], 1).is_err());
        assert_eq!(ds.samples(), 0);
    }

    #[test]
    fn write_raw_is_channel_major_le() {
        let mut ds = CaptureDataset::new("adc", 2, 2, 1).unwrap();
        ds.append(&[vec![0x0102, 0x0304], vec![0x0506, 0x0708]], 1)
            .unwrap();
        let mut out = Vec::new();
        ds.write_raw(&mut out).unwrap();
        assert_eq!(out, [0x02, 0x01, 0x04, 0x03, 0x06, 0x05, 0x08, 0x07]);
    }

    #[test]
    fn metadata_to_json() {
        let mut meta = Metadata::new("adc", 2, 8, 5e6);
        meta.set_description("bench capture");
        meta.set_author("tester");
        meta.set_datetime(Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap());
        let expected = [
            r#"{
  "name": "adc",
  "producer_version": 2,
  "channels": 8,
  "sample_rate": 5000000.0,
  "description": "bench capture",
  "author": "tester",
  "recorder": ""#,
            concat!("ddrdaq v", env!("CARGO_PKG_VERSION")),
            r#"",
  "datetime": "2024-05-01T12:00:00Z"
}
"#,
        ]
        .join("");
        assert_eq!(meta.to_json(), expected);
    }
}
