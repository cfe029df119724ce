//! Capture session.
//!
//! A capture session repeatedly pulls fixed-size raw chunks out of the
//! capture FIFO, decodes them, and stacks the per-channel arrays into a
//! growing [`CaptureDataset`]. Decode-time integrity and timing flags are
//! counted and logged but never abort a run; a transport error does, since
//! FIFO state is then inconsistent and the controller needs a new setup.

use crate::dataset::CaptureDataset;
use crate::ddr::{BufferLayout, Ddr};
use crate::decode::Decoder;
use crate::error::{Error, Result};
use crate::transport::Transport;
use std::ops::Range;

/// Streams capture data from the controller into a dataset.
#[derive(Debug)]
pub struct CaptureSession<'a, T: Transport> {
    ddr: &'a mut Ddr<T>,
    decoder: Decoder,
    dataset: CaptureDataset,
    blocks_per_chunk: usize,
    integrity_errors: usize,
    timing_skips: usize,
}

// Samples per channel in one chunk of blocks_per_chunk bulk blocks.
fn chunk_samples(layout: &BufferLayout, decoder: &Decoder, blocks_per_chunk: usize) -> usize {
    layout.block_size * blocks_per_chunk / (decoder.num_channels() * 2)
}

impl<'a, T: Transport> CaptureSession<'a, T> {
    /// Creates a session writing into a fresh dataset.
    ///
    /// The dataset is tagged with the decoder's producer version and sized
    /// for chunks of `blocks_per_chunk` bulk blocks.
    pub fn new(
        ddr: &'a mut Ddr<T>,
        decoder: Decoder,
        name: &str,
        blocks_per_chunk: usize,
    ) -> Result<CaptureSession<'a, T>> {
        if blocks_per_chunk == 0 {
            return Err(Error::Configuration(
                "capture chunk must be at least one block".to_string(),
            ));
        }
        let chunk = chunk_samples(ddr.layout(), &decoder, blocks_per_chunk);
        let dataset = CaptureDataset::new(
            name,
            decoder.num_channels(),
            chunk,
            decoder.producer_version(),
        )?;
        Ok(CaptureSession {
            ddr,
            decoder,
            dataset,
            blocks_per_chunk,
            integrity_errors: 0,
            timing_skips: 0,
        })
    }

    /// Creates a session appending to an existing dataset.
    ///
    /// Fails with [`Error::VersionMismatch`] before any device access when
    /// the dataset was produced by a different version; the dataset is not
    /// mutated.
    pub fn append_to(
        ddr: &'a mut Ddr<T>,
        decoder: Decoder,
        dataset: CaptureDataset,
        blocks_per_chunk: usize,
    ) -> Result<CaptureSession<'a, T>> {
        if dataset.version() != decoder.producer_version() {
            return Err(Error::VersionMismatch {
                dataset: dataset.version(),
                producer: decoder.producer_version(),
            });
        }
        if dataset.channels() != decoder.num_channels() {
            return Err(Error::Configuration(format!(
                "dataset has {} channels, the decoder produces {}",
                dataset.channels(),
                decoder.num_channels()
            )));
        }
        let chunk = chunk_samples(ddr.layout(), &decoder, blocks_per_chunk);
        if dataset.chunk_samples() != chunk {
            return Err(Error::Configuration(format!(
                "dataset grows in chunks of {} samples, this session produces {}",
                dataset.chunk_samples(),
                chunk
            )));
        }
        Ok(CaptureSession {
            ddr,
            decoder,
            dataset,
            blocks_per_chunk,
            integrity_errors: 0,
            timing_skips: 0,
        })
    }

    /// Reads and appends `num_chunks` chunks.
    ///
    /// Enables the capture transfer, then for each chunk performs one bulk
    /// read, decodes it, and appends the stacked channels. Returns the
    /// sample range appended by this call.
    pub fn run(&mut self, num_chunks: usize) -> Result<Range<usize>> {
        self.ddr.start_transfer()?;
        let start = self.dataset.samples();
        for _ in 0..num_chunks {
            let raw = self.ddr.read_capture(self.blocks_per_chunk)?;
            let block = self.decoder.decode(&raw);
            if block.integrity_error {
                self.integrity_errors += 1;
            }
            if block.timing_skip {
                self.timing_skips += 1;
            }
            self.dataset
                .append(&block.channels, self.decoder.producer_version())?;
        }
        let end = self.dataset.samples();
        tracing::info!(
            chunks = num_chunks,
            samples = end - start,
            integrity_errors = self.integrity_errors,
            timing_skips = self.timing_skips,
            "capture finished"
        );
        Ok(start..end)
    }

    /// Chunks decoded with a constant-check mismatch so far.
    pub fn integrity_errors(&self) -> usize {
        self.integrity_errors
    }

    /// Chunks decoded with a timestamp skip so far.
    pub fn timing_skips(&self) -> usize {
        self.timing_skips
    }

    /// The accumulated dataset.
    pub fn dataset(&self) -> &CaptureDataset {
        &self.dataset
    }

    /// Consumes the session, returning the dataset.
    pub fn into_dataset(self) -> CaptureDataset {
        self.dataset
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::decode::Dialect;
    use crate::endpoints::DdrEndpoints;
    use crate::sim::SimTransport;
    use crate::waveform;

    fn small_layout() -> BufferLayout {
        BufferLayout {
            sample_size: 256,
            block_size: 256,
            ..BufferLayout::default()
        }
    }

    fn test_ddr(version: u32) -> Ddr<SimTransport> {
        Ddr::new(
            SimTransport::new(version),
            DdrEndpoints::instrument_default(),
            small_layout(),
        )
        .unwrap()
    }

    #[test]
    fn dataset_grows_by_chunk_per_read() {
        let mut ddr = test_ddr(2);
        ddr.write_setup(true).unwrap();
        ddr.repeat_setup().unwrap();
        let decoder = Decoder::new(Dialect::Full, 2);
        let mut session = CaptureSession::new(&mut ddr, decoder, "adc", 4).unwrap();
        // 4 blocks of 256 bytes over 8 channels of 2 bytes.
        assert_eq!(session.dataset().chunk_samples(), 64);
        let appended = session.run(3).unwrap();
        assert_eq!(appended, 0..192);
        assert_eq!(session.dataset().samples(), 192);
        assert_eq!(session.integrity_errors(), 0);
        let appended = session.run(2).unwrap();
        assert_eq!(appended, 192..320);
    }

    #[test]
    fn chunks_decode_clean_across_reads() {
        let mut ddr = test_ddr(2);
        ddr.write_setup(true).unwrap();
        ddr.repeat_setup().unwrap();
        let decoder = Decoder::new(Dialect::Full, 2);
        let mut session = CaptureSession::new(&mut ddr, decoder, "adc", 4).unwrap();
        session.run(4).unwrap();
        assert_eq!(session.timing_skips(), 0);
        assert_eq!(session.integrity_errors(), 0);
    }

    #[test]
    fn append_mode_rejects_version_mismatch() {
        let mut ddr = test_ddr(2);
        let decoder = Decoder::new(Dialect::Full, 2);
        let dataset = CaptureDataset::new("adc", 8, 64, 1).unwrap();
        let before = dataset.clone();
        let err =
            CaptureSession::append_to(&mut ddr, decoder, dataset.clone(), 4).unwrap_err();
        assert_eq!(
            err,
            Error::VersionMismatch {
                dataset: 1,
                producer: 2
            }
        );
        assert_eq!(dataset, before);
    }

    #[test]
    fn append_mode_continues_existing_dataset() {
        let mut ddr = test_ddr(2);
        ddr.write_setup(true).unwrap();
        ddr.repeat_setup().unwrap();
        let decoder = Decoder::new(Dialect::Full, 2);
        let mut session = CaptureSession::new(&mut ddr, decoder, "adc", 4).unwrap();
        session.run(2).unwrap();
        let dataset = session.into_dataset();
        let mut session = CaptureSession::append_to(&mut ddr, decoder, dataset, 4).unwrap();
        let appended = session.run(1).unwrap();
        assert_eq!(appended, 128..192);
    }

    #[test]
    fn dac_readback_echoes_written_frame() {
        let mut ddr = test_ddr(2);
        let layout = ddr.layout().clone();
        let pattern = waveform::ramp(&layout, 0, 256, 1, false).unwrap();
        let channels: Vec<Vec<u16>> = (0..layout.num_channels)
            .map(|i| pattern.iter().map(|&v| v + i as u16).collect())
            .collect();
        ddr.write_setup(true).unwrap();
        ddr.write_channels(&channels, false).unwrap();
        ddr.repeat_setup().unwrap();
        let decoder = Decoder::new(Dialect::Full, 2);
        let raw = ddr.read_capture(4).unwrap();
        let block = decoder.decode(&raw);
        // DAC sub-channels 0 and 1 alternate on logical channel 4; each
        // advances one playback sample per pair of captured words.
        assert!(!block.dac[0].is_empty());
        for (j, &v) in block.dac[0].iter().enumerate() {
            assert_eq!(v, channels[0][j % layout.sample_size]);
        }
        for (j, &v) in block.dac[1].iter().enumerate() {
            assert_eq!(v, channels[1][j % layout.sample_size]);
        }
    }

    #[test]
    fn transport_error_aborts_run() {
        let mut ddr = test_ddr(2);
        ddr.write_setup(true).unwrap();
        ddr.repeat_setup().unwrap();
        let decoder = Decoder::new(Dialect::Full, 2);
        let mut session = CaptureSession::new(&mut ddr, decoder, "adc", 4).unwrap();
        session.ddr.transport_mut().fail_next_pipe(100);
        let err = session.run(1).unwrap_err();
        assert_eq!(
            err,
            Error::Transport {
                expected: 1024,
                actual: 100
            }
        );
    }
}
