//! DDR streaming buffer controller.
//!
//! This module contains the userspace driver for the DDR-backed streaming
//! buffer of the instrument. The DDR is split into two circular buffers:
//! the first carries function-generator data from the host to the DACs, the
//! second buffers ADC captures, DAC readback and timestamps on their way to
//! the host. Each buffer has an incoming and an outgoing FIFO at the
//! host-facing edge.
//!
//! The controller sequences the control bits that enable host writes
//! ([`ControlState::dac_write`]), playback and capture into DDR
//! ([`ControlState::dac_read`], [`ControlState::adc_write`]) and transfer of
//! capture data to the host ([`ControlState::adc_transfer`]). The expected
//! sequence of operations is [`Ddr::write_setup`], then
//! [`Ddr::write_channels`] with one buffer per DAC channel, then
//! [`Ddr::repeat_setup`] whenever playback of the already-written pattern
//! should restart without retransmitting it.

use crate::endpoints::{DdrEndpoints, Endpoint};
use crate::error::{Error, Result};
use crate::transport::Transport;
use std::time::{Duration, Instant};

/// Geometry and timing of the DDR buffers.
///
/// Constructed once and passed explicitly to the controller, the waveform
/// synthesizer and the capture session.
#[derive(Debug, Clone, PartialEq)]
pub struct BufferLayout {
    /// Length in samples of one DAC channel pattern.
    ///
    /// This is the central invariant of the whole driver: the DDR address
    /// wraps back to zero at a fixed boundary, so a pattern that is not
    /// exactly this long produces a discontinuity at wraparound.
    pub sample_size: usize,
    /// Number of DAC channels striped into the playback buffer.
    pub num_channels: usize,
    /// Number of 16-bit sources striped into the capture stream.
    pub num_adc_channels: usize,
    /// Bulk pipe transfer granularity in bytes.
    pub block_size: usize,
    /// DAC update period in seconds.
    pub update_period: f64,
    /// Fast ADC sampling period in seconds.
    pub adc_period: f64,
}

impl BufferLayout {
    /// DDR address at which the playback buffer wraps back to zero.
    pub const WRAP_INDEX: usize = 0x037f_fff8;

    /// Length in bytes of a striped playback frame.
    pub fn frame_len(&self) -> usize {
        self.sample_size * self.num_channels * 2
    }

    /// Checks the layout against the transport constraints.
    ///
    /// The bulk pipe requires a power-of-two block size between 16 and
    /// 16384 bytes.
    pub fn validate(&self) -> Result<()> {
        if !self.block_size.is_power_of_two() || !(16..=16384).contains(&self.block_size) {
            return Err(Error::Configuration(format!(
                "block size {} is not a power of two in [16, 16384]",
                self.block_size
            )));
        }
        if self.sample_size == 0 || self.num_channels == 0 || self.num_adc_channels == 0 {
            return Err(Error::Configuration(
                "buffer layout dimensions must be nonzero".to_string(),
            ));
        }
        Ok(())
    }
}

impl Default for BufferLayout {
    fn default() -> BufferLayout {
        BufferLayout {
            // The pattern must be written all the way up to the wrap
            // address, otherwise the DAC output glitches at wraparound.
            sample_size: (Self::WRAP_INDEX + 8) / 4,
            num_channels: 8,
            num_adc_channels: 8,
            block_size: 2048,
            update_period: 400e-9,
            adc_period: 200e-9,
        }
    }
}

/// Mirror of the DDR control bits as last written by the controller.
#[derive(Debug, Default, Copy, Clone, Eq, PartialEq)]
pub struct ControlState {
    /// Host write enable for the playback buffer.
    pub dac_write: bool,
    /// Playback enable (DDR data to the DACs, ADC data into DDR).
    pub dac_read: bool,
    /// Capture write enable (ADC data into DDR).
    pub adc_write: bool,
    /// Capture transfer enable (DDR capture data into the host FIFO).
    pub adc_transfer: bool,
    /// Diagnostic counter mux in place of ADC data.
    pub adc_debug: bool,
    /// Capture write enable driven by ADC data-ready.
    pub adcs_connected: bool,
}

/// Controller phase of the playback/capture state machine.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum Phase {
    /// All enables clear.
    Idle,
    /// FIFOs and address pointers reset, waiting for a frame.
    Draining,
    /// A striped frame is in flight to the DDR.
    Writing,
    /// Playback and capture into DDR are running.
    Playing,
    /// Playback running and capture data flowing to the host.
    Streaming,
}

/// FIFO reset selector.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum FifoSelect {
    /// DAC input FIFO (host to DDR).
    DacIn,
    /// DAC read FIFO (DDR to DACs).
    DacRead,
    /// ADC input FIFO (ADCs to DDR).
    AdcIn,
    /// ADC transfer FIFO (DDR to host).
    AdcTransfer,
    /// All four FIFOs.
    All,
}

/// Empty/full flags of one FIFO.
#[derive(Debug, Default, Copy, Clone, Eq, PartialEq)]
pub struct FifoFlags {
    /// FIFO empty.
    pub empty: bool,
    /// FIFO full.
    pub full: bool,
}

/// Decoded FIFO status word.
#[derive(Debug, Default, Copy, Clone, Eq, PartialEq)]
pub struct FifoStatus {
    /// DAC input FIFO.
    pub dac_in: FifoFlags,
    /// DAC read FIFO.
    pub dac_out: FifoFlags,
    /// ADC input FIFO.
    pub adc_in: FifoFlags,
    /// ADC transfer FIFO.
    pub adc_out: FifoFlags,
    /// Capture FIFO fill count.
    pub adc_data_count: u32,
}

/// Source FIFO for a bulk capture read.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum CaptureSource {
    /// The ADC capture buffer.
    Adc,
    /// Readback of the written DAC data.
    FunctionGenerator,
}

/// 16-bit slot occupied by each DAC channel within a striped DDR word.
///
/// The 32-bit host pipe swaps the two 16-bit halves of each word, which
/// is why consecutive channels land in swapped slots.
pub(crate) const DAC_STRIPE_SLOTS: [usize; 8] = [6, 7, 4, 5, 2, 3, 0, 1];

// Delay after re-enabling playback, letting the DAC FIFOs prime before the
// first capture reads.
const WRITE_FINISH_SETTLE: Duration = Duration::from_millis(10);

/// Interleaves per-channel sample buffers into a striped playback frame.
///
/// Requires exactly [`BufferLayout::num_channels`] buffers of
/// [`BufferLayout::sample_size`] samples each; the result is
/// [`BufferLayout::frame_len`] bytes of little-endian 16-bit words.
pub fn stripe_channels(layout: &BufferLayout, channels: &[Vec<u16>]) -> Result<Vec<u8>> {
    if channels.len() != layout.num_channels {
        return Err(Error::Configuration(format!(
            "expected {} channel buffers, got {}",
            layout.num_channels,
            channels.len()
        )));
    }
    for (i, ch) in channels.iter().enumerate() {
        if ch.len() != layout.sample_size {
            return Err(Error::Configuration(format!(
                "channel {} has {} samples, the circular buffer needs exactly {}",
                i,
                ch.len(),
                layout.sample_size
            )));
        }
    }
    let words = layout.num_channels;
    let mut frame = vec![0u8; layout.frame_len()];
    for (i, ch) in channels.iter().enumerate() {
        // Pair-swapped slot order on the 32-bit pipe; [6, 7, 4, 5, 2, 3,
        // 0, 1] for the 8-channel instrument.
        let slot = if i % 2 == 0 { words - 2 - i } else { words - i };
        for (k, &sample) in ch.iter().enumerate() {
            let b = (k * words + slot) * 2;
            frame[b..b + 2].copy_from_slice(&sample.to_le_bytes());
        }
    }
    Ok(frame)
}

/// DDR streaming buffer controller.
///
/// Owns the transport: one controller per physical device, and all access
/// to the device must be serialized through it.
#[derive(Debug)]
pub struct Ddr<T: Transport> {
    transport: T,
    endpoints: DdrEndpoints,
    layout: BufferLayout,
    control: ControlState,
    phase: Phase,
}

impl<T: Transport> Ddr<T> {
    /// Opens the controller over a transport.
    ///
    /// Validates the endpoint directory and the layout, and clears the
    /// diagnostic mux so captures start from real ADC data.
    pub fn new(transport: T, endpoints: DdrEndpoints, layout: BufferLayout) -> Result<Ddr<T>> {
        endpoints.validate()?;
        layout.validate()?;
        let mut ddr = Ddr {
            transport,
            endpoints,
            layout,
            control: ControlState::default(),
            phase: Phase::Idle,
        };
        ddr.clear_adc_debug()?;
        tracing::debug!(
            sample_size = ddr.layout.sample_size,
            block_size = ddr.layout.block_size,
            "opened DDR buffer controller"
        );
        Ok(ddr)
    }

    /// The buffer layout this controller was opened with.
    pub fn layout(&self) -> &BufferLayout {
        &self.layout
    }

    /// Last-written control bits.
    pub fn control(&self) -> ControlState {
        self.control
    }

    /// Current phase of the state machine.
    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Access to the transport, mainly for inspection in tests.
    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Mutable access to the transport.
    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    /// Prepares the DDR for writing a new playback frame.
    ///
    /// Stops playback, capture and transfer, resets all FIFOs and the
    /// memory-interface address pointers. When `data_driven_clock` is set,
    /// the capture write enable follows the ADC data-ready signal instead
    /// of the timing core.
    pub fn write_setup(&mut self, data_driven_clock: bool) -> Result<()> {
        if data_driven_clock {
            self.set_adcs_connected()?;
        } else {
            self.clear_adcs_connected()?;
        }
        self.clear_dac_read()?;
        self.clear_adc_write()?;
        self.clear_adc_transfer()?;
        self.reset_fifo(FifoSelect::All)?;
        self.reset_address_pointers()?;
        self.phase = Phase::Draining;
        Ok(())
    }

    /// Stripes the channel buffers and writes them as one playback frame.
    ///
    /// See [`Ddr::write_buf`] for the transfer itself.
    pub fn write_channels(&mut self, channels: &[Vec<u16>], start_playback: bool) -> Result<usize> {
        let frame = stripe_channels(&self.layout, channels)?;
        self.write_buf(&frame, start_playback)
    }

    /// Writes a striped frame to the playback buffer.
    ///
    /// The frame must be exactly [`BufferLayout::frame_len`] bytes — the
    /// hardware plays the circular buffer all the way to the wrap address,
    /// so anything shorter glitches at wraparound. With `start_playback`
    /// the playback and transfer enables are asserted once the frame is in.
    ///
    /// A short or failed bulk transfer is returned as
    /// [`Error::Transport`]; FIFO and pointer state are then inconsistent
    /// and the caller must go through [`Ddr::write_setup`] or
    /// [`Ddr::repeat_setup`] again.
    pub fn write_buf(&mut self, frame: &[u8], start_playback: bool) -> Result<usize> {
        let expected = self.layout.frame_len();
        if frame.len() != expected {
            return Err(Error::Configuration(format!(
                "striped frame is {} bytes, the playback buffer needs exactly {}",
                frame.len(),
                expected
            )));
        }
        self.clear_dac_read()?;
        self.reset_fifo(FifoSelect::DacIn)?;
        self.set_dac_write()?;
        self.phase = Phase::Writing;
        let started = Instant::now();
        let ret = self.transport.write_block_pipe(
            self.endpoints.block_pipe_in.address,
            self.layout.block_size,
            frame,
        );
        self.clear_dac_write()?;
        if ret < frame.len() as i64 {
            self.phase = Phase::Idle;
            return Err(Error::Transport {
                expected: frame.len(),
                actual: ret,
            });
        }
        let secs = started.elapsed().as_secs_f64();
        tracing::info!(
            bytes = ret,
            "wrote playback frame at {:.1} MB/s",
            ret as f64 / 1024.0 / 1024.0 / secs.max(1e-9)
        );
        if start_playback {
            self.set_dac_read()?;
            self.set_adc_transfer()?;
            self.phase = Phase::Streaming;
        } else {
            self.phase = Phase::Idle;
        }
        Ok(ret as usize)
    }

    /// Restarts playback and capture of the already-written frame.
    ///
    /// Quiesces the enables, resets FIFOs and address pointers, then
    /// re-asserts AdcWrite, DacRead and AdcTransfer in one atomic register
    /// transaction. Issuing the three bits as separate writes opens a race
    /// between the wraparound address and the FIFO fill that corrupts
    /// sample alignment.
    pub fn repeat_setup(&mut self) -> Result<()> {
        self.clear_adc_transfer()?;
        self.clear_adc_write()?;
        self.clear_dac_read()?;
        self.reset_fifo(FifoSelect::All)?;
        // The memory-interface addresses are driven by the FIFOs and idle
        // until write_finish re-enables them.
        self.reset_address_pointers()?;
        self.write_finish()?;
        std::thread::sleep(WRITE_FINISH_SETTLE);
        self.phase = Phase::Streaming;
        Ok(())
    }

    fn write_finish(&mut self) -> Result<()> {
        let eps = [
            self.endpoints.adc_write_enable,
            self.endpoints.dac_read_enable,
            self.endpoints.adc_transfer_enable,
        ];
        let bits = [eps[0].bit, eps[1].bit, eps[2].bit];
        self.transport
            .write_bits_simultaneous(eps[0].address, &bits)?;
        self.control.adc_write = true;
        self.control.dac_read = true;
        self.control.adc_transfer = true;
        self.check_invariant();
        Ok(())
    }

    /// Enables transfer of capture data to the host FIFO.
    pub fn start_transfer(&mut self) -> Result<()> {
        self.set_adc_transfer()?;
        if self.phase == Phase::Playing {
            self.phase = Phase::Streaming;
        }
        Ok(())
    }

    /// Stops transfer of capture data to the host FIFO.
    pub fn stop_transfer(&mut self) -> Result<()> {
        self.clear_adc_transfer()?;
        if self.phase == Phase::Streaming {
            self.phase = Phase::Playing;
        }
        Ok(())
    }

    /// Enables the diagnostic mux: a counter on capture channel 0 and raw
    /// DAC bits on channels 1 to 3.
    ///
    /// Not present in every FPGA revision; a missing endpoint is a no-op.
    pub fn set_adc_debug(&mut self) -> Result<()> {
        match self.endpoints.adc_debug {
            Some(ep) => {
                self.transport.set_wire_bit(ep.address, ep.bit)?;
                self.control.adc_debug = true;
            }
            None => tracing::debug!("ADC debug endpoint not present, ignoring"),
        }
        Ok(())
    }

    /// Disables the diagnostic mux; capture data comes from the ADCs.
    pub fn clear_adc_debug(&mut self) -> Result<()> {
        match self.endpoints.adc_debug {
            Some(ep) => {
                self.transport.clear_wire_bit(ep.address, ep.bit)?;
                self.control.adc_debug = false;
            }
            None => tracing::debug!("ADC debug endpoint not present, ignoring"),
        }
        Ok(())
    }

    /// Capture write enable follows the ADC data-ready signal.
    pub fn set_adcs_connected(&mut self) -> Result<()> {
        let ep = self.endpoints.use_adc_ready;
        self.transport.set_wire_bit(ep.address, ep.bit)?;
        self.control.adcs_connected = true;
        Ok(())
    }

    /// Capture write enable is emulated by the timing core.
    pub fn clear_adcs_connected(&mut self) -> Result<()> {
        let ep = self.endpoints.use_adc_ready;
        self.transport.clear_wire_bit(ep.address, ep.bit)?;
        self.control.adcs_connected = false;
        Ok(())
    }

    /// Sets the capture read address to the capture write address.
    ///
    /// Emulates an immediate oscilloscope trigger.
    pub fn adc_single(&mut self) -> Result<()> {
        let ep = self.endpoints.adc_addr_set;
        self.transport.set_wire_bit(ep.address, ep.bit)?;
        let trig = self.endpoints.adc_addr_reset;
        self.transport.trigger(trig.address, trig.bit)
    }

    /// Resets the selected FIFO (or all four) with a set/clear pulse of
    /// its reset bit.
    pub fn reset_fifo(&mut self, which: FifoSelect) -> Result<()> {
        match which {
            FifoSelect::All => {
                for sel in [
                    FifoSelect::DacIn,
                    FifoSelect::DacRead,
                    FifoSelect::AdcIn,
                    FifoSelect::AdcTransfer,
                ] {
                    self.reset_fifo(sel)?;
                }
                Ok(())
            }
            FifoSelect::DacIn => self.pulse(self.endpoints.fifo_dac_in_reset),
            FifoSelect::DacRead => self.pulse(self.endpoints.fifo_dac_read_reset),
            FifoSelect::AdcIn => self.pulse(self.endpoints.fifo_adc_in_reset),
            FifoSelect::AdcTransfer => self.pulse(self.endpoints.fifo_adc_transfer_reset),
        }
    }

    /// Resets the DDR address pointers of both buffers.
    ///
    /// Pulses the memory-interface user reset; the memory controller
    /// itself is untouched.
    pub fn reset_address_pointers(&mut self) -> Result<()> {
        let ep = self.endpoints.ui_reset;
        self.transport.trigger(ep.address, ep.bit)
    }

    /// Reads and decodes the FIFO status word.
    ///
    /// Purely observational; no control bit changes.
    pub fn fifo_status(&mut self) -> Result<FifoStatus> {
        let word = self.transport.read_wire(self.endpoints.status_word())?;
        let bit = |ep: Endpoint| (word >> ep.bit) & 1 == 1;
        let count_ep = self.endpoints.adc_data_count;
        Ok(FifoStatus {
            dac_in: FifoFlags {
                empty: bit(self.endpoints.dac_in_empty),
                full: bit(self.endpoints.dac_in_full),
            },
            dac_out: FifoFlags {
                empty: bit(self.endpoints.dac_out_empty),
                full: bit(self.endpoints.dac_out_full),
            },
            adc_in: FifoFlags {
                empty: bit(self.endpoints.adc_in_empty),
                full: bit(self.endpoints.adc_in_full),
            },
            adc_out: FifoFlags {
                empty: bit(self.endpoints.adc_out_empty),
                full: bit(self.endpoints.adc_out_full),
            },
            adc_data_count: (word & count_ep.mask()) >> count_ep.bit,
        })
    }

    /// Reads `blocks` bulk blocks from the capture FIFO.
    pub fn read_capture(&mut self, blocks: usize) -> Result<Vec<u8>> {
        self.read_capture_block(self.layout.block_size * blocks, CaptureSource::Adc)
    }

    /// Reads `len` bytes from the selected capture FIFO.
    ///
    /// The length must be a multiple of 16 bytes. A short or failed read
    /// is returned as [`Error::Transport`] carrying the actual count; the
    /// controller does not retry.
    pub fn read_capture_block(&mut self, len: usize, source: CaptureSource) -> Result<Vec<u8>> {
        if len % 16 != 0 {
            return Err(Error::Configuration(format!(
                "capture read of {len} bytes is not a multiple of 16"
            )));
        }
        let ep = match source {
            CaptureSource::Adc => self.endpoints.block_pipe_out,
            CaptureSource::FunctionGenerator => self.endpoints.block_pipe_out_fg,
        };
        let mut buf = vec![0u8; len];
        let ret = self
            .transport
            .read_block_pipe(ep.address, self.layout.block_size, &mut buf);
        if ret < len as i64 {
            return Err(Error::Transport {
                expected: len,
                actual: ret,
            });
        }
        tracing::trace!(bytes = ret, ?source, "capture block read");
        Ok(buf)
    }

    fn pulse(&mut self, ep: Endpoint) -> Result<()> {
        self.transport.set_wire_bit(ep.address, ep.bit)?;
        self.transport.clear_wire_bit(ep.address, ep.bit)
    }

    fn set_dac_write(&mut self) -> Result<()> {
        let ep = self.endpoints.dac_write_enable;
        self.transport.set_wire_bit(ep.address, ep.bit)?;
        self.control.dac_write = true;
        self.check_invariant();
        Ok(())
    }

    fn clear_dac_write(&mut self) -> Result<()> {
        let ep = self.endpoints.dac_write_enable;
        self.transport.clear_wire_bit(ep.address, ep.bit)?;
        self.control.dac_write = false;
        Ok(())
    }

    fn set_dac_read(&mut self) -> Result<()> {
        let ep = self.endpoints.dac_read_enable;
        self.transport.set_wire_bit(ep.address, ep.bit)?;
        self.control.dac_read = true;
        self.check_invariant();
        Ok(())
    }

    fn clear_dac_read(&mut self) -> Result<()> {
        let ep = self.endpoints.dac_read_enable;
        self.transport.clear_wire_bit(ep.address, ep.bit)?;
        self.control.dac_read = false;
        Ok(())
    }

    fn clear_adc_write(&mut self) -> Result<()> {
        let ep = self.endpoints.adc_write_enable;
        self.transport.clear_wire_bit(ep.address, ep.bit)?;
        self.control.adc_write = false;
        Ok(())
    }

    fn set_adc_transfer(&mut self) -> Result<()> {
        let ep = self.endpoints.adc_transfer_enable;
        self.transport.set_wire_bit(ep.address, ep.bit)?;
        self.control.adc_transfer = true;
        Ok(())
    }

    fn clear_adc_transfer(&mut self) -> Result<()> {
        let ep = self.endpoints.adc_transfer_enable;
        self.transport.clear_wire_bit(ep.address, ep.bit)?;
        self.control.adc_transfer = false;
        Ok(())
    }

    // DacWrite and DacRead gate opposite directions of the same buffer and
    // must never be on together.
    fn check_invariant(&self) {
        debug_assert!(
            !(self.control.dac_write && self.control.dac_read),
            "DacWrite and DacRead asserted simultaneously"
        );
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::sim::{Op, SimTransport};

    fn small_layout() -> BufferLayout {
        BufferLayout {
            sample_size: 128,
            block_size: 16,
            ..BufferLayout::default()
        }
    }

    fn test_ddr() -> Ddr<SimTransport> {
        Ddr::new(
            SimTransport::new(2),
            DdrEndpoints::instrument_default(),
            small_layout(),
        )
        .unwrap()
    }

    fn test_frame(layout: &BufferLayout) -> Vec<u8> {
        vec![0x5a; layout.frame_len()]
    }

    #[test]
    fn write_setup_drains_and_resets() {
        let mut ddr = test_ddr();
        ddr.transport_mut().clear_ops();
        ddr.write_setup(true).unwrap();
        assert_eq!(ddr.phase(), Phase::Draining);
        let control = ddr.control();
        assert!(!control.dac_read && !control.adc_write && !control.adc_transfer);
        assert!(control.adcs_connected);
        let eps = DdrEndpoints::instrument_default();
        // Four FIFO reset pulses and the address-pointer trigger.
        let resets = ddr
            .transport()
            .ops()
            .iter()
            .filter(|op| {
                matches!(op, Op::WriteMasked { address, value, mask }
                    if *address == eps.fifo_dac_in_reset.address
                        && *value != 0
                        && (*mask & 0x0f00) != 0)
            })
            .count();
        assert_eq!(resets, 4);
        assert!(ddr
            .transport()
            .ops()
            .iter()
            .any(|op| matches!(op, Op::Trigger { address, bit }
                if *address == eps.ui_reset.address && *bit == eps.ui_reset.bit)));
    }

    #[test]
    fn full_sequence_reaches_steady_state() {
        let mut ddr = test_ddr();
        let frame = test_frame(&small_layout());
        ddr.write_setup(true).unwrap();
        ddr.write_buf(&frame, false).unwrap();
        ddr.repeat_setup().unwrap();
        let control = ddr.control();
        assert!(!control.dac_write);
        assert!(control.dac_read);
        assert!(control.adc_write);
        assert!(control.adc_transfer);
        assert_eq!(ddr.phase(), Phase::Streaming);
        // The wire register agrees with the mirror.
        let eps = DdrEndpoints::instrument_default();
        let word = ddr.transport().wire(eps.dac_write_enable.address);
        assert_eq!(word & 1 << eps.dac_write_enable.bit, 0);
        assert_ne!(word & 1 << eps.dac_read_enable.bit, 0);
        assert_ne!(word & 1 << eps.adc_write_enable.bit, 0);
        assert_ne!(word & 1 << eps.adc_transfer_enable.bit, 0);
    }

    #[test]
    fn repeat_setup_reasserts_enables_atomically() {
        let mut ddr = test_ddr();
        let frame = test_frame(&small_layout());
        ddr.write_setup(true).unwrap();
        ddr.write_buf(&frame, true).unwrap();
        ddr.transport_mut().clear_ops();
        ddr.repeat_setup().unwrap();
        let eps = DdrEndpoints::instrument_default();
        let simultaneous: Vec<_> = ddr
            .transport()
            .ops()
            .iter()
            .filter(|op| matches!(op, Op::Simultaneous { .. }))
            .collect();
        assert_eq!(
            simultaneous,
            [&Op::Simultaneous {
                address: eps.adc_write_enable.address,
                bits: vec![
                    eps.adc_write_enable.bit,
                    eps.dac_read_enable.bit,
                    eps.adc_transfer_enable.bit,
                ],
            }]
        );
        // The atomic re-assert is the last register access of the sequence.
        assert!(matches!(
            ddr.transport().ops().last(),
            Some(Op::Simultaneous { .. })
        ));
    }

    #[test]
    fn stop_transfer_drops_back_to_playing() {
        let mut ddr = test_ddr();
        let frame = test_frame(&small_layout());
        ddr.write_setup(true).unwrap();
        ddr.write_buf(&frame, false).unwrap();
        ddr.repeat_setup().unwrap();
        ddr.stop_transfer().unwrap();
        assert_eq!(ddr.phase(), Phase::Playing);
        assert!(!ddr.control().adc_transfer);
        ddr.start_transfer().unwrap();
        assert_eq!(ddr.phase(), Phase::Streaming);
        assert!(ddr.control().adc_transfer);
    }

    #[test]
    fn adc_single_sets_address_and_pulses_reset() {
        let mut ddr = test_ddr();
        ddr.transport_mut().clear_ops();
        ddr.adc_single().unwrap();
        let eps = DdrEndpoints::instrument_default();
        let ops = ddr.transport().ops();
        assert!(matches!(ops[0], Op::WriteMasked { address, value, .. }
            if address == eps.adc_addr_set.address && value == 1 << eps.adc_addr_set.bit));
        assert!(matches!(ops[1], Op::Trigger { address, bit }
            if address == eps.adc_addr_reset.address && bit == eps.adc_addr_reset.bit));
    }

    #[test]
    fn write_buf_rejects_wrong_frame_length() {
        let mut ddr = test_ddr();
        let frame = vec![0u8; small_layout().frame_len() - 2];
        ddr.transport_mut().clear_ops();
        let err = ddr.write_buf(&frame, true).unwrap_err();
        assert!(matches!(err, Error::Configuration(_)));
        // Rejected before any register access.
        assert!(ddr.transport().ops().is_empty());
    }

    #[test]
    fn short_write_is_a_transport_error() {
        let mut ddr = test_ddr();
        let frame = test_frame(&small_layout());
        ddr.write_setup(true).unwrap();
        ddr.transport_mut().fail_next_pipe(100);
        let err = ddr.write_buf(&frame, true).unwrap_err();
        assert_eq!(
            err,
            Error::Transport {
                expected: frame.len(),
                actual: 100
            }
        );
        // DacWrite released, playback tail skipped, caller must set up again.
        let control = ddr.control();
        assert!(!control.dac_write);
        assert!(!control.dac_read);
        assert!(!control.adc_transfer);
        assert_eq!(ddr.phase(), Phase::Idle);
    }

    #[test]
    fn stripe_follows_pair_swapped_slots() {
        let layout = BufferLayout {
            sample_size: 2,
            ..small_layout()
        };
        let channels: Vec<Vec<u16>> = (0..8).map(|i| vec![100 * i, 100 * i + 1]).collect();
        let frame = stripe_channels(&layout, &channels).unwrap();
        let slots = [6, 7, 4, 5, 2, 3, 0, 1];
        for k in 0..2 {
            for (i, &slot) in slots.iter().enumerate() {
                let b = (k * 8 + slot) * 2;
                let word = u16::from_le_bytes([frame[b], frame[b + 1]]);
                assert_eq!(word, channels[i][k], "channel {i} sample {k}");
            }
        }
    }

    #[test]
    fn stripe_rejects_wrong_shape() {
        let layout = small_layout();
        let short = vec![vec![0u16; layout.sample_size]; 7];
        assert!(stripe_channels(&layout, &short).is_err());
        let mut channels = vec![vec![0u16; layout.sample_size]; 8];
        channels[3].pop();
        assert!(stripe_channels(&layout, &channels).is_err());
    }

    #[test]
    fn fifo_status_decodes_word() {
        let mut ddr = test_ddr();
        let eps = DdrEndpoints::instrument_default();
        let word =
            1u32 << eps.dac_in_empty.bit | 1u32 << eps.adc_out_full.bit | 37u32 << eps.adc_data_count.bit;
        ddr.transport_mut().set_wire(eps.status_word(), word);
        let status = ddr.fifo_status().unwrap();
        assert!(status.dac_in.empty);
        assert!(!status.dac_in.full);
        assert!(status.adc_out.full);
        assert!(!status.adc_out.empty);
        assert_eq!(status.adc_data_count, 37);
    }

    #[test]
    fn adc_debug_without_endpoint_is_a_noop() {
        let mut eps = DdrEndpoints::instrument_default();
        eps.adc_debug = None;
        let mut ddr = Ddr::new(SimTransport::new(2), eps, small_layout()).unwrap();
        ddr.set_adc_debug().unwrap();
        assert!(!ddr.control().adc_debug);
    }

    #[test]
    fn capture_read_length_must_be_aligned() {
        let mut ddr = test_ddr();
        assert!(matches!(
            ddr.read_capture_block(24, CaptureSource::Adc),
            Err(Error::Configuration(_))
        ));
    }

    #[test]
    fn function_generator_readback_returns_written_bytes() {
        let mut ddr = test_ddr();
        let frame = test_frame(&small_layout());
        ddr.write_setup(true).unwrap();
        ddr.write_buf(&frame, false).unwrap();
        let back = ddr
            .read_capture_block(64, CaptureSource::FunctionGenerator)
            .unwrap();
        assert_eq!(&back[..], &frame[..64]);
    }

    #[test]
    fn layout_validation_rejects_bad_block_size() {
        let layout = BufferLayout {
            block_size: 100,
            ..BufferLayout::default()
        };
        assert!(layout.validate().is_err());
        let layout = BufferLayout {
            block_size: 32768,
            ..BufferLayout::default()
        };
        assert!(layout.validate().is_err());
    }

    #[test]
    fn default_layout_matches_wrap_boundary() {
        let layout = BufferLayout::default();
        assert_eq!(layout.sample_size, 14_680_064);
        assert_eq!(layout.frame_len(), 14_680_064 * 16);
        layout.validate().unwrap();
    }
}
