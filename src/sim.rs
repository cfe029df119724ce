//! Simulated instrument.
//!
//! This module implements [`Transport`] over an in-memory model of the
//! instrument: a wire register file, the DAC DDR memory filled by bulk
//! writes, and a [`StreamModel`] that produces the capture stream the FPGA
//! would — fast ADC words, DAC readback echoed from the written frame,
//! versioned timestamp sub-fields, sequence counters and the constant
//! check words.
//!
//! Every transport call is appended to an operation log, which lets tests
//! assert sequencing properties (for instance that the three steady-state
//! enables were re-asserted in a single simultaneous write). The model is
//! also used by the demo binary to run the full write/capture flow without
//! hardware.

use crate::ddr::DAC_STRIPE_SLOTS;
use crate::endpoints::DdrEndpoints;
use crate::error::Result;
use crate::transport::Transport;
use std::collections::HashMap;

/// One recorded transport operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Op {
    /// Wire register read.
    ReadWire {
        /// Register address.
        address: u16,
    },
    /// Masked wire register write.
    WriteMasked {
        /// Register address.
        address: u16,
        /// Value written.
        value: u32,
        /// Mask of affected bits.
        mask: u32,
    },
    /// Atomic multi-bit set.
    Simultaneous {
        /// Register address.
        address: u16,
        /// Bits set in one register transaction.
        bits: Vec<u8>,
    },
    /// One-shot trigger pulse.
    Trigger {
        /// Register address.
        address: u16,
        /// Trigger bit.
        bit: u8,
    },
    /// Bulk pipe write.
    PipeWrite {
        /// Pipe address.
        address: u16,
        /// Transfer length in bytes.
        len: usize,
    },
    /// Bulk pipe read.
    PipeRead {
        /// Pipe address.
        address: u16,
        /// Transfer length in bytes.
        len: usize,
    },
}

/// In-memory transport implementation.
#[derive(Debug)]
pub struct SimTransport {
    endpoints: DdrEndpoints,
    wires: HashMap<u16, u32>,
    ops: Vec<Op>,
    dac_memory: Vec<u8>,
    stream: StreamModel,
    fg_cursor: usize,
    fail_next_pipe: Option<i64>,
}

impl SimTransport {
    /// Creates a simulated instrument producing the given stream version.
    pub fn new(producer_version: u32) -> SimTransport {
        SimTransport {
            endpoints: DdrEndpoints::instrument_default(),
            wires: HashMap::new(),
            ops: Vec::new(),
            dac_memory: Vec::new(),
            stream: StreamModel::new(producer_version),
            fg_cursor: 0,
            fail_next_pipe: None,
        }
    }

    /// The operation log.
    pub fn ops(&self) -> &[Op] {
        &self.ops
    }

    /// Clears the operation log.
    pub fn clear_ops(&mut self) {
        self.ops.clear();
    }

    /// Current value of a wire register.
    pub fn wire(&self, address: u16) -> u32 {
        self.wires.get(&address).copied().unwrap_or(0)
    }

    /// Overwrites a wire register, e.g. to present a status word.
    pub fn set_wire(&mut self, address: u16, value: u32) {
        self.wires.insert(address, value);
    }

    /// The DAC memory as written through the bulk input pipe.
    pub fn dac_memory(&self) -> &[u8] {
        &self.dac_memory
    }

    /// Makes the next bulk pipe call return `result` instead of the full
    /// transfer count.
    pub fn fail_next_pipe(&mut self, result: i64) {
        self.fail_next_pipe = Some(result);
    }

    fn control_bit(&self, address: u16, bit: u8) -> bool {
        (self.wire(address) >> bit) & 1 == 1
    }
}

impl Transport for SimTransport {
    fn read_wire(&mut self, address: u16) -> Result<u32> {
        self.ops.push(Op::ReadWire { address });
        Ok(self.wire(address))
    }

    fn write_wire_masked(&mut self, address: u16, value: u32, mask: u32) -> Result<()> {
        let reg = self.wires.entry(address).or_insert(0);
        *reg = (*reg & !mask) | (value & mask);
        self.ops.push(Op::WriteMasked {
            address,
            value,
            mask,
        });
        Ok(())
    }

    fn write_bits_simultaneous(&mut self, address: u16, bits: &[u8]) -> Result<()> {
        let reg = self.wires.entry(address).or_insert(0);
        for &bit in bits {
            *reg |= 1 << bit;
        }
        self.ops.push(Op::Simultaneous {
            address,
            bits: bits.to_vec(),
        });
        Ok(())
    }

    fn trigger(&mut self, address: u16, bit: u8) -> Result<()> {
        self.ops.push(Op::Trigger { address, bit });
        Ok(())
    }

    fn write_block_pipe(&mut self, address: u16, block_size: usize, data: &[u8]) -> i64 {
        self.ops.push(Op::PipeWrite {
            address,
            len: data.len(),
        });
        if let Some(result) = self.fail_next_pipe.take() {
            return result;
        }
        if data.len() % block_size != 0 {
            return -2;
        }
        if address == self.endpoints.block_pipe_in.address {
            self.dac_memory = data.to_vec();
        }
        data.len() as i64
    }

    fn read_block_pipe(&mut self, address: u16, block_size: usize, data: &mut [u8]) -> i64 {
        self.ops.push(Op::PipeRead {
            address,
            len: data.len(),
        });
        if let Some(result) = self.fail_next_pipe.take() {
            return result;
        }
        if data.len() % block_size != 0 {
            return -2;
        }
        if address == self.endpoints.block_pipe_out.address {
            let transfer = self.endpoints.adc_transfer_enable;
            if !self.control_bit(transfer.address, transfer.bit) {
                // Nothing flows into the host FIFO; the pipe read times out.
                return -1;
            }
            let debug = match self.endpoints.adc_debug {
                Some(ep) => self.control_bit(ep.address, ep.bit),
                None => false,
            };
            self.stream.fill(data, &self.dac_memory, debug);
            data.len() as i64
        } else if address == self.endpoints.block_pipe_out_fg.address {
            if self.dac_memory.is_empty() {
                data.fill(0);
            } else {
                for byte in data.iter_mut() {
                    *byte = self.dac_memory[self.fg_cursor];
                    self.fg_cursor = (self.fg_cursor + 1) % self.dac_memory.len();
                }
            }
            data.len() as i64
        } else {
            -1
        }
    }
}

/// Capture stream synthesizer.
///
/// Produces the byte stream the FPGA writes into the capture buffer:
/// sixteen-byte striped words, one per fast ADC cycle, with the slow-ADC
/// fields cycling every 5 fast samples and the check words every 10.
/// Stateful across [`StreamModel::fill`] calls so consecutive reads
/// continue the same stream.
#[derive(Debug)]
pub struct StreamModel {
    version: u32,
    cycle: u64,
}

// Slot occupied by each logical channel, inverse of the decode
// permutation [6, 7, 5, 4, 2, 3, 0, 1].
const SLOT_SOURCE: [usize; 8] = [6, 7, 4, 5, 3, 2, 0, 1];

impl StreamModel {
    /// Timestamp increment per slow-ADC cycle.
    pub const TIMESTAMP_STEP: u64 = 5;

    // Starts close below a 16-bit carry so short captures exercise the
    // sub-field split.
    const TIMESTAMP_START: u64 = 0x1_0000_ff00;

    /// Creates a stream model for the given producer version.
    pub fn new(producer_version: u32) -> StreamModel {
        StreamModel {
            version: producer_version,
            cycle: 0,
        }
    }

    /// Fills `buf` with the next stretch of capture stream.
    ///
    /// `dac_memory` is the striped playback frame to echo into the DAC
    /// readback taps; `debug` replaces the fast ADC channels with the
    /// diagnostic counter mux. Trailing bytes that do not fit a whole
    /// striped word are zeroed.
    pub fn fill(&mut self, buf: &mut [u8], dac_memory: &[u8], debug: bool) {
        // Capture bursts enter the transfer FIFO aligned to slow-ADC
        // frame boundaries.
        if self.cycle % 10 != 0 {
            self.cycle += 10 - self.cycle % 10;
        }
        let groups = buf.len() / 16;
        for g in 0..groups {
            let logical = self.word_group(dac_memory, debug);
            for (slot, &src) in SLOT_SOURCE.iter().enumerate() {
                let b = g * 16 + slot * 2;
                buf[b..b + 2].copy_from_slice(&logical[src].to_le_bytes());
            }
        }
        buf[groups * 16..].fill(0);
    }

    fn word_group(&mut self, dac_memory: &[u8], debug: bool) -> [u16; 8] {
        let n = self.cycle;
        self.cycle += 1;

        let phase = n % 5;
        let ten = n % 10;
        let slow_cycle = n / 5;
        let ts = Self::TIMESTAMP_START + slow_cycle * Self::TIMESTAMP_STEP;
        let ts_lsb = (ts & 0xffff) as u16;
        let ts_mid = ((ts >> 16) & 0xffff) as u16;
        let ts_msb = ((ts >> 32) & 0xffff) as u16;
        let ads_a = 1000u16.wrapping_add((slow_cycle as u16).wrapping_mul(3));
        let ads_b = (slow_cycle as u16).wrapping_mul(slow_cycle as u16);
        let seq0 = ((2 * (n / 10)) % 24) as u16;
        let seq1 = ((2 * (n / 10) + 1) % 24) as u16;
        // The DACs update every other fast cycle.
        let m = (n / 2) as usize;

        let mut logical = [0u16; 8];
        for (i, value) in logical.iter_mut().take(4).enumerate() {
            *value = if debug {
                if i == 0 {
                    n as u16
                } else {
                    // Raw DAC word bits 47:0.
                    raw_slot(dac_memory, m, i - 1)
                }
            } else {
                adc_sample(i, n)
            };
        }
        logical[4] = if n % 2 == 0 {
            dac_channel(dac_memory, m, 0)
        } else {
            dac_channel(dac_memory, m, 1)
        };
        logical[5] = if n % 2 == 0 {
            dac_channel(dac_memory, m, 2)
        } else {
            dac_channel(dac_memory, m, 3)
        };
        logical[6] = match phase {
            0 => {
                if self.version < 2 {
                    ts_lsb
                } else {
                    ads_b
                }
            }
            1 => ts_mid,
            // Observer taps of DAC channel 4.
            _ => dac_channel(dac_memory, m, 4),
        };
        logical[7] = match phase {
            0 => ads_a,
            1 => {
                if self.version < 2 {
                    ads_b
                } else {
                    ts_lsb
                }
            }
            2 => ts_msb,
            3 => {
                if ten == 3 {
                    0xaa55
                } else {
                    0x77bb
                }
            }
            _ => {
                if ten == 4 {
                    (0x28b << 5) | seq0
                } else {
                    (0x28c << 5) | seq1
                }
            }
        };
        logical
    }
}

fn adc_sample(channel: usize, cycle: u64) -> u16 {
    ((cycle as u16) & 0x0fff) | ((channel as u16) << 12)
}

// Value DAC `channel` plays at update index `m`, read back from the
// striped frame.
fn dac_channel(dac_memory: &[u8], m: usize, channel: usize) -> u16 {
    raw_slot(dac_memory, m, DAC_STRIPE_SLOTS[channel])
}

fn raw_slot(dac_memory: &[u8], m: usize, slot: usize) -> u16 {
    let words = dac_memory.len() / 16;
    if words == 0 {
        return 0;
    }
    let b = ((m % words) * 8 + slot) * 2;
    u16::from_le_bytes([dac_memory[b], dac_memory[b + 1]])
}
