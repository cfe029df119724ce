//! Register endpoint directory.
//!
//! This module defines the symbolic register map consumed by the buffer
//! controller: every control bit, trigger, pipe, and status field the DDR
//! logic exposes, as a closed set of named [`Endpoint`] records. The map is
//! validated once when the controller is constructed, so a malformed
//! directory fails at startup rather than in the middle of a capture.

use crate::error::{Error, Result};

/// One register endpoint: an address plus the bit range inside it.
///
/// Wire endpoints address a 32-bit register; pipe endpoints only use the
/// address and leave `bit`/`width` at zero width semantics aside.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub struct Endpoint {
    /// Register (or pipe) address.
    pub address: u16,
    /// Lowest bit of the field inside the register.
    pub bit: u8,
    /// Width of the field in bits.
    pub width: u8,
}

impl Endpoint {
    /// Single-bit wire endpoint.
    pub const fn bit(address: u16, bit: u8) -> Endpoint {
        Endpoint {
            address,
            bit,
            width: 1,
        }
    }

    /// Multi-bit wire field.
    pub const fn field(address: u16, bit: u8, width: u8) -> Endpoint {
        Endpoint {
            address,
            bit,
            width,
        }
    }

    /// Pipe endpoint; only the address is meaningful.
    pub const fn pipe(address: u16) -> Endpoint {
        Endpoint {
            address,
            bit: 0,
            width: 32,
        }
    }

    /// Mask of the field within its register.
    pub fn mask(&self) -> u32 {
        if self.width >= 32 {
            u32::MAX
        } else {
            ((1u32 << self.width) - 1) << self.bit
        }
    }
}

/// The full endpoint directory for the DDR streaming buffer.
///
/// Field names mirror the hardware signal names. `adc_debug` is optional
/// because the diagnostic mux is not present in every FPGA revision; the
/// controller treats a missing endpoint as a no-op.
#[derive(Debug, Clone)]
pub struct DdrEndpoints {
    /// Host write enable for the DAC-bound buffer.
    pub dac_write_enable: Endpoint,
    /// Read enable: DDR data to the DACs, ADC data into DDR.
    pub dac_read_enable: Endpoint,
    /// Write enable for ADC data into the DDR capture buffer.
    pub adc_write_enable: Endpoint,
    /// Transfer enable: capture data into the host-facing FIFO.
    pub adc_transfer_enable: Endpoint,
    /// Diagnostic mux: counter and raw DAC bits instead of ADC data.
    pub adc_debug: Option<Endpoint>,
    /// Capture write enable driven by ADC data-ready instead of the timing core.
    pub use_adc_ready: Endpoint,
    /// Set the capture read address to the current write address.
    pub adc_addr_set: Endpoint,
    /// Reset for the DAC input FIFO.
    pub fifo_dac_in_reset: Endpoint,
    /// Reset for the DAC read FIFO.
    pub fifo_dac_read_reset: Endpoint,
    /// Reset for the ADC input FIFO.
    pub fifo_adc_in_reset: Endpoint,
    /// Reset for the ADC transfer FIFO.
    pub fifo_adc_transfer_reset: Endpoint,
    /// Trigger: reset the memory-interface address pointers.
    pub ui_reset: Endpoint,
    /// Trigger: reset the capture address after `adc_addr_set`.
    pub adc_addr_reset: Endpoint,
    /// Bulk pipe carrying striped DAC frames into the DDR.
    pub block_pipe_in: Endpoint,
    /// Bulk pipe carrying capture data to the host.
    pub block_pipe_out: Endpoint,
    /// Bulk pipe reading back the written DAC data (function generator).
    pub block_pipe_out_fg: Endpoint,
    /// Status: DAC input FIFO empty.
    pub dac_in_empty: Endpoint,
    /// Status: DAC input FIFO full.
    pub dac_in_full: Endpoint,
    /// Status: DAC read FIFO empty.
    pub dac_out_empty: Endpoint,
    /// Status: DAC read FIFO full.
    pub dac_out_full: Endpoint,
    /// Status: ADC input FIFO empty.
    pub adc_in_empty: Endpoint,
    /// Status: ADC input FIFO full.
    pub adc_in_full: Endpoint,
    /// Status: ADC transfer FIFO empty.
    pub adc_out_empty: Endpoint,
    /// Status: ADC transfer FIFO full.
    pub adc_out_full: Endpoint,
    /// Status: capture FIFO fill count.
    pub adc_data_count: Endpoint,
}

// Wire-in 0x03 carries the DDR control bits, wire-out 0x25 the FIFO status
// word, trigger-in 0x40 the one-shot resets. Pipe addresses follow the
// usual in/out split at 0x80/0xa0.
const CONTROL: u16 = 0x03;
const STATUS: u16 = 0x25;
const TRIG: u16 = 0x40;

impl DdrEndpoints {
    /// The endpoint directory of the current instrument bitstream.
    pub fn instrument_default() -> DdrEndpoints {
        DdrEndpoints {
            dac_write_enable: Endpoint::bit(CONTROL, 0),
            dac_read_enable: Endpoint::bit(CONTROL, 1),
            adc_write_enable: Endpoint::bit(CONTROL, 2),
            adc_transfer_enable: Endpoint::bit(CONTROL, 3),
            adc_debug: Some(Endpoint::bit(CONTROL, 4)),
            use_adc_ready: Endpoint::bit(CONTROL, 5),
            adc_addr_set: Endpoint::bit(CONTROL, 6),
            fifo_dac_in_reset: Endpoint::bit(CONTROL, 8),
            fifo_dac_read_reset: Endpoint::bit(CONTROL, 9),
            fifo_adc_in_reset: Endpoint::bit(CONTROL, 10),
            fifo_adc_transfer_reset: Endpoint::bit(CONTROL, 11),
            ui_reset: Endpoint::bit(TRIG, 0),
            adc_addr_reset: Endpoint::bit(TRIG, 1),
            block_pipe_in: Endpoint::pipe(0x81),
            block_pipe_out: Endpoint::pipe(0xa1),
            block_pipe_out_fg: Endpoint::pipe(0xa2),
            dac_in_empty: Endpoint::bit(STATUS, 0),
            dac_in_full: Endpoint::bit(STATUS, 1),
            dac_out_empty: Endpoint::bit(STATUS, 2),
            dac_out_full: Endpoint::bit(STATUS, 3),
            adc_in_empty: Endpoint::bit(STATUS, 4),
            adc_in_full: Endpoint::bit(STATUS, 5),
            adc_out_empty: Endpoint::bit(STATUS, 6),
            adc_out_full: Endpoint::bit(STATUS, 7),
            adc_data_count: Endpoint::field(STATUS, 16, 10),
        }
    }

    /// Checks the directory for internal consistency.
    ///
    /// The three steady-state enables must live in one register because
    /// they are re-asserted through a single simultaneous write; status
    /// fields must share the status word; no field may extend past bit 31.
    pub fn validate(&self) -> Result<()> {
        for ep in self.wire_endpoints() {
            if ep.width == 0 || u32::from(ep.bit) + u32::from(ep.width) > 32 {
                return Err(Error::Configuration(format!(
                    "endpoint field at address {:#04x} bit {} width {} does not fit a register",
                    ep.address, ep.bit, ep.width
                )));
            }
        }
        let atomic = [
            self.adc_write_enable,
            self.dac_read_enable,
            self.adc_transfer_enable,
        ];
        if atomic.iter().any(|ep| ep.address != atomic[0].address) {
            return Err(Error::Configuration(
                "AdcWrite, DacRead and AdcTransfer must share one register \
                 for the simultaneous re-assert"
                    .to_string(),
            ));
        }
        let status = self.status_endpoints();
        if status.iter().any(|ep| ep.address != status[0].address) {
            return Err(Error::Configuration(
                "FIFO status fields must share the status word".to_string(),
            ));
        }
        let pipes = [
            self.block_pipe_in.address,
            self.block_pipe_out.address,
            self.block_pipe_out_fg.address,
        ];
        if pipes[0] == pipes[1] || pipes[0] == pipes[2] || pipes[1] == pipes[2] {
            return Err(Error::Configuration(
                "pipe endpoints must have distinct addresses".to_string(),
            ));
        }
        Ok(())
    }

    /// Address of the FIFO status word.
    pub fn status_word(&self) -> u16 {
        self.dac_in_empty.address
    }

    fn wire_endpoints(&self) -> Vec<Endpoint> {
        let mut eps = vec![
            self.dac_write_enable,
            self.dac_read_enable,
            self.adc_write_enable,
            self.adc_transfer_enable,
            self.use_adc_ready,
            self.adc_addr_set,
            self.fifo_dac_in_reset,
            self.fifo_dac_read_reset,
            self.fifo_adc_in_reset,
            self.fifo_adc_transfer_reset,
            self.ui_reset,
            self.adc_addr_reset,
        ];
        eps.extend(self.adc_debug);
        eps.extend(self.status_endpoints());
        eps
    }

    fn status_endpoints(&self) -> [Endpoint; 9] {
        [
            self.dac_in_empty,
            self.dac_in_full,
            self.dac_out_empty,
            self.dac_out_full,
            self.adc_in_empty,
            self.adc_in_full,
            self.adc_out_empty,
            self.adc_out_full,
            self.adc_data_count,
        ]
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn default_map_is_valid() {
        DdrEndpoints::instrument_default().validate().unwrap();
    }

    #[test]
    fn atomic_trio_must_share_address() {
        let mut eps = DdrEndpoints::instrument_default();
        eps.adc_transfer_enable = Endpoint::bit(0x04, 3);
        assert!(matches!(eps.validate(), Err(Error::Configuration(_))));
    }

    #[test]
    fn field_must_fit_register() {
        let mut eps = DdrEndpoints::instrument_default();
        eps.adc_data_count = Endpoint::field(STATUS, 28, 10);
        assert!(eps.validate().is_err());
    }

    #[test]
    fn field_mask() {
        assert_eq!(Endpoint::bit(0, 3).mask(), 0b1000);
        assert_eq!(Endpoint::field(0, 16, 10).mask(), 0x03ff_0000);
    }
}
