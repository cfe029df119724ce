//! Transport abstraction.
//!
//! The buffer controller talks to the instrument through the [`Transport`]
//! trait: wire register access for control bits and one-shot triggers, and
//! block pipes for bulk data. The trait matches the primitive set of the
//! USB bridge on the instrument; [`crate::sim`] provides an in-memory
//! implementation for tests and bring-up without hardware.
//!
//! All calls block; latency is proportional to transfer size. Block pipe
//! methods follow the device convention of returning a signed byte count
//! where a negative value is a device status code — they never fail through
//! `Result`. Interpreting a short count is the caller's job.

use crate::error::Result;

/// Blocking register and bulk-pipe access to the instrument.
pub trait Transport {
    /// Reads a 32-bit wire register.
    fn read_wire(&mut self, address: u16) -> Result<u32>;

    /// Writes the masked bits of a 32-bit wire register, leaving the rest
    /// unchanged.
    fn write_wire_masked(&mut self, address: u16, value: u32, mask: u32) -> Result<()>;

    /// Sets several bits of one register in a single atomic register
    /// transaction.
    ///
    /// Unlike repeated [`Transport::set_wire_bit`] calls, the device sees
    /// all bits change in the same register update cycle.
    fn write_bits_simultaneous(&mut self, address: u16, bits: &[u8]) -> Result<()>;

    /// Pulses a one-shot trigger bit.
    fn trigger(&mut self, address: u16, bit: u8) -> Result<()>;

    /// Writes `data` to a block pipe in transfers of `block_size` bytes.
    ///
    /// Returns the number of bytes written, or a negative device status
    /// code.
    fn write_block_pipe(&mut self, address: u16, block_size: usize, data: &[u8]) -> i64;

    /// Fills `data` from a block pipe in transfers of `block_size` bytes.
    ///
    /// Returns the number of bytes read, or a negative device status code.
    fn read_block_pipe(&mut self, address: u16, block_size: usize, data: &mut [u8]) -> i64;

    /// Sets a single wire bit.
    fn set_wire_bit(&mut self, address: u16, bit: u8) -> Result<()> {
        self.write_wire_masked(address, 1 << bit, 1 << bit)
    }

    /// Clears a single wire bit.
    fn clear_wire_bit(&mut self, address: u16, bit: u8) -> Result<()> {
        self.write_wire_masked(address, 0, 1 << bit)
    }
}
