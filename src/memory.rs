//! The 64 KiB memory subsystem.
//!
//! Memory is composed of typed chips mounted over the flat address space:
//! plain RAM, ROM whose writes are ignored (or reported in strict mode), and
//! single-byte input/output ports. Reading an input port whose buffer is
//! empty produces [`MemFault::AwaitingInput`], the suspension token the CPU
//! surfaces to its host; writing an output port enqueues an
//! [`MemoryEvent::OutputWritten`] before the write returns.
//!
//! Reads of addresses no chip covers return zero and set a sticky error
//! flag. No failure in this module aborts a simulation on its own.

use byteorder::ByteOrder;
use std::collections::{HashSet, VecDeque};
use std::fmt;
use util::Endian;

use crate::constants;

pub mod cache;

/// Non-fatal faults surfaced by the memory subsystem.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum MemFault {
    /// An input port was read with nothing buffered; carries the port
    /// address the host must satisfy or abort.
    AwaitingInput(u16),
    /// A ROM byte was written while strict ROM checking is enabled.
    RomWrite(u16),
}

impl fmt::Display for MemFault {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            MemFault::AwaitingInput(addr) => {
                write!(f, "Waiting for input on port 0x{:04X}.", addr)
            }
            MemFault::RomWrite(addr) => write!(f, "Wrote to read-only memory at 0x{:04X}.", addr),
        }
    }
}

impl std::error::Error for MemFault {}

pub type MemResult<T> = Result<T, MemFault>;

/// Capability set every memory implementation presents to the CPU. The
/// `get_*` accessors are side-effect free; the `read_*` accessors trigger
/// port semantics. Words are big-endian across `a` and `a + 1`.
pub trait MemoryDevice {
    fn size(&self) -> u32;

    fn get_byte(&self, address: u16) -> u8;

    fn read_byte(&mut self, address: u16) -> MemResult<u8>;

    fn write_byte(&mut self, address: u16, value: u8) -> MemResult<()>;

    fn get_word(&self, address: u16) -> u16 {
        Endian::read_u16(&[self.get_byte(address), self.get_byte(address.wrapping_add(1))])
    }

    fn read_word(&mut self, address: u16) -> MemResult<u16> {
        let hi = self.read_byte(address)?;
        let lo = self.read_byte(address.wrapping_add(1))?;
        Ok(Endian::read_u16(&[hi, lo]))
    }

    fn write_word(&mut self, address: u16, value: u16) -> MemResult<()> {
        let mut buf = [0u8; 2];
        Endian::write_u16(&mut buf, value);
        self.write_byte(address, buf[0])?;
        self.write_byte(address.wrapping_add(1), buf[1])
    }

    /// Copies a slice into backing storage starting at `base`, bypassing ROM
    /// protection and port semantics. Used by program loaders.
    fn load_values(&mut self, base: u16, values: &[u8]);

    /// Zeroes all chip contents and discards buffered IO.
    fn clear(&mut self);
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum ChipKind {
    Ram,
    Rom,
    InputPort,
    OutputPort,
}

/// Description of one chip for [`MainMemory::construct`].
#[derive(Clone, Copy, Debug)]
pub struct MemoryChipSpec {
    pub kind: ChipKind,
    pub base: u16,
    pub span: u32,
}

#[derive(Clone, Debug)]
struct MemoryChip {
    kind: ChipKind,
    base: u16,
    data: Vec<u8>,
    input: VecDeque<u8>,
    input_aborted: bool,
}

impl MemoryChip {
    fn new(spec: &MemoryChipSpec) -> MemoryChip {
        let top = constants::MEMORY_SIZE - u32::from(spec.base);
        let span = spec.span.min(top) as usize;
        MemoryChip {
            kind: spec.kind,
            base: spec.base,
            data: vec![0; span],
            input: VecDeque::new(),
            input_aborted: false,
        }
    }

    fn contains(&self, address: u16) -> bool {
        address >= self.base && u32::from(address - self.base) < self.data.len() as u32
    }
}

/// Events the subsystem publishes to its host. Output events are enqueued
/// synchronously, before the triggering write returns.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum MemoryEvent {
    InputRequested { address: u16 },
    OutputWritten { address: u16, value: u8 },
}

#[derive(Clone, Copy, Default, Debug)]
pub struct MemoryOptions {
    /// Report ROM writes as faults instead of silently ignoring them.
    pub strict_rom: bool,
}

/// Chip-composed main memory. Later chips in the construction list take
/// precedence where spans overlap, so IO ports may be punched into a RAM or
/// ROM region.
pub struct MainMemory {
    chips: Vec<MemoryChip>,
    options: MemoryOptions,
    events: VecDeque<MemoryEvent>,
    written: HashSet<u16>,
    had_error: bool,
}

impl MainMemory {
    /// A single RAM chip covering the whole address space.
    pub fn new() -> MainMemory {
        MainMemory::with_options(Default::default())
    }

    pub fn with_options(options: MemoryOptions) -> MainMemory {
        let mut memory = MainMemory {
            chips: Vec::new(),
            options,
            events: VecDeque::new(),
            written: HashSet::new(),
            had_error: false,
        };
        memory.construct(&[MemoryChipSpec {
            kind: ChipKind::Ram,
            base: 0,
            span: constants::MEMORY_SIZE,
        }]);
        memory
    }

    /// Replaces the chip set. All previous contents are discarded.
    pub fn construct(&mut self, specs: &[MemoryChipSpec]) {
        self.chips = specs.iter().map(MemoryChip::new).collect();
        self.events.clear();
        self.written.clear();
        self.had_error = false;
    }

    fn chip_index(&self, address: u16) -> Option<usize> {
        // Last mounted chip wins, so ports override the region they overlay.
        self.chips.iter().rposition(|c| c.contains(address))
    }

    /// Buffers bytes behind an input port.
    pub fn on_input_received(&mut self, address: u16, bytes: &[u8]) {
        if let Some(i) = self.chip_index(address) {
            let chip = &mut self.chips[i];
            if chip.kind == ChipKind::InputPort {
                chip.input.extend(bytes.iter().copied());
                chip.input_aborted = false;
            }
        }
    }

    /// Marks an outstanding input request as unsatisfiable. Subsequent reads
    /// of the port yield zero, which programs observe as end-of-input.
    pub fn on_input_aborted(&mut self, address: u16) {
        if let Some(i) = self.chip_index(address) {
            let chip = &mut self.chips[i];
            if chip.kind == ChipKind::InputPort {
                chip.input_aborted = true;
            }
        }
    }

    /// Drops buffered input on every port and clears pending events.
    pub fn clear_io(&mut self) {
        for chip in &mut self.chips {
            chip.input.clear();
            chip.input_aborted = false;
        }
        self.events.clear();
    }

    pub fn pop_event(&mut self) -> Option<MemoryEvent> {
        self.events.pop_front()
    }

    /// True if an access touched an address no chip covers since the last
    /// [`MainMemory::clear_error`].
    pub fn had_error(&self) -> bool {
        self.had_error
    }

    pub fn clear_error(&mut self) {
        self.had_error = false;
    }

    /// Addresses written since the last [`MainMemory::clear_written`], for
    /// hosts that highlight changed memory.
    pub fn written_addresses(&self) -> &HashSet<u16> {
        &self.written
    }

    pub fn clear_written(&mut self) {
        self.written.clear();
    }
}

impl Default for MainMemory {
    fn default() -> MainMemory {
        MainMemory::new()
    }
}

impl MemoryDevice for MainMemory {
    fn size(&self) -> u32 {
        constants::MEMORY_SIZE
    }

    fn get_byte(&self, address: u16) -> u8 {
        match self.chip_index(address) {
            Some(i) => {
                let chip = &self.chips[i];
                chip.data[(address - chip.base) as usize]
            }
            None => 0,
        }
    }

    fn read_byte(&mut self, address: u16) -> MemResult<u8> {
        let i = match self.chip_index(address) {
            Some(i) => i,
            None => {
                self.had_error = true;
                return Ok(0);
            }
        };
        let chip = &mut self.chips[i];
        let offset = (address - chip.base) as usize;
        match chip.kind {
            ChipKind::InputPort => {
                if let Some(byte) = chip.input.pop_front() {
                    chip.data[offset] = byte;
                    Ok(byte)
                } else if chip.input_aborted {
                    Ok(0)
                } else {
                    self.events.push_back(MemoryEvent::InputRequested { address });
                    Err(MemFault::AwaitingInput(address))
                }
            }
            _ => Ok(chip.data[offset]),
        }
    }

    fn write_byte(&mut self, address: u16, value: u8) -> MemResult<()> {
        let i = match self.chip_index(address) {
            Some(i) => i,
            None => {
                self.had_error = true;
                return Ok(());
            }
        };
        let chip = &mut self.chips[i];
        let offset = (address - chip.base) as usize;
        match chip.kind {
            ChipKind::Rom => {
                if self.options.strict_rom {
                    return Err(MemFault::RomWrite(address));
                }
                Ok(())
            }
            ChipKind::OutputPort => {
                chip.data[offset] = value;
                self.written.insert(address);
                self.events
                    .push_back(MemoryEvent::OutputWritten { address, value });
                Ok(())
            }
            _ => {
                chip.data[offset] = value;
                self.written.insert(address);
                Ok(())
            }
        }
    }

    fn load_values(&mut self, base: u16, values: &[u8]) {
        for (i, value) in values.iter().enumerate() {
            let address = base.wrapping_add(i as u16);
            if let Some(index) = self.chip_index(address) {
                let chip = &mut self.chips[index];
                let offset = (address - chip.base) as usize;
                chip.data[offset] = *value;
            }
        }
    }

    fn clear(&mut self) {
        for chip in &mut self.chips {
            for byte in &mut chip.data {
                *byte = 0;
            }
            chip.input.clear();
            chip.input_aborted = false;
        }
        self.events.clear();
        self.written.clear();
        self.had_error = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn port_layout() -> MainMemory {
        let mut memory = MainMemory::new();
        memory.construct(&[
            MemoryChipSpec {
                kind: ChipKind::Ram,
                base: 0,
                span: 0x8000,
            },
            MemoryChipSpec {
                kind: ChipKind::Rom,
                base: 0x8000,
                span: 0x8000,
            },
            MemoryChipSpec {
                kind: ChipKind::InputPort,
                base: 0xFC15,
                span: 1,
            },
            MemoryChipSpec {
                kind: ChipKind::OutputPort,
                base: 0xFC16,
                span: 1,
            },
        ]);
        memory
    }

    #[test]
    fn words_are_big_endian() {
        let mut memory = MainMemory::new();
        memory.write_word(0x10, 0xBEEF).unwrap();
        assert_eq!(memory.read_byte(0x10).unwrap(), 0xBE);
        assert_eq!(memory.read_byte(0x11).unwrap(), 0xEF);
        assert_eq!(memory.get_word(0x10), 0xBEEF);
    }

    #[test]
    fn rom_writes_are_ignored_by_default() {
        let mut memory = port_layout();
        memory.write_byte(0x9000, 0xAA).unwrap();
        assert_eq!(memory.read_byte(0x9000).unwrap(), 0);
        // Loading bypasses the protection.
        memory.load_values(0x9000, &[0xAA]);
        assert_eq!(memory.read_byte(0x9000).unwrap(), 0xAA);
    }

    #[test]
    fn strict_rom_reports_the_write() {
        let mut memory = MainMemory::with_options(MemoryOptions { strict_rom: true });
        memory.construct(&[MemoryChipSpec {
            kind: ChipKind::Rom,
            base: 0,
            span: 16,
        }]);
        assert_eq!(memory.write_byte(4, 1), Err(MemFault::RomWrite(4)));
    }

    #[test]
    fn empty_input_port_suspends() {
        let mut memory = port_layout();
        assert_eq!(
            memory.read_byte(0xFC15),
            Err(MemFault::AwaitingInput(0xFC15))
        );
        assert_eq!(
            memory.pop_event(),
            Some(MemoryEvent::InputRequested { address: 0xFC15 })
        );

        memory.on_input_received(0xFC15, b"AB");
        assert_eq!(memory.read_byte(0xFC15).unwrap(), b'A');
        assert_eq!(memory.read_byte(0xFC15).unwrap(), b'B');

        // Aborted input reads as end-of-input zeros.
        memory.on_input_aborted(0xFC15);
        assert_eq!(memory.read_byte(0xFC15).unwrap(), 0);
    }

    #[test]
    fn output_port_emits_event_synchronously() {
        let mut memory = port_layout();
        memory.write_byte(0xFC16, b'A').unwrap();
        assert_eq!(
            memory.pop_event(),
            Some(MemoryEvent::OutputWritten {
                address: 0xFC16,
                value: b'A'
            })
        );
        assert_eq!(memory.pop_event(), None);
    }

    #[test]
    fn ports_override_the_region_they_overlay() {
        let mut memory = port_layout();
        // 0xFC16 lies inside the ROM span, but the port chip wins.
        memory.write_byte(0xFC16, 7).unwrap();
        assert_eq!(memory.read_byte(0xFC16).unwrap(), 7);
    }

    #[test]
    fn uninstalled_reads_are_zero_and_flagged() {
        let mut memory = MainMemory::new();
        memory.construct(&[MemoryChipSpec {
            kind: ChipKind::Ram,
            base: 0,
            span: 16,
        }]);
        assert_eq!(memory.read_byte(0x100).unwrap(), 0);
        assert!(memory.had_error());
        memory.clear_error();
        assert!(!memory.had_error());
    }
}
