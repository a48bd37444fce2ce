//! MCU adapter (component A).
//!
//! Wraps the in-tree [`avr::Core`] together with the IRQ fabric's
//! MCU-owned half: one [`irq::IrqId`] per port pin, raised whenever a `PORT`
//! write changes that pin's output latch. Grounded on
//! `examples/original_source/WalnutApp/src/Emulator.h`'s `avr_t` wrapper and
//! its per-pin `avr_io_getirq`/`avr_connect_irq` surface, and on the
//! `goblin`-based ELF loading shown in `examples/other_examples/manifests/
//! oxidecomputer-hubris/Cargo.toml`'s dependency on the same crate.

use std::fs;
use std::path::Path;

use bit_field::BitField;
use goblin::elf::Elf;
use log::{debug, info, warn};

use crate::avr::{self, port_index, Core};
use crate::error::{SimError, SimResult};
use crate::signal::irq::{IrqId, Pool};

/// A live binding between a port/pin pair and its MCU-owned IRQ.
pub struct Mcu {
    pub core: Core,
    irqs: Pool,
    port_irq: [[IrqId; 8]; avr::NUM_PORTS],
}

/// `A`..`D`, the four ports this board model exposes.
pub fn port_from_letter(letter: char) -> SimResult<usize> {
    let letter = letter.to_ascii_uppercase();
    if !('A'..='D').contains(&letter) {
        return Err(SimError::ProgrammingError(format!("no port {letter}")));
    }
    Ok(letter as usize - 'A' as usize)
}

impl Mcu {
    pub fn new() -> Mcu {
        let mut irqs = Pool::new();
        let port_irq = std::array::from_fn(|p| {
            std::array::from_fn(|pin| irqs.alloc_named(format!("{}{}", (b'A' + p as u8) as char, pin)))
        });
        Mcu {
            core: Core::new(),
            irqs,
            port_irq,
        }
    }

    /// The MCU-owned IRQ for `port` pin `pin`, for binding into a
    /// [`crate::signal::pin_endpoint::PinEndpoint`].
    pub fn get_irq(&self, port: usize, pin: u8) -> IrqId {
        self.port_irq[port][pin as usize]
    }

    pub fn alloc_irq(&mut self) -> IrqId {
        self.irqs.alloc()
    }

    pub fn connect(&mut self, a: IrqId, b: IrqId) {
        self.irqs.connect(a, b);
    }

    pub fn disconnect(&mut self, a: IrqId, b: IrqId) {
        self.irqs.disconnect(a, b);
    }

    pub fn subscribe(&mut self, id: IrqId, cb: Box<dyn FnMut(u32) + Send>) {
        self.irqs.subscribe(id, cb);
    }

    pub fn raise(&mut self, id: IrqId, value: u32) {
        self.irqs.raise(id, value);
    }

    pub fn irq_value(&self, id: IrqId) -> u32 {
        self.irqs.value(id)
    }

    pub fn read_register(&self, index: u8) -> u8 {
        self.core.read_register(index)
    }

    pub fn read_pc_words(&self) -> u32 {
        self.core.read_pc_words()
    }

    pub fn read_io(&self, index: u8) -> u8 {
        self.core.read_io(index)
    }

    pub fn cycles(&self) -> u64 {
        self.core.cycles
    }

    pub fn set_external_port(&mut self, port: usize, mask: u8, value: u8) {
        self.core.set_external_port(port, mask, value);
    }

    /// Loads an ELF firmware image's `PT_LOAD` segments into flash.
    ///
    /// A real `simavr` binding would do this via `elf_firmware_t`, which this
    /// crate has no dependency on, so it's reimplemented directly against
    /// `goblin`.
    pub fn load_firmware(&mut self, path: impl AsRef<Path>) -> SimResult<()> {
        let path = path.as_ref();
        let bytes = fs::read(path)
            .map_err(|e| SimError::ProgrammingError(format!("reading {}: {e}", path.display())))?;
        let elf = Elf::parse(&bytes)
            .map_err(|e| SimError::ProgrammingError(format!("parsing ELF {}: {e}", path.display())))?;

        let mut end = 0u32;
        for phdr in elf.program_headers.iter().filter(|p| p.p_type == goblin::elf::program_header::PT_LOAD) {
            let file_start = phdr.p_offset as usize;
            let file_end = file_start + phdr.p_filesz as usize;
            let load_addr = phdr.p_paddr as usize;
            if file_end > bytes.len() || load_addr + phdr.p_filesz as usize > self.core.flash.len() {
                warn!("firmware segment at {load_addr:#x} out of range, skipping");
                continue;
            }
            self.core.flash[load_addr..load_addr + phdr.p_filesz as usize]
                .copy_from_slice(&bytes[file_start..file_end]);
            end = end.max((load_addr + phdr.p_filesz as usize) as u32);
        }
        self.core.flashend = end;
        info!("loaded firmware {} ({} bytes)", path.display(), end);
        self.core.reset();
        Ok(())
    }

    pub fn reset(&mut self) {
        self.core.reset();
    }

    /// Executes one instruction and fans any `PORT` latch changes out
    /// through the IRQ fabric.
    ///
    /// The original wraps `avr_run`'s per-cycle core and installs a write
    /// hook on each port register; this core has no such hook, so changes
    /// are detected by comparing the port latches before and after the
    /// step, which is equivalent for the single-instruction granularity
    /// this core executes at.
    pub fn step(&mut self) {
        let before: [u8; avr::NUM_PORTS] =
            std::array::from_fn(|p| self.core.read_io(port_index(p) as u8));
        self.core.step();
        for p in 0..avr::NUM_PORTS {
            let after = self.core.read_io(port_index(p) as u8);
            if after == before[p] {
                continue;
            }
            for pin in 0..8usize {
                let old_bit = before[p].get_bit(pin);
                let new_bit = after.get_bit(pin);
                if old_bit != new_bit {
                    debug!("port {} pin {} -> {}", (b'A' + p as u8) as char, pin, new_bit);
                    self.irqs.raise(self.port_irq[p][pin], new_bit as u32);
                }
            }
        }
    }
}

impl Default for Mcu {
    fn default() -> Mcu {
        Mcu::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn asm_ldi(d: u8, k: u8) -> u16 {
        0xE000 | (((k as u16) & 0xF0) << 4) | (((d - 16) as u16) << 4) | (k as u16 & 0xF)
    }

    fn asm_out(a: u8, r: u8) -> u16 {
        let a = a as u16;
        0xB800 | ((a & 0x30) << 5) | (((r as u16) & 0x10) << 4) | (((r as u16) & 0xF) << 4) | (a & 0xF)
    }

    #[test]
    fn out_to_port_raises_the_corresponding_pin_irq() {
        let mut mcu = Mcu::new();
        // LDI r16, 0xFF ; OUT PORTC, r16
        let a = (2u16 * 3 + 2) as u8; // PORTC index
        let prog = [asm_ldi(16, 0xFF), asm_out(a, 16), 0x0000u16];
        for (i, w) in prog.iter().enumerate() {
            let b = w.to_le_bytes();
            mcu.core.flash[i * 2] = b[0];
            mcu.core.flash[i * 2 + 1] = b[1];
        }
        mcu.step();
        mcu.step();
        assert_eq!(mcu.irq_value(mcu.get_irq(2, 0)), 1);
    }

    #[test]
    fn port_letter_parses_a_through_d() {
        assert_eq!(port_from_letter('A').unwrap(), 0);
        assert_eq!(port_from_letter('D').unwrap(), 3);
        assert!(port_from_letter('E').is_err());
    }
}
