//! The interrupt controller: IE/IF/IME plus the shared request flags the
//! devices raise their lines through. The CPU only ever sees the collapsed
//! level line.

use beryl_arm::InterruptLine;
use modular_bitfield::prelude::*;
use std::cell::Cell;
use std::rc::Rc;

pub type SharedInterruptFlags = Rc<Cell<IrqBitMask>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Interrupt {
    VBlank = 0,
    HBlank = 1,
    VCounterMatch = 2,
    Timer0Overflow = 3,
    Timer1Overflow = 4,
    Timer2Overflow = 5,
    Timer3Overflow = 6,
    SerialCommunication = 7,
    Dma0 = 8,
    Dma1 = 9,
    Dma2 = 10,
    Dma3 = 11,
    Keypad = 12,
    GamePak = 13,
}

static_assertions::assert_eq_size!(IrqBitMask, u16);

#[bitfield]
#[repr(u16)]
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct IrqBitMask {
    pub vblank: bool,
    pub hblank: bool,
    pub vcounter_match: bool,
    pub timer0_overflow: bool,
    pub timer1_overflow: bool,
    pub timer2_overflow: bool,
    pub timer3_overflow: bool,
    pub serial: bool,
    pub dma0: bool,
    pub dma1: bool,
    pub dma2: bool,
    pub dma3: bool,
    pub keypad: bool,
    pub gamepak: bool,
    #[skip]
    _reserved: B2,
}

/// Raise a request line. Devices hold a clone of the shared flags so they
/// can signal without reaching through the controller.
pub fn signal_irq(flags: &SharedInterruptFlags, interrupt: Interrupt) {
    let raised = u16::from(flags.get()) | 1 << interrupt as u16;
    flags.set(IrqBitMask::from(raised));
}

pub struct InterruptController {
    /// IME
    pub master_enable: bool,
    /// IE
    enable: IrqBitMask,
    /// IF
    flags: SharedInterruptFlags,
}

impl InterruptController {
    pub fn new() -> Self {
        Self {
            master_enable: false,
            enable: IrqBitMask::default(),
            flags: Rc::new(Cell::new(IrqBitMask::default())),
        }
    }

    /// A clone of the request flags for a device to signal through.
    pub fn shared_flags(&self) -> SharedInterruptFlags {
        Rc::clone(&self.flags)
    }

    pub fn request(&mut self, interrupt: Interrupt) {
        signal_irq(&self.flags, interrupt);
    }

    pub fn read_enable(&self) -> u16 {
        self.enable.into()
    }

    pub fn write_enable(&mut self, value: u16) {
        self.enable = value.into();
    }

    pub fn read_flags(&self) -> u16 {
        self.flags.get().into()
    }

    /// IF writes acknowledge: a one clears the matching request.
    pub fn write_flags(&mut self, value: u16) {
        let cleared = u16::from(self.flags.get()) & !value;
        self.flags.set(cleared.into());
    }
}

impl Default for InterruptController {
    fn default() -> Self {
        Self::new()
    }
}

impl InterruptLine for InterruptController {
    fn irq_line_pending(&self) -> bool {
        self.master_enable && u16::from(self.enable) & u16::from(self.flags.get()) != 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn line_needs_enable_and_master() {
        let mut intc = InterruptController::new();
        let flags = intc.shared_flags();
        signal_irq(&flags, Interrupt::Timer1Overflow);
        assert!(!intc.irq_line_pending());

        intc.write_enable(1 << Interrupt::Timer1Overflow as u16);
        assert!(!intc.irq_line_pending());

        intc.master_enable = true;
        assert!(intc.irq_line_pending());
    }

    #[test]
    fn flag_writes_acknowledge() {
        let mut intc = InterruptController::new();
        intc.master_enable = true;
        intc.write_enable(0xFFFF);
        intc.request(Interrupt::VBlank);
        intc.request(Interrupt::Dma2);
        assert_eq!(intc.read_flags(), 1 | 1 << 10);

        intc.write_flags(1); // ack vblank only
        assert_eq!(intc.read_flags(), 1 << 10);
        assert!(intc.irq_line_pending());

        intc.write_flags(1 << 10);
        assert!(!intc.irq_line_pending());
    }
}
