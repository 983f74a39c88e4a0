use crate::REG_PC;
use bitflags::bitflags;
use enum_primitive_derive::Primitive;
use log::warn;
use num_traits::FromPrimitive;
use std::fmt;

/// Mode field values of the CPSR.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Primitive)]
pub enum CpuMode {
    User = 0x10,
    Fiq = 0x11,
    Irq = 0x12,
    Supervisor = 0x13,
    Abort = 0x17,
    Undefined = 0x1B,
    System = 0x1F,
}

impl CpuMode {
    /// Index of the register/SPSR bank this mode selects.
    pub fn bank(self) -> usize {
        use CpuMode::*;
        match self {
            User | System => 0,
            Fiq => 1,
            Irq => 2,
            Supervisor => 3,
            Abort => 4,
            Undefined => 5,
        }
    }

    pub fn has_spsr(self) -> bool {
        !matches!(self, CpuMode::User | CpuMode::System)
    }
}

impl fmt::Display for CpuMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        use CpuMode::*;
        match self {
            User => write!(f, "USR"),
            Fiq => write!(f, "FIQ"),
            Irq => write!(f, "IRQ"),
            Supervisor => write!(f, "SVC"),
            Abort => write!(f, "ABT"),
            Undefined => write!(f, "UND"),
            System => write!(f, "SYS"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CpuState {
    Arm,
    Thumb,
}

impl fmt::Display for CpuState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CpuState::Arm => write!(f, "ARM"),
            CpuState::Thumb => write!(f, "THUMB"),
        }
    }
}

bitflags! {
    /// CPSR/SPSR. The mode field lives in the low five bits and is kept
    /// outside the named flags; all remaining bits are reserved-zero but
    /// stored verbatim.
    pub struct StatusRegister: u32 {
        const N = 1 << 31;
        const Z = 1 << 30;
        const C = 1 << 29;
        const V = 1 << 28;
        const I = 1 << 7;
        const F = 1 << 6;
        const T = 1 << 5;
    }
}

const MODE_MASK: u32 = 0x1F;

impl StatusRegister {
    pub fn from_raw(value: u32) -> Self {
        let mut psr = StatusRegister::empty();
        psr.bits = value;
        psr
    }

    pub fn raw(self) -> u32 {
        self.bits
    }

    pub fn mode(self) -> CpuMode {
        CpuMode::from_u32(self.bits & MODE_MASK)
            .unwrap_or_else(|| unreachable!("reserved mode bits in PSR"))
    }

    pub fn state(self) -> CpuState {
        if self.contains(Self::T) {
            CpuState::Thumb
        } else {
            CpuState::Arm
        }
    }

    /// Instruction width for the current state, in bytes.
    pub fn word_size(self) -> u32 {
        match self.state() {
            CpuState::Arm => 4,
            CpuState::Thumb => 2,
        }
    }

    /// N/Z/C/V packed into a nibble, the high half of a condition LUT key.
    pub fn flag_nibble(self) -> u32 {
        self.bits >> 28
    }

    pub fn n(self) -> bool {
        self.contains(Self::N)
    }
    pub fn z(self) -> bool {
        self.contains(Self::Z)
    }
    pub fn c(self) -> bool {
        self.contains(Self::C)
    }
    pub fn v(self) -> bool {
        self.contains(Self::V)
    }
    pub fn irq_disabled(self) -> bool {
        self.contains(Self::I)
    }
    pub fn fiq_disabled(self) -> bool {
        self.contains(Self::F)
    }

    pub fn set_n(&mut self, value: bool) {
        self.set(Self::N, value)
    }
    pub fn set_z(&mut self, value: bool) {
        self.set(Self::Z, value)
    }
    pub fn set_c(&mut self, value: bool) {
        self.set(Self::C, value)
    }
    pub fn set_v(&mut self, value: bool) {
        self.set(Self::V, value)
    }

    pub fn set_state(&mut self, state: CpuState) {
        self.set(Self::T, state == CpuState::Thumb)
    }
}

impl fmt::Display for StatusRegister {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let flag = |b: bool, c: char| if b { c } else { '-' };
        write!(
            f,
            "{}{}{}{}/{}{}/{} ({:?})",
            flag(self.n(), 'N'),
            flag(self.z(), 'Z'),
            flag(self.c(), 'C'),
            flag(self.v(), 'V'),
            flag(self.irq_disabled(), 'I'),
            flag(self.fiq_disabled(), 'F'),
            self.state(),
            self.mode(),
        )
    }
}

// Physical slot layout of the flat register array. The user bank occupies
// the first fifteen slots so that slot == register number outside the
// banked ranges; r15 is the prefetch PC and lives outside the array.
const NUM_SLOTS: usize = 30;
const FIQ_BANK: usize = 15; // r8..r14
const SVC_BANK: usize = 22; // r13, r14
const ABT_BANK: usize = 24;
const IRQ_BANK: usize = 26;
const UND_BANK: usize = 28;

fn slot_of(mode: CpuMode, r: usize) -> usize {
    use CpuMode::*;
    match (mode, r) {
        (Fiq, 8..=14) => FIQ_BANK + (r - 8),
        (Supervisor, 13..=14) => SVC_BANK + (r - 13),
        (Abort, 13..=14) => ABT_BANK + (r - 13),
        (Irq, 13..=14) => IRQ_BANK + (r - 13),
        (Undefined, 13..=14) => UND_BANK + (r - 13),
        _ => r,
    }
}

/// The register file: one flat array of physical slots plus a 16-entry
/// indirection table selecting the bank of the current mode. The table is
/// rebuilt once per mode change so register access stays a plain indexed
/// load.
#[derive(Clone)]
pub struct Registers {
    gpr: [u32; NUM_SLOTS],
    map: [usize; 16],
    spsr: [StatusRegister; 6],
    spsr_idx: usize,
    pub pc: u32,
    pub cpsr: StatusRegister,
}

impl Registers {
    /// Reset state: supervisor mode, ARM state, IRQ and FIQ masked, PC at
    /// the reset vector.
    pub fn new() -> Self {
        let cpsr = StatusRegister::from_raw(
            CpuMode::Supervisor as u32 | StatusRegister::I.bits() | StatusRegister::F.bits(),
        );
        let mut regs = Self {
            gpr: [0; NUM_SLOTS],
            map: [0; 16],
            spsr: [StatusRegister::empty(); 6],
            spsr_idx: CpuMode::Supervisor.bank(),
            pc: 0,
            cpsr,
        };
        regs.remap(CpuMode::Supervisor);
        regs
    }

    /// State after the BIOS boot sequence, for embedders that start
    /// straight from the cartridge.
    pub fn skip_bios(&mut self) {
        self.gpr[13] = 0x0300_7F00;
        self.gpr[SVC_BANK] = 0x0300_7FE0;
        self.gpr[IRQ_BANK] = 0x0300_7FA0;
        self.pc = 0x0800_0000;
        self.set_cpsr(0x5F);
    }

    #[inline]
    pub fn read(&self, r: usize) -> u32 {
        if r == REG_PC {
            self.pc
        } else {
            self.gpr[self.map[r]]
        }
    }

    #[inline]
    pub fn write(&mut self, r: usize, value: u32) {
        if r == REG_PC {
            self.pc = match self.cpsr.state() {
                CpuState::Arm => value & !3,
                CpuState::Thumb => value & !1,
            };
        } else {
            self.gpr[self.map[r]] = value;
        }
    }

    /// Register access through an arbitrary mode's view; used by the
    /// debugger and by user-bank block transfers.
    pub fn read_any(&self, mode: CpuMode, r: usize) -> u32 {
        if r == REG_PC {
            self.pc
        } else {
            self.gpr[slot_of(mode, r)]
        }
    }

    pub fn write_any(&mut self, mode: CpuMode, r: usize, value: u32) {
        if r == REG_PC {
            self.pc = value;
        } else {
            self.gpr[slot_of(mode, r)] = value;
        }
    }

    /// Full CPSR write. A reserved mode pattern keeps the previous mode
    /// field; every other bit is stored verbatim. Re-banks when the mode
    /// field changed.
    pub fn set_cpsr(&mut self, value: u32) {
        let value = if CpuMode::from_u32(value & MODE_MASK).is_none() {
            warn!(
                "CPSR write with reserved mode {:#04x}, keeping {}",
                value & MODE_MASK,
                self.cpsr.mode()
            );
            (value & !MODE_MASK) | (self.cpsr.raw() & MODE_MASK)
        } else {
            value
        };

        let old_mode = self.cpsr.mode();
        self.cpsr = StatusRegister::from_raw(value);
        let new_mode = self.cpsr.mode();
        if old_mode != new_mode {
            self.remap(new_mode);
        }
    }

    /// SPSR of the current mode; User and System have none and read the
    /// CPSR back.
    pub fn spsr(&self) -> StatusRegister {
        if self.cpsr.mode().has_spsr() {
            self.spsr[self.spsr_idx]
        } else {
            self.cpsr
        }
    }

    pub fn set_spsr(&mut self, value: StatusRegister) {
        if self.cpsr.mode().has_spsr() {
            self.spsr[self.spsr_idx] = value;
        }
    }

    pub fn spsr_of(&self, mode: CpuMode) -> StatusRegister {
        self.spsr[mode.bank()]
    }

    pub fn set_spsr_of(&mut self, mode: CpuMode, value: StatusRegister) {
        self.spsr[mode.bank()] = value;
    }

    fn remap(&mut self, mode: CpuMode) {
        for r in 0..15 {
            self.map[r] = slot_of(mode, r);
        }
        self.map[REG_PC] = usize::MAX; // r15 never goes through the table
        self.spsr_idx = mode.bank();
    }
}

impl Default for Registers {
    fn default() -> Self {
        Self::new()
    }
}
