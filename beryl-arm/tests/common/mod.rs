//! A flat-memory bus for driving the interpreter in tests: BIOS, EWRAM,
//! IWRAM and ROM at their usual bases, a cycle counter per access class,
//! and a poke-able IRQ line.
#![allow(dead_code)]

use beryl_arm::{Arm7tdmi, InterruptLine, MemoryAccess, MemoryInterface};
use beryl_common::Shared;

pub const EWRAM_BASE: u32 = 0x0200_0000;
pub const ROM_BASE: u32 = 0x0800_0000;

pub struct TestBus {
    bios: Vec<u8>,
    ewram: Vec<u8>,
    iwram: Vec<u8>,
    rom: Vec<u8>,
    pub cycles: u64,
    pub idle_cycles: u64,
    pub irq_line: bool,
}

impl TestBus {
    pub fn new() -> Self {
        Self {
            bios: vec![0; 0x4000],
            ewram: vec![0; 0x4_0000],
            iwram: vec![0; 0x8000],
            rom: vec![0; 0x10_0000],
            cycles: 0,
            idle_cycles: 0,
            irq_line: false,
        }
    }

    fn region(&self, addr: u32) -> Option<(&Vec<u8>, usize)> {
        match addr {
            0x0000_0000..=0x0000_3FFF => Some((&self.bios, addr as usize)),
            0x0200_0000..=0x0203_FFFF => Some((&self.ewram, (addr - EWRAM_BASE) as usize)),
            0x0300_0000..=0x0300_7FFF => Some((&self.iwram, (addr - 0x0300_0000) as usize)),
            0x0800_0000..=0x080F_FFFF => Some((&self.rom, (addr - ROM_BASE) as usize)),
            _ => None,
        }
    }

    fn region_mut(&mut self, addr: u32) -> Option<(&mut Vec<u8>, usize)> {
        match addr {
            0x0000_0000..=0x0000_3FFF => Some((&mut self.bios, addr as usize)),
            0x0200_0000..=0x0203_FFFF => Some((&mut self.ewram, (addr - EWRAM_BASE) as usize)),
            0x0300_0000..=0x0300_7FFF => Some((&mut self.iwram, (addr - 0x0300_0000) as usize)),
            0x0800_0000..=0x080F_FFFF => Some((&mut self.rom, (addr - ROM_BASE) as usize)),
            _ => None,
        }
    }

    fn peek_8(&self, addr: u32) -> u8 {
        match self.region(addr) {
            Some((mem, offset)) => mem[offset],
            None => 0,
        }
    }

    fn poke_8(&mut self, addr: u32, value: u8) {
        if let Some((mem, offset)) = self.region_mut(addr) {
            mem[offset] = value;
        }
    }

    fn charge(&mut self, access: MemoryAccess) {
        if access != MemoryAccess::Debug {
            self.cycles += 1;
        }
    }

    /// Direct memory poke for test setup; no timing, no alignment games.
    pub fn set_word(&mut self, addr: u32, value: u32) {
        for (i, byte) in value.to_le_bytes().iter().enumerate() {
            self.poke_8(addr + i as u32, *byte);
        }
    }

    pub fn set_half(&mut self, addr: u32, value: u16) {
        for (i, byte) in value.to_le_bytes().iter().enumerate() {
            self.poke_8(addr + i as u32, *byte);
        }
    }

    pub fn word_at(&self, addr: u32) -> u32 {
        u32::from_le_bytes([
            self.peek_8(addr),
            self.peek_8(addr + 1),
            self.peek_8(addr + 2),
            self.peek_8(addr + 3),
        ])
    }
}

impl MemoryInterface for TestBus {
    fn load_8(&mut self, addr: u32, access: MemoryAccess) -> u8 {
        self.charge(access);
        self.peek_8(addr)
    }

    fn load_16(&mut self, addr: u32, access: MemoryAccess) -> u16 {
        self.charge(access);
        u16::from_le_bytes([self.peek_8(addr), self.peek_8(addr + 1)])
    }

    fn load_32(&mut self, addr: u32, access: MemoryAccess) -> u32 {
        self.charge(access);
        self.word_at(addr)
    }

    fn store_8(&mut self, addr: u32, value: u8, access: MemoryAccess) {
        self.charge(access);
        self.poke_8(addr, value);
    }

    fn store_16(&mut self, addr: u32, value: u16, access: MemoryAccess) {
        self.charge(access);
        self.set_half(addr, value);
    }

    fn store_32(&mut self, addr: u32, value: u32, access: MemoryAccess) {
        self.charge(access);
        self.set_word(addr, value);
    }

    fn idle_cycle(&mut self) {
        self.idle_cycles += 1;
    }
}

impl InterruptLine for TestBus {
    fn irq_line_pending(&self) -> bool {
        self.irq_line
    }
}

/// CPU in system mode at `pc` with `prog` placed there, pipeline primed.
pub fn arm_cpu_at(pc: u32, prog: &[u32]) -> (Arm7tdmi<TestBus>, Shared<TestBus>) {
    let mut bus = Shared::new(TestBus::new());
    for (i, word) in prog.iter().enumerate() {
        bus.set_word(pc + 4 * i as u32, *word);
    }
    let mut cpu = Arm7tdmi::new(bus.clone());
    cpu.regs.set_cpsr(0x1F);
    cpu.regs.pc = pc;
    cpu.flush_pipeline();
    (cpu, bus)
}

/// Same, but THUMB state.
pub fn thumb_cpu_at(pc: u32, prog: &[u16]) -> (Arm7tdmi<TestBus>, Shared<TestBus>) {
    let mut bus = Shared::new(TestBus::new());
    for (i, half) in prog.iter().enumerate() {
        bus.set_half(pc + 2 * i as u32, *half);
    }
    let mut cpu = Arm7tdmi::new(bus.clone());
    cpu.regs.set_cpsr(0x3F); // system + T
    cpu.regs.pc = pc;
    cpu.flush_pipeline();
    (cpu, bus)
}
