use crate::{
    alu::{barrel_shift, ShiftOp},
    debug::{DebugEvent, DebugHook},
    memory::{MemoryAccess, SysBus},
    registers::{CpuMode, CpuState, Registers},
    Addr, REG_PC,
};
use beryl_common::{BitIndex, Shared};

include!(concat!(env!("OUT_DIR"), "/cond_lut.rs"));

/// What an instruction handler did to the control flow.
pub enum CpuAction {
    /// Retire normally; the argument is the timing class of the next fetch.
    AdvancePC(MemoryAccess),
    /// The handler wrote the PC and refilled the pipeline itself.
    PipelineFlushed,
}

pub struct Arm7tdmi<Bus: SysBus> {
    pub(crate) bus: Shared<Bus>,
    pub regs: Registers,

    // two-deep fetch/decode buffer; the instruction being executed has
    // already been shifted out
    pipeline: [u32; 2],
    next_fetch_access: MemoryAccess,

    // prefetch history feeding the open-bus emulation
    pub(crate) last_fetched_opcode: u32,
    pub(crate) last_fetched_addr: Addr,
    pub(crate) last_bios_addr: Addr,

    hook: Option<DebugHook>,
    in_hook: bool,
}

impl<Bus: SysBus> Arm7tdmi<Bus> {
    pub fn new(bus: Shared<Bus>) -> Self {
        let mut cpu = Self {
            bus,
            regs: Registers::new(),
            pipeline: [0; 2],
            next_fetch_access: MemoryAccess::NonSeq,
            last_fetched_opcode: 0,
            last_fetched_addr: 0,
            last_bios_addr: 0,
            hook: None,
            in_hook: false,
        };
        cpu.reload_pipeline_arm();
        cpu
    }

    /// Back to the reset state: SVC mode, ARM state, IRQ/FIQ masked, PC at
    /// the reset vector.
    pub fn reset(&mut self) {
        self.regs = Registers::new();
        self.pipeline = [0; 2];
        self.next_fetch_access = MemoryAccess::NonSeq;
        self.last_fetched_opcode = 0;
        self.last_fetched_addr = 0;
        self.last_bios_addr = 0;
        self.reload_pipeline_arm();
    }

    /// Start from the post-BIOS state instead of the reset vector.
    pub fn skip_bios(&mut self) {
        self.regs.skip_bios();
        self.reload_pipeline_arm();
    }

    /// Address of the ARM instruction currently executing (r15 minus the
    /// two prefetched words).
    pub fn pc_arm(&self) -> Addr {
        self.regs.pc.wrapping_sub(8)
    }

    pub fn pc_thumb(&self) -> Addr {
        self.regs.pc.wrapping_sub(4)
    }

    /// Address of the next instruction that has not started executing:
    /// r15 minus the two prefetched slots.
    pub(crate) fn get_next_pc(&self) -> Addr {
        self.regs.pc.wrapping_sub(2 * self.regs.cpsr.word_size())
    }

    pub fn set_hook(&mut self, hook: DebugHook) {
        self.hook = Some(hook);
    }

    pub fn clear_hook(&mut self) {
        self.hook = None;
    }

    pub(crate) fn notify(&mut self, event: DebugEvent) {
        // taking the hook out doubles as the re-entry guard: a hook that
        // reaches back in finds no hook and a guarded `step`
        if let Some(mut hook) = self.hook.take() {
            self.in_hook = true;
            hook(event);
            self.in_hook = false;
            self.hook = Some(hook);
        }
    }

    /// Execute one instruction. Samples the IRQ line first; a pending
    /// request with CPSR.I clear redirects this step into the handler's
    /// first instruction.
    pub fn step(&mut self) {
        if self.in_hook {
            return;
        }
        if self.bus.irq_line_pending() {
            self.irq();
        }
        match self.regs.cpsr.state() {
            CpuState::Arm => self.step_arm(),
            CpuState::Thumb => self.step_thumb(),
        }
    }

    fn step_arm(&mut self) {
        let fetched = self.fetch_32(self.regs.pc & !3, self.next_fetch_access);
        let inst = self.pipeline[0];
        self.pipeline[0] = self.pipeline[1];
        self.pipeline[1] = fetched;

        if self.hook.is_some() {
            let pc = self.pc_arm();
            self.notify(DebugEvent::Execute { pc, thumb: false });
        }

        // cond 0b1111 (the NV space) maps to a LUT row of false, so those
        // encodings retire as condition-failed NOPs rather than decoding
        let key = (self.regs.cpsr.flag_nibble() << 4 | inst >> 28) as usize;
        if CONDITION_LUT[key] {
            let hash = ((inst >> 16) & 0xFF0 | (inst >> 4) & 0xF) as usize;
            match Self::ARM_HANDLERS[hash].0(self, inst) {
                CpuAction::AdvancePC(access) => {
                    self.next_fetch_access = access;
                    self.regs.pc = self.regs.pc.wrapping_add(4);
                }
                CpuAction::PipelineFlushed => {}
            }
        } else {
            // a failed condition still retires and still pays its fetch
            self.next_fetch_access = MemoryAccess::Seq;
            self.regs.pc = self.regs.pc.wrapping_add(4);
        }
    }

    fn step_thumb(&mut self) {
        let fetched = self.fetch_16(self.regs.pc & !1, self.next_fetch_access);
        let inst = self.pipeline[0] as u16;
        self.pipeline[0] = self.pipeline[1];
        self.pipeline[1] = fetched;

        if self.hook.is_some() {
            let pc = self.pc_thumb();
            self.notify(DebugEvent::Execute { pc, thumb: true });
        }

        match Self::THUMB_HANDLERS[(inst >> 6) as usize].0(self, inst) {
            CpuAction::AdvancePC(access) => {
                self.next_fetch_access = access;
                self.regs.pc = self.regs.pc.wrapping_add(2);
            }
            CpuAction::PipelineFlushed => {}
        }
    }

    /// Refill the pipeline after a PC write. Charges the non-sequential
    /// plus sequential fetch pair and leaves r15 at the prefetch address.
    pub fn flush_pipeline(&mut self) {
        match self.regs.cpsr.state() {
            CpuState::Arm => self.reload_pipeline_arm(),
            CpuState::Thumb => self.reload_pipeline_thumb(),
        }
    }

    pub(crate) fn reload_pipeline_arm(&mut self) {
        self.regs.pc &= !3;
        self.pipeline[0] = self.fetch_32(self.regs.pc, MemoryAccess::NonSeq);
        self.pipeline[1] = self.fetch_32(self.regs.pc.wrapping_add(4), MemoryAccess::Seq);
        self.regs.pc = self.regs.pc.wrapping_add(8);
        self.next_fetch_access = MemoryAccess::Seq;
    }

    pub(crate) fn reload_pipeline_thumb(&mut self) {
        self.regs.pc &= !1;
        self.pipeline[0] = self.fetch_16(self.regs.pc, MemoryAccess::NonSeq);
        self.pipeline[1] = self.fetch_16(self.regs.pc.wrapping_add(2), MemoryAccess::Seq);
        self.regs.pc = self.regs.pc.wrapping_add(4);
        self.next_fetch_access = MemoryAccess::Seq;
    }

    /// Jump through `addr`, switching state on bit 0.
    pub(crate) fn branch_exchange(&mut self, addr: Addr) -> CpuAction {
        if addr.bit(0) {
            self.regs.cpsr.set_state(CpuState::Thumb);
            self.regs.pc = addr & !1;
            self.reload_pipeline_thumb();
        } else {
            self.regs.cpsr.set_state(CpuState::Arm);
            self.regs.pc = addr & !3;
            self.reload_pipeline_arm();
        }
        CpuAction::PipelineFlushed
    }

    /// CPSR <- SPSR, the tail of the exception return sequences.
    pub(crate) fn restore_cpsr_from_spsr(&mut self) {
        let old_mode = self.regs.cpsr.mode();
        let spsr = self.regs.spsr();
        self.regs.set_cpsr(spsr.raw());
        match old_mode {
            CpuMode::Supervisor => self.notify(DebugEvent::SwiReturn),
            CpuMode::Irq => self.notify(DebugEvent::IrqReturn),
            _ => {}
        }
    }

    /// Shift `rm` by the low byte of `rs`. r15 reads four bytes further
    /// ahead here, and the register-specified amount costs an internal
    /// cycle.
    pub(crate) fn shift_by_register(
        &mut self,
        op: ShiftOp,
        rm: usize,
        rs: usize,
        carry: &mut bool,
    ) -> u32 {
        let mut value = self.regs.read(rm);
        if rm == REG_PC {
            value = value.wrapping_add(4);
        }
        let amount = self.regs.read(rs) & 0xFF;
        self.idle_cycle();
        barrel_shift(op, value, amount, carry, false)
    }
}

/// Internal cycles the multiplier array needs: one per significant byte of
/// the multiplier, where leading zeroes and leading ones both terminate
/// early.
pub(crate) fn multiplier_cycles(multiplier: u32) -> u32 {
    let m = multiplier;
    if m & 0xFFFF_FF00 == 0 || m & 0xFFFF_FF00 == 0xFFFF_FF00 {
        1
    } else if m & 0xFFFF_0000 == 0 || m & 0xFFFF_0000 == 0xFFFF_0000 {
        2
    } else if m & 0xFF00_0000 == 0 || m & 0xFF00_0000 == 0xFF00_0000 {
        3
    } else {
        4
    }
}
