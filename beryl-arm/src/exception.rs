use crate::{
    cpu::Arm7tdmi,
    debug::DebugEvent,
    memory::SysBus,
    registers::{CpuMode, StatusRegister},
    Addr, REG_LR,
};
use log::trace;

/// The exception vectors. The discriminant is the vector address.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Exception {
    Reset = 0x00,
    UndefinedInstruction = 0x04,
    SoftwareInterrupt = 0x08,
    PrefetchAbort = 0x0C,
    DataAbort = 0x10,
    Irq = 0x18,
    Fiq = 0x1C,
}

impl Exception {
    pub fn vector(self) -> Addr {
        self as Addr
    }

    /// Mode entered by this exception and whether entry masks FIQ on top
    /// of the unconditional IRQ mask.
    fn target(self) -> (CpuMode, bool) {
        use Exception::*;
        match self {
            Reset => (CpuMode::Supervisor, true),
            UndefinedInstruction => (CpuMode::Undefined, false),
            SoftwareInterrupt => (CpuMode::Supervisor, false),
            PrefetchAbort | DataAbort => (CpuMode::Abort, false),
            Irq => (CpuMode::Irq, false),
            Fiq => (CpuMode::Fiq, true),
        }
    }
}

impl<Bus: SysBus> Arm7tdmi<Bus> {
    /// Exception entry: bank the return address and the old CPSR, switch
    /// into the target mode in ARM state with IRQs masked, and jump to the
    /// vector.
    pub fn exception(&mut self, e: Exception, lr: u32) {
        let (mode, mask_fiq) = e.target();
        trace!("{:?} -> {} lr={:08x}", e, mode, lr);

        let old_cpsr = self.regs.cpsr;
        self.regs.write_any(mode, REG_LR, lr);
        self.regs.set_spsr_of(mode, old_cpsr);

        let mut raw = old_cpsr.raw();
        raw &= !(0x1F | StatusRegister::T.bits());
        raw |= mode as u32 | StatusRegister::I.bits();
        if mask_fiq {
            raw |= StatusRegister::F.bits();
        }
        self.regs.set_cpsr(raw);

        self.regs.pc = e.vector();
        self.reload_pipeline_arm();
    }

    /// IRQ entry. A no-op while CPSR.I is set; the controller keeps the
    /// line asserted and the request is taken once it clears.
    pub fn irq(&mut self) {
        if self.regs.cpsr.irq_disabled() {
            return;
        }
        let lr = self.get_next_pc().wrapping_add(4);
        self.notify(DebugEvent::IrqEnter);
        self.exception(Exception::Irq, lr);
    }

    pub(crate) fn software_interrupt(&mut self, lr: u32, comment: u32) {
        self.notify(DebugEvent::Swi(comment));
        self.exception(Exception::SoftwareInterrupt, lr);
    }
}
