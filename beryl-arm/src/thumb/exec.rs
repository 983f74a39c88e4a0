//! The 16-bit instruction set: nineteen formats, dispatched on the top ten
//! bits. Flag behavior mirrors the ARM set except that data processing
//! always updates the flags.

use super::ThumbAluOp;
use crate::{
    alu::{self, ShiftOp},
    cpu::{multiplier_cycles, Arm7tdmi, CpuAction, CONDITION_LUT},
    debug::DebugEvent,
    exception::Exception,
    memory::{MemoryAccess::*, SysBus},
    REG_LR, REG_PC, REG_SP,
};
use beryl_common::BitIndex;
use log::warn;
use num_traits::FromPrimitive;

pub(crate) struct ThumbHandler<Bus: SysBus>(pub fn(&mut Arm7tdmi<Bus>, u16) -> CpuAction);

include!(concat!(env!("OUT_DIR"), "/thumb_table.rs"));

impl<Bus: SysBus> Arm7tdmi<Bus> {
    fn set_nz(&mut self, result: u32) {
        self.regs.cpsr.set_n(result.bit(31));
        self.regs.cpsr.set_z(result == 0);
    }

    /// Format 1: shift by immediate
    pub(crate) fn thumb_shift_imm(&mut self, inst: u16) -> CpuAction {
        let op = match ShiftOp::from_u16(inst.bit_range(11..13)) {
            Some(op) => op,
            None => unreachable!(),
        };
        let rd = (inst & 7) as usize;
        let rs = inst.bit_range(3..6) as usize;
        let amount = inst.bit_range(6..11) as u32;

        let mut carry = self.regs.cpsr.c();
        let result = alu::barrel_shift(op, self.regs.read(rs), amount, &mut carry, true);
        self.regs.write(rd, result);
        self.set_nz(result);
        self.regs.cpsr.set_c(carry);
        CpuAction::AdvancePC(Seq)
    }

    /// Format 2: three-register (or 3-bit immediate) add/subtract
    pub(crate) fn thumb_add_sub(&mut self, inst: u16) -> CpuAction {
        let imm = inst.bit(10);
        let sub = inst.bit(9);
        let field = inst.bit_range(6..9);
        let rd = (inst & 7) as usize;
        let rs = inst.bit_range(3..6) as usize;

        let op1 = self.regs.read(rs);
        let op2 = if imm {
            field as u32
        } else {
            self.regs.read(field as usize)
        };

        let mut carry = false;
        let mut overflow = false;
        let result = if sub {
            alu::sub_flags(op1, op2, &mut carry, &mut overflow)
        } else {
            alu::add_flags(op1, op2, &mut carry, &mut overflow)
        };
        self.regs.write(rd, result);
        self.set_nz(result);
        self.regs.cpsr.set_c(carry);
        self.regs.cpsr.set_v(overflow);
        CpuAction::AdvancePC(Seq)
    }

    /// Format 3: MOV/CMP/ADD/SUB with an 8-bit immediate
    pub(crate) fn thumb_alu_imm(&mut self, inst: u16) -> CpuAction {
        let op = inst.bit_range(11..13);
        let rd = inst.bit_range(8..11) as usize;
        let imm = (inst & 0xFF) as u32;

        let op1 = self.regs.read(rd);
        let mut carry = false;
        let mut overflow = false;
        match op {
            0 => {
                // MOV: N/Z only
                self.regs.write(rd, imm);
                self.set_nz(imm);
            }
            1 => {
                let result = alu::sub_flags(op1, imm, &mut carry, &mut overflow);
                self.set_nz(result);
                self.regs.cpsr.set_c(carry);
                self.regs.cpsr.set_v(overflow);
            }
            2 | 3 => {
                let result = if op == 2 {
                    alu::add_flags(op1, imm, &mut carry, &mut overflow)
                } else {
                    alu::sub_flags(op1, imm, &mut carry, &mut overflow)
                };
                self.regs.write(rd, result);
                self.set_nz(result);
                self.regs.cpsr.set_c(carry);
                self.regs.cpsr.set_v(overflow);
            }
            _ => unreachable!(),
        }
        CpuAction::AdvancePC(Seq)
    }

    /// Format 4: register-register data processing
    pub(crate) fn thumb_alu_reg(&mut self, inst: u16) -> CpuAction {
        use ThumbAluOp::*;
        let op = match ThumbAluOp::from_u16(inst.bit_range(6..10)) {
            Some(op) => op,
            None => unreachable!(),
        };
        let rd = (inst & 7) as usize;
        let rs = inst.bit_range(3..6) as usize;
        let dst = self.regs.read(rd);
        let src = self.regs.read(rs);

        let mut carry = self.regs.cpsr.c();
        let mut overflow = self.regs.cpsr.v();
        let result = match op {
            And | Tst => dst & src,
            Eor => dst ^ src,
            Lsl => self.shift_by_register(ShiftOp::Lsl, rd, rs, &mut carry),
            Lsr => self.shift_by_register(ShiftOp::Lsr, rd, rs, &mut carry),
            Asr => self.shift_by_register(ShiftOp::Asr, rd, rs, &mut carry),
            Ror => self.shift_by_register(ShiftOp::Ror, rd, rs, &mut carry),
            Adc => alu::adc_flags(dst, src, &mut carry, &mut overflow),
            Sbc => alu::sbc_flags(dst, src, &mut carry, &mut overflow),
            Neg => alu::sub_flags(0, src, &mut carry, &mut overflow),
            Cmp => alu::sub_flags(dst, src, &mut carry, &mut overflow),
            Cmn => alu::add_flags(dst, src, &mut carry, &mut overflow),
            Orr => dst | src,
            Mul => {
                for _ in 0..multiplier_cycles(dst) {
                    self.idle_cycle();
                }
                // C is unpredictable after MUL; leave it be
                dst.wrapping_mul(src)
            }
            Bic => dst & !src,
            Mvn => !src,
        };

        self.set_nz(result);
        if op.is_arithmetic() {
            self.regs.cpsr.set_c(carry);
            self.regs.cpsr.set_v(overflow);
        } else if op.is_shift() {
            self.regs.cpsr.set_c(carry);
        }
        if !op.is_compare() {
            self.regs.write(rd, result);
        }
        CpuAction::AdvancePC(Seq)
    }

    /// Format 5: operations on the full register set, and BX
    pub(crate) fn thumb_hi_reg_bx(&mut self, inst: u16) -> CpuAction {
        let op = inst.bit_range(8..10);
        let rd = (inst & 7) as usize + if inst.bit(7) { 8 } else { 0 };
        let rs = inst.bit_range(3..6) as usize + if inst.bit(6) { 8 } else { 0 };

        match op {
            0 => {
                let value = self.regs.read(rd).wrapping_add(self.regs.read(rs));
                self.regs.write(rd, value);
                if rd == REG_PC {
                    self.reload_pipeline_thumb();
                    return CpuAction::PipelineFlushed;
                }
            }
            1 => {
                let mut carry = false;
                let mut overflow = false;
                let result =
                    alu::sub_flags(self.regs.read(rd), self.regs.read(rs), &mut carry, &mut overflow);
                self.set_nz(result);
                self.regs.cpsr.set_c(carry);
                self.regs.cpsr.set_v(overflow);
            }
            2 => {
                let value = self.regs.read(rs);
                self.regs.write(rd, value);
                if rd == REG_PC {
                    self.reload_pipeline_thumb();
                    return CpuAction::PipelineFlushed;
                }
            }
            3 => {
                let target = self.regs.read(rs);
                if rs == REG_LR {
                    self.notify(DebugEvent::Return);
                }
                return self.branch_exchange(target);
            }
            _ => unreachable!(),
        }
        CpuAction::AdvancePC(Seq)
    }

    /// Format 6: PC-relative literal load
    pub(crate) fn thumb_ldr_pc_rel(&mut self, inst: u16) -> CpuAction {
        let rd = inst.bit_range(8..11) as usize;
        let offset = ((inst & 0xFF) as u32) << 2;
        let addr = (self.regs.pc & !3).wrapping_add(offset);

        let value = self.ldr_word(addr, NonSeq);
        self.regs.write(rd, value);
        self.idle_cycle();
        CpuAction::AdvancePC(NonSeq)
    }

    fn thumb_load_store(&mut self, rd: usize, addr: u32, load: bool, byte: bool) -> CpuAction {
        if load {
            let value = if byte {
                self.load_8(addr, NonSeq)
            } else {
                self.ldr_word_rotated(addr, NonSeq)
            };
            self.regs.write(rd, value);
            self.idle_cycle();
        } else {
            let value = self.regs.read(rd);
            if byte {
                self.store_8(addr, value as u8, NonSeq);
            } else {
                self.store_aligned_32(addr, value, NonSeq);
            }
        }
        CpuAction::AdvancePC(NonSeq)
    }

    /// Format 7: load/store with register offset
    pub(crate) fn thumb_ldr_str_reg(&mut self, inst: u16) -> CpuAction {
        let load = inst.bit(11);
        let byte = inst.bit(10);
        let ro = inst.bit_range(6..9) as usize;
        let rb = inst.bit_range(3..6) as usize;
        let rd = (inst & 7) as usize;

        let addr = self.regs.read(rb).wrapping_add(self.regs.read(ro));
        self.thumb_load_store(rd, addr, load, byte)
    }

    /// Format 8: load/store sign-extended byte/halfword
    pub(crate) fn thumb_ldr_str_signed(&mut self, inst: u16) -> CpuAction {
        let h = inst.bit(11);
        let sign = inst.bit(10);
        let ro = inst.bit_range(6..9) as usize;
        let rb = inst.bit_range(3..6) as usize;
        let rd = (inst & 7) as usize;

        let addr = self.regs.read(rb).wrapping_add(self.regs.read(ro));
        match (sign, h) {
            (false, false) => {
                let value = self.regs.read(rd) as u16;
                self.store_aligned_16(addr, value, NonSeq);
            }
            (false, true) => {
                let value = self.ldr_half(addr, NonSeq);
                self.regs.write(rd, value);
                self.idle_cycle();
            }
            (true, false) => {
                let value = self.ldr_sign_byte(addr, NonSeq);
                self.regs.write(rd, value);
                self.idle_cycle();
            }
            (true, true) => {
                let value = self.ldr_sign_half(addr, NonSeq);
                self.regs.write(rd, value);
                self.idle_cycle();
            }
        }
        CpuAction::AdvancePC(NonSeq)
    }

    /// Format 9: load/store with 5-bit immediate offset
    pub(crate) fn thumb_ldr_str_imm(&mut self, inst: u16) -> CpuAction {
        let byte = inst.bit(12);
        let load = inst.bit(11);
        let offset5 = inst.bit_range(6..11) as u32;
        let offset = if byte { offset5 } else { offset5 << 2 };
        let rb = inst.bit_range(3..6) as usize;
        let rd = (inst & 7) as usize;

        let addr = self.regs.read(rb).wrapping_add(offset);
        self.thumb_load_store(rd, addr, load, byte)
    }

    /// Format 10: load/store halfword
    pub(crate) fn thumb_ldr_str_half(&mut self, inst: u16) -> CpuAction {
        let load = inst.bit(11);
        let offset = (inst.bit_range(6..11) as u32) << 1;
        let rb = inst.bit_range(3..6) as usize;
        let rd = (inst & 7) as usize;

        let addr = self.regs.read(rb).wrapping_add(offset);
        if load {
            let value = self.ldr_half(addr, NonSeq);
            self.regs.write(rd, value);
            self.idle_cycle();
        } else {
            let value = self.regs.read(rd) as u16;
            self.store_aligned_16(addr, value, NonSeq);
        }
        CpuAction::AdvancePC(NonSeq)
    }

    /// Format 11: SP-relative load/store
    pub(crate) fn thumb_ldr_str_sp(&mut self, inst: u16) -> CpuAction {
        let load = inst.bit(11);
        let rd = inst.bit_range(8..11) as usize;
        let offset = ((inst & 0xFF) as u32) << 2;

        let addr = self.regs.read(REG_SP).wrapping_add(offset);
        self.thumb_load_store(rd, addr, load, false)
    }

    /// Format 12: form an address from PC or SP
    pub(crate) fn thumb_load_address(&mut self, inst: u16) -> CpuAction {
        let sp = inst.bit(11);
        let rd = inst.bit_range(8..11) as usize;
        let offset = ((inst & 0xFF) as u32) << 2;

        let value = if sp {
            self.regs.read(REG_SP).wrapping_add(offset)
        } else {
            // bit 1 of the prefetch PC reads as zero here
            (self.regs.pc & !2).wrapping_add(offset)
        };
        self.regs.write(rd, value);
        CpuAction::AdvancePC(Seq)
    }

    /// Format 13: adjust SP
    pub(crate) fn thumb_adjust_sp(&mut self, inst: u16) -> CpuAction {
        let sub = inst.bit(7);
        let offset = ((inst & 0x7F) as u32) << 2;
        let sp = self.regs.read(REG_SP);
        let sp = if sub {
            sp.wrapping_sub(offset)
        } else {
            sp.wrapping_add(offset)
        };
        self.regs.write(REG_SP, sp);
        CpuAction::AdvancePC(Seq)
    }

    /// Format 14: push/pop
    pub(crate) fn thumb_push_pop(&mut self, inst: u16) -> CpuAction {
        let pop = inst.bit(11);
        let pc_lr = inst.bit(8);
        let rlist = inst & 0xFF;
        let mut access = NonSeq;

        if pop {
            let mut sp = self.regs.read(REG_SP);
            for r in 0..8 {
                if rlist.bit(r) {
                    let value = self.ldr_word(sp, access);
                    access = Seq;
                    self.regs.write(r, value);
                    sp = sp.wrapping_add(4);
                }
            }
            if pc_lr {
                let value = self.ldr_word(sp, access);
                sp = sp.wrapping_add(4);
                self.regs.write(REG_SP, sp);
                self.regs.write(REG_PC, value);
                self.reload_pipeline_thumb();
                self.idle_cycle();
                return CpuAction::PipelineFlushed;
            }
            self.regs.write(REG_SP, sp);
            self.idle_cycle();
            CpuAction::AdvancePC(NonSeq)
        } else {
            let mut sp = self.regs.read(REG_SP);
            if pc_lr {
                sp = sp.wrapping_sub(4);
                let lr = self.regs.read(REG_LR);
                self.store_aligned_32(sp, lr, access);
                access = Seq;
            }
            for r in (0..8).rev() {
                if rlist.bit(r) {
                    sp = sp.wrapping_sub(4);
                    let value = self.regs.read(r);
                    self.store_aligned_32(sp, value, access);
                    access = Seq;
                }
            }
            self.regs.write(REG_SP, sp);
            CpuAction::AdvancePC(NonSeq)
        }
    }

    /// Format 15: multiple load/store, ascending from the base
    pub(crate) fn thumb_ldm_stm(&mut self, inst: u16) -> CpuAction {
        let load = inst.bit(11);
        let rb = inst.bit_range(8..11) as usize;
        let rlist = inst & 0xFF;

        let base = self.regs.read(rb);
        let align_keep = base & 3;
        let mut addr = base & !3;

        if rlist == 0 {
            // ARMv4 empty-list quirk: r15 moves, the base steps by 0x40
            return if load {
                let value = self.ldr_word(addr, NonSeq);
                self.regs.write(rb, addr.wrapping_add(0x40) + align_keep);
                self.regs.write(REG_PC, value);
                self.reload_pipeline_thumb();
                CpuAction::PipelineFlushed
            } else {
                let value = self.regs.pc.wrapping_add(2);
                self.store_aligned_32(addr, value, NonSeq);
                self.regs.write(rb, addr.wrapping_add(0x40) + align_keep);
                CpuAction::AdvancePC(NonSeq)
            };
        }

        let mut access = NonSeq;
        if load {
            for r in 0..8 {
                if rlist.bit(r) {
                    let value = self.ldr_word(addr, access);
                    access = Seq;
                    self.regs.write(r, value);
                    addr = addr.wrapping_add(4);
                }
            }
            self.idle_cycle();
            if !rlist.bit(rb) {
                self.regs.write(rb, addr + align_keep);
            }
        } else {
            let final_base = (base & !3).wrapping_add(4 * rlist.count_ones());
            let mut first = true;
            for r in 0..8 {
                if rlist.bit(r) {
                    let value = if r != rb {
                        self.regs.read(r)
                    } else if first {
                        base
                    } else {
                        final_base
                    };
                    self.store_aligned_32(addr, value, access);
                    access = Seq;
                    addr = addr.wrapping_add(4);
                    first = false;
                }
            }
            self.regs.write(rb, addr + align_keep);
        }
        CpuAction::AdvancePC(NonSeq)
    }

    /// Format 16: conditional branch
    pub(crate) fn thumb_cond_branch(&mut self, inst: u16) -> CpuAction {
        let cond = inst.bit_range(8..12) as u32;
        let key = (self.regs.cpsr.flag_nibble() << 4 | cond) as usize;
        if !CONDITION_LUT[key] {
            return CpuAction::AdvancePC(Seq);
        }
        let offset = ((((inst & 0xFF) as u32) << 24) as i32) >> 23;
        self.regs.pc = (self.regs.pc as i32).wrapping_add(offset) as u32;
        self.reload_pipeline_thumb();
        CpuAction::PipelineFlushed
    }

    /// Format 17: software interrupt
    pub(crate) fn thumb_swi(&mut self, inst: u16) -> CpuAction {
        self.software_interrupt(self.regs.pc.wrapping_sub(2), (inst & 0xFF) as u32);
        CpuAction::PipelineFlushed
    }

    /// Format 18: unconditional branch
    pub(crate) fn thumb_branch(&mut self, inst: u16) -> CpuAction {
        let offset = ((((inst & 0x7FF) as u32) << 21) as i32) >> 20;
        self.regs.pc = (self.regs.pc as i32).wrapping_add(offset) as u32;
        self.reload_pipeline_thumb();
        CpuAction::PipelineFlushed
    }

    /// Format 19: the two-halfword BL pair composing a 22-bit offset
    pub(crate) fn thumb_branch_link(&mut self, inst: u16) -> CpuAction {
        let low = inst.bit(11);
        let offset = (inst & 0x7FF) as i32;

        if low {
            let return_addr = self.regs.pc.wrapping_sub(2) | 1;
            let target = (self.regs.read(REG_LR) & !1).wrapping_add((offset << 1) as u32);
            self.notify(DebugEvent::Call(target & !1));
            self.regs.pc = target;
            self.regs.write(REG_LR, return_addr);
            self.reload_pipeline_thumb();
            CpuAction::PipelineFlushed
        } else {
            let upper = (offset << 21) >> 9;
            let lr = (self.regs.pc as i32).wrapping_add(upper) as u32;
            self.regs.write(REG_LR, lr);
            CpuAction::AdvancePC(Seq)
        }
    }

    pub(crate) fn thumb_undefined(&mut self, inst: u16) -> CpuAction {
        warn!(
            "undefined THUMB instruction {:04x} at {:08x}",
            inst,
            self.pc_thumb()
        );
        self.exception(Exception::UndefinedInstruction, self.regs.pc.wrapping_sub(2));
        CpuAction::PipelineFlushed
    }
}
