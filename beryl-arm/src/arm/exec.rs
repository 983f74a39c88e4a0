//! The 32-bit instruction set. Handlers are specialised through const
//! generics on the bits the 12-bit decode key exposes; everything else is
//! pulled out of the instruction word at runtime.

use crate::{
    alu::{self, AluOp, ShiftOp},
    cpu::{multiplier_cycles, Arm7tdmi, CpuAction},
    debug::DebugEvent,
    exception::Exception,
    memory::{MemoryAccess::*, SysBus},
    registers::{CpuMode, StatusRegister},
    REG_LR, REG_PC,
};
use beryl_common::BitIndex;
use log::warn;
use num_traits::FromPrimitive;

pub(crate) struct ArmHandler<Bus: SysBus>(pub fn(&mut Arm7tdmi<Bus>, u32) -> CpuAction);

include!(concat!(env!("OUT_DIR"), "/arm_table.rs"));

fn decode_shift_op(inst: u32) -> ShiftOp {
    match ShiftOp::from_u32(inst.bit_range(5..7)) {
        Some(op) => op,
        None => unreachable!(),
    }
}

impl<Bus: SysBus> Arm7tdmi<Bus> {
    pub(crate) fn arm_undefined(&mut self, inst: u32) -> CpuAction {
        warn!(
            "undefined ARM instruction {:08x} at {:08x}",
            inst,
            self.pc_arm()
        );
        self.exception(Exception::UndefinedInstruction, self.regs.pc.wrapping_sub(4));
        CpuAction::PipelineFlushed
    }

    /// B / BL
    pub(crate) fn arm_branch<const LINK: bool>(&mut self, inst: u32) -> CpuAction {
        let offset = (((inst & 0xFF_FFFF) << 8) as i32) >> 6;
        if LINK {
            self.regs.write(REG_LR, self.regs.pc.wrapping_sub(4));
        }
        let target = (self.regs.pc as i32).wrapping_add(offset) as u32;
        if LINK {
            self.notify(DebugEvent::Call(target & !3));
        }
        self.regs.pc = target;
        self.reload_pipeline_arm();
        CpuAction::PipelineFlushed
    }

    /// BX
    pub(crate) fn arm_branch_exchange(&mut self, inst: u32) -> CpuAction {
        let rm = (inst & 0xF) as usize;
        let target = self.regs.read(rm);
        if rm == REG_LR {
            self.notify(DebugEvent::Return);
        } else {
            self.notify(DebugEvent::Call(target & !1));
        }
        self.branch_exchange(target)
    }

    pub(crate) fn arm_data_processing<
        const OP: u8,
        const IMM: bool,
        const SET_FLAGS: bool,
        const SHIFT_BY_REG: bool,
    >(
        &mut self,
        inst: u32,
    ) -> CpuAction {
        use AluOp::*;
        let opcode = match AluOp::from_u8(OP) {
            Some(op) => op,
            None => unreachable!(),
        };
        let rn = inst.bit_range(16..20) as usize;
        let rd = inst.bit_range(12..16) as usize;

        let c_in = self.regs.cpsr.c();
        let mut shift_carry = c_in;

        let mut op1 = self.regs.read(rn);
        let op2 = if IMM {
            alu::rotated_immediate(inst, &mut shift_carry)
        } else {
            let rm = (inst & 0xF) as usize;
            let shift_op = decode_shift_op(inst);
            if SHIFT_BY_REG {
                if rn == REG_PC {
                    // r15 as op1 reads one word further when the shift
                    // amount comes from a register
                    op1 = op1.wrapping_add(4);
                }
                let rs = inst.bit_range(8..12) as usize;
                self.shift_by_register(shift_op, rm, rs, &mut shift_carry)
            } else {
                let amount = inst.bit_range(7..12);
                alu::barrel_shift(shift_op, self.regs.read(rm), amount, &mut shift_carry, true)
            }
        };

        let mut set_flags = SET_FLAGS;
        if SET_FLAGS && rd == REG_PC {
            self.restore_cpsr_from_spsr();
            set_flags = false;
        }

        let result = if set_flags {
            let mut carry = c_in;
            let mut overflow = self.regs.cpsr.v();
            let result = match opcode {
                And | Tst => op1 & op2,
                Eor | Teq => op1 ^ op2,
                Sub | Cmp => alu::sub_flags(op1, op2, &mut carry, &mut overflow),
                Rsb => alu::sub_flags(op2, op1, &mut carry, &mut overflow),
                Add | Cmn => alu::add_flags(op1, op2, &mut carry, &mut overflow),
                Adc => alu::adc_flags(op1, op2, &mut carry, &mut overflow),
                Sbc => alu::sbc_flags(op1, op2, &mut carry, &mut overflow),
                Rsc => alu::sbc_flags(op2, op1, &mut carry, &mut overflow),
                Orr => op1 | op2,
                Mov => op2,
                Bic => op1 & !op2,
                Mvn => !op2,
            };

            self.regs.cpsr.set_n(result.bit(31));
            self.regs.cpsr.set_z(result == 0);
            if opcode.is_arithmetic() {
                self.regs.cpsr.set_c(carry);
                self.regs.cpsr.set_v(overflow);
            } else {
                self.regs.cpsr.set_c(shift_carry);
            }

            if opcode.is_compare() {
                None
            } else {
                Some(result)
            }
        } else {
            let c = c_in as u32;
            Some(match opcode {
                And | Tst => op1 & op2,
                Eor | Teq => op1 ^ op2,
                Sub | Cmp => op1.wrapping_sub(op2),
                Rsb => op2.wrapping_sub(op1),
                Add | Cmn => op1.wrapping_add(op2),
                Adc => op1.wrapping_add(op2).wrapping_add(c),
                Sbc => op1.wrapping_sub(op2).wrapping_add(c).wrapping_sub(1),
                Rsc => op2.wrapping_sub(op1).wrapping_add(c).wrapping_sub(1),
                Orr => op1 | op2,
                Mov => op2,
                Bic => op1 & !op2,
                Mvn => !op2,
            })
        };

        if let Some(value) = result {
            self.regs.write(rd, value);
            if rd == REG_PC {
                // the SPSR restore may have switched state
                self.flush_pipeline();
                return CpuAction::PipelineFlushed;
            }
        }
        CpuAction::AdvancePC(Seq)
    }

    /// MRS
    pub(crate) fn arm_mrs<const SPSR: bool>(&mut self, inst: u32) -> CpuAction {
        let rd = inst.bit_range(12..16) as usize;
        let value = if SPSR {
            self.regs.spsr().raw()
        } else {
            self.regs.cpsr.raw()
        };
        self.regs.write(rd, value);
        CpuAction::AdvancePC(Seq)
    }

    /// MSR
    pub(crate) fn arm_msr<const IMM: bool, const SPSR: bool>(&mut self, inst: u32) -> CpuAction {
        let value = if IMM {
            let mut carry = self.regs.cpsr.c();
            alu::rotated_immediate(inst, &mut carry)
        } else {
            self.regs.read((inst & 0xF) as usize)
        };

        let mut mask = 0u32;
        for field in 0..4 {
            if inst.bit(16 + field) {
                mask |= 0xFF << (8 * field);
            }
        }

        if SPSR {
            if self.regs.cpsr.mode().has_spsr() {
                let spsr = self.regs.spsr().raw();
                self.regs
                    .set_spsr(StatusRegister::from_raw((spsr & !mask) | (value & mask)));
            } else {
                warn!("MSR SPSR in {} has no target, ignored", self.regs.cpsr.mode());
            }
        } else {
            // User mode can only touch the flag byte
            let mask = if self.regs.cpsr.mode() == CpuMode::User {
                mask & 0xF000_0000
            } else {
                mask
            };
            let new = (self.regs.cpsr.raw() & !mask) | (value & mask);
            self.regs.set_cpsr(new);
        }
        CpuAction::AdvancePC(Seq)
    }

    /// MUL / MLA
    pub(crate) fn arm_multiply<const SET_FLAGS: bool, const ACCUMULATE: bool>(
        &mut self,
        inst: u32,
    ) -> CpuAction {
        let rd = inst.bit_range(16..20) as usize;
        let rn = inst.bit_range(12..16) as usize;
        let rs = inst.bit_range(8..12) as usize;
        let rm = (inst & 0xF) as usize;

        let op1 = self.regs.read(rm);
        let op2 = self.regs.read(rs);
        let mut result = op1.wrapping_mul(op2);
        if ACCUMULATE {
            result = result.wrapping_add(self.regs.read(rn));
            self.idle_cycle();
        }
        self.regs.write(rd, result);

        for _ in 0..multiplier_cycles(op2) {
            self.idle_cycle();
        }

        if SET_FLAGS {
            self.regs.cpsr.set_n(result.bit(31));
            self.regs.cpsr.set_z(result == 0);
            // C is architecturally unpredictable here; leave it alone
        }
        CpuAction::AdvancePC(Seq)
    }

    /// UMULL / UMLAL / SMULL / SMLAL
    pub(crate) fn arm_multiply_long<
        const SET_FLAGS: bool,
        const ACCUMULATE: bool,
        const SIGNED: bool,
    >(
        &mut self,
        inst: u32,
    ) -> CpuAction {
        let rd_hi = inst.bit_range(16..20) as usize;
        let rd_lo = inst.bit_range(12..16) as usize;
        let rs = inst.bit_range(8..12) as usize;
        let rm = (inst & 0xF) as usize;

        let op1 = self.regs.read(rm);
        let op2 = self.regs.read(rs);
        let mut result = if SIGNED {
            (op1 as i32 as i64).wrapping_mul(op2 as i32 as i64) as u64
        } else {
            (op1 as u64).wrapping_mul(op2 as u64)
        };
        if ACCUMULATE {
            let acc = (self.regs.read(rd_hi) as u64) << 32 | self.regs.read(rd_lo) as u64;
            result = result.wrapping_add(acc);
            self.idle_cycle();
        }
        self.regs.write(rd_hi, (result >> 32) as u32);
        self.regs.write(rd_lo, result as u32);

        self.idle_cycle();
        for _ in 0..multiplier_cycles(op2) {
            self.idle_cycle();
        }

        if SET_FLAGS {
            self.regs.cpsr.set_n(result.bit(63));
            self.regs.cpsr.set_z(result == 0);
        }
        CpuAction::AdvancePC(Seq)
    }

    /// LDR / STR / LDRB / STRB
    pub(crate) fn arm_single_transfer<
        const LOAD: bool,
        const WRITEBACK: bool,
        const PRE_INDEX: bool,
        const BYTE: bool,
        const REG_OFFSET: bool,
        const ADD: bool,
    >(
        &mut self,
        inst: u32,
    ) -> CpuAction {
        let rn = inst.bit_range(16..20) as usize;
        let rd = inst.bit_range(12..16) as usize;

        let offset = if REG_OFFSET {
            let rm = (inst & 0xF) as usize;
            let amount = inst.bit_range(7..12);
            let mut carry = self.regs.cpsr.c();
            alu::barrel_shift(decode_shift_op(inst), self.regs.read(rm), amount, &mut carry, true)
        } else {
            inst & 0xFFF
        };
        let offset = if ADD { offset } else { offset.wrapping_neg() };

        let base = self.regs.read(rn);
        let effective = base.wrapping_add(offset);
        let addr = if PRE_INDEX { effective } else { base };

        let mut result = CpuAction::AdvancePC(NonSeq);
        if LOAD {
            let value = if BYTE {
                self.load_8(addr, NonSeq)
            } else {
                self.ldr_word_rotated(addr, NonSeq)
            };
            self.regs.write(rd, value);
            self.idle_cycle();
            if rd == REG_PC {
                self.reload_pipeline_arm();
                result = CpuAction::PipelineFlushed;
            }
        } else {
            let value = if rd == REG_PC {
                // stores see r15 a word beyond the prefetch address
                self.regs.pc.wrapping_add(4)
            } else {
                self.regs.read(rd)
            };
            if BYTE {
                self.store_8(addr, value as u8, NonSeq);
            } else {
                self.store_aligned_32(addr, value, NonSeq);
            }
        }

        if (!LOAD || rd != rn) && (!PRE_INDEX || WRITEBACK) {
            self.regs.write(rn, effective);
        }

        result
    }

    /// LDRH / STRH / LDRSB / LDRSH
    pub(crate) fn arm_halfword_transfer<
        const LOAD: bool,
        const WRITEBACK: bool,
        const PRE_INDEX: bool,
        const ADD: bool,
        const IMM_OFFSET: bool,
    >(
        &mut self,
        inst: u32,
    ) -> CpuAction {
        let rn = inst.bit_range(16..20) as usize;
        let rd = inst.bit_range(12..16) as usize;

        let offset = if IMM_OFFSET {
            inst.bit_range(8..12) << 4 | inst.bit_range(0..4)
        } else {
            self.regs.read((inst & 0xF) as usize)
        };
        let offset = if ADD { offset } else { offset.wrapping_neg() };

        let base = self.regs.read(rn);
        let effective = base.wrapping_add(offset);
        let addr = if PRE_INDEX { effective } else { base };

        let mut result = CpuAction::AdvancePC(NonSeq);
        let kind = inst.bit_range(5..7);
        if LOAD {
            let value = match kind {
                0b01 => self.ldr_half(addr, NonSeq),
                0b10 => self.ldr_sign_byte(addr, NonSeq),
                0b11 => self.ldr_sign_half(addr, NonSeq),
                _ => unreachable!(),
            };
            self.regs.write(rd, value);
            self.idle_cycle();
            if rd == REG_PC {
                self.reload_pipeline_arm();
                result = CpuAction::PipelineFlushed;
            }
        } else {
            if kind != 0b01 {
                warn!(
                    "halfword store with S/H = {:02b} at {:08x}, treating as STRH",
                    kind,
                    self.pc_arm()
                );
            }
            let value = if rd == REG_PC {
                self.regs.pc.wrapping_add(4)
            } else {
                self.regs.read(rd)
            };
            self.store_aligned_16(addr, value as u16, NonSeq);
        }

        if (!LOAD || rd != rn) && (!PRE_INDEX || WRITEBACK) {
            self.regs.write(rn, effective);
        }

        result
    }

    /// LDM / STM
    pub(crate) fn arm_block_transfer<
        const LOAD: bool,
        const WRITEBACK: bool,
        const S_BIT: bool,
        const ADD: bool,
        const PRE_INDEX: bool,
    >(
        &mut self,
        inst: u32,
    ) -> CpuAction {
        let rn = inst.bit_range(16..20) as usize;
        let rlist = (inst & 0xFFFF) as u16;

        let mut full = PRE_INDEX;
        let ascending = ADD;
        let mut writeback = WRITEBACK;

        // S without r15 in a load list (or any store list) moves the user
        // bank instead of the current one; S on a load with r15 restores
        // the SPSR
        let user_transfer = S_BIT && !(LOAD && rlist.bit(15));
        let psr_transfer = S_BIT && LOAD && rlist.bit(15);

        let count = rlist.count_ones();
        let old_base = self.regs.read(rn);
        let mut base = old_base;

        // a descending transfer still stores ascending, starting below the
        // base
        if rlist != 0 && !ascending {
            base = base.wrapping_sub(count * 4);
            if writeback {
                self.regs.write(rn, base);
                writeback = false;
            }
            full = !full;
        }

        let mut addr = base;
        let mut result = CpuAction::AdvancePC(NonSeq);

        if rlist != 0 {
            if LOAD {
                let mut access = NonSeq;
                for r in 0..16 {
                    if !rlist.bit(r) {
                        continue;
                    }
                    if r == rn {
                        writeback = false;
                    }
                    if full {
                        addr = addr.wrapping_add(4);
                    }
                    let value = self.ldr_word(addr, access);
                    access = Seq;
                    if r == REG_PC {
                        // restore first so the PC write aligns for the
                        // state being returned to
                        if psr_transfer {
                            self.restore_cpsr_from_spsr();
                        }
                        self.regs.write(REG_PC, value);
                        self.flush_pipeline();
                        result = CpuAction::PipelineFlushed;
                    } else if user_transfer {
                        self.regs.write_any(CpuMode::User, r, value);
                    } else {
                        self.regs.write(r, value);
                    }
                    if !full {
                        addr = addr.wrapping_add(4);
                    }
                }
                self.idle_cycle();
            } else {
                let mut first = true;
                let mut access = NonSeq;
                for r in 0..16 {
                    if !rlist.bit(r) {
                        continue;
                    }
                    let value = if r != rn {
                        if r == REG_PC {
                            self.regs.pc.wrapping_add(4)
                        } else if user_transfer {
                            self.regs.read_any(CpuMode::User, r)
                        } else {
                            self.regs.read(r)
                        }
                    } else if first {
                        old_base
                    } else if ascending {
                        old_base.wrapping_add(count * 4)
                    } else {
                        old_base.wrapping_sub(count * 4)
                    };
                    if full {
                        addr = addr.wrapping_add(4);
                    }
                    first = false;
                    self.store_aligned_32(addr, value, access);
                    access = Seq;
                    if !full {
                        addr = addr.wrapping_add(4);
                    }
                }
            }
        } else {
            // ARMv4 with an empty list transfers r15 and moves the base by
            // 0x40
            if LOAD {
                let value = self.ldr_word(addr, NonSeq);
                self.regs.write(REG_PC, value);
                self.flush_pipeline();
                result = CpuAction::PipelineFlushed;
            } else {
                let store_addr = match (ascending, full) {
                    (false, false) => addr.wrapping_sub(0x3C),
                    (false, true) => addr.wrapping_sub(0x40),
                    (true, false) => addr,
                    (true, true) => addr.wrapping_add(4),
                };
                self.store_aligned_32(store_addr, self.regs.pc.wrapping_add(4), NonSeq);
            }
            addr = if ascending {
                addr.wrapping_add(0x40)
            } else {
                addr.wrapping_sub(0x40)
            };
        }

        if writeback {
            self.regs.write(rn, addr);
        }
        result
    }

    /// SWP / SWPB
    pub(crate) fn arm_swap<const BYTE: bool>(&mut self, inst: u32) -> CpuAction {
        let rn = inst.bit_range(16..20) as usize;
        let rd = inst.bit_range(12..16) as usize;
        let rm = (inst & 0xF) as usize;

        let addr = self.regs.read(rn);
        let value = self.regs.read(rm);
        let old = if BYTE {
            let old = self.load_8(addr, NonSeq);
            self.store_8(addr, value as u8, Seq);
            old
        } else {
            let old = self.ldr_word_rotated(addr, NonSeq);
            self.store_aligned_32(addr, value, Seq);
            old
        };
        self.regs.write(rd, old);
        self.idle_cycle();
        CpuAction::AdvancePC(NonSeq)
    }

    /// SWI
    pub(crate) fn arm_swi(&mut self, inst: u32) -> CpuAction {
        self.software_interrupt(self.regs.pc.wrapping_sub(4), inst & 0xFF_FFFF);
        CpuAction::PipelineFlushed
    }
}
