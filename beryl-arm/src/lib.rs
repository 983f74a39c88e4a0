//! ARM7TDMI interpreter core.
//!
//! The CPU is generic over the system bus it executes against; the bus
//! reports access timing through [`memory::MemoryAccess`] hints and exposes
//! the external interrupt line. Decode is table driven: the build script
//! enumerates every 12-bit ARM and 10-bit THUMB key once and emits flat
//! handler tables.

pub mod alu;
pub mod cpu;
pub mod debug;
pub mod exception;
pub mod memory;
pub mod registers;

mod arm;
mod thumb;

pub use cpu::{Arm7tdmi, CpuAction};
pub use debug::{DebugEvent, DebugHook};
pub use memory::{InterruptLine, MemoryAccess, MemoryInterface, SysBus};
pub use registers::{CpuMode, CpuState, Registers, StatusRegister};

pub type Addr = u32;

pub const REG_SP: usize = 13;
pub const REG_LR: usize = 14;
pub const REG_PC: usize = 15;
