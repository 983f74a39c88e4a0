use crate::Addr;

/// Events delivered to an attached debugger hook. The hook receives copies
/// of the interesting state; it cannot reach back into the CPU while a
/// delivery is in flight (re-entry is detected and dropped).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DebugEvent {
    /// An instruction is about to execute.
    Execute { pc: Addr, thumb: bool },
    /// A software interrupt with its comment field.
    Swi(u32),
    IrqEnter,
    SwiReturn,
    IrqReturn,
    /// A branch-with-link to `target`.
    Call(Addr),
    /// A `BX lr` style return.
    Return,
}

pub type DebugHook = Box<dyn FnMut(DebugEvent)>;
