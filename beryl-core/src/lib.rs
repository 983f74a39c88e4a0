//! The pieces that pace an emulated system: the cycle-stamped event
//! scheduler every device runs off, the interrupt controller the CPU
//! samples, and the trait seams for the externally-owned collaborators.

pub mod irq;
pub mod mixer;
pub mod sched;

pub use irq::{signal_irq, Interrupt, InterruptController, IrqBitMask, SharedInterruptFlags};
pub use mixer::AudioMixer;
pub use sched::{ApuEvent, EventHandle, EventType, Scheduler};
