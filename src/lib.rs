//! Multi-threaded tracee control core: thread table, breakpoint table, and
//! the control loop that drives both against the kernel's process-tracing
//! facility. See `SPEC_FULL.md` for the full design; this crate implements
//! the tracing core only; launching the tracee, symbol resolution, and
//! front-end policy are a caller's responsibility.

#[macro_use]
pub mod log;

pub mod arch;
pub mod breakpoint_table;
pub mod control_loop;
pub mod error;
pub mod registers;
pub mod session;
pub mod thread_table;
pub mod trace_primitives;

pub use breakpoint_table::{BreakpointRecord, BreakpointTable};
pub use control_loop::{StepUntilOutcome, WaitReport};
pub use error::CoreError;
pub use registers::Registers;
pub use session::Session;
pub use thread_table::{RegisterBankHandle, ThreadState, ThreadTable};
