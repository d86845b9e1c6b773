//! Typed error surface for the tracing core.
//!
//! Every fallible primitive in this crate returns one of the variants below
//! rather than a bare `nix::Error`, so a caller can match on *why* a
//! ptrace-backed operation failed instead of re-deriving it from an errno.

use nix::errno::Errno;
use nix::unistd::Pid;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    /// A raw ptrace/wait syscall failed. `op` names the ptrace request
    /// (`"PTRACE_PEEKDATA"`, `"PTRACE_CONT"`, ...) so a log line naming only
    /// the error is still actionable.
    #[error("{op} failed for thread {tid}: {source}")]
    Syscall {
        op: &'static str,
        tid: Pid,
        #[source]
        source: Errno,
    },

    /// An operation was requested against a thread id the thread table has
    /// no record of, neither registered nor ever seen.
    #[error("thread {tid} is not registered in the thread table")]
    MissingThread { tid: Pid },

    /// A memory-word read returned the all-ones sentinel without the errno
    /// side channel being in a state that could confirm whether that was a
    /// real value or a failed peek. This crate's own [`crate::trace_primitives`]
    /// always clears `errno` before the underlying call and so never
    /// constructs this itself; it exists for callers that reach the raw
    /// ptrace peek request directly and need a name for the failure mode the
    /// kernel's API makes possible.
    #[error("peek at {addr:#x} in thread {tid} is ambiguous: returned all-ones without a confirmed errno")]
    PeekAmbiguous { tid: Pid, addr: u64 },

    /// Wraps the cause of a fatal step-over failure in `continue_all`'s
    /// phase 2. Unlike the bulk register-flush/continue phases (logged
    /// per-thread, not fatal), a thread that can't be single-stepped off a
    /// trap it's sitting on aborts the whole `continue_all` call.
    #[error("step-over of breakpoint failed for thread {tid}: {source}")]
    StepOver {
        tid: Pid,
        #[source]
        source: Box<CoreError>,
    },
}
