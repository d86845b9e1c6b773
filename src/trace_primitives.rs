//! Trace Primitives: the thinnest possible wrapper over the ptrace/wait
//! syscalls, each one mapped straight onto a `nix` call and a [`CoreError`].
//! Nothing here knows about threads, breakpoints, or the control loop's
//! algorithms; the control loop is the only caller, as the overview
//! requires.

use crate::error::CoreError;
use crate::registers::Registers;
use nix::errno::Errno;
use nix::sys::ptrace;
use nix::sys::signal::{self, Signal};
use nix::sys::wait::{waitpid, WaitPidFlag, WaitStatus};
use nix::unistd::Pid;
use std::os::raw::c_void;

fn wrap(op: &'static str, tid: Pid, result: nix::Result<()>) -> Result<(), CoreError> {
    result.map_err(|source| CoreError::Syscall { op, tid, source })
}

/// Called in the child after `fork`, before `exec`, so the parent becomes
/// this process's tracer for the rest of its life.
pub fn trace_me() -> Result<(), CoreError> {
    ptrace::traceme().map_err(|source| CoreError::Syscall {
        op: "PTRACE_TRACEME",
        tid: Pid::this(),
        source,
    })
}

pub fn attach(tid: Pid) -> Result<(), CoreError> {
    wrap("PTRACE_ATTACH", tid, ptrace::attach(tid))
}

pub fn detach(tid: Pid, sig: Option<Signal>) -> Result<(), CoreError> {
    wrap("PTRACE_DETACH", tid, ptrace::detach(tid, sig))
}

/// Enable fork/vfork/clone/exec/exit event reporting. Decoding those events
/// (distinguishing a `PTRACE_EVENT_CLONE` stop from a plain signal-delivery
/// stop, reading the new tid out with `PTRACE_GETEVENTMSG`) is a front end's
/// job; this crate only flips the switch.
pub fn set_options(tid: Pid) -> Result<(), CoreError> {
    let options = ptrace::Options::PTRACE_O_TRACEFORK
        | ptrace::Options::PTRACE_O_TRACEVFORK
        | ptrace::Options::PTRACE_O_TRACECLONE
        | ptrace::Options::PTRACE_O_TRACEEXEC
        | ptrace::Options::PTRACE_O_TRACEEXIT;
    wrap("PTRACE_SETOPTIONS", tid, ptrace::setoptions(tid, options))
}

/// Read one word of tracee memory. `errno` is cleared immediately before
/// the raw syscall so an all-ones return value can be told apart from a
/// failed peek without the ambiguity the kernel's API otherwise permits
/// (see [`CoreError::PeekAmbiguous`]).
pub fn peek_data(tid: Pid, addr: u64) -> Result<u64, CoreError> {
    Errno::clear();
    let ret = unsafe {
        libc::ptrace(
            libc::PTRACE_PEEKDATA,
            libc::pid_t::from(tid),
            addr as *mut c_void,
            std::ptr::null_mut::<c_void>(),
        )
    };
    if ret == -1 {
        let errno = Errno::last();
        if errno != Errno::UnknownErrno {
            return Err(CoreError::Syscall {
                op: "PTRACE_PEEKDATA",
                tid,
                source: errno,
            });
        }
    }
    Ok(ret as u64)
}

pub fn poke_data(tid: Pid, addr: u64, word: u64) -> Result<(), CoreError> {
    let ret = unsafe {
        libc::ptrace(
            libc::PTRACE_POKEDATA,
            libc::pid_t::from(tid),
            addr as *mut c_void,
            word as *mut c_void,
        )
    };
    if ret == -1 {
        return Err(CoreError::Syscall {
            op: "PTRACE_POKEDATA",
            tid,
            source: Errno::last(),
        });
    }
    Ok(())
}

/// Read the whole register bank in one call (the data model treats it as a
/// single opaque value, so this realizes `peek_user` as a bulk `GETREGS`
/// rather than iterating individual `USER`-area word offsets).
pub fn peek_user(tid: Pid) -> Result<Registers, CoreError> {
    ptrace::getregs(tid)
        .map(Registers::from_raw)
        .map_err(|source| CoreError::Syscall {
            op: "PTRACE_GETREGS",
            tid,
            source,
        })
}

pub fn poke_user(tid: Pid, regs: &Registers) -> Result<(), CoreError> {
    wrap("PTRACE_SETREGS", tid, ptrace::setregs(tid, *regs.raw()))
}

pub fn single_step(tid: Pid) -> Result<(), CoreError> {
    wrap("PTRACE_SINGLESTEP", tid, ptrace::step(tid, None))
}

pub fn cont(tid: Pid) -> Result<(), CoreError> {
    wrap("PTRACE_CONT", tid, ptrace::cont(tid, None))
}

pub fn get_event_msg(tid: Pid) -> Result<i64, CoreError> {
    ptrace::getevent(tid).map_err(|source| CoreError::Syscall {
        op: "PTRACE_GETEVENTMSG",
        tid,
        source,
    })
}

/// `tgkill`-equivalent delivery of the thread-directed stop signal used to
/// interrupt a sibling that's still running when the control loop needs it
/// stopped. Plain `kill()` against the numeric tid works here because a
/// Linux thread's tid is itself a valid target for signal delivery; a
/// tracer that also has to survive pid reuse races would reach for
/// `tgkill(2)` instead.
pub fn deliver_stop_signal(tid: Pid) -> Result<(), CoreError> {
    wrap("SIGSTOP", tid, signal::kill(tid, Signal::SIGSTOP))
}

/// Block for the next status change in any thread of the traced process
/// (`waitpid(-1)`, `__WALL` so non-main-thread tids are eligible).
pub fn wait_blocking_any() -> Result<(Pid, WaitStatus), CoreError> {
    let status = waitpid(None, Some(WaitPidFlag::__WALL)).map_err(|source| CoreError::Syscall {
        op: "waitpid(-1)",
        tid: Pid::from_raw(-1),
        source,
    })?;
    Ok((wait_status_pid(&status), status))
}

/// Block for the next status change in a specific thread.
pub fn wait_blocking_for(tid: Pid) -> Result<WaitStatus, CoreError> {
    waitpid(tid, Some(WaitPidFlag::__WALL)).map_err(|source| CoreError::Syscall {
        op: "waitpid(tid)",
        tid,
        source,
    })
}

/// Drain one already-pending status change without blocking; `Ok(None)`
/// means nothing was pending.
pub fn wait_nonblocking_any() -> Result<Option<(Pid, WaitStatus)>, CoreError> {
    match waitpid(None, Some(WaitPidFlag::__WALL | WaitPidFlag::WNOHANG)) {
        Ok(WaitStatus::StillAlive) => Ok(None),
        Ok(status) => Ok(Some((wait_status_pid(&status), status))),
        Err(Errno::ECHILD) => Ok(None),
        Err(source) => Err(CoreError::Syscall {
            op: "waitpid(-1, WNOHANG)",
            tid: Pid::from_raw(-1),
            source,
        }),
    }
}

fn wait_status_pid(status: &WaitStatus) -> Pid {
    status.pid().expect("wait status for a real tid always carries a pid")
}

/// True when `status` reports a stop caused by the thread-directed signal
/// this crate uses to interrupt a running sibling (`SIGSTOP`), as opposed to
/// a trap, a different signal, or exit/exec. Used while stepping over a
/// breakpoint, where a stop caused by that race needs to be absorbed rather
/// than mistaken for the step landing.
pub fn is_stopped_by_thread_stop_signal(status: &WaitStatus) -> bool {
    matches!(status, WaitStatus::Stopped(_, Signal::SIGSTOP))
}
