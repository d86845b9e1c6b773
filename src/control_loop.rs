//! Control Loop: the only caller of the trace primitives. Everything here
//! is the orchestration the overview describes (`continue_all`,
//! `wait_all`, `step`, `step_until`), expressed against the thread table and
//! breakpoint table rather than against raw tids and addresses directly.

use crate::arch::{instruction_pointer, set_instruction_pointer};
use crate::breakpoint_table::BreakpointTable;
use crate::error::CoreError;
use crate::log::LogLevel::LogWarn;
use crate::thread_table::{ThreadState, ThreadTable};
use crate::trace_primitives;
use crate::trace_assert;
use nix::sys::wait::WaitStatus;
use nix::unistd::Pid;

/// One thread's status change as observed by [`wait_all`].
pub type WaitReport = Vec<(Pid, WaitStatus)>;

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum StepUntilOutcome {
    /// The instruction pointer reached the target address.
    Reached,
    /// `max_steps` real (IP-advancing) steps were taken without arriving.
    BudgetExhausted,
    /// The tracee exited or was killed by a signal before arriving.
    TraceeGone,
}

/// Resume every thread in `tt`, stepping any thread currently sitting on an
/// enabled breakpoint's trap byte over it first so continuing doesn't just
/// re-trap in place.
///
/// 1. Flush every thread's register bank (a caller may have edited one via
///    its handle since the last stop).
/// 2. For each thread whose instruction pointer sits on an enabled
///    breakpoint, single-step it off first. A failure here is fatal: a
///    thread that can't be moved off a trap would re-trap forever.
/// 3. Re-arm every enabled breakpoint (write its patched word back; this is
///    what makes the addresses restored by `wait_all`'s step 5 live again).
/// 4. Issue `PTRACE_CONT` to every thread. A single thread's continue
///    failing doesn't abort the others', it's logged and the loop moves
///    on, matching the bulk-operation error policy used throughout.
pub fn continue_all(
    tt: &mut ThreadTable,
    bt: &mut BreakpointTable,
    pid: Pid,
) -> Result<(), CoreError> {
    let mut flush_failures = Vec::new();
    for (tid, regs) in tt.iter() {
        if let Err(e) = trace_primitives::poke_user(tid, &regs.borrow()) {
            flush_failures.push(e);
        }
    }
    if !flush_failures.is_empty() {
        log!(LogWarn, "continue_all: register flush failed for {} thread(s): {:?}", flush_failures.len(), flush_failures);
    }

    for (tid, regs) in tt.iter() {
        let ip = instruction_pointer(&regs.borrow());
        if bt.is_enabled_at(ip) {
            step_over_breakpoint(tid, &regs)
                .map_err(|source| CoreError::StepOver { tid, source: Box::new(source) })?;
        }
    }

    let mut rearm_failures = Vec::new();
    for bp in bt.iter() {
        if bp.enabled {
            if let Err(e) = trace_primitives::poke_data(pid, bp.address, bp.patched_word) {
                rearm_failures.push(e);
            }
        }
    }
    if !rearm_failures.is_empty() {
        log!(LogWarn, "continue_all: re-arming failed for {} breakpoint(s): {:?}", rearm_failures.len(), rearm_failures);
    }

    let mut resume_failures = Vec::new();
    for tid in tt.tids() {
        match trace_primitives::cont(tid) {
            Ok(()) => tt.set_state(tid, ThreadState::Running),
            Err(e) => resume_failures.push(e),
        }
    }
    if !resume_failures.is_empty() {
        log!(LogWarn, "continue_all: resume failed for {} thread(s): {:?}", resume_failures.len(), resume_failures);
    }

    Ok(())
}

fn step_over_breakpoint(
    tid: Pid,
    regs: &crate::thread_table::RegisterBankHandle,
) -> Result<(), CoreError> {
    trace_primitives::single_step(tid)?;
    let mut status = trace_primitives::wait_blocking_for(tid)?;
    if trace_primitives::is_stopped_by_thread_stop_signal(&status) {
        trace_primitives::single_step(tid)?;
        status = trace_primitives::wait_blocking_for(tid)?;
    }
    trace_assert!(
        !trace_primitives::is_stopped_by_thread_stop_signal(&status),
        tid,
        "thread-stop signal raced the single-step twice in a row"
    );
    let fresh = trace_primitives::peek_user(tid)?;
    *regs.borrow_mut() = fresh;
    Ok(())
}

/// Block for at least one status change, then settle the whole thread
/// table into a consistent `Stopped` snapshot.
///
/// 1. Block for the next status change in any thread of the process. A
///    failure here is fatal and propagated.
/// 2. For every other registered thread: if it's already stopped (a
///    `PTRACE_GETREGS` against it succeeds), record that; otherwise it's
///    still running, so interrupt it with the thread-directed stop signal
///    and block for its own status change.
/// 3. Drain any further already-pending status changes without blocking.
/// 4. Refresh every registered thread's register bank from the kernel. A
///    thread whose reported instruction pointer lands one trap-byte past an
///    enabled breakpoint's address is rewound to that address before the
///    bank is cached (the kernel reports the instruction *after* the trap
///    on an `INT3`-style hit), and `continue_all`'s step-over phase only
///    works if a thread sitting on a breakpoint has an instruction pointer
///    that equals the breakpoint address exactly.
/// 5. Restore the original (unpatched) word at every enabled breakpoint's
///    address, so a stopped thread inspecting its own code sees real
///    instructions rather than trap bytes.
pub fn wait_all(
    tt: &mut ThreadTable,
    bt: &mut BreakpointTable,
    pid: Pid,
) -> Result<WaitReport, CoreError> {
    let mut report = WaitReport::new();

    let (seed_tid, seed_status) = trace_primitives::wait_blocking_any()?;
    report.push((seed_tid, seed_status));
    tt.set_state(seed_tid, ThreadState::Stopped);

    for tid in tt.tids() {
        if tid == seed_tid {
            continue;
        }
        match trace_primitives::peek_user(tid) {
            Ok(regs) => {
                tt.register(tid, regs);
                tt.set_state(tid, ThreadState::Stopped);
            }
            Err(_) => {
                if let Err(e) = trace_primitives::deliver_stop_signal(tid) {
                    log!(LogWarn, "wait_all: failed to interrupt running thread {}: {}", tid, e);
                    continue;
                }
                let status = trace_primitives::wait_blocking_for(tid)?;
                report.push((tid, status));
                tt.set_state(tid, ThreadState::Stopped);
            }
        }
    }

    while let Some((tid, status)) = trace_primitives::wait_nonblocking_any()? {
        report.push((tid, status));
        if tt.contains(tid) {
            tt.set_state(tid, ThreadState::Stopped);
        }
    }

    for (tid, regs) in tt.iter() {
        match trace_primitives::peek_user(tid) {
            Ok(mut fresh) => {
                let ip = instruction_pointer(&fresh);
                let landed_on_trap = ip.checked_sub(1).map_or(false, |a| bt.is_enabled_at(a));
                if landed_on_trap {
                    let addr = ip - 1;
                    set_instruction_pointer(&mut fresh, addr);
                    if let Err(e) = trace_primitives::poke_user(tid, &fresh) {
                        log!(LogWarn, "wait_all: failed to rewind IP past trap for {}: {}", tid, e);
                    }
                }
                *regs.borrow_mut() = fresh;
            }
            Err(e) => log!(LogWarn, "wait_all: failed to refresh registers for {}: {}", tid, e),
        }
    }

    for bp in bt.iter() {
        if bp.enabled {
            if let Err(e) = trace_primitives::poke_data(pid, bp.address, bp.original_word) {
                log!(LogWarn, "wait_all: failed to restore original word at {:#x}: {}", bp.address, e);
            }
        }
    }

    Ok(report)
}

/// Flush every thread's registers (same as `continue_all`'s first phase)
/// and single-step `tid` exactly once. Does not restore or re-patch
/// breakpoints; a caller stepping a thread sitting on one is expected to
/// have gone through `wait_all` first so the original word is already
/// resident.
pub fn step(tt: &mut ThreadTable, tid: Pid) -> Result<(), CoreError> {
    for (t, regs) in tt.iter() {
        if let Err(e) = trace_primitives::poke_user(t, &regs.borrow()) {
            log!(LogWarn, "step: failed to flush registers for {}: {}", t, e);
        }
    }

    if !tt.contains(tid) {
        return Err(CoreError::MissingThread { tid });
    }

    trace_primitives::single_step(tid)
}

/// Single-step `tid` repeatedly until its instruction pointer equals
/// `target_addr`, the tracee is gone, or `max_steps` real steps have been
/// taken without arriving (a negative `max_steps` means unbounded). Steps
/// that leave the instruction pointer unchanged (absorbed by a
/// thread-directed stop signal racing the step) don't count against the
/// budget.
pub fn step_until(
    tt: &mut ThreadTable,
    tid: Pid,
    target_addr: u64,
    max_steps: i64,
) -> Result<StepUntilOutcome, CoreError> {
    for (t, regs) in tt.iter() {
        if let Err(e) = trace_primitives::poke_user(t, &regs.borrow()) {
            log!(LogWarn, "step_until: failed to flush registers for {}: {}", t, e);
        }
    }

    let handle = tt.handle(tid).ok_or(CoreError::MissingThread { tid })?;
    let mut steps_taken: i64 = 0;

    loop {
        trace_primitives::single_step(tid)?;
        let status = trace_primitives::wait_blocking_for(tid)?;
        match status {
            WaitStatus::Exited(..) | WaitStatus::Signaled(..) => {
                return Ok(StepUntilOutcome::TraceeGone);
            }
            _ => {}
        }

        let prev_ip = instruction_pointer(&handle.borrow());
        let fresh = trace_primitives::peek_user(tid)?;
        let new_ip = instruction_pointer(&fresh);
        *handle.borrow_mut() = fresh;

        if new_ip == target_addr {
            return Ok(StepUntilOutcome::Reached);
        }
        if new_ip == prev_ip {
            continue;
        }

        steps_taken += 1;
        if max_steps >= 0 && steps_taken >= max_steps {
            return Ok(StepUntilOutcome::BudgetExhausted);
        }
    }
}
