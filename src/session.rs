//! `Session` bundles what used to be global mutable tracer state into one
//! value: a tracee process, its thread table, and its breakpoint table, all
//! owned together and torn down together.

use crate::breakpoint_table::BreakpointTable;
use crate::control_loop::{self, StepUntilOutcome, WaitReport};
use crate::error::CoreError;
use crate::log::LogLevel::LogWarn;
use crate::thread_table::{RegisterBankHandle, ThreadState, ThreadTable};
use crate::trace_primitives;
use crate::trace_assert;
use nix::sys::signal::Signal;
use nix::unistd::Pid;

pub struct Session {
    pid: Pid,
    threads: ThreadTable,
    breakpoints: BreakpointTable,
}

impl Session {
    /// Take ownership of a tracee whose main thread is `pid` and already
    /// stopped (e.g. just past its own `PTRACE_TRACEME` + `execve`, or
    /// `PTRACE_ATTACH`ed and waited on by the caller).
    pub fn new(pid: Pid) -> Result<Self, CoreError> {
        trace_primitives::set_options(pid)?;
        let mut session = Session {
            pid,
            threads: ThreadTable::new(),
            breakpoints: BreakpointTable::new(),
        };
        session.register_thread(pid)?;
        Ok(session)
    }

    pub fn pid(&self) -> Pid {
        self.pid
    }

    pub fn register_thread(&mut self, tid: Pid) -> Result<RegisterBankHandle, CoreError> {
        let regs = trace_primitives::peek_user(tid)?;
        Ok(self.threads.register(tid, regs))
    }

    pub fn unregister_thread(&mut self, tid: Pid) -> Option<RegisterBankHandle> {
        self.threads.unregister(tid)
    }

    pub fn thread_handle(&self, tid: Pid) -> Option<RegisterBankHandle> {
        self.threads.handle(tid)
    }

    pub fn thread_state(&self, tid: Pid) -> Option<ThreadState> {
        self.threads.state(tid)
    }

    pub fn thread_count(&self) -> usize {
        self.threads.len()
    }

    pub fn install_breakpoint(&mut self, address: u64) -> Result<(), CoreError> {
        self.breakpoints.install(self.pid, address)
    }

    pub fn disable_breakpoint(&mut self, address: u64) -> Result<(), CoreError> {
        self.breakpoints.disable(self.pid, address)
    }

    pub fn remove_breakpoint(&mut self, address: u64) {
        self.breakpoints.remove(address);
    }

    pub fn continue_all(&mut self) -> Result<(), CoreError> {
        control_loop::continue_all(&mut self.threads, &mut self.breakpoints, self.pid)
    }

    pub fn wait_all(&mut self) -> Result<WaitReport, CoreError> {
        control_loop::wait_all(&mut self.threads, &mut self.breakpoints, self.pid)
    }

    pub fn step(&mut self, tid: Pid) -> Result<(), CoreError> {
        control_loop::step(&mut self.threads, tid)
    }

    pub fn step_until(
        &mut self,
        tid: Pid,
        target_addr: u64,
        max_steps: i64,
    ) -> Result<StepUntilOutcome, CoreError> {
        control_loop::step_until(&mut self.threads, tid, target_addr, max_steps)
    }
}

impl Drop for Session {
    /// Detach every thread still registered so none of them are left
    /// stopped-and-abandoned once this session goes away. Detach failures
    /// are logged, not propagated; there's no caller left to hand an
    /// error back to from a destructor, and a thread that's already gone is
    /// exactly the common case here (`ESRCH` on detach after the tracee
    /// exited on its own).
    fn drop(&mut self) {
        for tid in self.threads.tids() {
            if let Err(e) = trace_primitives::detach(tid, Some(Signal::SIGCONT)) {
                log!(LogWarn, "session drop: failed to detach thread {}: {}", tid, e);
            }
        }
        self.threads.clear();
        self.breakpoints.clear();
        trace_assert!(self.threads.is_empty(), self.pid, "thread table non-empty after teardown");
    }
}
