//! End-to-end scenarios (S1-S6) driving a real tracee under real ptrace.
//!
//! These need `CAP_SYS_PTRACE` and a Linux/x86_64 host, which most CI
//! sandboxes don't grant to an unprivileged test runner, so every test here
//! is `#[ignore]`d by default; run with `cargo test -- --ignored` on a box
//! that can actually attach.

#![cfg(all(target_os = "linux", target_arch = "x86_64"))]

use nix::sys::signal::{self, Signal};
use nix::sys::wait::waitpid;
use nix::unistd::Pid;
use std::io::{BufRead, BufReader};
use std::os::unix::process::CommandExt;
use std::process::{Child, ChildStdout, Command, Stdio};
use std::time::Duration;
use tracecore::{trace_primitives, Session};

/// A running fixture: the `Session` driving it plus the `Child` handle kept
/// alive so the kernel doesn't reap/reuse its pid out from under the test.
struct Harness {
    session: Session,
    child: Child,
    checkpoint_one: u64,
    checkpoint_two: u64,
}

fn child_traceme() -> std::io::Result<()> {
    trace_primitives::trace_me().map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e.to_string()))
}

/// Spawn `fixture`, PTRACE_TRACEME'd in a `pre_exec` hook the same way the
/// corpus's `deet`/`allocscope`-style fixtures are driven, wait past its
/// exec-stop and its self-raised `SIGSTOP`, and parse the checkpoint
/// addresses it reports on stdout.
fn spawn_fixture() -> Harness {
    let bin = env!("CARGO_BIN_EXE_fixture");
    let mut command = Command::new(bin);
    command.stdout(Stdio::piped());
    unsafe {
        command.pre_exec(child_traceme);
    }
    let mut child = command.spawn().expect("spawn fixture");
    let pid = Pid::from_raw(child.id() as i32);

    // exec-stop: the kernel SIGTRAPs the tracee the moment PTRACE_TRACEME's
    // execve() lands, before any fixture code has run.
    waitpid(pid, None).expect("wait for exec-stop");

    let mut session = Session::new(pid).expect("session setup (sets trace options)");

    let stdout: ChildStdout = child.stdout.take().expect("piped stdout");
    let mut lines = BufReader::new(stdout).lines();

    // Resume past the exec-stop so the fixture can print its checkpoint
    // addresses and then self-raise SIGSTOP, then catch that stop.
    session.continue_all().expect("continue past exec-stop");
    let report = session.wait_all().expect("wait for self-raised SIGSTOP");
    assert!(!report.is_empty(), "fixture should have stopped itself");

    let header = lines
        .next()
        .expect("fixture stdout closed before printing checkpoints")
        .expect("read checkpoint line");
    let (checkpoint_one, checkpoint_two) = parse_checkpoints(&header);

    let ready = lines.next().expect("missing ready line").expect("read ready line");
    assert_eq!(ready, "fixture: ready");

    Harness {
        session,
        child,
        checkpoint_one,
        checkpoint_two,
    }
}

fn parse_checkpoints(line: &str) -> (u64, u64) {
    // "fixture: checkpoint_one=0x... checkpoint_two=0x..."
    let mut one = None;
    let mut two = None;
    for field in line.split_whitespace() {
        if let Some(hex) = field.strip_prefix("checkpoint_one=0x") {
            one = Some(u64::from_str_radix(hex, 16).unwrap());
        } else if let Some(hex) = field.strip_prefix("checkpoint_two=0x") {
            two = Some(u64::from_str_radix(hex, 16).unwrap());
        }
    }
    (one.expect("checkpoint_one address"), two.expect("checkpoint_two address"))
}

impl Drop for Harness {
    fn drop(&mut self) {
        // Best effort: let the fixture run to completion rather than leave
        // a stopped zombie behind if a test fails partway through.
        let _ = signal::kill(Pid::from_raw(self.child.id() as i32), Signal::SIGKILL);
        let _ = self.child.wait();
    }
}

/// S1 + S2: installing a breakpoint, hitting it, and continuing past it.
#[test]
#[ignore]
fn breakpoint_hit_then_continue_past() {
    let mut h = spawn_fixture();
    let addr = h.checkpoint_one;

    h.session.install_breakpoint(addr).expect("install breakpoint");
    h.session.continue_all().expect("continue to breakpoint");

    let report = h.session.wait_all().expect("wait for breakpoint hit");
    assert_eq!(report.len(), 1, "only the main thread should have stopped");
    let (tid, _status) = report[0];

    let handle = h
        .session
        .thread_handle(tid)
        .expect("tid registered in thread table");
    assert_eq!(handle.borrow().ip(), addr, "IP should be rewound to the breakpoint address");

    // S2: memory at `addr` must read as the original instruction while the
    // tracee is stopped (wait_all's restore-originals phase); the trap
    // byte must not be visible.
    let word = trace_primitives::peek_data(tid, addr).expect("peek at breakpoint address");
    assert_ne!(word & 0xff, 0xcc, "trap byte must not be visible while stopped");

    // Continuing must single-step the thread off the trap and re-patch, so
    // the tracee makes forward progress rather than re-trapping forever.
    h.session.continue_all().expect("continue past breakpoint");
    let report2 = h.session.wait_all().expect("wait for next stop (checkpoint_two or exit)");
    assert!(!report2.is_empty());
}

/// S3: a clone event partway through execution leaves two threads in the
/// thread table once the front end registers the new tid, and a subsequent
/// `wait_all` reports both once they're both stopped.
#[test]
#[ignore]
fn clone_during_run_tracks_both_threads() {
    let mut h = spawn_fixture();
    let main_tid = Pid::from_raw(h.child.id() as i32);

    // Run until the PTRACE_O_TRACECLONE stop fires for the sibling thread
    // the fixture spawns. continue_all/wait_all don't interpret event
    // stops themselves (out of scope for the core); this loop plays the
    // front-end role that job is left to.
    let mut new_tid = None;
    for _ in 0..10 {
        h.session.continue_all().expect("continue");
        let report = h.session.wait_all().expect("wait");
        for (tid, status) in &report {
            if let nix::sys::wait::WaitStatus::PtraceEvent(_, _, event) = status {
                if *event == libc::PTRACE_EVENT_CLONE {
                    let msg = trace_primitives::get_event_msg(*tid).expect("event msg");
                    new_tid = Some(Pid::from_raw(msg as i32));
                }
            }
        }
        if new_tid.is_some() {
            break;
        }
    }
    let sibling_tid = new_tid.expect("fixture's sibling thread should have cloned by now");
    h.session.register_thread(sibling_tid).expect("register cloned thread");

    h.session.continue_all().expect("continue both threads");
    let report = h.session.wait_all().expect("wait for both to stop again");

    assert_eq!(h.session.thread_count(), 2);
    assert!(h.session.thread_state(main_tid).is_some());
    assert!(h.session.thread_state(sibling_tid).is_some());
    // every stopped thread in the table has a coherent (fresh) state
    assert!(report.iter().map(|(tid, _)| tid).any(|&t| t == main_tid || t == sibling_tid));
}

/// S4 (reduced): `max_steps == 0` exhausts the budget immediately, and a
/// step whose wait status shows no instruction-pointer movement (because a
/// concurrently delivered signal interrupted it before it retired) is not
/// counted against the budget. A full hardware-breakpoint rig is out of
/// the core's scope (ptrace HW watchpoints, §1); this exercises the same
/// "absorbed step" path through a racing SIGSTOP instead.
#[test]
#[ignore]
fn step_until_budget_is_not_consumed_by_absorbed_steps() {
    let mut h = spawn_fixture();
    let main_tid = Pid::from_raw(h.child.id() as i32);

    let outcome = h
        .session
        .step_until(main_tid, h.checkpoint_two, 0)
        .expect("step_until with zero budget");
    assert_eq!(outcome, tracecore::StepUntilOutcome::BudgetExhausted);

    // Race a handful of stop-signal deliveries against real single-steps;
    // none of the resulting zero-progress stops should count, so stepping
    // all the way to checkpoint_two should still succeed within a generous
    // budget even with the interference.
    let racer_tid = main_tid;
    let racer = std::thread::spawn(move || {
        for _ in 0..20 {
            let _ = signal::kill(racer_tid, Signal::SIGSTOP);
            std::thread::sleep(Duration::from_micros(200));
        }
    });

    let outcome = h
        .session
        .step_until(main_tid, h.checkpoint_two, 100_000)
        .expect("step_until toward checkpoint_two");
    racer.join().ok();

    assert!(matches!(
        outcome,
        tracecore::StepUntilOutcome::Reached | tracecore::StepUntilOutcome::TraceeGone
    ));
}

/// S5: disabling a breakpoint clears the enabled flag, so `continue_all`'s
/// step-over scan no longer matches it and the tracee runs straight
/// through the address without stopping.
#[test]
#[ignore]
fn disable_then_continue_runs_through() {
    let mut h = spawn_fixture();
    let addr = h.checkpoint_one;

    h.session.install_breakpoint(addr).expect("install");
    h.session.disable_breakpoint(addr).expect("disable");
    h.session.continue_all().expect("continue");

    // Expect the tracee to proceed to its next real stop (checkpoint_two's
    // neighborhood or the fixture's exit), not a trap at checkpoint_one.
    let report = h.session.wait_all().expect("wait past checkpoint_one");
    for (tid, _) in &report {
        if let Some(handle) = h.session.thread_handle(*tid) {
            assert_ne!(handle.borrow().ip(), addr, "disabled breakpoint must not trap");
        }
    }
}

/// S6: a register edit made via the handle `register`/`thread_handle` hands
/// out is visible to the kernel after the next `continue_all`.
#[test]
#[ignore]
fn register_edit_propagates_on_continue() {
    let mut h = spawn_fixture();
    let main_tid = Pid::from_raw(h.child.id() as i32);

    // Redirect execution straight to checkpoint_two by editing the cached
    // bank and letting continue_all's flush phase write it back.
    {
        let handle = h.session.thread_handle(main_tid).expect("registered");
        let mut regs = *handle.borrow();
        regs.set_ip(h.checkpoint_two);
        *handle.borrow_mut() = regs;
    }

    h.session.install_breakpoint(h.checkpoint_two).expect("install at checkpoint_two");
    h.session.continue_all().expect("continue from edited IP");
    let report = h.session.wait_all().expect("wait for the edited thread to stop");

    let (tid, _) = report[0];
    let handle = h.session.thread_handle(tid).expect("registered");
    assert_eq!(handle.borrow().ip(), h.checkpoint_two);
}
