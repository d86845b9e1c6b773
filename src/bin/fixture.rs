//! A tiny tracee used by the integration tests in `tests/scenarios.rs`.
//! Not part of the tracing core itself; it plays the "debuggee" role the
//! same way the `deet`/`allocscope` corpus fixtures do: a handful of
//! distinguishable, non-inlinable call sites a test can set a breakpoint on
//! and a predictable amount of busy-work around them so a test can assert
//! on how many times a breakpoint was actually hit.

use std::hint::black_box;
use std::io::Write;

#[inline(never)]
fn checkpoint_one() -> u64 {
    black_box(1)
}

#[inline(never)]
fn checkpoint_two() -> u64 {
    black_box(2)
}

#[inline(never)]
fn spin(iterations: u64) -> u64 {
    let mut acc = 0u64;
    for i in 0..iterations {
        acc = acc.wrapping_add(black_box(i));
    }
    acc
}

fn main() {
    // The test harness has no symbol/DWARF resolver available (out of
    // scope for the core itself), so the fixture reports its own
    // checkpoints' runtime addresses on stdout rather than the harness
    // guessing them.
    println!(
        "fixture: checkpoint_one={:#x} checkpoint_two={:#x}",
        checkpoint_one as usize, checkpoint_two as usize
    );
    println!("fixture: ready");
    std::io::stdout().flush().ok();

    // Park here under a self-raised SIGSTOP so the tracer can install
    // breakpoints with nothing racing it, then `continue_all` resumes us
    // into the checkpoints below.
    unsafe {
        libc::raise(libc::SIGSTOP);
    }

    // A second thread gives the clone-event scenario (S3) something to
    // observe: a real `clone(2)` the tracer's PTRACE_O_TRACECLONE option
    // will report. It does its own busy-work independent of the main
    // thread's checkpoints.
    let sibling = std::thread::spawn(|| {
        let mut acc = 0u64;
        for i in 0..200_000u64 {
            acc = acc.wrapping_add(black_box(i));
        }
        acc
    });

    let mut total = 0u64;
    total = total.wrapping_add(checkpoint_one());
    total = total.wrapping_add(spin(1_000));
    total = total.wrapping_add(checkpoint_two());
    total = total.wrapping_add(spin(1_000));

    total = total.wrapping_add(sibling.join().unwrap_or(0));
    println!("fixture: done {}", total);
}
