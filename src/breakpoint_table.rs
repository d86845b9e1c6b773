//! Breakpoint Table: one record per patched address, keyed by address in a
//! hash map rather than a walked list, since breakpoints are looked up by
//! address on every `continue_all`/`wait_all` pass instead of walked in
//! insertion order.

use crate::arch::install_patch;
use crate::error::CoreError;
use crate::trace_primitives;
use nix::unistd::Pid;
use std::collections::HashMap;

#[derive(Clone, Copy, Debug)]
pub struct BreakpointRecord {
    pub address: u64,
    /// Captured exactly once, when the record is first created. Re-enabling
    /// a disabled breakpoint never re-reads it from what may by then be a
    /// patched memory location.
    pub original_word: u64,
    pub patched_word: u64,
    pub enabled: bool,
}

#[derive(Default)]
pub struct BreakpointTable {
    breakpoints: HashMap<u64, BreakpointRecord>,
}

impl BreakpointTable {
    pub fn new() -> Self {
        BreakpointTable {
            breakpoints: HashMap::new(),
        }
    }

    /// Patch `address` in `pid`'s memory and mark it enabled. If a record
    /// already exists (possibly disabled), its stored original/patched
    /// words are reused and only its `enabled` flag changes; a genuinely
    /// new address is read once, patched, and recorded.
    pub fn install(
        &mut self,
        pid: Pid,
        address: u64,
    ) -> Result<(), CoreError> {
        if let Some(bp) = self.breakpoints.get_mut(&address) {
            trace_primitives::poke_data(pid, address, bp.patched_word)?;
            bp.enabled = true;
            return Ok(());
        }

        let original_word = trace_primitives::peek_data(pid, address)?;
        let patched_word = install_patch(original_word);
        trace_primitives::poke_data(pid, address, patched_word)?;
        self.breakpoints.insert(
            address,
            BreakpointRecord {
                address,
                original_word,
                patched_word,
                enabled: true,
            },
        );
        Ok(())
    }

    /// Write the patched word back (an open question in the design notes:
    /// a disabled breakpoint still leaves the trap byte resident in tracee
    /// memory; it's `wait_all`'s restore-originals pass, not `disable`
    /// itself, that makes a stopped thread see real code). Only the
    /// `enabled` flag distinguishes "armed" from "disabled" going forward.
    pub fn disable(&mut self, pid: Pid, address: u64) -> Result<(), CoreError> {
        if let Some(bp) = self.breakpoints.get_mut(&address) {
            trace_primitives::poke_data(pid, address, bp.patched_word)?;
            bp.enabled = false;
        }
        Ok(())
    }

    pub fn remove(&mut self, address: u64) -> Option<BreakpointRecord> {
        self.breakpoints.remove(&address)
    }

    pub fn clear(&mut self) {
        self.breakpoints.clear();
    }

    pub fn get(&self, address: u64) -> Option<&BreakpointRecord> {
        self.breakpoints.get(&address)
    }

    pub fn is_enabled_at(&self, address: u64) -> bool {
        self.breakpoints
            .get(&address)
            .map(|bp| bp.enabled)
            .unwrap_or(false)
    }

    pub fn iter(&self) -> impl Iterator<Item = &BreakpointRecord> {
        self.breakpoints.values()
    }

    pub fn len(&self) -> usize {
        self.breakpoints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.breakpoints.is_empty()
    }
}
