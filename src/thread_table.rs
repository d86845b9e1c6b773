//! Thread Table: tracks every thread the control loop knows about, keyed by
//! tid in a hash map rather than a linked list of thread-group entries,
//! since the table is never walked in tid order, so there's nothing a list
//! buys here.
//!
//! Each thread's register bank is handed out as an `Rc<RefCell<Registers>>`:
//! a stable-address handle a caller can hold onto across control-loop calls
//! without the table itself ever reallocating it out from under them, same
//! shape as the `Rc<RefCell<ThreadGroup>>` shared-pointer pattern this
//! codebase already uses for its other long-lived per-thread state.

use crate::registers::Registers;
use nix::unistd::Pid;
use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

pub type RegisterBankHandle = Rc<RefCell<Registers>>;

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum ThreadState {
    Stopped,
    Running,
}

struct ThreadEntry {
    regs: RegisterBankHandle,
    state: ThreadState,
}

#[derive(Default)]
pub struct ThreadTable {
    threads: HashMap<Pid, ThreadEntry>,
}

impl ThreadTable {
    pub fn new() -> Self {
        ThreadTable {
            threads: HashMap::new(),
        }
    }

    /// Insert a new thread, recorded `Stopped` with the given register
    /// snapshot. Re-registering a tid already present replaces its snapshot
    /// and hands back the *same* handle, so existing holders observe the
    /// update rather than going stale.
    pub fn register(&mut self, tid: Pid, regs: Registers) -> RegisterBankHandle {
        if let Some(entry) = self.threads.get(&tid) {
            *entry.regs.borrow_mut() = regs;
            entry.regs.clone()
        } else {
            let handle = Rc::new(RefCell::new(regs));
            self.threads.insert(
                tid,
                ThreadEntry {
                    regs: handle.clone(),
                    state: ThreadState::Stopped,
                },
            );
            handle
        }
    }

    pub fn unregister(&mut self, tid: Pid) -> Option<RegisterBankHandle> {
        self.threads.remove(&tid).map(|e| e.regs)
    }

    pub fn clear(&mut self) {
        self.threads.clear();
    }

    pub fn contains(&self, tid: Pid) -> bool {
        self.threads.contains_key(&tid)
    }

    pub fn len(&self) -> usize {
        self.threads.len()
    }

    pub fn is_empty(&self) -> bool {
        self.threads.is_empty()
    }

    pub fn handle(&self, tid: Pid) -> Option<RegisterBankHandle> {
        self.threads.get(&tid).map(|e| e.regs.clone())
    }

    pub fn state(&self, tid: Pid) -> Option<ThreadState> {
        self.threads.get(&tid).map(|e| e.state)
    }

    pub fn set_state(&mut self, tid: Pid, state: ThreadState) {
        if let Some(entry) = self.threads.get_mut(&tid) {
            entry.state = state;
        }
    }

    /// Tids of every registered thread, snapshotted so a caller can mutate
    /// the table (or issue ptrace calls that might indirectly touch it)
    /// while iterating without a borrow conflict.
    pub fn tids(&self) -> Vec<Pid> {
        self.threads.keys().copied().collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = (Pid, RegisterBankHandle)> + '_ {
        self.threads.iter().map(|(&tid, e)| (tid, e.regs.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registers::RawRegs;

    fn blank_regs() -> Registers {
        Registers::from_raw(unsafe { std::mem::zeroed::<RawRegs>() })
    }

    #[test]
    fn register_is_idempotent_on_tid() {
        let mut tt = ThreadTable::new();
        let tid = Pid::from_raw(123);
        let h1 = tt.register(tid, blank_regs());
        let h2 = tt.register(tid, blank_regs());
        assert!(Rc::ptr_eq(&h1, &h2));
        assert_eq!(tt.len(), 1);
    }

    #[test]
    fn unregister_removes_and_future_lookups_fail() {
        let mut tt = ThreadTable::new();
        let tid = Pid::from_raw(7);
        tt.register(tid, blank_regs());
        assert!(tt.contains(tid));
        tt.unregister(tid);
        assert!(!tt.contains(tid));
        assert!(tt.handle(tid).is_none());
    }

    #[test]
    fn re_register_updates_existing_handle_in_place() {
        let mut tt = ThreadTable::new();
        let tid = Pid::from_raw(55);
        let mut regs = blank_regs();
        regs.set_ip(0x1000);
        let handle = tt.register(tid, regs);

        let mut regs2 = blank_regs();
        regs2.set_ip(0x2000);
        tt.register(tid, regs2);

        assert_eq!(handle.borrow().ip(), 0x2000);
    }
}
