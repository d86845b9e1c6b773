//! Leveled diagnostics in the idiom this codebase's task/thread-group
//! bookkeeping has always used: a terse `log!(Level, "fmt", args...)` at the
//! point of interest. The level names below (`LogError`, `LogWarn`, ...) are
//! kept rather than renamed to the `log` crate's own `Level` variants so that
//! call sites elsewhere in the crate don't have to change; they just map onto
//! the facade crate's levels underneath, which gives real filtering
//! (`RUST_LOG`) and module-path tagging instead of a hand-rolled writer.

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum LogLevel {
    LogError,
    LogWarn,
    LogInfo,
    LogDebug,
}

impl LogLevel {
    pub fn to_level(self) -> log::Level {
        match self {
            LogLevel::LogError => log::Level::Error,
            LogLevel::LogWarn => log::Level::Warn,
            LogLevel::LogInfo => log::Level::Info,
            LogLevel::LogDebug => log::Level::Debug,
        }
    }
}

/// `log!(LogDebug, "stepping {} over breakpoint at {:x}", tid, addr)`
#[macro_export]
macro_rules! log {
    ($level:expr, $($arg:tt)+) => {
        ::log::log!($crate::log::LogLevel::to_level($level), $($arg)+)
    };
}

/// A fatal invariant check, in the same spirit as this codebase's
/// `ed_assert!`: it names the offending thread so a panic message is useful
/// without attaching a debugger to the debugger.
#[macro_export]
macro_rules! trace_assert {
    ($cond:expr, $tid:expr) => {
        if !($cond) {
            panic!("[tid {}] assertion failed: {}", $tid, stringify!($cond));
        }
    };
    ($cond:expr, $tid:expr, $($arg:tt)+) => {
        if !($cond) {
            panic!("[tid {}] assertion failed: {}", $tid, format!($($arg)+));
        }
    };
}
