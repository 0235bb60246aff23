//! Process-wide and cross-process mutual exclusion (components B and C).
//!
//! Every state-changing operation on a package must hold both locks before
//! it touches disk: the in-process [`ActionLock`] is a cheap first gate that
//! avoids cross-thread file contention inside one agent process, and the
//! cross-process [`FileLocker`] is the ultimate authority since multiple
//! agent processes (or a process surviving a reboot) may race on the same
//! package.

mod action_lock;
mod file_lock;

pub use action_lock::ActionLock;
pub use file_lock::{FileLocker, LockError};
