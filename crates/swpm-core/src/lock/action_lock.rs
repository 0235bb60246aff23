//! Per-package mutex preventing concurrent install/uninstall within one
//! process (component C).

use std::collections::HashMap;
use std::sync::Mutex;

/// Process-wide `arn -> action` map guarded by a single mutex.
///
/// This is strictly a fast-path gate used in addition to [`super::FileLocker`]
/// to avoid cross-thread file-lock contention inside a single agent process.
#[derive(Debug, Default)]
pub struct ActionLock {
    held: Mutex<HashMap<String, String>>,
}

impl ActionLock {
    /// Construct an empty lock table.
    pub fn new() -> Self {
        Self { held: Mutex::new(HashMap::new()) }
    }

    /// Attempt to lock `arn` for `action`. Fails if `arn` is already
    /// present, regardless of which action it was locked for.
    pub fn lock_package(&self, arn: &str, action: &str) -> bool {
        let mut held = self.held.lock().expect("action lock mutex poisoned");
        if held.contains_key(arn) {
            return false;
        }
        held.insert(arn.to_string(), action.to_string());
        true
    }

    /// Release `arn`, regardless of who holds it or what action it was
    /// locked for.
    pub fn unlock_package(&self, arn: &str) {
        let mut held = self.held.lock().expect("action lock mutex poisoned");
        held.remove(arn);
    }

    /// The action currently holding `arn`'s lock, if any.
    pub fn current_action(&self, arn: &str) -> Option<String> {
        let held = self.held.lock().expect("action lock mutex poisoned");
        held.get(arn).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn second_lock_on_same_arn_fails() {
        let lock = ActionLock::new();
        assert!(lock.lock_package("SsmTest", "Install"));
        assert!(!lock.lock_package("SsmTest", "Uninstall"));
        assert_eq!(lock.current_action("SsmTest").as_deref(), Some("Install"));
    }

    #[test]
    fn unlock_allows_relock() {
        let lock = ActionLock::new();
        assert!(lock.lock_package("SsmTest", "Install"));
        lock.unlock_package("SsmTest");
        assert!(lock.lock_package("SsmTest", "Uninstall"));
    }

    #[test]
    fn different_arns_do_not_contend() {
        let lock = ActionLock::new();
        assert!(lock.lock_package("A", "Install"));
        assert!(lock.lock_package("B", "Install"));
    }

    #[test]
    fn concurrent_threads_see_exactly_one_winner() {
        let lock = Arc::new(ActionLock::new());
        let mut handles = Vec::new();
        for _ in 0..8 {
            let lock = Arc::clone(&lock);
            handles.push(std::thread::spawn(move || lock.lock_package("SsmTest", "Install")));
        }
        let wins: usize = handles.into_iter().map(|h| h.join().unwrap()).filter(|&won| won).count();
        assert_eq!(wins, 1);
    }
}
