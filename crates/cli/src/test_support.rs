//! Serialized, self-restoring environment access for tests.

use parking_lot::Mutex;

static ENV_LOCK: Mutex<()> = parking_lot::const_mutex(());

/// Variables a test may touch; their values are restored afterwards.
const TRACKED: &[&str] = &[
    "HOME",
    "NEXUS_PASSPHRASE",
    "NEXUS_USER",
    "NEXUS_AVATAR",
    "NEXUS_ROOM",
    "NEXUS_BROKER_HOST",
    "NEXUS_BROKER_PORT",
    "NEXUS_STORAGE",
    "NEXUS_INVITE",
];

struct Restore(Vec<(&'static str, Option<String>)>);

impl Drop for Restore {
    fn drop(&mut self) {
        for (key, value) in &self.0 {
            match value {
                Some(value) => set_env_var(key, value),
                None => remove_env_var(key),
            }
        }
    }
}

/// Runs `run` while holding the environment lock, then restores every
/// tracked variable, even if `run` panics.
pub(crate) fn with_locked_env<R>(run: impl FnOnce() -> R) -> R {
    let _guard = ENV_LOCK.lock();
    let _restore = Restore(
        TRACKED
            .iter()
            .map(|key| (*key, std::env::var(key).ok()))
            .collect(),
    );
    run()
}

/// Set an environment variable in test contexts.
///
/// # Safety
/// Call sites must hold `with_locked_env` so parallel tests never race.
pub(crate) fn set_env_var(key: &str, value: &str) {
    // SAFETY: serialized by ENV_LOCK.
    unsafe {
        std::env::set_var(key, value);
    }
}

/// Remove an environment variable in test contexts.
///
/// # Safety
/// Call sites must hold `with_locked_env` so parallel tests never race.
pub(crate) fn remove_env_var(key: &str) {
    // SAFETY: serialized by ENV_LOCK.
    unsafe {
        std::env::remove_var(key);
    }
}
