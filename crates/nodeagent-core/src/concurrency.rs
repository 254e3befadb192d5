use crate::CoreError;
use fs2::FileExt;
use std::fs::{File, OpenOptions};
use std::path::Path;
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

/// Exclusive process lock: at most one agent converges a node at a time.
pub struct AgentLock {
    lock_file: File,
}

impl AgentLock {
    fn open(lock_path: &Path) -> Result<File, CoreError> {
        if let Some(parent) = lock_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        Ok(OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(false)
            .open(lock_path)?)
    }

    /// Take the lock, or fail with `CoreError::Locked` if another process
    /// holds it.
    pub fn try_acquire(lock_path: &Path) -> Result<Self, CoreError> {
        let file = Self::open(lock_path)?;
        match file.try_lock_exclusive() {
            Ok(()) => Ok(Self { lock_file: file }),
            Err(_) => Err(CoreError::Locked(lock_path.display().to_string())),
        }
    }
}

impl Drop for AgentLock {
    fn drop(&mut self) {
        let _ = self.lock_file.unlock();
    }
}

/// Cooperative shutdown flag shared by the engine, the node watcher, and the
/// work queue. Cloning shares the flag.
#[derive(Debug, Clone, Default)]
pub struct ShutdownSignal {
    inner: Arc<(Mutex<bool>, Condvar)>,
}

impl ShutdownSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn request(&self) {
        let (flag, cvar) = &*self.inner;
        if let Ok(mut requested) = flag.lock() {
            *requested = true;
        }
        cvar.notify_all();
    }

    pub fn is_requested(&self) -> bool {
        self.inner.0.lock().map(|r| *r).unwrap_or(true)
    }

    /// Sleep for up to `timeout`, waking early on shutdown. Returns whether
    /// shutdown was requested.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let (flag, cvar) = &*self.inner;
        let Ok(mut requested) = flag.lock() else {
            return true;
        };
        while !*requested {
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            match cvar.wait_timeout(requested, deadline - now) {
                Ok((guard, _)) => requested = guard,
                Err(_) => return true,
            }
        }
        *requested
    }
}

/// Route SIGINT/SIGTERM to `signal`. A second signal exits immediately.
pub fn install_signal_handler(signal: &ShutdownSignal) {
    let signal = signal.clone();
    let _ = ctrlc::set_handler(move || {
        if signal.is_requested() {
            std::process::exit(1);
        }
        tracing::info!("shutdown requested, finishing current operation");
        signal.request();
    });
}
