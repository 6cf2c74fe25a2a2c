//! Client process liveness probing
//!
//! The server polls client liveness at the end of every call instead of
//! running a monitor thread. The probe is a trait so tests can script a
//! client's death.

use parking_lot::Mutex;
use rustc_hash::FxHashSet;

/// Answers "is this client process still running?"
pub trait ProcessProbe: Send + Sync {
    /// True when the process appears alive
    fn is_alive(&self, pid: u32) -> bool;
}

/// Probe backed by the operating system
#[derive(Debug, Default)]
pub struct LocalProcessProbe;

impl LocalProcessProbe {
    /// New OS-backed probe
    pub fn new() -> Self {
        Self
    }
}

impl ProcessProbe for LocalProcessProbe {
    #[cfg(unix)]
    fn is_alive(&self, pid: u32) -> bool {
        // kill(pid, 0) probes without signaling. EPERM still means alive.
        let rc = unsafe { libc::kill(pid as libc::pid_t, 0) };
        if rc == 0 {
            return true;
        }
        std::io::Error::last_os_error().raw_os_error() == Some(libc::EPERM)
    }

    #[cfg(not(unix))]
    fn is_alive(&self, _pid: u32) -> bool {
        true
    }
}

/// Test probe: every pid is alive until marked dead
#[derive(Debug, Default)]
pub struct ScriptedProbe {
    dead: Mutex<FxHashSet<u32>>,
}

impl ScriptedProbe {
    /// New probe with all pids alive
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark a pid as exited; subsequent probes report it dead
    pub fn mark_dead(&self, pid: u32) {
        self.dead.lock().insert(pid);
    }
}

impl ProcessProbe for ScriptedProbe {
    fn is_alive(&self, pid: u32) -> bool {
        !self.dead.lock().contains(&pid)
    }
}
