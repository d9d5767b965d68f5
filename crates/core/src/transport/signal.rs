use parking_lot::{Condvar, Mutex};

#[derive(Debug)]
struct Flags<T> {
    enabled: bool,
    stopped: bool,
    ticket: Option<T>,
}

/// Enable/stop flags shared between a channel owner and its listener.
///
/// The listener parks in [`wait_enabled`](Self::wait_enabled) while
/// disabled instead of polling, and every state change wakes it. An
/// optional ticket lets the owner tag the work it enabled the listener
/// for (the control channel stores the awaited request there) so that a
/// stale release cannot disable a listener that was re-armed meanwhile.
#[derive(Debug)]
pub struct Signal<T = ()> {
    flags: Mutex<Flags<T>>,
    cond: Condvar,
}

impl<T: Copy + PartialEq> Signal<T> {
    pub fn new() -> Self {
        Self {
            flags: Mutex::new(Flags {
                enabled: false,
                stopped: false,
                ticket: None,
            }),
            cond: Condvar::new(),
        }
    }

    pub fn enable(&self) {
        self.flags.lock().enabled = true;
        self.cond.notify_all();
    }

    pub fn disable(&self) {
        self.flags.lock().enabled = false;
        self.cond.notify_all();
    }

    /// Permanently stop the listener. Idempotent.
    pub fn stop(&self) {
        let mut flags = self.flags.lock();
        flags.stopped = true;
        flags.enabled = false;
        flags.ticket = None;
        drop(flags);
        self.cond.notify_all();
    }

    /// Record `ticket` and enable the listener in one step.
    pub fn arm(&self, ticket: T) {
        let mut flags = self.flags.lock();
        if flags.stopped {
            return;
        }
        flags.ticket = Some(ticket);
        flags.enabled = true;
        drop(flags);
        self.cond.notify_all();
    }

    /// Clear `ticket` and disable, but only if it is still the armed one.
    ///
    /// Returns whether the listener was disabled.
    pub fn release(&self, ticket: T) -> bool {
        let mut flags = self.flags.lock();
        if flags.ticket != Some(ticket) {
            return false;
        }
        flags.ticket = None;
        flags.enabled = false;
        true
    }

    pub fn ticket(&self) -> Option<T> {
        self.flags.lock().ticket
    }

    pub fn is_enabled(&self) -> bool {
        self.flags.lock().enabled
    }

    pub fn is_stopped(&self) -> bool {
        self.flags.lock().stopped
    }

    /// Block until enabled or stopped. Returns `false` once stopped.
    pub fn wait_enabled(&self) -> bool {
        let mut flags = self.flags.lock();
        while !flags.enabled && !flags.stopped {
            self.cond.wait(&mut flags);
        }
        !flags.stopped
    }
}

impl<T: Copy + PartialEq> Default for Signal<T> {
    fn default() -> Self {
        Self::new()
    }
}
