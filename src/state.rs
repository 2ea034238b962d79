use std::sync::atomic::{AtomicU8, Ordering};

/// Lifecycle status shared by rooms, proxies and managers.
/// `Closed` is terminal; nothing transitions out of it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Status {
    Init = 1,
    Running = 2,
    Closed = 3,
    Error = 4,
}

impl Status {
    fn from_u8(v: u8) -> Status {
        match v {
            1 => Status::Init,
            2 => Status::Running,
            3 => Status::Closed,
            _ => Status::Error,
        }
    }
}

#[derive(Debug)]
pub struct StatusMachine {
    status: AtomicU8,
}

impl Default for StatusMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl StatusMachine {
    pub fn new() -> Self {
        StatusMachine {
            status: AtomicU8::new(Status::Init as u8),
        }
    }

    pub fn set_status(&self, s: Status) {
        self.status.store(s as u8, Ordering::SeqCst);
    }

    pub fn status(&self) -> Status {
        Status::from_u8(self.status.load(Ordering::SeqCst))
    }

    pub fn is_status(&self, s: Status) -> bool {
        self.status() == s
    }

    /// Compare-and-set; returns true if the transition happened.
    /// Lets `close()` paths run their side effects exactly once.
    pub fn transition(&self, from: Status, to: Status) -> bool {
        self.status
            .compare_exchange(from as u8, to as u8, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_in_init() {
        let sm = StatusMachine::new();
        assert!(sm.is_status(Status::Init));
    }

    #[test]
    fn transition_is_single_shot() {
        let sm = StatusMachine::new();
        sm.set_status(Status::Running);
        assert!(sm.transition(Status::Running, Status::Closed));
        assert!(!sm.transition(Status::Running, Status::Closed));
        assert!(sm.is_status(Status::Closed));
    }
}
