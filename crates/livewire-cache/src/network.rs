//! Network reachability seam used to decide whether a cache miss may fetch.

use std::sync::atomic::{AtomicBool, Ordering};

/// Answers "is the network reachable right now?".
pub trait NetworkStatus: Send + Sync {
    fn is_connected(&self) -> bool;
}

impl<F> NetworkStatus for F
where
    F: Fn() -> bool + Send + Sync,
{
    fn is_connected(&self) -> bool {
        self()
    }
}

/// A settable connectivity flag, fed by a platform reachability callback.
#[derive(Debug)]
pub struct NetworkFlag {
    connected: AtomicBool,
}

impl NetworkFlag {
    pub fn new(connected: bool) -> Self {
        Self {
            connected: AtomicBool::new(connected),
        }
    }

    pub fn set(&self, connected: bool) {
        self.connected.store(connected, Ordering::Release);
    }
}

impl Default for NetworkFlag {
    fn default() -> Self {
        Self::new(true)
    }
}

impl NetworkStatus for NetworkFlag {
    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flag_toggles() {
        let flag = NetworkFlag::default();
        assert!(flag.is_connected());
        flag.set(false);
        assert!(!flag.is_connected());
    }

    #[test]
    fn closures_are_network_status() {
        let offline = || false;
        assert!(!NetworkStatus::is_connected(&offline));
    }
}
