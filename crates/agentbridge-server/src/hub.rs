//! Connection Hub admission control: the global and per-source-address
//! connection caps checked on WebSocket upgrade, before a reader/writer
//! pair is ever spawned.
//!
//! The actual reader/writer lifecycle lives in [`crate::ws`]; this module
//! only owns the counters, so the accept-path check and the eventual
//! release (on disconnect, via `Drop`) can't drift out of sync.

use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use agentbridge_wire::ErrorCode;

pub struct ConnectionLimiter {
    max_total: usize,
    max_per_ip: usize,
    total: AtomicUsize,
    per_ip: Mutex<HashMap<IpAddr, usize>>,
}

impl ConnectionLimiter {
    pub fn new(max_total: usize, max_per_ip: usize) -> Self {
        Self {
            max_total,
            max_per_ip,
            total: AtomicUsize::new(0),
            per_ip: Mutex::new(HashMap::new()),
        }
    }

    /// Admits one more connection from `addr`, or refuses with
    /// `RESOURCE_LIMIT` if either cap would be exceeded. The returned
    /// [`ConnectionPermit`] releases both counters when dropped, so a
    /// connection that disconnects (cleanly or not) always frees its slot.
    pub fn try_acquire(self: &Arc<Self>, addr: IpAddr) -> Result<ConnectionPermit, ErrorCode> {
        if self.total.load(Ordering::Relaxed) >= self.max_total {
            return Err(ErrorCode::ResourceLimit);
        }
        {
            let mut per_ip = self.per_ip.lock().expect("connection limiter mutex poisoned");
            let count = per_ip.entry(addr).or_insert(0);
            if *count >= self.max_per_ip {
                return Err(ErrorCode::ResourceLimit);
            }
            *count += 1;
        }
        self.total.fetch_add(1, Ordering::Relaxed);
        Ok(ConnectionPermit {
            limiter: self.clone(),
            addr,
        })
    }

    pub fn current_total(&self) -> usize {
        self.total.load(Ordering::Relaxed)
    }

    fn release(&self, addr: IpAddr) {
        self.total.fetch_sub(1, Ordering::Relaxed);
        let mut per_ip = self.per_ip.lock().expect("connection limiter mutex poisoned");
        if let Some(count) = per_ip.get_mut(&addr) {
            *count -= 1;
            if *count == 0 {
                per_ip.remove(&addr);
            }
        }
    }
}

/// Held for the lifetime of one accepted connection. Dropping it (on any
/// disconnect path, clean or not) releases both the global and per-address
/// slot it claimed.
pub struct ConnectionPermit {
    limiter: Arc<ConnectionLimiter>,
    addr: IpAddr,
}

impl Drop for ConnectionPermit {
    fn drop(&mut self) {
        self.limiter.release(self.addr);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn admits_up_to_global_cap_then_refuses() {
        let limiter = Arc::new(ConnectionLimiter::new(2, 10));
        let addr: IpAddr = "127.0.0.1".parse().unwrap();

        let _p1 = limiter.try_acquire(addr).unwrap();
        let _p2 = limiter.try_acquire(addr).unwrap();
        assert!(matches!(limiter.try_acquire(addr), Err(ErrorCode::ResourceLimit)));
    }

    #[test]
    fn per_ip_cap_is_independent_of_global_cap() {
        let limiter = Arc::new(ConnectionLimiter::new(10, 1));
        let a: IpAddr = "127.0.0.1".parse().unwrap();
        let b: IpAddr = "127.0.0.2".parse().unwrap();

        let _pa = limiter.try_acquire(a).unwrap();
        assert!(matches!(limiter.try_acquire(a), Err(ErrorCode::ResourceLimit)));
        // a different address is unaffected by a's cap
        assert!(limiter.try_acquire(b).is_ok());
    }

    #[test]
    fn dropping_a_permit_frees_its_slot() {
        let limiter = Arc::new(ConnectionLimiter::new(1, 1));
        let addr: IpAddr = "127.0.0.1".parse().unwrap();

        {
            let _p1 = limiter.try_acquire(addr).unwrap();
            assert!(limiter.try_acquire(addr).is_err());
        }
        assert!(limiter.try_acquire(addr).is_ok());
    }

    #[test]
    fn current_total_tracks_acquire_and_release() {
        let limiter = Arc::new(ConnectionLimiter::new(10, 10));
        let addr: IpAddr = "127.0.0.1".parse().unwrap();
        assert_eq!(limiter.current_total(), 0);
        let p = limiter.try_acquire(addr).unwrap();
        assert_eq!(limiter.current_total(), 1);
        drop(p);
        assert_eq!(limiter.current_total(), 0);
    }
}
