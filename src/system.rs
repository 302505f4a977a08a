//! Host capabilities the embedder can swap out: clocks, randomness, user
//! identity. Defaults reach for the real system; deterministic doubles are
//! provided for tests and reproducible runs.

use std::fmt;
use std::io;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Instant, SystemTime, UNIX_EPOCH};

/// Wall-clock source backing `runtime.walltime`.
pub trait WallClock: Send + Sync + fmt::Debug {
    /// Seconds and nanoseconds since the Unix epoch.
    fn now(&self) -> (i64, i32);
}

/// Monotonic source backing `runtime.nanotime1`.
pub trait MonotonicClock: Send + Sync + fmt::Debug {
    fn nanotime(&self) -> i64;
}

/// Randomness source backing `runtime.getRandomData` and
/// `crypto.getRandomValues`. Must fill the whole buffer; short fills are
/// fatal to the guest.
pub trait RandomSource: Send + Sync + fmt::Debug {
    fn fill(&self, buf: &mut [u8]) -> io::Result<()>;
}

/// System clock, anchored at construction for the monotonic reading.
#[derive(Debug)]
pub struct SystemClock {
    origin: Instant,
}

impl SystemClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl WallClock for SystemClock {
    fn now(&self) -> (i64, i32) {
        match SystemTime::now().duration_since(UNIX_EPOCH) {
            Ok(d) => (d.as_secs() as i64, d.subsec_nanos() as i32),
            Err(_) => (0, 0),
        }
    }
}

impl MonotonicClock for SystemClock {
    fn nanotime(&self) -> i64 {
        self.origin.elapsed().as_nanos() as i64
    }
}

/// OS randomness via `getrandom`.
#[derive(Debug, Default)]
pub struct SystemRandom;

impl RandomSource for SystemRandom {
    fn fill(&self, buf: &mut [u8]) -> io::Result<()> {
        getrandom::getrandom(buf).map_err(|err| {
            io::Error::new(io::ErrorKind::Other, format!("getrandom failed: {err}"))
        })
    }
}

/// Deterministic xorshift64* stream for reproducible guest runs.
#[derive(Debug)]
pub struct SeededRandom {
    state: AtomicU64,
}

impl SeededRandom {
    pub fn new(seed: u64) -> Self {
        Self {
            // A zero state would be a fixed point of the generator.
            state: AtomicU64::new(seed | 1),
        }
    }

    fn next(&self) -> u64 {
        let mut x = self.state.load(Ordering::Relaxed);
        x ^= x >> 12;
        x ^= x << 25;
        x ^= x >> 27;
        self.state.store(x, Ordering::Relaxed);
        x.wrapping_mul(0x2545_F491_4F6C_DD1D)
    }
}

impl RandomSource for SeededRandom {
    fn fill(&self, buf: &mut [u8]) -> io::Result<()> {
        for chunk in buf.chunks_mut(8) {
            let bytes = self.next().to_le_bytes();
            chunk.copy_from_slice(&bytes[..chunk.len()]);
        }
        Ok(())
    }
}

/// Fixed clock for tests.
#[derive(Debug, Clone, Copy)]
pub struct FixedClock {
    pub sec: i64,
    pub nsec: i32,
}

impl WallClock for FixedClock {
    fn now(&self) -> (i64, i32) {
        (self.sec, self.nsec)
    }
}

impl MonotonicClock for FixedClock {
    fn nanotime(&self) -> i64 {
        self.sec * 1_000_000_000 + self.nsec as i64
    }
}

/// The identity `process.getuid` and friends report to the guest.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UserIdentity {
    pub uid: u32,
    pub gid: u32,
    pub euid: u32,
    pub groups: Vec<u32>,
}

impl UserIdentity {
    /// The identity of the embedding process.
    #[cfg(unix)]
    pub fn host() -> Self {
        // SAFETY: these libc calls read process credentials and cannot fail.
        let (uid, gid, euid) = unsafe { (libc::getuid(), libc::getgid(), libc::geteuid()) };
        let mut groups = vec![0 as libc::gid_t; 64];
        let n = unsafe { libc::getgroups(groups.len() as libc::c_int, groups.as_mut_ptr()) };
        groups.truncate(n.max(0) as usize);
        Self {
            uid,
            gid,
            euid,
            groups: groups.into_iter().map(|g| g as u32).collect(),
        }
    }

    #[cfg(not(unix))]
    pub fn host() -> Self {
        Self::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seeded_random_is_repeatable() {
        let a = SeededRandom::new(7);
        let b = SeededRandom::new(7);
        let mut x = [0u8; 13];
        let mut y = [0u8; 13];
        a.fill(&mut x).unwrap();
        b.fill(&mut y).unwrap();
        assert_eq!(x, y);

        let mut z = [0u8; 13];
        a.fill(&mut z).unwrap();
        assert_ne!(x, z);
    }

    #[test]
    fn fixed_clock_reports_what_it_was_given() {
        let clock = FixedClock { sec: 5, nsec: 250 };
        assert_eq!(clock.now(), (5, 250));
        assert_eq!(clock.nanotime(), 5_000_000_250);
    }
}
