//! Deterministic random number generation for the traffic simulator.
//!
//! RULE: The simulator never calls a platform RNG. Every draw comes from a
//! `TrafficRng` derived from the run's master seed, one stream per concern,
//! so adding a stream never shifts the draws of existing ones.

use rand::{RngCore, SeedableRng};
use rand_pcg::Pcg64Mcg;
use uuid::Uuid;

/// Stable stream assignments.
/// NEVER reorder or remove entries, only append.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u64)]
pub enum TrafficStream {
    Identity  = 0,
    Cart      = 1,
    Behaviour = 2,
    Checkout  = 3,
}

impl TrafficStream {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Identity  => "identity",
            Self::Cart      => "cart",
            Self::Behaviour => "behaviour",
            Self::Checkout  => "checkout",
        }
    }
}

pub struct TrafficRng {
    pub name: &'static str,
    inner:    Pcg64Mcg,
}

impl TrafficRng {
    pub fn new(master_seed: u64, stream: TrafficStream) -> Self {
        let derived_seed = master_seed ^ (stream as u64).wrapping_mul(0x9e37_79b9_7f4a_7c15);
        Self {
            name:  stream.name(),
            inner: Pcg64Mcg::seed_from_u64(derived_seed),
        }
    }

    /// Roll a float in [0.0, 1.0).
    pub fn next_f64(&mut self) -> f64 {
        let bits = self.inner.next_u64();
        (bits >> 11) as f64 * (1.0 / (1u64 << 53) as f64)
    }

    pub fn next_u64(&mut self) -> u64 {
        self.inner.next_u64()
    }

    /// Roll a u64 in [0, n). `n == 0` is treated as 1.
    pub fn next_u64_below(&mut self, n: u64) -> u64 {
        self.inner.next_u64() % n.max(1)
    }

    /// Bernoulli trial: true with probability `p`.
    pub fn chance(&mut self, p: f64) -> bool {
        self.next_f64() < p
    }

    pub fn pick<'a, T>(&mut self, items: &'a [T]) -> Option<&'a T> {
        if items.is_empty() {
            return None;
        }
        items.get(self.next_u64_below(items.len() as u64) as usize)
    }

    /// A v4-shaped UUID built from this stream's bytes.
    pub fn next_uuid(&mut self) -> Uuid {
        let mut bytes = [0u8; 16];
        self.inner.fill_bytes(&mut bytes);
        uuid::Builder::from_random_bytes(bytes).into_uuid()
    }
}
