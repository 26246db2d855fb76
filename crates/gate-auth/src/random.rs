//! Operating-system randomness

use gate_core::traits::RandomSource;
use rand::RngCore;

/// CSPRNG backed by the thread-local generator, which is seeded from the OS
#[derive(Debug, Default, Clone, Copy)]
pub struct OsRandom;

impl RandomSource for OsRandom {
    fn fill_bytes(&self, dest: &mut [u8]) {
        rand::rng().fill_bytes(dest);
    }
}
