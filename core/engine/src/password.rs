//! One-time password generation.

use rand::distributions::Alphanumeric;
use rand::rngs::{OsRng, StdRng};
use rand::{Rng, SeedableRng};
use std::sync::{Arc, Mutex};
use tracing::{debug, warn};

use encryptall_common::{OneTimePassword, UserId};

/// Length of generated one-time passwords.
pub const DEFAULT_PASSWORD_LENGTH: usize = 8;

/// Produces random printable strings.
pub trait RandomGenerator: Send + Sync {
    /// Random string of `length` ASCII letters and digits.
    fn generate(&self, length: usize) -> String;
}

/// Hands out random generators of different strengths.
pub trait RandomSource: Send + Sync {
    /// Generator backed by the operating system, if available.
    fn medium_strength(&self) -> Option<&dyn RandomGenerator>;

    /// Always-available fallback generator.
    fn low_strength(&self) -> &dyn RandomGenerator;
}

struct OsGenerator;

impl RandomGenerator for OsGenerator {
    fn generate(&self, length: usize) -> String {
        let mut rng = OsRng;
        (0..length)
            .map(|_| char::from(rng.sample(Alphanumeric)))
            .collect()
    }
}

struct ThreadGenerator;

impl RandomGenerator for ThreadGenerator {
    fn generate(&self, length: usize) -> String {
        rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(length)
            .map(char::from)
            .collect()
    }
}

/// Operating system randomness with a thread-local fallback.
pub struct SystemRandom {
    medium: OsGenerator,
    low: ThreadGenerator,
}

impl SystemRandom {
    pub fn new() -> Self {
        Self {
            medium: OsGenerator,
            low: ThreadGenerator,
        }
    }
}

impl Default for SystemRandom {
    fn default() -> Self {
        Self::new()
    }
}

impl RandomSource for SystemRandom {
    fn medium_strength(&self) -> Option<&dyn RandomGenerator> {
        Some(&self.medium)
    }

    fn low_strength(&self) -> &dyn RandomGenerator {
        &self.low
    }
}

/// Deterministic source for reproducible runs.
///
/// Successive calls still differ; the same seed yields the same sequence.
pub struct SeededRandom {
    rng: Mutex<StdRng>,
}

impl SeededRandom {
    pub fn new(seed: u64) -> Self {
        Self {
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
        }
    }
}

impl RandomGenerator for SeededRandom {
    fn generate(&self, length: usize) -> String {
        let mut rng = self.rng.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        (0..length)
            .map(|_| char::from(rng.sample(Alphanumeric)))
            .collect()
    }
}

impl RandomSource for SeededRandom {
    fn medium_strength(&self) -> Option<&dyn RandomGenerator> {
        Some(self)
    }

    fn low_strength(&self) -> &dyn RandomGenerator {
        self
    }
}

/// Generates the one-time passwords handed to newly provisioned users.
pub struct PasswordGenerator {
    source: Arc<dyn RandomSource>,
    length: usize,
}

impl PasswordGenerator {
    pub fn new(source: Arc<dyn RandomSource>) -> Self {
        Self::with_length(source, DEFAULT_PASSWORD_LENGTH)
    }

    pub fn with_length(source: Arc<dyn RandomSource>, length: usize) -> Self {
        Self { source, length }
    }

    /// Generate a password for `user`.
    pub fn generate(&self, user: &UserId) -> OneTimePassword {
        let generator = match self.source.medium_strength() {
            Some(generator) => generator,
            None => {
                warn!(user = %user, "Medium strength randomness unavailable, using fallback");
                self.source.low_strength()
            }
        };

        let password = OneTimePassword::new(generator.generate(self.length));
        debug!(user = %user, length = password.len(), "Generated one-time password");
        password
    }
}
