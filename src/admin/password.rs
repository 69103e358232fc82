//! Password hashing seam and server-side password generation.

use anyhow::{Context, Result};
use argon2::{password_hash::SaltString, Argon2, PasswordHasher as _};
use rand::{rngs::OsRng, RngCore};
use secrecy::{ExposeSecret, SecretString};

const GENERATED_LENGTH: usize = 64;
const GENERATED_DIGITS: usize = 10;
const LETTERS: &[u8] = b"abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ";
const DIGITS: &[u8] = b"0123456789";

/// Turns a plaintext password into the stored hash.
pub trait PasswordHasher: Send + Sync {
    /// # Errors
    /// Returns an error if hashing fails.
    fn hash(&self, password: &SecretString) -> Result<String>;
}

/// Argon2id with default parameters and a random salt per hash.
#[derive(Clone, Copy, Debug, Default)]
pub struct Argon2Hasher;

impl PasswordHasher for Argon2Hasher {
    fn hash(&self, password: &SecretString) -> Result<String> {
        let salt = SaltString::generate(&mut OsRng);
        let hash = Argon2::default()
            .hash_password(password.expose_secret().as_bytes(), &salt)
            .map_err(|_| anyhow::anyhow!("failed to hash password"))?
            .to_string();
        Ok(hash)
    }
}

/// Random 64-character password with exactly 10 digits and no symbols.
///
/// Only used to satisfy the non-null password column for users created
/// without one. Never returned to the caller.
///
/// # Errors
/// Returns an error if the OS RNG is unavailable.
pub fn generate_password() -> Result<SecretString> {
    generate_with(&mut OsRng).map(SecretString::from)
}

fn generate_with<R: RngCore + ?Sized>(rng: &mut R) -> Result<String> {
    let mut chars = Vec::with_capacity(GENERATED_LENGTH);
    for _ in 0..GENERATED_DIGITS {
        chars.push(pick(rng, DIGITS)?);
    }
    for _ in GENERATED_DIGITS..GENERATED_LENGTH {
        chars.push(pick(rng, LETTERS)?);
    }

    // Fisher-Yates
    for i in (1..chars.len()).rev() {
        let j = usize::from(uniform(rng, u8::try_from(i + 1).context("index out of range")?)?);
        chars.swap(i, j);
    }

    String::from_utf8(chars).context("generated password is not utf-8")
}

fn pick<R: RngCore + ?Sized>(rng: &mut R, alphabet: &[u8]) -> Result<u8> {
    let bound = u8::try_from(alphabet.len()).context("alphabet too large")?;
    let idx = uniform(rng, bound)?;
    alphabet
        .get(usize::from(idx))
        .copied()
        .context("index outside alphabet")
}

/// Uniform value in `0..bound` by rejection sampling over single bytes.
fn uniform<R: RngCore + ?Sized>(rng: &mut R, bound: u8) -> Result<u8> {
    let bound = u16::from(bound.max(1));
    let limit = 256 - (256 % bound);
    loop {
        let mut byte = [0u8; 1];
        rng.try_fill_bytes(&mut byte)
            .context("failed to read from OS RNG")?;
        let value = u16::from(byte[0]);
        if value < limit {
            return u8::try_from(value % bound).context("value out of range");
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use argon2::{PasswordHash, PasswordVerifier};
    use rand::{rngs::StdRng, SeedableRng};

    #[test]
    fn generated_password_shape() {
        let password = generate_password().unwrap();
        let password = password.expose_secret();
        assert_eq!(password.len(), GENERATED_LENGTH);
        assert_eq!(
            password.chars().filter(char::is_ascii_digit).count(),
            GENERATED_DIGITS
        );
        assert!(password.chars().all(|c| c.is_ascii_alphanumeric()));
    }

    #[test]
    fn generated_passwords_differ() {
        let a = generate_password().unwrap();
        let b = generate_password().unwrap();
        assert_ne!(a.expose_secret(), b.expose_secret());
    }

    #[test]
    fn digits_are_spread_by_shuffle() {
        let mut rng = StdRng::seed_from_u64(7);
        let password = generate_with(&mut rng).unwrap();
        assert!(!password[..GENERATED_DIGITS]
            .chars()
            .all(|ch| ch.is_ascii_digit()));
    }

    #[test]
    fn uniform_stays_in_bounds() {
        let mut rng = StdRng::seed_from_u64(1);
        for bound in [1u8, 2, 10, 52, 255] {
            for _ in 0..200 {
                assert!(uniform(&mut rng, bound).unwrap() < bound);
            }
        }
    }

    #[test]
    fn argon2_hash_verifies() {
        let hash = Argon2Hasher
            .hash(&SecretString::from("correct horse".to_string()))
            .unwrap();
        let parsed = PasswordHash::new(&hash).unwrap();
        assert!(Argon2::default()
            .verify_password(b"correct horse", &parsed)
            .is_ok());
        assert!(Argon2::default()
            .verify_password(b"wrong", &parsed)
            .is_err());
    }
}
