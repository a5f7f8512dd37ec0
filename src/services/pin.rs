use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Algorithm, Argon2, Params, Version,
};

use crate::config::SecuritySettings;
use crate::error::{AppError, Result};

pub const MIN_PIN_LENGTH: usize = 4;
pub const MAX_PIN_LENGTH: usize = 6;

/// Checks that a PIN is 4 to 6 ASCII digits.
pub fn validate_pin_format(pin: &str) -> Result<()> {
    let valid = (MIN_PIN_LENGTH..=MAX_PIN_LENGTH).contains(&pin.len())
        && pin.bytes().all(|b| b.is_ascii_digit());

    if valid {
        Ok(())
    } else {
        Err(AppError::MalformedPin)
    }
}

/// One-way PIN hashing with argon2id. Only the PHC string is ever stored.
#[derive(Clone)]
pub struct PinHasher {
    params: Params,
}

impl std::fmt::Debug for PinHasher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PinHasher")
            .field("m_cost", &self.params.m_cost())
            .field("t_cost", &self.params.t_cost())
            .field("p_cost", &self.params.p_cost())
            .finish()
    }
}

impl PinHasher {
    pub fn new(settings: &SecuritySettings) -> Result<Self> {
        let params = Params::new(
            settings.argon2_memory_kib,
            settings.argon2_iterations,
            settings.argon2_parallelism,
            None,
        )
        .map_err(|e| AppError::Internal(format!("invalid argon2 parameters: {}", e)))?;

        Ok(Self { params })
    }

    fn argon2(&self) -> Argon2<'static> {
        Argon2::new(Algorithm::Argon2id, Version::V0x13, self.params.clone())
    }

    /// Validates the format and returns the PHC hash of `pin`.
    pub fn hash(&self, pin: &str) -> Result<String> {
        validate_pin_format(pin)?;

        let salt = SaltString::generate(&mut OsRng);
        let hash = self
            .argon2()
            .hash_password(pin.as_bytes(), &salt)
            .map_err(|e| AppError::Internal(format!("PIN hashing failed: {}", e)))?
            .to_string();

        Ok(hash)
    }

    /// Verifies `pin` against a stored hash. Fails with `MalformedPin` before touching the hash
    /// and with `InvalidPin` on a mismatch.
    pub fn verify(&self, pin: &str, stored_hash: &str) -> Result<()> {
        validate_pin_format(pin)?;

        let parsed = PasswordHash::new(stored_hash)
            .map_err(|e| AppError::Internal(format!("stored PIN hash is unreadable: {}", e)))?;

        self.argon2()
            .verify_password(pin.as_bytes(), &parsed)
            .map_err(|_| AppError::InvalidPin)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hasher() -> PinHasher {
        PinHasher::new(&SecuritySettings {
            argon2_memory_kib: 1024,
            argon2_iterations: 1,
            argon2_parallelism: 1,
        })
        .unwrap()
    }

    #[test]
    fn test_pin_format() {
        assert!(validate_pin_format("1234").is_ok());
        assert!(validate_pin_format("123456").is_ok());
        assert!(matches!(validate_pin_format("123"), Err(AppError::MalformedPin)));
        assert!(matches!(validate_pin_format("1234567"), Err(AppError::MalformedPin)));
        assert!(matches!(validate_pin_format("12a4"), Err(AppError::MalformedPin)));
        assert!(matches!(validate_pin_format("١٢٣٤"), Err(AppError::MalformedPin)));
    }

    #[test]
    fn test_hash_and_verify() {
        let hasher = hasher();
        let hash = hasher.hash("4321").unwrap();

        assert!(hash.starts_with("$argon2id$"));
        assert!(!hash.contains("4321"));
        assert!(hasher.verify("4321", &hash).is_ok());
        assert!(matches!(hasher.verify("4322", &hash), Err(AppError::InvalidPin)));
    }

    #[test]
    fn test_same_pin_gets_distinct_salts() {
        let hasher = hasher();
        assert_ne!(hasher.hash("0000").unwrap(), hasher.hash("0000").unwrap());
    }

    #[test]
    fn test_rejects_zero_memory_cost() {
        let result = PinHasher::new(&SecuritySettings {
            argon2_memory_kib: 0,
            argon2_iterations: 1,
            argon2_parallelism: 1,
        });
        assert!(result.is_err());
    }
}
