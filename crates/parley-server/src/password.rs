//! Password hashing and verification.
//!
//! Stored identities carry an Argon2id PHC string; the salt is embedded in
//! it, so one field covers both hash and salt.

use argon2::{
    Argon2, PasswordHash, PasswordHasher, PasswordVerifier,
    password_hash::{SaltString, rand_core::OsRng},
};

/// Hash a password with a fresh random salt.
pub fn hash_password(password: &str) -> Result<String, argon2::password_hash::Error> {
    let salt = SaltString::generate(&mut OsRng);
    Ok(Argon2::default().hash_password(password.as_bytes(), &salt)?.to_string())
}

/// Verify a password against a stored PHC string.
///
/// Returns `Ok(false)` on mismatch and `Err` only if the stored string is not
/// a valid PHC hash.
pub fn verify_password(password: &str, phc: &str) -> Result<bool, argon2::password_hash::Error> {
    let hash = PasswordHash::new(phc)?;
    Ok(Argon2::default().verify_password(password.as_bytes(), &hash).is_ok())
}
