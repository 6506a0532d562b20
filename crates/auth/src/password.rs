//! Password hashing. Spec names bcrypt explicitly (the teacher uses argon2
//! for its own single-user credential store — see DESIGN.md for why this
//! crate keeps bcrypt instead).

use crate::error::AuthError;

const BCRYPT_COST: u32 = bcrypt::DEFAULT_COST;

pub fn hash_password(password: &str) -> Result<String, AuthError> {
    Ok(bcrypt::hash(password, BCRYPT_COST)?)
}

/// Constant-time comparison is handled internally by `bcrypt::verify`.
pub fn verify_password(password: &str, hash: &str) -> Result<bool, AuthError> {
    Ok(bcrypt::verify(password, hash)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_then_verify_succeeds() {
        let hash = hash_password("correct horse battery staple").unwrap();
        assert!(verify_password("correct horse battery staple", &hash).unwrap());
    }

    #[test]
    fn wrong_password_fails() {
        let hash = hash_password("correct horse battery staple").unwrap();
        assert!(!verify_password("wrong password", &hash).unwrap());
    }
}
