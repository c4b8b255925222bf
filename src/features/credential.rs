use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use hmac::Hmac;
use pbkdf2::pbkdf2;
use rand::Rng;
use sha2::Sha256;
use thiserror::Error;

type HmacSha256 = Hmac<Sha256>;

const KEY_LENGTH: usize = 32;
const SALT_LENGTH: usize = 16;

#[derive(Error, Debug)]
pub enum CredentialError {
    #[error("Malformed credential hash")]
    MalformedHash,

    #[error("Key derivation failed")]
    Derivation,
}

/// Hash a PIN code as `pbkdf2:sha256:<iterations>$<salt>$<hash>`.
///
/// Salt and hash are URL-safe base64 without padding. The code is hashed as
/// given; callers normalize it.
pub fn hash_code(code: &str, iterations: u32) -> Result<String, CredentialError> {
    let mut salt = [0u8; SALT_LENGTH];
    rand::thread_rng().fill(&mut salt);

    let mut key = [0u8; KEY_LENGTH];
    pbkdf2::<HmacSha256>(code.as_bytes(), &salt, iterations, &mut key)
        .map_err(|_| CredentialError::Derivation)?;

    Ok(format!(
        "pbkdf2:sha256:{}${}${}",
        iterations,
        URL_SAFE_NO_PAD.encode(salt),
        URL_SAFE_NO_PAD.encode(key)
    ))
}

/// Check a candidate code against a hash produced by [`hash_code`].
pub fn verify_code(code: &str, stored_hash: &str) -> Result<bool, CredentialError> {
    let mut parts = stored_hash.split('$');
    let (header, salt, hash) = match (parts.next(), parts.next(), parts.next(), parts.next()) {
        (Some(header), Some(salt), Some(hash), None) => (header, salt, hash),
        _ => return Err(CredentialError::MalformedHash),
    };

    let iterations = header
        .strip_prefix("pbkdf2:sha256:")
        .and_then(|n| n.parse::<u32>().ok())
        .ok_or(CredentialError::MalformedHash)?;
    let salt = URL_SAFE_NO_PAD
        .decode(salt)
        .map_err(|_| CredentialError::MalformedHash)?;
    let expected = URL_SAFE_NO_PAD
        .decode(hash)
        .map_err(|_| CredentialError::MalformedHash)?;

    let mut computed = vec![0u8; expected.len()];
    pbkdf2::<HmacSha256>(code.as_bytes(), &salt, iterations, &mut computed)
        .map_err(|_| CredentialError::Derivation)?;

    // Constant-time comparison
    let diff = computed
        .iter()
        .zip(expected.iter())
        .fold(0u8, |acc, (a, b)| acc | (a ^ b));
    Ok(diff == 0 && computed.len() == expected.len())
}
