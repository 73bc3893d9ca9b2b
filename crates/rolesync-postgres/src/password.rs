//! SCRAM-SHA-256 password verifiers.
//!
//! New principals get a random password that nobody knows; the server only
//! ever sees its verifier, in the format PostgreSQL stores in `pg_authid`:
//!
//! ```text
//! SCRAM-SHA-256$<iterations>:<salt>$<StoredKey>:<ServerKey>
//! ```

use base64::engine::general_purpose::{STANDARD, URL_SAFE_NO_PAD};
use base64::Engine;
use hmac::{Hmac, Mac};
use pbkdf2::pbkdf2_hmac;
use rand::rngs::OsRng;
use rand::RngCore;
use sha2::{Digest, Sha256};

use rolesync_core::error::{SyncError, SyncResult};

type HmacSha256 = Hmac<Sha256>;

/// Iteration count PostgreSQL uses by default (`scram_iterations`).
pub const SCRAM_ITERATIONS: u32 = 4096;

const SALT_LEN: usize = 16;
const PASSWORD_LEN: usize = 24;

fn hmac(key: &[u8], parts: &[&[u8]]) -> SyncResult<[u8; 32]> {
    let mut mac = <HmacSha256 as Mac>::new_from_slice(key)
        .map_err(|e| SyncError::invalid_configuration(format!("HMAC key rejected: {e}")))?;
    for part in parts {
        mac.update(part);
    }
    let mut out = [0u8; 32];
    out.copy_from_slice(&mac.finalize().into_bytes());
    Ok(out)
}

/// Compute the verifier for `password` with an explicit salt.
pub fn scram_sha256_verifier(password: &str, salt: &[u8], iterations: u32) -> SyncResult<String> {
    if iterations == 0 {
        return Err(SyncError::invalid_configuration(
            "SCRAM iteration count must be greater than zero",
        ));
    }

    let mut salted = [0u8; 32];
    pbkdf2_hmac::<Sha256>(password.as_bytes(), salt, iterations, &mut salted);

    let client_key = hmac(&salted, &[&b"Client Key"[..]])?;
    let stored_key = Sha256::digest(client_key);
    let server_key = hmac(&salted, &[&b"Server Key"[..]])?;

    Ok(format!(
        "SCRAM-SHA-256${iterations}:{}${}:{}",
        STANDARD.encode(salt),
        STANDARD.encode(stored_key),
        STANDARD.encode(server_key)
    ))
}

/// Generate a random password.
#[must_use]
pub fn generate_password() -> String {
    let mut bytes = [0u8; PASSWORD_LEN];
    OsRng.fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

/// Verifier for a fresh random password with a random salt.
pub fn random_verifier() -> SyncResult<String> {
    let mut salt = [0u8; SALT_LEN];
    OsRng.fill_bytes(&mut salt);
    scram_sha256_verifier(&generate_password(), &salt, SCRAM_ITERATIONS)
}
