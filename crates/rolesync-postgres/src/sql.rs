//! SQL text helpers.
//!
//! Role names cannot be bound as parameters in DDL, so they are validated
//! and double-quoted. Everything that can be bound is bound.

use sha2::{Digest, Sha256};

use rolesync_core::error::{SyncError, SyncResult};

/// PostgreSQL truncates identifiers longer than this many bytes.
pub const MAX_IDENTIFIER_LEN: usize = 63;

/// SQLSTATE `duplicate_object`.
const DUPLICATE_OBJECT: &str = "42710";

/// Check that a name can be used as a role identifier.
pub fn validate_identifier(identifier: &str) -> SyncResult<()> {
    let reason = if identifier.is_empty() {
        Some("identifier is empty".to_string())
    } else if identifier.len() > MAX_IDENTIFIER_LEN {
        Some(format!(
            "identifier is longer than {MAX_IDENTIFIER_LEN} bytes"
        ))
    } else if identifier.contains('\0') {
        Some("identifier contains a NUL byte".to_string())
    } else if identifier.trim() != identifier {
        Some("identifier has leading or trailing whitespace".to_string())
    } else {
        None
    };

    match reason {
        Some(reason) => Err(SyncError::InvalidIdentifier {
            identifier: identifier.to_string(),
            reason,
        }),
        None => Ok(()),
    }
}

/// Validate and double-quote an identifier.
pub fn quote_identifier(identifier: &str) -> SyncResult<String> {
    validate_identifier(identifier)?;
    Ok(format!("\"{}\"", escape_identifier(identifier)))
}

fn escape_identifier(identifier: &str) -> String {
    identifier.replace('"', "\"\"")
}

/// Single-quote a string literal.
///
/// Assumes `standard_conforming_strings = on` (the default since 9.1).
#[must_use]
pub fn quote_literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

/// Derive an advisory lock key for `(scope, name)`.
///
/// The first eight bytes of `SHA-256("rolesync:{scope}:{name}")`, big-endian.
#[must_use]
pub fn advisory_lock_key(scope: &str, name: &str) -> i64 {
    let digest = Sha256::digest(format!("rolesync:{scope}:{name}").as_bytes());
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&digest[..8]);
    i64::from_be_bytes(bytes)
}

fn sqlstate(error: &sqlx::Error) -> Option<String> {
    error
        .as_database_error()
        .and_then(|e| e.code())
        .map(|code| code.into_owned())
}

/// Whether a statement failed because the object already exists.
#[must_use]
pub fn is_duplicate_object(error: &sqlx::Error) -> bool {
    sqlstate(error).as_deref() == Some(DUPLICATE_OBJECT)
}
