//! Password hashing and comparison helpers

use bcrypt::BcryptError;

/// Default bcrypt cost factor for stored credentials
pub const DEFAULT_BCRYPT_COST: u32 = 10;

/// Hash a password with the given bcrypt cost factor
///
/// The hash is stored in place of the password; verification happens at the
/// transport layer and is out of scope here.
pub fn hash_password(password: &str, cost: u32) -> Result<String, BcryptError> {
    bcrypt::hash(password, cost)
}

/// Constant-time byte comparison, for interactive confirm flows
///
/// Exported for the CLI collaborator, which compares the typed password
/// against its confirmation before calling [`hash_password`]; nothing on
/// the server-side paths in this crate needs it. Compares the full length
/// regardless of where the first mismatch occurs, so the comparison time
/// does not leak the matching prefix length.
pub fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }

    let mut result = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        result |= x ^ y;
    }
    result == 0
}
