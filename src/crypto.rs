use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use rand::RngCore;

/// Number of random bytes behind a generated session ID.
pub const SESSION_ID_BYTES: usize = 24;

/// Generates a cryptographically secure session ID.
///
/// The ID is [`SESSION_ID_BYTES`] random bytes encoded as unpadded URL-safe
/// base64, so it is safe to place in cookies and URLs without escaping.
///
/// ```rust
/// use enclave_session::crypto::generate_session_id;
///
/// let id = generate_session_id();
/// assert_eq!(id.len(), 32);
/// ```
pub fn generate_session_id() -> String {
    generate_id(SESSION_ID_BYTES)
}

/// Generates a URL-safe random ID from `bytes` random bytes.
pub fn generate_id(bytes: usize) -> String {
    let mut buf = vec![0u8; bytes];
    rand::thread_rng().fill_bytes(&mut buf);
    URL_SAFE_NO_PAD.encode(buf)
}
