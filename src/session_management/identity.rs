use log::debug;
use rand::rngs::OsRng;
use rand::TryRngCore;

use crate::error_handling::types::IdentityError;

/// Cookie carrying the client id between requests.
pub const CLIENT_COOKIE: &str = "image-scrap-clientid";

/// Value written into the cookie on reset. Never reused as an identity.
pub const RESET_SENTINEL: &str = "rubbish";

/// Header set by a fronting identity proxy for logged-in users.
pub const VERIFIED_IDENTITY_HEADER: &str = "x-authenticated-user";

const CLIENT_ID_BYTES: usize = 16;

/// Picks the client id for a request.
///
/// Precedence: verified identity, then the existing cookie, then a fresh
/// random id.
pub fn resolve_client_id(
    verified: Option<&str>,
    cookie: Option<&str>,
) -> Result<String, IdentityError> {
    if let Some(user) = verified.map(str::trim).filter(|v| !v.is_empty()) {
        debug!("Using verified identity '{}'", user);
        return Ok(user.to_string());
    }
    if let Some(existing) = cookie_identity(cookie) {
        return Ok(existing.to_string());
    }
    generate_client_id()
}

/// The cookie value if it is a usable identity.
pub fn cookie_identity(cookie: Option<&str>) -> Option<&str> {
    cookie
        .map(str::trim)
        .filter(|v| !v.is_empty() && *v != RESET_SENTINEL)
}

/// 16 bytes from the OS CSPRNG, hex encoded.
pub fn generate_client_id() -> Result<String, IdentityError> {
    let mut bytes = [0u8; CLIENT_ID_BYTES];
    OsRng
        .try_fill_bytes(&mut bytes)
        .map_err(|e| IdentityError::Entropy(e.to_string()))?;
    Ok(hex::encode(bytes))
}
