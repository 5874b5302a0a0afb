//! Per-session WebDAV-style credential derivation.
//!
//! Grounded on `original_source/app/services/webdav_service.py`, which
//! derives a per-session password instead of storing one: username is
//! the session id, password is `HMAC-SHA256(SECRET_KEY, session_id)`
//! hex-encoded. The WebDAV bridge itself is out of scope; this is the
//! one surviving piece — an endpoint a file-access client could use to
//! authenticate against that bridge without the server persisting any
//! secret per session.

use hmac::{Hmac, Mac};
use sandterm_types::SessionId;
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

pub fn derive_password(secret_key: &str, session_id: &SessionId) -> String {
    let mut mac =
        HmacSha256::new_from_slice(secret_key.as_bytes()).expect("HMAC accepts keys of any length");
    mac.update(session_id.to_string().as_bytes());
    hex::encode(mac.finalize().into_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derivation_is_deterministic_and_key_dependent() {
        let id = SessionId::new();
        let a = derive_password("secret-a", &id);
        let b = derive_password("secret-a", &id);
        let c = derive_password("secret-b", &id);
        assert_eq!(a, b);
        assert_ne!(a, c);
    }
}
