//! Signed session cookie handling.
//!
//! The cookie value is `<session id>.<hex HMAC-SHA256(secret, session id)>`.
//! Cookies are issued and cleared with the same attributes: `HttpOnly`,
//! `SameSite=Lax`, `Path=/`, and `Secure` when running in production.

use std::fmt;
use std::time::Duration;

use cookie::{Cookie, SameSite};
use hmac::{Hmac, Mac};
use sha2::Sha256;

use crate::error::SessionError;
use crate::payload::SessionId;

type HmacSha256 = Hmac<Sha256>;

/// Default session cookie name.
pub const DEFAULT_COOKIE_NAME: &str = "storefront.sid";

/// Session cookie settings.
#[derive(Debug, Clone)]
pub struct SessionCookieConfig {
    /// Cookie name.
    pub name: String,
    /// Secret used to sign the session id.
    pub secret: String,
    /// Whether to set the `Secure` attribute.
    pub secure: bool,
    /// Cookie lifetime; also used as the store TTL.
    pub max_age: Duration,
}

impl Default for SessionCookieConfig {
    fn default() -> Self {
        Self {
            name: DEFAULT_COOKIE_NAME.to_string(),
            secret: String::new(),
            secure: false,
            max_age: Duration::from_secs(60 * 60 * 24),
        }
    }
}

/// Issues, verifies and clears signed session cookies.
#[derive(Clone)]
pub struct SessionCookies {
    name: String,
    secure: bool,
    max_age: Duration,
    mac: HmacSha256,
}

impl SessionCookies {
    pub fn new(config: &SessionCookieConfig) -> Result<Self, SessionError> {
        let mac = HmacSha256::new_from_slice(config.secret.as_bytes())
            .map_err(|e| SessionError::InvalidSecret(e.to_string()))?;

        Ok(Self {
            name: config.name.clone(),
            secure: config.secure,
            max_age: config.max_age,
            mac,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn max_age(&self) -> Duration {
        self.max_age
    }

    /// Produces the signed cookie value for a session id.
    pub fn sign(&self, id: &SessionId) -> String {
        let mut mac = self.mac.clone();
        mac.update(id.as_str().as_bytes());
        let signature = hex::encode(mac.finalize().into_bytes());
        format!("{id}.{signature}")
    }

    /// Verifies a signed cookie value and returns the session id it carries.
    pub fn verify(&self, value: &str) -> Option<SessionId> {
        let (raw_id, raw_signature) = value.rsplit_once('.')?;
        let id = SessionId::parse(raw_id)?;
        let signature = hex::decode(raw_signature).ok()?;

        let mut mac = self.mac.clone();
        mac.update(id.as_str().as_bytes());
        mac.verify_slice(&signature).ok()?;
        Some(id)
    }

    /// Extracts a verified session id from a raw `Cookie` request header.
    ///
    /// Cookies with a bad signature are ignored.
    pub fn session_id_from_header(&self, cookie_header: &str) -> Option<SessionId> {
        Cookie::split_parse(cookie_header)
            .filter_map(Result::ok)
            .filter(|cookie| cookie.name() == self.name)
            .find_map(|cookie| self.verify(cookie.value()))
    }

    /// Builds the `Set-Cookie` cookie that issues a session to the client.
    pub fn issue(&self, id: &SessionId) -> Cookie<'static> {
        let max_age = cookie::time::Duration::seconds(self.max_age.as_secs() as i64);

        Cookie::build((self.name.clone(), self.sign(id)))
            .path("/")
            .http_only(true)
            .same_site(SameSite::Lax)
            .secure(self.secure)
            .max_age(max_age)
            .build()
    }

    /// Builds the `Set-Cookie` cookie that clears the session on the client.
    pub fn clear(&self) -> Cookie<'static> {
        let mut cookie = Cookie::build((self.name.clone(), ""))
            .path("/")
            .http_only(true)
            .same_site(SameSite::Lax)
            .secure(self.secure)
            .build();
        cookie.make_removal();
        cookie
    }
}

impl fmt::Debug for SessionCookies {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionCookies")
            .field("name", &self.name)
            .field("secure", &self.secure)
            .field("max_age", &self.max_age)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cookies(secure: bool) -> SessionCookies {
        SessionCookies::new(&SessionCookieConfig {
            secret: "test-secret".into(),
            secure,
            ..Default::default()
        })
        .unwrap()
    }

    #[test]
    fn test_signed_value_verifies() {
        let cookies = cookies(false);
        let id = SessionId::generate();

        let value = cookies.sign(&id);
        assert_eq!(cookies.verify(&value), Some(id));
    }

    #[test]
    fn test_tampered_value_is_rejected() {
        let cookies = cookies(false);
        let id = SessionId::generate();
        let other = SessionId::generate();

        let value = cookies.sign(&id);
        let (_, signature) = value.rsplit_once('.').unwrap();

        assert!(cookies.verify(&format!("{other}.{signature}")).is_none());
        assert!(cookies.verify(id.as_str()).is_none());
        assert!(cookies.verify(&format!("{id}.zz")).is_none());
    }

    #[test]
    fn test_value_signed_with_other_secret_is_rejected() {
        let ours = cookies(false);
        let theirs = SessionCookies::new(&SessionCookieConfig {
            secret: "another-secret".into(),
            ..Default::default()
        })
        .unwrap();

        let id = SessionId::generate();
        assert!(ours.verify(&theirs.sign(&id)).is_none());
    }

    #[test]
    fn test_session_id_from_cookie_header() {
        let cookies = cookies(false);
        let id = SessionId::generate();
        let header = format!("theme=dark; storefront.sid={}; other=1", cookies.sign(&id));

        assert_eq!(cookies.session_id_from_header(&header), Some(id));
        assert!(cookies.session_id_from_header("theme=dark").is_none());
    }

    #[test]
    fn test_issued_cookie_attributes() {
        let cookies = cookies(true);
        let id = SessionId::generate();
        let issued = cookies.issue(&id).to_string();

        assert!(issued.starts_with("storefront.sid="));
        assert!(issued.contains("HttpOnly"));
        assert!(issued.contains("SameSite=Lax"));
        assert!(issued.contains("Secure"));
        assert!(issued.contains("Path=/"));
        assert!(issued.contains("Max-Age=86400"));
    }

    #[test]
    fn test_cleared_cookie_matches_issue_attributes() {
        let cleared = cookies(false).clear().to_string();

        assert!(cleared.starts_with("storefront.sid=;"));
        assert!(cleared.contains("HttpOnly"));
        assert!(cleared.contains("SameSite=Lax"));
        assert!(cleared.contains("Max-Age=0"));
        assert!(!cleared.contains("Secure"));
    }
}
