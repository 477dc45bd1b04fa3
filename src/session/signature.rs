//! Signed session cookie codec.
//!
//! The session ID travels as `<name>=s:<id>.<signature>` where the signature
//! is an HMAC-SHA256 of the ID, base64 encoded without padding. The format is
//! the one used by express-session, so cookies can be shared with Node.js
//! services signing with the same secret.

use base64::Engine;
use base64::engine::general_purpose::STANDARD_NO_PAD;
use cookie::Cookie;
use hmac::{Hmac, Mac};
use sha2::Sha256;

use super::cookie::SessionCookie;
use crate::{SecretList, SecretString};

type HmacSha256 = Hmac<Sha256>;

/// Marker prefix of a signed cookie value.
pub const SIGNED_PREFIX: &str = "s:";

/// Signs `value`, returning `{value}.{signature}`.
pub fn sign(value: &str, secret: &SecretString) -> String {
    let mac = mac_for(value, secret);
    format!("{value}.{}", STANDARD_NO_PAD.encode(mac.finalize().into_bytes()))
}

/// Verifies a `{value}.{signature}` string against one secret.
///
/// Returns `None` on a missing separator, undecodable signature or mismatch.
pub fn unsign(signed: &str, secret: &SecretString) -> Option<String> {
    let (value, signature) = signed.rsplit_once('.')?;
    let signature = STANDARD_NO_PAD.decode(signature).ok()?;

    mac_for(value, secret)
        .verify_slice(&signature)
        .ok()
        .map(|()| value.to_owned())
}

/// Verifies against every secret in order. The first match wins.
pub fn unsign_with_any(signed: &str, secrets: &SecretList) -> Option<String> {
    secrets.iter().find_map(|secret| unsign(signed, secret))
}

/// Reads the session ID out of a `Cookie` request header.
///
/// A missing cookie, an unsigned value or a value that fails verification with
/// every secret all yield `None`.
pub fn decode_session_cookie(header: &str, name: &str, secrets: &SecretList) -> Option<String> {
    let raw = Cookie::split_parse_encoded(header)
        .filter_map(Result::ok)
        .find(|cookie| cookie.name() == name)?;

    let Some(signed) = raw.value().strip_prefix(SIGNED_PREFIX) else {
        log::debug!(target: "enclave_session", "msg=\"cookie unsigned\" name=\"{name}\"");
        return None;
    };

    let id = unsign_with_any(signed, secrets);
    if id.is_none() {
        log::warn!(
            target: "enclave_session",
            "msg=\"cookie signature invalid\" cookie_prefix=\"{}...\"",
            signed.chars().take(8).collect::<String>()
        );
    }
    id
}

/// Serializes the signed session cookie into a `Set-Cookie` header value.
///
/// `secure` is the resolved `Secure` attribute for the current request.
pub fn encode_session_cookie(
    name: &str,
    session_id: &str,
    secret: &SecretString,
    attributes: &SessionCookie,
    secure: bool,
) -> String {
    let value = format!("{SIGNED_PREFIX}{}", sign(session_id, secret));

    let mut builder = Cookie::build((name.to_owned(), value))
        .path(attributes.path.clone())
        .http_only(attributes.http_only)
        .secure(secure);

    if let Some(domain) = &attributes.domain {
        builder = builder.domain(domain.clone());
    }
    if let Some(same_site) = attributes.same_site {
        builder = builder.same_site(same_site.into());
    }
    if let Some(expires) = attributes
        .expires
        .and_then(|at| time::OffsetDateTime::from_unix_timestamp(at.timestamp()).ok())
    {
        builder = builder.expires(expires);
    }

    let header = builder.build().encoded().to_string();
    log::debug!(target: "enclave_session", "msg=\"set-cookie\" name=\"{name}\"");
    header
}

fn mac_for(value: &str, secret: &SecretString) -> HmacSha256 {
    // new_from_slice only rejects invalid key lengths and HMAC takes any length
    #[allow(clippy::expect_used)]
    let mut mac = HmacSha256::new_from_slice(secret.expose_secret().as_bytes())
        .expect("HMAC accepts keys of any size");
    mac.update(value.as_bytes());
    mac
}
