//! Hello credential check.

use secrecy::{ExposeSecret, SecretString};
use sha2::{Digest, Sha256};

/// Whether a hello carrying `sig` may proceed.
///
/// With no secret configured every hello is accepted. Both sides are hashed
/// before comparing so the comparison length never depends on the input.
pub fn verify_hello(secret: Option<&SecretString>, sig: Option<&str>) -> bool {
    let Some(secret) = secret else {
        return true;
    };
    let Some(sig) = sig else {
        return false;
    };
    let expected = Sha256::digest(secret.expose_secret().as_bytes());
    let presented = Sha256::digest(sig.as_bytes());
    expected == presented
}
