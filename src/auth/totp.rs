//! TOTP (RFC 6238): HMAC-SHA1 over a 30-second counter, 6 digits,
//! one step of clock tolerance in both directions.

use base32::Alphabet;
use hmac::{Hmac, Mac};
use rand::RngCore;
use sha1::Sha1;

use crate::error::{Error, Result};

const PERIOD_SECONDS: u64 = 30;
const DIGITS: u32 = 6;
const SECRET_BYTES: usize = 20;

/// Generates a fresh base32-encoded shared secret.
pub fn generate_secret() -> String {
    let mut bytes = [0u8; SECRET_BYTES];
    rand::thread_rng().fill_bytes(&mut bytes);
    base32::encode(Alphabet::RFC4648 { padding: false }, &bytes)
}

fn hotp(secret: &str, counter: u64) -> Result<String> {
    let key = base32::decode(Alphabet::RFC4648 { padding: false }, secret)
        .ok_or_else(|| Error::validation("otp_secret", "secret is not valid base32"))?;

    let mut mac = Hmac::<Sha1>::new_from_slice(&key)
        .map_err(|error| Error::validation("otp_secret", error.to_string()))?;
    mac.update(&counter.to_be_bytes());
    let hash = mac.finalize().into_bytes();

    // Dynamic truncation (RFC 4226 §5.3).
    let offset = (hash[hash.len() - 1] & 0x0f) as usize;
    let binary = ((hash[offset] & 0x7f) as u32) << 24
        | (hash[offset + 1] as u32) << 16
        | (hash[offset + 2] as u32) << 8
        | hash[offset + 3] as u32;

    let code = binary % 10_u32.pow(DIGITS);
    Ok(format!("{code:0width$}", width = DIGITS as usize))
}

/// The code for the current time step.
pub fn generate_code(secret: &str) -> Result<String> {
    let now = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|duration| duration.as_secs())
        .unwrap_or_default();
    hotp(secret, now / PERIOD_SECONDS)
}

/// Verifies a submitted code: 6 digits, matching the current step or
/// one step before/after.
pub fn verify_code(secret: &str, code: &str) -> Result<bool> {
    if code.len() != DIGITS as usize || !code.bytes().all(|byte| byte.is_ascii_digit()) {
        return Ok(false);
    }

    let now = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|duration| duration.as_secs())
        .unwrap_or_default();
    let step = now / PERIOD_SECONDS;

    for candidate in [step.saturating_sub(1), step, step + 1] {
        if hotp(secret, candidate)? == code {
            return Ok(true);
        }
    }
    Ok(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_code_verifies() {
        let secret = generate_secret();
        let code = generate_code(&secret).unwrap();
        assert!(verify_code(&secret, &code).unwrap());
    }

    #[test]
    fn malformed_codes_are_rejected_without_hashing() {
        let secret = generate_secret();
        assert!(!verify_code(&secret, "12345").unwrap());
        assert!(!verify_code(&secret, "abcdef").unwrap());
        assert!(!verify_code(&secret, "1234567").unwrap());
    }

    #[test]
    fn wrong_code_fails() {
        let secret = generate_secret();
        let code = generate_code(&secret).unwrap();
        // Flip one digit.
        let wrong: String = code
            .chars()
            .enumerate()
            .map(|(i, c)| if i == 0 { if c == '9' { '0' } else { '9' } } else { c })
            .collect();
        assert!(!verify_code(&secret, &wrong).unwrap());
    }

    #[test]
    fn invalid_secret_errors() {
        assert!(hotp("not-base32!!", 0).is_err());
    }

    #[test]
    fn rfc6238_reference_vector() {
        // RFC 4226 test secret "12345678901234567890", counter 0 → 755224.
        let secret = base32::encode(Alphabet::RFC4648 { padding: false }, b"12345678901234567890");
        assert_eq!(hotp(&secret, 0).unwrap(), "755224");
        assert_eq!(hotp(&secret, 1).unwrap(), "287082");
    }
}
