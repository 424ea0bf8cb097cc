//! Challenge-response transform for encrypted DND credentials.
//!
//! The server's `300` challenge is 24 octal digits, three per byte of an
//! 8-byte block. The client encrypts that block with single DES in ECB mode,
//! keyed with the first eight bytes of the password (NUL padded), and
//! answers with the ciphertext in the same octal notation. The transform is
//! fixed by existing servers and must stay bit-exact.
use des::{
    Des,
    cipher::{BlockEncrypt, KeyInit, generic_array::GenericArray},
};
use thiserror::Error;

const BLOCK_SIZE: usize = 8;
const DIGITS_PER_BYTE: usize = 3;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ChallengeError {
    #[error("challenge must be 24 octal digits, got {0}")]
    Length(usize),

    #[error("invalid octal byte '{0}' in challenge")]
    Digit(String),
}

/// Encrypts `challenge` with `password`, returning the `PASE` token.
pub fn encrypt_challenge(challenge: &str, password: &str) -> Result<String, ChallengeError> {
    let mut block = GenericArray::from(decode_octal(challenge)?);

    let mut key = [0u8; BLOCK_SIZE];
    for (slot, byte) in key.iter_mut().zip(password.bytes()) {
        *slot = byte;
    }

    let cipher = Des::new(&GenericArray::from(key));
    cipher.encrypt_block(&mut block);

    Ok(block.iter().map(|b| format!("{b:03o}")).collect())
}

fn decode_octal(challenge: &str) -> Result<[u8; BLOCK_SIZE], ChallengeError> {
    let digits = challenge.trim().as_bytes();
    if digits.len() != BLOCK_SIZE * DIGITS_PER_BYTE {
        return Err(ChallengeError::Length(digits.len()));
    }

    let mut out = [0u8; BLOCK_SIZE];
    for (slot, triple) in out.iter_mut().zip(digits.chunks(DIGITS_PER_BYTE)) {
        let text = String::from_utf8_lossy(triple);
        if !triple.iter().all(|b| (b'0'..=b'7').contains(b)) {
            return Err(ChallengeError::Digit(text.to_string()));
        }
        *slot = u8::from_str_radix(&text, 8).map_err(|_| ChallengeError::Digit(text.to_string()))?;
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    const CHALLENGE: &str = "240147326165005023201134";

    #[test]
    fn reference_vectors() {
        assert_eq!(
            encrypt_challenge(CHALLENGE, "testpass").unwrap(),
            "144167311017116244231155"
        );
        assert_eq!(
            encrypt_challenge(CHALLENGE, "pw").unwrap(),
            "034344236275057273075240"
        );
    }

    #[test]
    fn long_password_is_truncated() {
        let zero = "000000000000000000000000";

        assert_eq!(
            encrypt_challenge(zero, "longpassword").unwrap(),
            "304212304207206133320042"
        );
        assert_eq!(
            encrypt_challenge(zero, "longpassword").unwrap(),
            encrypt_challenge(zero, "longpass").unwrap()
        );
    }

    #[test]
    fn deterministic() {
        assert_eq!(
            encrypt_challenge(CHALLENGE, "secret").unwrap(),
            encrypt_challenge(CHALLENGE, "secret").unwrap()
        );
    }

    #[test]
    fn challenge_must_be_full_block() {
        assert_eq!(
            encrypt_challenge("240147", "testpass"),
            Err(ChallengeError::Length(6))
        );
    }

    #[test]
    fn challenge_digits_must_be_octal_bytes() {
        assert_eq!(
            encrypt_challenge("400147326165005023201134", "testpass"),
            Err(ChallengeError::Digit("400".to_string()))
        );
        assert_eq!(
            encrypt_challenge("290147326165005023201134", "testpass"),
            Err(ChallengeError::Digit("290".to_string()))
        );
    }
}
