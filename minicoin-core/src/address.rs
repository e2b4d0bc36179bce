//! Address derivation: pubkey -> hash160 pubkey-hash -> base58 address with a
//! 4-byte sha256d checksum.

use ripemd::Ripemd160;
use sha2::{Digest, Sha256};
use std::{error::Error, fmt};

/// Errors produced when decoding an address back to a pubkey-hash.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AddressError {
    /// The address is not valid base58.
    NotBase58,
    /// The decoded payload is too short to carry a checksum.
    TooShort,
    /// The trailing 4 checksum bytes do not match the payload.
    ChecksumMismatch,
}

impl fmt::Display for AddressError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AddressError::NotBase58 => write!(f, "address is not valid base58"),
            AddressError::TooShort => write!(f, "address payload too short"),
            AddressError::ChecksumMismatch => write!(f, "address checksum mismatch"),
        }
    }
}

impl Error for AddressError {}

/// RIPEMD160(SHA256(pubkey)), the 20-byte pubkey-hash locking standard outputs.
pub fn pubkey_hash(pubkey: &[u8]) -> [u8; 20] {
    let sha = Sha256::digest(pubkey);
    Ripemd160::digest(sha).into()
}

/// Encode a pubkey-hash as a base58 address: `base58(hash ‖ sha256d(hash)[..4])`.
pub fn pubkey_hash_to_address(pubkey_hash: &[u8]) -> String {
    let checksum = Sha256::digest(Sha256::digest(pubkey_hash));
    let mut payload = pubkey_hash.to_vec();
    payload.extend_from_slice(&checksum[..4]);
    bs58::encode(payload).into_string()
}

/// Decode a base58 address back to its pubkey-hash, verifying the checksum.
pub fn address_to_pubkey_hash(address: &str) -> Result<Vec<u8>, AddressError> {
    let bytes = bs58::decode(address)
        .into_vec()
        .map_err(|_| AddressError::NotBase58)?;
    if bytes.len() < 4 {
        return Err(AddressError::TooShort);
    }
    let (hash, checksum) = bytes.split_at(bytes.len() - 4);
    let expected = Sha256::digest(Sha256::digest(hash));
    if checksum != &expected[..4] {
        return Err(AddressError::ChecksumMismatch);
    }
    Ok(hash.to_vec())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn address_roundtrip() {
        let hash = pubkey_hash(b"some public key bytes");
        let address = pubkey_hash_to_address(&hash);
        let decoded = address_to_pubkey_hash(&address).unwrap();
        assert_eq!(decoded, hash.to_vec());
    }

    #[test]
    fn pubkey_hash_is_20_bytes() {
        assert_eq!(pubkey_hash(b"x").len(), 20);
    }

    #[test]
    fn rejects_non_base58() {
        // '0', 'O', 'I' and 'l' are outside the base58 alphabet
        assert_eq!(
            address_to_pubkey_hash("0OIl"),
            Err(AddressError::NotBase58)
        );
    }

    #[test]
    fn rejects_corrupted_checksum() {
        let hash = pubkey_hash(b"another key");
        let address = pubkey_hash_to_address(&hash);

        // Flip the last character to another base58 character.
        let mut chars: Vec<char> = address.chars().collect();
        let last = chars.len() - 1;
        chars[last] = if chars[last] == '2' { '3' } else { '2' };
        let tampered: String = chars.into_iter().collect();

        assert_eq!(
            address_to_pubkey_hash(&tampered),
            Err(AddressError::ChecksumMismatch)
        );
    }

    #[test]
    fn rejects_short_payload() {
        let short = bs58::encode([1u8, 2]).into_string();
        assert_eq!(address_to_pubkey_hash(&short), Err(AddressError::TooShort));
    }
}
