//! P2PKH-style unlocking: a script-sig is a length-prefixed DER signature
//! followed by a length-prefixed SEC1 uncompressed public key. An output is
//! spendable when the revealed key hashes to the output's script-pub-key and
//! the signature verifies against the spending transaction's hash.

use crate::address::pubkey_hash;
use crate::transaction::Input;
use crate::utxo::Utxo;
use p256::ecdsa::signature::hazmat::PrehashVerifier;
use p256::ecdsa::{Signature, VerifyingKey};
use std::{error::Error, fmt};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScriptError {
    /// The script-sig bytes cannot be split into signature and public key.
    Malformed(&'static str),
    /// The revealed public key does not hash to the output's script-pub-key.
    OwnerMismatch,
    /// The signature does not verify against the transaction hash.
    InvalidSignature,
}

impl fmt::Display for ScriptError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScriptError::Malformed(reason) => write!(f, "malformed script_sig: {}", reason),
            ScriptError::OwnerMismatch => write!(f, "output owner mismatch"),
            ScriptError::InvalidSignature => write!(f, "invalid signature"),
        }
    }
}

impl Error for ScriptError {}

/// Pack a signature and a public key into script-sig bytes. Each part is
/// preceded by its length as a single byte.
pub fn pack_script_sig(signature: &[u8], pubkey: &[u8]) -> Vec<u8> {
    let mut script_sig = Vec::with_capacity(2 + signature.len() + pubkey.len());
    script_sig.push(signature.len() as u8);
    script_sig.extend_from_slice(signature);
    script_sig.push(pubkey.len() as u8);
    script_sig.extend_from_slice(pubkey);
    script_sig
}

/// Split script-sig bytes into `(signature, pubkey)`.
pub fn split_script_sig(script_sig: &[u8]) -> Result<(Vec<u8>, Vec<u8>), ScriptError> {
    if script_sig.len() < 2 {
        return Err(ScriptError::Malformed(
            "too short to contain signature and public key",
        ));
    }

    let sig_len = script_sig[0] as usize;
    let sig_end = 1 + sig_len;
    if script_sig.len() <= sig_end {
        return Err(ScriptError::Malformed("signature overruns buffer"));
    }
    let signature = script_sig[1..sig_end].to_vec();

    let key_len = script_sig[sig_end] as usize;
    let key_end = sig_end + 1 + key_len;
    if script_sig.len() < key_end {
        return Err(ScriptError::Malformed("public key overruns buffer"));
    }
    let pubkey = script_sig[sig_end + 1..key_end].to_vec();

    Ok((signature, pubkey))
}

/// Check that `input` unlocks `utxo` for the transaction committed to by
/// `tx_hash`.
pub fn unlock_utxo(input: &Input, utxo: &Utxo, tx_hash: &[u8]) -> Result<(), ScriptError> {
    let script_sig = hex::decode(&input.script_sig)
        .map_err(|_| ScriptError::Malformed("script_sig is not valid hex"))?;
    let (sig_bytes, pubkey_bytes) = split_script_sig(&script_sig)?;

    let expected_hash = hex::decode(&utxo.script_pub_key)
        .map_err(|_| ScriptError::Malformed("script_pub_key is not valid hex"))?;
    if pubkey_hash(&pubkey_bytes).as_slice() != expected_hash.as_slice() {
        return Err(ScriptError::OwnerMismatch);
    }

    let verifying_key =
        VerifyingKey::from_sec1_bytes(&pubkey_bytes).map_err(|_| ScriptError::InvalidSignature)?;
    let signature =
        Signature::from_der(&sig_bytes).map_err(|_| ScriptError::InvalidSignature)?;
    verifying_key
        .verify_prehash(tx_hash, &signature)
        .map_err(|_| ScriptError::InvalidSignature)
}
