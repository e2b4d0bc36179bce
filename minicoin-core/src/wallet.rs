//! A node-side wallet: an ECDSA P-256 keypair, its derived address, and
//! transfer construction against the UTXO set.

use crate::address::{address_to_pubkey_hash, pubkey_hash, pubkey_hash_to_address, AddressError};
use crate::script::pack_script_sig;
use crate::store::ChainStore;
use crate::transaction::Transaction;
use crate::utxo::{resolve_inputs, UtxoError, UtxoSet};
use chrono::Utc;
use p256::ecdsa::signature::hazmat::PrehashSigner;
use p256::ecdsa::{Signature, SigningKey, VerifyingKey};
use rand::rngs::{OsRng, StdRng};
use rand::SeedableRng;
use std::{error::Error, fmt};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WalletError {
    /// Sender and recipient must differ.
    SelfTransfer,
    Address(AddressError),
    Utxo(UtxoError),
    Signing(String),
}

impl fmt::Display for WalletError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WalletError::SelfTransfer => write!(f, "sender and recipient are the same address"),
            WalletError::Address(e) => write!(f, "invalid address: {}", e),
            WalletError::Utxo(e) => write!(f, "{}", e),
            WalletError::Signing(e) => write!(f, "signing failed: {}", e),
        }
    }
}

impl Error for WalletError {}

pub struct Wallet {
    signing_key: SigningKey,
    address: String,
}

impl Wallet {
    /// Generate a wallet from the OS CSPRNG.
    pub fn generate() -> Self {
        Self::from_signing_key(SigningKey::random(&mut OsRng))
    }

    /// Generate a wallet from a seeded PRNG, for reproducible setups.
    pub fn from_seed(seed: u64) -> Self {
        let mut rng = StdRng::seed_from_u64(seed);
        Self::from_signing_key(SigningKey::random(&mut rng))
    }

    fn from_signing_key(signing_key: SigningKey) -> Self {
        let verifying_key = VerifyingKey::from(&signing_key);
        let encoded = verifying_key.to_encoded_point(false);
        let address = pubkey_hash_to_address(&pubkey_hash(encoded.as_bytes()));
        Self {
            signing_key,
            address,
        }
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    /// The 65-byte SEC1 uncompressed encoding of the public key.
    pub fn public_key_bytes(&self) -> Vec<u8> {
        VerifyingKey::from(&self.signing_key)
            .to_encoded_point(false)
            .as_bytes()
            .to_vec()
    }

    /// ASN.1-DER signature over a precomputed 32-byte digest.
    pub fn sign_hash(&self, digest: &[u8; 32]) -> Result<Vec<u8>, WalletError> {
        let signature: Signature = self
            .signing_key
            .sign_prehash(digest)
            .map_err(|e| WalletError::Signing(e.to_string()))?;
        Ok(signature.to_der().as_bytes().to_vec())
    }

    /// Build and sign a transfer of `amount` to `recipient`: select inputs
    /// from this wallet's UTXOs, derive payment and change outputs, hash,
    /// sign, and attach the same script-sig to every input (all inputs are
    /// owned by this wallet).
    pub fn create_transaction<S: ChainStore>(
        &self,
        utxo_set: &UtxoSet<S>,
        recipient: &str,
        amount: u64,
    ) -> Result<Transaction, WalletError> {
        address_to_pubkey_hash(recipient).map_err(WalletError::Address)?;
        if recipient == self.address {
            return Err(WalletError::SelfTransfer);
        }

        let utxos = utxo_set.utxos_for_address(&self.address);
        let inputs = resolve_inputs(&utxos, amount).map_err(WalletError::Utxo)?;
        let outputs = utxo_set
            .derive_outputs(&inputs, amount, recipient, &self.address)
            .map_err(WalletError::Utxo)?;

        let mut tx = Transaction {
            tx_id: String::new(),
            sender: self.address.clone(),
            recipient: recipient.to_string(),
            amount,
            inputs,
            outputs,
            timestamp: Utc::now().to_rfc3339(),
            is_coinbase: false,
        };

        let tx_hash = tx.hash();
        tx.tx_id = hex::encode(tx_hash);

        let signature = self.sign_hash(&tx_hash)?;
        let script_sig = hex::encode(pack_script_sig(&signature, &self.public_key_bytes()));
        for input in &mut tx.inputs {
            input.script_sig = script_sig.clone();
        }

        Ok(tx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::script::unlock_utxo;
    use crate::store::MemStore;
    use std::sync::Arc;

    fn funded_set(owner: &Wallet, values: &[u64]) -> UtxoSet<MemStore> {
        let set = UtxoSet::load(Arc::new(MemStore::new())).unwrap();
        let spk = hex::encode(pubkey_hash(&owner.public_key_bytes()));
        for (i, value) in values.iter().enumerate() {
            set.add_utxo(&hex::encode([i as u8; 32]), 0, *value, &spk);
        }
        set
    }

    #[test]
    fn seeded_wallets_are_reproducible() {
        assert_eq!(Wallet::from_seed(7).address(), Wallet::from_seed(7).address());
        assert_ne!(Wallet::from_seed(7).address(), Wallet::from_seed(8).address());
    }

    #[test]
    fn public_key_is_sec1_uncompressed() {
        let wallet = Wallet::from_seed(1);
        let pubkey = wallet.public_key_bytes();
        assert_eq!(pubkey.len(), 65);
        assert_eq!(pubkey[0], 0x04);
    }

    #[test]
    fn address_decodes_back_to_pubkey_hash() {
        let wallet = Wallet::from_seed(1);
        let hash = address_to_pubkey_hash(wallet.address()).unwrap();
        assert_eq!(hash, pubkey_hash(&wallet.public_key_bytes()).to_vec());
    }

    #[test]
    fn created_transaction_unlocks_its_inputs() {
        let sender = Wallet::from_seed(1);
        let recipient = Wallet::from_seed(2);
        let set = funded_set(&sender, &[6, 6]);

        let tx = sender
            .create_transaction(&set, recipient.address(), 5)
            .unwrap();

        assert_eq!(tx.sender, sender.address());
        assert_eq!(tx.recipient, recipient.address());
        assert_eq!(tx.tx_id, hex::encode(tx.hash()));
        assert!(tx.is_valid());

        // Every input carries the same script-sig and unlocks its UTXO.
        let tx_hash = tx.hash();
        for input in &tx.inputs {
            let utxo = set.get_utxo(&input.prev_tx_id, input.output_index).unwrap();
            unlock_utxo(input, &utxo, &tx_hash).unwrap();
        }

        // Input total covers the amount; outputs conserve the input total.
        let in_total: u64 = tx
            .inputs
            .iter()
            .map(|i| set.get_utxo(&i.prev_tx_id, i.output_index).unwrap().value)
            .sum();
        let out_total: u64 = tx.outputs.iter().map(|o| o.value).sum();
        assert_eq!(in_total, out_total);
        assert!(in_total >= tx.amount);
    }

    #[test]
    fn create_rejects_insufficient_funds() {
        let sender = Wallet::from_seed(1);
        let recipient = Wallet::from_seed(2);
        let set = funded_set(&sender, &[2]);
        assert!(matches!(
            sender.create_transaction(&set, recipient.address(), 10),
            Err(WalletError::Utxo(UtxoError::InsufficientFunds { .. }))
        ));
    }

    #[test]
    fn create_rejects_self_transfer() {
        let sender = Wallet::from_seed(1);
        let set = funded_set(&sender, &[6]);
        assert_eq!(
            sender.create_transaction(&set, sender.address(), 1),
            Err(WalletError::SelfTransfer)
        );
    }

    #[test]
    fn create_rejects_bad_recipient() {
        let sender = Wallet::from_seed(1);
        let set = funded_set(&sender, &[6]);
        assert!(matches!(
            sender.create_transaction(&set, "0OIl", 1),
            Err(WalletError::Address(_))
        ));
    }
}
