use std::fmt;

use bytes::Bytes;
use sha2::{Digest, Sha256};

use crate::error::CryptoError;
use crate::scanning::domain::crypto::ScanCrypto;
use crate::scanning::domain::keystream::Keystream;
use crate::scanning::types::{EpochKey, OwnedOutput, SearchKey, TxOutRecord};

/// Only epoch key version the simulation understands.
pub const SIM_KEY_VERSION: u32 = 1;

const EPOCH_PUBKEY_LEN: usize = 32;
const SEARCH_KEY_LEN: usize = 16;

/// Keystream where output `i` is `SHA-256(seed || i)` truncated to 16 bytes.
#[derive(Clone)]
pub struct Sha256Keystream {
    seed: [u8; 32],
    index: u64,
}

impl Sha256Keystream {
    fn new(secret: &[u8; 32], epoch_key: &EpochKey) -> Self {
        let seed = Sha256::new()
            .chain_update(secret)
            .chain_update(&epoch_key.pubkey)
            .chain_update(epoch_key.version.to_le_bytes())
            .finalize()
            .into();
        Self { seed, index: 0 }
    }

    fn output_at(&self, index: u64) -> SearchKey {
        let digest = Sha256::new()
            .chain_update(self.seed)
            .chain_update(index.to_le_bytes())
            .finalize();
        SearchKey::new(Bytes::copy_from_slice(&digest[..SEARCH_KEY_LEN]))
    }
}

impl Keystream for Sha256Keystream {
    fn output_size(&self) -> usize {
        SEARCH_KEY_LEN
    }

    fn index(&self) -> u64 {
        self.index
    }

    fn peek(&self) -> SearchKey {
        self.output_at(self.index)
    }

    fn advance(&mut self) -> SearchKey {
        let output = self.peek();
        self.index += 1;
        output
    }

    fn clone_box(&self) -> Box<dyn Keystream> {
        Box::new(self.clone())
    }
}

/// Simulated account holding a 32-byte secret.
///
/// Records are "sealed" as plain JSON. Ownership is a keyed hash of the
/// output's public key, and values are masked with another one.
#[derive(Clone)]
pub struct SimAccount {
    secret: [u8; 32],
}

impl SimAccount {
    pub fn from_seed(seed: u64) -> Self {
        let secret = Sha256::new()
            .chain_update(b"sim-account")
            .chain_update(seed.to_le_bytes())
            .finalize()
            .into();
        Self { secret }
    }

    /// The `index`-th search key this account derives for `epoch_key`.
    pub fn search_key(&self, epoch_key: &EpochKey, index: u64) -> SearchKey {
        Sha256Keystream::new(&self.secret, epoch_key).output_at(index)
    }

    /// Builds a record owned by this account.
    pub fn make_record(&self, block_index: u64, global_index: u64, value: u64) -> TxOutRecord {
        let public_key = Bytes::copy_from_slice(
            &Sha256::new()
                .chain_update(b"sim-txout")
                .chain_update(global_index.to_le_bytes())
                .finalize(),
        );
        TxOutRecord {
            block_index,
            global_index,
            target_key: self.target_key(&public_key),
            masked_value: value ^ self.value_mask(&public_key),
            public_key,
        }
    }

    /// Serializes a record into the ciphertext a view service returns.
    pub fn seal(&self, record: &TxOutRecord) -> Bytes {
        // A struct of integers and byte strings always serializes.
        Bytes::from(serde_json::to_vec(record).unwrap_or_default())
    }

    fn target_key(&self, public_key: &[u8]) -> Bytes {
        Bytes::copy_from_slice(
            &Sha256::new()
                .chain_update(b"sim-target")
                .chain_update(self.secret)
                .chain_update(public_key)
                .finalize(),
        )
    }

    fn value_mask(&self, public_key: &[u8]) -> u64 {
        let digest = Sha256::new()
            .chain_update(b"sim-value-mask")
            .chain_update(self.secret)
            .chain_update(public_key)
            .finalize();
        let mut mask = [0u8; 8];
        mask.copy_from_slice(&digest[..8]);
        u64::from_le_bytes(mask)
    }
}

impl fmt::Debug for SimAccount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SimAccount").finish_non_exhaustive()
    }
}

impl ScanCrypto for SimAccount {
    fn derive_keystream(&self, epoch_key: &EpochKey) -> Result<Box<dyn Keystream>, CryptoError> {
        if epoch_key.version != SIM_KEY_VERSION {
            return Err(CryptoError::UnsupportedVersion(format!(
                "epoch key version {}",
                epoch_key.version
            )));
        }
        if epoch_key.pubkey.len() != EPOCH_PUBKEY_LEN {
            return Err(CryptoError::InvalidKey(format!(
                "epoch pubkey is {} bytes, expected {}",
                epoch_key.pubkey.len(),
                EPOCH_PUBKEY_LEN
            )));
        }
        Ok(Box::new(Sha256Keystream::new(&self.secret, epoch_key)))
    }

    fn decrypt(&self, ciphertext: &[u8]) -> Result<TxOutRecord, CryptoError> {
        serde_json::from_slice(ciphertext).map_err(|e| CryptoError::InvalidInput(e.to_string()))
    }

    fn owned_output(&self, record: &TxOutRecord) -> Option<OwnedOutput> {
        if record.target_key != self.target_key(&record.public_key) {
            return None;
        }
        Some(OwnedOutput {
            block_index: record.block_index,
            global_index: record.global_index,
            public_key: record.public_key.clone(),
            value: record.masked_value ^ self.value_mask(&record.public_key),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn epoch_key(byte: u8) -> EpochKey {
        EpochKey {
            pubkey: Bytes::from(vec![byte; 32]),
            version: SIM_KEY_VERSION,
        }
    }

    #[test]
    fn keystream_matches_search_key() {
        let account = SimAccount::from_seed(1);
        let mut ks = account.derive_keystream(&epoch_key(4)).unwrap();

        assert_eq!(ks.output_size(), 16);
        assert_eq!(ks.advance(), account.search_key(&epoch_key(4), 0));
        assert_eq!(ks.peek(), account.search_key(&epoch_key(4), 1));
    }

    #[test]
    fn streams_differ_per_account_and_epoch() {
        let a = SimAccount::from_seed(1);
        let b = SimAccount::from_seed(2);
        assert_ne!(a.search_key(&epoch_key(4), 0), b.search_key(&epoch_key(4), 0));
        assert_ne!(a.search_key(&epoch_key(4), 0), a.search_key(&epoch_key(5), 0));
    }

    #[test]
    fn rejects_bad_epoch_keys() {
        let account = SimAccount::from_seed(1);

        let mut key = epoch_key(1);
        key.version = 2;
        assert!(matches!(
            account.derive_keystream(&key),
            Err(CryptoError::UnsupportedVersion(_))
        ));

        let key = EpochKey {
            pubkey: Bytes::from_static(b"short"),
            version: SIM_KEY_VERSION,
        };
        assert!(matches!(
            account.derive_keystream(&key),
            Err(CryptoError::InvalidKey(_))
        ));
    }

    #[test]
    fn sealed_record_round_trips_for_owner_only() {
        let alice = SimAccount::from_seed(1);
        let bob = SimAccount::from_seed(2);
        let record = alice.make_record(12, 340, 5_000);
        let ciphertext = alice.seal(&record);

        let decrypted = alice.decrypt(&ciphertext).unwrap();
        let owned = alice.owned_output(&decrypted).unwrap();
        assert_eq!(owned.value, 5_000);
        assert_eq!(owned.block_index, 12);

        assert!(bob.owned_output(&decrypted).is_none());
    }

    #[test]
    fn garbage_ciphertext_is_invalid_input() {
        let account = SimAccount::from_seed(1);
        assert!(matches!(
            account.decrypt(b"\x00\x01"),
            Err(CryptoError::InvalidInput(_))
        ));
    }
}
