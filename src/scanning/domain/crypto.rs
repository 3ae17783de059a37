use crate::error::CryptoError;
use crate::scanning::domain::keystream::Keystream;
use crate::scanning::types::{EpochKey, OwnedOutput, TxOutRecord};

/// Account-bound cryptography the scanner relies on but does not implement.
///
/// An implementation holds the account's private view key; the engine only
/// ever sees its outputs.
pub trait ScanCrypto: Send + Sync {
    /// Derives the account's keystream for an announced epoch.
    fn derive_keystream(&self, epoch_key: &EpochKey) -> Result<Box<dyn Keystream>, CryptoError>;

    /// Decrypts a ciphertext returned for a search hit.
    fn decrypt(&self, ciphertext: &[u8]) -> Result<TxOutRecord, CryptoError>;

    /// Returns `None` when the record does not belong to this account.
    fn owned_output(&self, record: &TxOutRecord) -> Option<OwnedOutput>;
}
