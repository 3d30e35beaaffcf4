//! # Packet Encryption
//!
//! AES-128-CBC with PKCS#7 padding over whole packets.
//!
//! Every packet on both channels is encrypted under the connection's 16-byte
//! key with a fixed all-zero IV. Identical plaintexts under one key therefore
//! produce identical ciphertexts, and a shared prefix is visible as a shared
//! ciphertext prefix. This is a known weakness of the wire format; keys are
//! per connection and supplied out of band.
//!
//! Decryption failures are returned as [`ProtocolError::DecryptionFailure`].
//! The UDP path drops such packets, the TCP path disconnects the peer.

use crate::error::{ProtocolError, Result};
use aes::Aes128;
use cbc::cipher::{block_padding::Pkcs7, BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use zeroize::{Zeroize, ZeroizeOnDrop};

/// AES-128 key length in bytes
pub const KEY_SIZE: usize = 16;

/// AES block (and IV) length in bytes
pub const BLOCK_SIZE: usize = 16;

/// Symmetric key shared by both ends of a connection
pub type EncryptionKey = [u8; KEY_SIZE];

/// The IV used for every packet
pub const ZERO_IV: [u8; BLOCK_SIZE] = [0; BLOCK_SIZE];

type Encryptor = cbc::Encryptor<Aes128>;
type Decryptor = cbc::Decryptor<Aes128>;

/// Encrypt `plaintext`; the result is padded to a whole number of blocks
pub fn encrypt_with_key(key: &EncryptionKey, iv: &[u8; BLOCK_SIZE], plaintext: &[u8]) -> Vec<u8> {
    Encryptor::new(key.into(), iv.into()).encrypt_padded_vec_mut::<Pkcs7>(plaintext)
}

/// Decrypt `ciphertext`, failing on bad length or padding
pub fn decrypt_with_key(
    key: &EncryptionKey,
    iv: &[u8; BLOCK_SIZE],
    ciphertext: &[u8],
) -> Result<Vec<u8>> {
    if ciphertext.is_empty() || ciphertext.len() % BLOCK_SIZE != 0 {
        return Err(ProtocolError::DecryptionFailure);
    }
    Decryptor::new(key.into(), iv.into())
        .decrypt_padded_vec_mut::<Pkcs7>(ciphertext)
        .map_err(|_| ProtocolError::DecryptionFailure)
}

/// Build a key from a slice, checking its length
pub fn key_from_slice(bytes: &[u8]) -> Result<EncryptionKey> {
    bytes
        .try_into()
        .map_err(|_| ProtocolError::InvalidKeyLength(bytes.len()))
}

/// Crypto bound to one connection's key; the key is wiped on drop
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct FixedKeyCrypto {
    key: EncryptionKey,
}

impl FixedKeyCrypto {
    pub fn new(key: EncryptionKey) -> Self {
        Self { key }
    }

    pub fn encrypt(&self, plaintext: &[u8]) -> Vec<u8> {
        encrypt_with_key(&self.key, &ZERO_IV, plaintext)
    }

    pub fn decrypt(&self, ciphertext: &[u8]) -> Result<Vec<u8>> {
        decrypt_with_key(&self.key, &ZERO_IV, ciphertext)
    }
}

impl std::fmt::Debug for FixedKeyCrypto {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FixedKeyCrypto").finish_non_exhaustive()
    }
}

/// Crypto for callers holding many keys, such as the server registry
#[derive(Debug, Clone, Copy, Default)]
pub struct AnyKeyCrypto;

impl AnyKeyCrypto {
    pub fn encrypt(&self, key: &EncryptionKey, plaintext: &[u8]) -> Vec<u8> {
        encrypt_with_key(key, &ZERO_IV, plaintext)
    }

    pub fn decrypt(&self, key: &EncryptionKey, ciphertext: &[u8]) -> Result<Vec<u8>> {
        decrypt_with_key(key, &ZERO_IV, ciphertext)
    }
}
