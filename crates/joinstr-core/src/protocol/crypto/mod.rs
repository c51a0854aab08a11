use aes::Aes256;
use aes::cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit, block_padding::Pkcs7};
use base64::{Engine as _, engine::general_purpose::STANDARD};
use bitcoin::secp256k1::{self, Parity, SECP256K1, Scalar, SecretKey, XOnlyPublicKey};
use rand::RngCore;
use thiserror::Error;

use crate::constants::{ENCRYPTED_IV_DELIMITER, IV_LENGTH, SHARED_SECRET_LENGTH};

mod joinstrkeys;

pub type Result<T> = std::result::Result<T, Error>;
pub use joinstrkeys::JoinstrKeys;
pub use joinstrkeys::parse_public_key;

type Aes256CbcEnc = cbc::Encryptor<Aes256>;
type Aes256CbcDec = cbc::Decryptor<Aes256>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Private key error: {0}")]
    PrivateKey(#[from] secp256k1::Error),

    #[error("Invalid public key: {0}")]
    PublicKey(String),

    /// The symmetric key does not have the length of a shared secret
    #[error("Invalid encryption key length: {0}")]
    InvalidKey(usize),

    #[error("Can't encrypt an empty message")]
    EmptyMessage,

    /// Framing of an encrypted message or an event is broken
    #[error("Format error: {0}")]
    Format(String),

    #[error("Decryption error: {0}")]
    Decryption(String),

    #[error("Signature error: {0}")]
    Signature(String),
}

// -------------------- Shared secret --------------------------

/// The x-coordinate of `private_key * counterparty`, with the counterparty's
/// x-only key lifted to its even point. Both parties arrive at the same
/// value since negating the point leaves the x-coordinate untouched.
pub fn shared_secret(
    private_key: &SecretKey,
    counterparty: &XOnlyPublicKey,
) -> Result<[u8; SHARED_SECRET_LENGTH]> {
    let point = counterparty.public_key(Parity::Even);
    let product = point.mul_tweak(SECP256K1, &Scalar::from(*private_key))?;
    let mut secret = [0u8; SHARED_SECRET_LENGTH];
    secret.copy_from_slice(&product.serialize()[1..1 + SHARED_SECRET_LENGTH]);
    Ok(secret)
}

/// Shared secret of a keypair with itself, used for the registration channel
/// of a pool
pub fn self_shared_secret(keys: &JoinstrKeys) -> Result<[u8; SHARED_SECRET_LENGTH]> {
    shared_secret(&keys.get_private_key(), &keys.x_only_public_key())
}

// -------------------- Encryption --------------------------

/// Encrypts the given text with AES-256-CBC under a fresh random IV and
/// returns `base64(ciphertext) + "?iv=" + base64(iv)`
pub fn encrypt(plaintext: &str, key: &[u8]) -> Result<String> {
    if plaintext.is_empty() {
        return Err(Error::EmptyMessage);
    }
    if key.len() != SHARED_SECRET_LENGTH {
        return Err(Error::InvalidKey(key.len()));
    }
    let mut iv = [0u8; IV_LENGTH];
    rand::thread_rng().fill_bytes(&mut iv);
    let cipher =
        Aes256CbcEnc::new_from_slices(key, &iv).map_err(|_| Error::InvalidKey(key.len()))?;
    let ciphertext = cipher.encrypt_padded_vec_mut::<Pkcs7>(plaintext.as_bytes());
    Ok(format!(
        "{}{ENCRYPTED_IV_DELIMITER}{}",
        STANDARD.encode(ciphertext),
        STANDARD.encode(iv)
    ))
}

/// Decrypts a message produced by [encrypt]
pub fn decrypt(message: &str, key: &[u8]) -> Result<String> {
    let parts: Vec<&str> = message.split(ENCRYPTED_IV_DELIMITER).collect();
    if parts.len() != 2 {
        return Err(Error::Format(format!(
            "expected ciphertext and iv separated by {ENCRYPTED_IV_DELIMITER}"
        )));
    }
    if key.is_empty() {
        return Err(Error::Format("empty decryption key".to_string()));
    }
    if key.len() != SHARED_SECRET_LENGTH {
        return Err(Error::InvalidKey(key.len()));
    }

    let ciphertext = STANDARD
        .decode(parts[0])
        .map_err(|e| Error::Decryption(format!("invalid ciphertext encoding: {e}")))?;
    let iv = STANDARD
        .decode(parts[1])
        .map_err(|e| Error::Decryption(format!("invalid iv encoding: {e}")))?;
    let cipher = Aes256CbcDec::new_from_slices(key, &iv)
        .map_err(|_| Error::Decryption(format!("invalid iv length: {}", iv.len())))?;
    let plaintext = cipher
        .decrypt_padded_vec_mut::<Pkcs7>(&ciphertext)
        .map_err(|_| Error::Decryption("invalid padding".to_string()))?;
    String::from_utf8(plaintext).map_err(|e| Error::Decryption(format!("invalid utf-8: {e}")))
}

/// Encrypts `plaintext` for `counterparty` with the pairwise shared secret
pub fn encrypt_for(
    plaintext: &str,
    keys: &JoinstrKeys,
    counterparty: &XOnlyPublicKey,
) -> Result<String> {
    let secret = shared_secret(&keys.get_private_key(), counterparty)?;
    encrypt(plaintext, &secret)
}

/// Decrypts a message from `counterparty` with the pairwise shared secret
pub fn decrypt_from(
    message: &str,
    keys: &JoinstrKeys,
    counterparty: &XOnlyPublicKey,
) -> Result<String> {
    let secret = shared_secret(&keys.get_private_key(), counterparty)?;
    decrypt(message, &secret)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tests::tests::{TEST_PRIVATE_KEY, TEST_PUBLIC_KEY};
    use rstest::rstest;

    fn test_keys() -> JoinstrKeys {
        JoinstrKeys::from_private_key_string(TEST_PRIVATE_KEY).unwrap()
    }

    #[test]
    fn test_shared_secret_is_symmetric() {
        for _ in 0..16 {
            let alice = JoinstrKeys::new();
            let bob = JoinstrKeys::new();
            let ab = shared_secret(&alice.get_private_key(), &bob.x_only_public_key()).unwrap();
            let ba = shared_secret(&bob.get_private_key(), &alice.x_only_public_key()).unwrap();
            assert_eq!(ab, ba);
        }
    }

    #[test]
    fn test_shared_secret_differs_per_counterparty() {
        let alice = JoinstrKeys::new();
        let bob = JoinstrKeys::new();
        let carol = JoinstrKeys::new();
        let ab = shared_secret(&alice.get_private_key(), &bob.x_only_public_key()).unwrap();
        let ac = shared_secret(&alice.get_private_key(), &carol.x_only_public_key()).unwrap();
        assert_ne!(ab, ac);
    }

    #[test]
    fn test_self_shared_secret_matches_explicit_form() {
        let keys = test_keys();
        let public_key = parse_public_key(TEST_PUBLIC_KEY).unwrap();
        assert_eq!(
            self_shared_secret(&keys).unwrap(),
            shared_secret(&keys.get_private_key(), &public_key).unwrap()
        );
    }

    #[rstest]
    #[case::join_request(r#"{"type":"join_pool"}"#)]
    #[case::output(r#"{"type":"output","address":"tb1qxyz"}"#)]
    #[case::unicode("zürich ₿ pool")]
    #[case::block_sized("0123456789abcdef")]
    fn test_encrypt_decrypt(#[case] message: &str) {
        let key = self_shared_secret(&test_keys()).unwrap();
        let encrypted = encrypt(message, &key).unwrap();
        assert!(encrypted.contains(ENCRYPTED_IV_DELIMITER));
        assert_eq!(decrypt(&encrypted, &key).unwrap(), message);
    }

    #[test]
    fn test_encrypt_uses_fresh_iv() {
        let key = self_shared_secret(&test_keys()).unwrap();
        let first = encrypt("same message", &key).unwrap();
        let second = encrypt("same message", &key).unwrap();
        assert_ne!(first, second);
        let first_iv = first.split(ENCRYPTED_IV_DELIMITER).nth(1).unwrap();
        let second_iv = second.split(ENCRYPTED_IV_DELIMITER).nth(1).unwrap();
        assert_ne!(first_iv, second_iv);
    }

    #[test]
    fn test_pairwise_encryption() {
        let alice = JoinstrKeys::new();
        let bob = JoinstrKeys::new();
        let encrypted = encrypt_for("hi bob", &alice, &bob.x_only_public_key()).unwrap();
        let decrypted = decrypt_from(&encrypted, &bob, &alice.x_only_public_key()).unwrap();
        assert_eq!(decrypted, "hi bob");
    }

    #[test]
    fn test_encrypt_rejects_empty_message_and_bad_key() {
        let key = self_shared_secret(&test_keys()).unwrap();
        assert!(matches!(encrypt("", &key), Err(Error::EmptyMessage)));
        assert!(matches!(encrypt("hello", &[]), Err(Error::InvalidKey(0))));
        assert!(matches!(encrypt("hello", &key[..16]), Err(Error::InvalidKey(16))));
    }

    #[rstest]
    #[case::missing_delimiter("bm90IGVuY3J5cHRlZA==")]
    #[case::two_delimiters("YQ==?iv=YQ==?iv=YQ==")]
    #[case::empty("")]
    fn test_decrypt_format_error(#[case] message: &str) {
        let key = self_shared_secret(&test_keys()).unwrap();
        assert!(matches!(decrypt(message, &key), Err(Error::Format(_))));
    }

    #[test]
    fn test_decrypt_empty_key_is_format_error() {
        let key = self_shared_secret(&test_keys()).unwrap();
        let encrypted = encrypt("hello", &key).unwrap();
        assert!(matches!(decrypt(&encrypted, &[]), Err(Error::Format(_))));
    }

    #[test]
    fn test_decrypt_with_wrong_key_or_bad_base64() {
        let key = self_shared_secret(&test_keys()).unwrap();
        let other = self_shared_secret(&JoinstrKeys::new()).unwrap();
        let encrypted = encrypt(r#"{"type":"output","address":"tb1q"}"#, &key).unwrap();
        // a wrong key almost always breaks the padding, otherwise the utf-8 or content check
        assert_ne!(decrypt(&encrypted, &other).ok().as_deref(), Some(r#"{"type":"output","address":"tb1q"}"#));
        assert!(matches!(
            decrypt("%%%?iv=AAAAAAAAAAAAAAAAAAAAAA==", &key),
            Err(Error::Decryption(_))
        ));
        assert!(matches!(
            decrypt("AAAAAAAAAAAAAAAAAAAAAA==?iv=AAAA", &key),
            Err(Error::Decryption(_))
        ));
    }

    #[test]
    fn test_ciphertext_is_readable_as_nip04() {
        let alice = JoinstrKeys::new();
        let bob = JoinstrKeys::new();
        let encrypted = encrypt_for("interop", &alice, &bob.x_only_public_key()).unwrap();

        let bob_secret = nostr::SecretKey::from_hex(&bob.get_private_key_string()).unwrap();
        let alice_public = nostr::PublicKey::from_hex(&alice.get_public_key()).unwrap();
        let decrypted = nostr::nips::nip04::decrypt(&bob_secret, &alice_public, &encrypted).unwrap();
        assert_eq!(decrypted, "interop");
    }
}
