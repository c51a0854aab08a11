use super::{Error, Result};
use std::str::FromStr;

use bitcoin::secp256k1::{Keypair, SECP256K1, SecretKey, XOnlyPublicKey, rand};

/// A wrapper around the secp256k1 keypair used both for signing relay
/// events and as the shared key of a pool.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct JoinstrKeys {
    inner: Keypair,
}

impl JoinstrKeys {
    /// Generates a fresh random keypair. Candidate secrets outside of the
    /// curve order are rejected by secp256k1 and redrawn.
    pub fn new() -> Self {
        Self {
            inner: Keypair::new(SECP256K1, &mut rand::thread_rng()),
        }
    }

    /// Loads a keypair from a given private key
    pub fn from_private_key(private_key: &SecretKey) -> Self {
        let keypair = Keypair::from_secret_key(SECP256K1, private_key);
        Self { inner: keypair }
    }

    /// Loads a keypair from a hex encoded private key, failing if it is not
    /// a valid scalar for the curve
    pub fn from_private_key_string(private_key: &str) -> Result<Self> {
        let private_key = SecretKey::from_str(private_key)?;
        Ok(Self::from_private_key(&private_key))
    }

    /// Returns the private key as a hex encoded string
    pub fn get_private_key_string(&self) -> String {
        self.inner.secret_key().display_secret().to_string()
    }

    /// Returns the private key
    pub fn get_private_key(&self) -> SecretKey {
        self.inner.secret_key()
    }

    pub fn x_only_public_key(&self) -> XOnlyPublicKey {
        self.inner.x_only_public_key().0
    }

    /// Returns the 32-byte x-only public key as a hex encoded string
    pub fn get_public_key(&self) -> String {
        self.x_only_public_key().to_string()
    }

    /// Returns the secp256k1 key pair
    pub fn get_key_pair(&self) -> Keypair {
        self.inner
    }

    /// True if the given x-only public key hex belongs to this keypair
    pub fn matches_public_key(&self, public_key: &str) -> bool {
        self.get_public_key().eq_ignore_ascii_case(public_key)
    }
}

impl Default for JoinstrKeys {
    fn default() -> Self {
        Self::new()
    }
}

impl FromStr for JoinstrKeys {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::from_private_key_string(s)
    }
}

/// Parses a hex encoded x-only public key
pub fn parse_public_key(public_key: &str) -> Result<XOnlyPublicKey> {
    XOnlyPublicKey::from_str(public_key).map_err(|e| Error::PublicKey(format!("{public_key}: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tests::tests::{TEST_PRIVATE_KEY, TEST_PUBLIC_KEY};

    #[test]
    fn test_public_key_from_private_key() {
        let keys = JoinstrKeys::from_private_key_string(TEST_PRIVATE_KEY).unwrap();
        assert_eq!(keys.get_public_key(), TEST_PUBLIC_KEY);
        assert_eq!(keys.get_private_key_string(), TEST_PRIVATE_KEY);
        assert!(keys.matches_public_key(&TEST_PUBLIC_KEY.to_uppercase()));
    }

    #[test]
    fn test_generated_keys_differ() {
        let first = JoinstrKeys::new();
        let second = JoinstrKeys::new();
        assert_ne!(first.get_private_key(), second.get_private_key());
        assert_eq!(first.get_public_key().len(), 64);
    }

    #[test]
    fn test_private_key_out_of_range_is_rejected() {
        // zero and the curve order itself are not valid scalars
        let zero = "0000000000000000000000000000000000000000000000000000000000000000";
        let order = "fffffffffffffffffffffffffffffffebaaedce6af48a03bbfd25e8cd0364141";
        assert!(JoinstrKeys::from_private_key_string(zero).is_err());
        assert!(JoinstrKeys::from_private_key_string(order).is_err());
        assert!(JoinstrKeys::from_private_key_string("not hex").is_err());
    }

    #[test]
    fn test_parse_public_key() {
        assert!(parse_public_key(TEST_PUBLIC_KEY).is_ok());
        assert!(matches!(
            parse_public_key("abcd"),
            Err(Error::PublicKey(_))
        ));
    }
}
