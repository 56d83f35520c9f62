use std::fmt;

use x25519_dalek::{PublicKey, StaticSecret};

/// Represents an error in base64 key parsing.
#[derive(Eq, PartialEq, Debug, Clone)]
pub struct InvalidKey;

impl std::error::Error for InvalidKey {}

impl fmt::Display for InvalidKey {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "invalid key format")
    }
}

/// A WireGuard encryption key. WireGuard makes no meaningful distinction between
/// public, private and preshared keys - any sequence of 32 bytes can be used as
/// either of those, so callers must be careful not to mix them up.
#[derive(PartialEq, Eq, Clone, Hash)]
pub struct Key(pub [u8; 32]);

impl Key {
    /// Generates and returns a new private key.
    pub fn generate_private() -> Self {
        use rand_core::{OsRng, RngCore};

        let mut bytes = [0u8; 32];
        OsRng.fill_bytes(&mut bytes);

        // Apply key clamping.
        bytes[0] &= 248;
        bytes[31] &= 127;
        bytes[31] |= 64;
        Self(bytes)
    }

    /// Generates and returns a new preshared key.
    #[must_use]
    pub fn generate_preshared() -> Self {
        use rand_core::{OsRng, RngCore};

        let mut key = [0u8; 32];
        OsRng.fill_bytes(&mut key);
        Self(key)
    }

    /// Derives the public key for this private key.
    #[must_use]
    pub fn get_public(&self) -> Self {
        let secret = StaticSecret::from(self.0);
        let public = PublicKey::from(&secret);

        Self(public.to_bytes())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Converts the key to a standardized base64 representation, as used by the
    /// `wg` utility and the compiled WireGuard configuration format.
    pub fn to_base64(&self) -> String {
        base64::encode(self.0)
    }

    /// Parses a base64 representation of the key. Fails if the input isn't valid
    /// base64 or doesn't decode to exactly 32 bytes.
    pub fn from_base64(key: &str) -> Result<Self, InvalidKey> {
        let decoded_bytes = base64::decode(key).map_err(|_| InvalidKey)?;

        if decoded_bytes.len() != 32 {
            return Err(InvalidKey);
        }

        let mut key_bytes = [0u8; 32];
        key_bytes.copy_from_slice(&decoded_bytes[..]);
        Ok(Self(key_bytes))
    }
}

impl fmt::Debug for Key {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "Key(\"{}\")", self.to_base64())
    }
}

/// A private/public keypair, generated together for convenience when
/// provisioning a new peer.
#[derive(Debug, PartialEq, Eq, Clone)]
pub struct KeyPair {
    pub private: Key,
    pub public: Key,
}

impl KeyPair {
    pub fn generate() -> Self {
        let private = Key::generate_private();
        let public = private.get_public();
        KeyPair { private, public }
    }
}
