//! Ed25519 keys and signatures used by roster members

use crate::byte_array::declare_byte_array_type;
use cryptoxide::ed25519;

declare_byte_array_type!(
    /// Ed25519 public key of a roster member
    PublicKey,
    32
);

declare_byte_array_type!(
    /// Ed25519 signature made by a single roster member
    Signature,
    64
);

impl PublicKey {
    /// Verify `signature` over `message` against this key
    pub fn verify(&self, message: &[u8], signature: &Signature) -> bool {
        ed25519::verify(message, &self.0, &signature.0)
    }
}

/// Secret material of a roster member, held by whoever runs the member's node.
///
/// Persisted in CBOR as its seed only; the expanded secret is derived again
/// on decode.
#[derive(Clone)]
pub struct KeyPair {
    seed: [u8; ed25519::PRIVATE_KEY_LENGTH],
    secret: [u8; ed25519::KEYPAIR_LENGTH],
    public: PublicKey,
}

impl KeyPair {
    /// Derive a key pair from a 32-byte seed
    pub fn from_seed(seed: &[u8; ed25519::PRIVATE_KEY_LENGTH]) -> Self {
        let (secret, public) = ed25519::keypair(seed);
        Self {
            seed: *seed,
            secret,
            public: PublicKey(public),
        }
    }

    pub fn public(&self) -> PublicKey {
        self.public
    }

    pub fn sign(&self, message: &[u8]) -> Signature {
        Signature(ed25519::signature(message, &self.secret))
    }
}

impl PartialEq for KeyPair {
    fn eq(&self, other: &Self) -> bool {
        self.seed == other.seed
    }
}

impl Eq for KeyPair {}

impl<C> minicbor::Encode<C> for KeyPair {
    fn encode<W: minicbor::encode::Write>(
        &self,
        e: &mut minicbor::Encoder<W>,
        _ctx: &mut C,
    ) -> Result<(), minicbor::encode::Error<W::Error>> {
        e.bytes(&self.seed)?.ok()
    }
}

impl<'a, C> minicbor::Decode<'a, C> for KeyPair {
    fn decode(
        d: &mut minicbor::Decoder<'a>,
        _ctx: &mut C,
    ) -> Result<Self, minicbor::decode::Error> {
        let seed: [u8; ed25519::PRIVATE_KEY_LENGTH] = d
            .bytes()?
            .try_into()
            .map_err(|_| minicbor::decode::Error::message("Invalid KeyPair seed size"))?;
        Ok(Self::from_seed(&seed))
    }
}

impl std::fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyPair").field("public", &self.public).finish_non_exhaustive()
    }
}
