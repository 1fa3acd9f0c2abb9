use blake2::{digest::consts::U32, Blake2b, Digest};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::{fmt, str::FromStr};

/// Fixed size digest of `BYTES` bytes.
///
/// Hashes are the only way blocks refer to each other: back links, forward
/// links, the parent block of a nested chain and its `child_sl` anchor are all
/// plain `Hash` values, so the chain hierarchy is an arena keyed by hash rather
/// than an object graph.
///
/// Serialised as a lowercase hex string with serde and as a CBOR byte string
/// with minicbor.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Hash<const BYTES: usize>([u8; BYTES]);

/// Identifier of a block, and of a chain when it names the chain's genesis.
pub type SkipBlockHash = Hash<32>;

/// Identifier of a roster, digest of its ordered public keys.
pub type RosterId = Hash<32>;

impl<const BYTES: usize> Default for Hash<BYTES> {
    fn default() -> Self {
        Self::new([0u8; BYTES])
    }
}

impl<const BYTES: usize> Serialize for Hash<BYTES> {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&hex::encode(self.0))
    }
}

impl<'de, const BYTES: usize> Deserialize<'de> for Hash<BYTES> {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s: String = Deserialize::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

impl<const BYTES: usize> Hash<BYTES> {
    #[inline]
    pub const fn new(bytes: [u8; BYTES]) -> Self {
        Self(bytes)
    }

    #[inline]
    pub fn to_vec(&self) -> Vec<u8> {
        self.0.to_vec()
    }

    #[inline]
    pub fn into_inner(self) -> [u8; BYTES] {
        self.0
    }

    /// Short hex prefix for log lines
    pub fn short(&self) -> String {
        hex::encode(&self.0[..BYTES.min(4)])
    }
}

impl Hash<32> {
    /// Blake2b-256 digest of the concatenation of `parts`.
    pub fn digest<I, T>(parts: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: AsRef<[u8]>,
    {
        let mut hasher = Blake2b::<U32>::new();
        for part in parts {
            hasher.update(part.as_ref());
        }
        let mut bytes = [0u8; 32];
        bytes.copy_from_slice(&hasher.finalize());
        Self::new(bytes)
    }
}

impl<const BYTES: usize> TryFrom<&[u8]> for Hash<BYTES> {
    type Error = std::array::TryFromSliceError;

    fn try_from(value: &[u8]) -> Result<Self, Self::Error> {
        let hash: [u8; BYTES] = value.try_into()?;
        Ok(Self::new(hash))
    }
}

impl<const BYTES: usize> AsRef<[u8]> for Hash<BYTES> {
    #[inline]
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl<const BYTES: usize> fmt::Debug for Hash<BYTES> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple(&format!("Hash<{BYTES}>")).field(&hex::encode(self)).finish()
    }
}

impl<const BYTES: usize> fmt::Display for Hash<BYTES> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self))
    }
}

impl<const BYTES: usize> FromStr for Hash<BYTES> {
    type Err = hex::FromHexError;

    /// Parses a hash from a hexadecimal string of exactly `2 * BYTES` digits.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut bytes = [0; BYTES];
        hex::decode_to_slice(s, &mut bytes)?;
        Ok(Self::new(bytes))
    }
}

impl<C, const BYTES: usize> minicbor::Encode<C> for Hash<BYTES> {
    fn encode<W: minicbor::encode::Write>(
        &self,
        e: &mut minicbor::Encoder<W>,
        _ctx: &mut C,
    ) -> Result<(), minicbor::encode::Error<W::Error>> {
        e.bytes(&self.0)?.ok()
    }
}

impl<'a, C, const BYTES: usize> minicbor::Decode<'a, C> for Hash<BYTES> {
    fn decode(
        d: &mut minicbor::Decoder<'a>,
        _ctx: &mut C,
    ) -> Result<Self, minicbor::decode::Error> {
        let bytes = d.bytes()?;
        if bytes.len() == BYTES {
            let mut hash = [0; BYTES];
            hash.copy_from_slice(bytes);
            Ok(Self::new(hash))
        } else {
            Err(minicbor::decode::Error::message("Invalid hash size"))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_str() {
        let digest: SkipBlockHash =
            "0d8d00cdd4657ac84d82f0a56067634a7adfdf43da41cb534bcaa45060973d21".parse().unwrap();
        assert_eq!(
            digest.to_string(),
            "0d8d00cdd4657ac84d82f0a56067634a7adfdf43da41cb534bcaa45060973d21"
        );
    }

    #[test]
    #[should_panic]
    fn from_str_too_short() {
        let _digest: SkipBlockHash = "0d8d00cdd465".parse().unwrap();
    }

    #[test]
    fn slice_must_match_length() {
        let hash = SkipBlockHash::digest([b"stored"]);
        assert_eq!(SkipBlockHash::try_from(hash.to_vec().as_slice()).unwrap(), hash);
        assert!(SkipBlockHash::try_from(&hash.as_ref()[..31]).is_err());
    }

    #[test]
    fn digest_depends_on_every_part() {
        let a = SkipBlockHash::digest([b"skip".as_slice(), b"block"]);
        let b = SkipBlockHash::digest([b"skip".as_slice(), b"chain"]);
        assert_ne!(a, b);
        assert_eq!(a, SkipBlockHash::digest([b"skipblock".as_slice()]));
    }

    #[test]
    fn cbor_round_trip_rejects_wrong_size() {
        let hash = SkipBlockHash::digest([b"x"]);
        let bytes = minicbor::to_vec(hash).unwrap();
        let back: SkipBlockHash = minicbor::decode(&bytes).unwrap();
        assert_eq!(hash, back);

        let short = minicbor::to_vec(minicbor::bytes::ByteVec::from(vec![1u8, 2, 3])).unwrap();
        assert!(minicbor::decode::<SkipBlockHash>(&short).is_err());
    }

    #[test]
    fn serde_uses_hex() {
        let hash = SkipBlockHash::new([0xab; 32]);
        let json = serde_json::to_string(&hash).unwrap();
        assert_eq!(json, format!("\"{}\"", "ab".repeat(32)));
        let back: SkipBlockHash = serde_json::from_str(&json).unwrap();
        assert_eq!(hash, back);
    }
}
