//! Primitive types shared by channels, messages and the wire layer.

use core::fmt::Debug;

use rand::{distributions::Standard, prelude::Distribution};
use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
use uint::construct_uint;

macro_rules! impl_hex_debug {
    ($T:ident) => {
        impl Debug for $T {
            fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
                f.write_str("0x")?;
                for b in self.0 {
                    f.write_fmt(format_args!("{:02x}", b))?;
                }
                Ok(())
            }
        }
    };
}

/// Fixed size byte strings, (de)serialized as `0x`-prefixed hex.
macro_rules! bytesN {
    ( $T:ident, $N:literal ) => {
        #[derive(PartialEq, Eq, Hash, Copy, Clone)]
        pub struct $T(pub [u8; $N]);

        impl $T {
            /// Parse from a hex string, with or without `0x` prefix.
            pub fn from_hex(s: &str) -> Result<Self, hex::FromHexError> {
                let s = s.strip_prefix("0x").unwrap_or(s);
                let mut buf = [0u8; $N];
                hex::decode_to_slice(s, &mut buf)?;
                Ok($T(buf))
            }

            pub fn to_hex(&self) -> String {
                format!("0x{}", hex::encode(self.0))
            }
        }

        impl TryFrom<&[u8]> for $T {
            type Error = core::array::TryFromSliceError;

            fn try_from(value: &[u8]) -> Result<Self, Self::Error> {
                Ok($T(value.try_into()?))
            }
        }

        impl Serialize for $T {
            fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                serializer.serialize_str(&self.to_hex())
            }
        }

        impl<'de> Deserialize<'de> for $T {
            fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
                let s = String::deserialize(deserializer)?;
                $T::from_hex(&s).map_err(de::Error::custom)
            }
        }

        impl Distribution<$T> for Standard {
            fn sample<R: rand::Rng + ?Sized>(&self, rng: &mut R) -> $T {
                $T(rng.gen())
            }
        }

        impl Default for $T {
            fn default() -> Self {
                Self([0; $N])
            }
        }

        impl_hex_debug!($T);
    };
}

bytesN!(Hash, 32);
bytesN!(Address, 20);

impl Address {
    /// Left-pad to a 32 byte word, the way addresses are laid out on-chain.
    pub fn to_word(&self) -> [u8; 32] {
        let mut bytes = [0u8; 32];
        bytes[32 - 20..].copy_from_slice(&self.0);
        bytes
    }
}

// We could use primitive_types::U256 here, but we only need the arithmetic
// and big endian conversion, both of which construct_uint provides.
construct_uint! {
    pub struct U256(4);
}

impl U256 {
    pub fn to_be_bytes(&self) -> [u8; 32] {
        let mut bytes = [0u8; 32];
        self.to_big_endian(&mut bytes);
        bytes
    }

    /// Values on the wire may strip leading zeroes, but never exceed 32 bytes.
    pub fn from_be_slice(bytes: &[u8]) -> Option<Self> {
        if bytes.len() > 32 {
            None
        } else {
            Some(U256::from_big_endian(bytes))
        }
    }
}

impl Distribution<U256> for Standard {
    fn sample<R: rand::Rng + ?Sized>(&self, rng: &mut R) -> U256 {
        let buf: [u8; 32] = rng.gen();
        U256::from_big_endian(&buf)
    }
}

/// Uniquely identifies an Asset by blockchain + AssetHolder.
#[derive(Serialize, Deserialize, Debug, Copy, Clone, Default, PartialEq, Eq)]
pub struct Asset {
    #[serde(with = "u256_dec")]
    pub chain_id: U256,
    pub holder: Address,
}

mod u256_dec {
    use super::U256;
    use serde::{de, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(v: &U256, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&v.to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<U256, D::Error> {
        let s = String::deserialize(deserializer)?;
        U256::from_dec_str(&s).map_err(|e| de::Error::custom(format!("{:?}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn address_hex_roundtrip_and_padding() {
        let addr = Address::from_hex("0x5B38Da6a701c568545dCfcB03FcB875f56beddC4").unwrap();
        assert_eq!(addr.to_hex(), "0x5b38da6a701c568545dcfcb03fcb875f56beddc4");
        let word = addr.to_word();
        assert_eq!(&word[..12], &[0u8; 12]);
        assert_eq!(&word[12..], &addr.0);
        assert!(Address::from_hex("0x1234").is_err());
    }

    #[test]
    fn u256_rejects_oversized_slices() {
        assert_eq!(U256::from_be_slice(&[0x01, 0x00]), Some(U256::from(256)));
        assert_eq!(U256::from_be_slice(&[0u8; 33]), None);
    }
}
