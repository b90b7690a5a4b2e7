//! BN254 scalar helpers shared by every zkrep crate.
//!
//! Field elements travel in three shapes: canonical little-endian bytes (the
//! `to_repr` layout, used for storage), big-endian `0x` hex strings (used on
//! the wire and in logs) and `BigUint` (used by the bit-packing codec).

use std::cmp::Ordering;

use anyhow::{anyhow, ensure, Result};
use halo2curves_axiom::{
    bn256::Fr,
    ff::{Field, PrimeField},
};
use num_bigint::BigUint;
use once_cell::sync::Lazy;

/// Number of bits that are always safe to pack into a single field element.
pub const SAFE_FIELD_BITS: u32 = 253;

/// The scalar field modulus `p`.
pub static FIELD_MODULUS: Lazy<BigUint> = Lazy::new(|| fr_to_biguint(&(-Fr::ONE)) + 1u32);

pub fn fr_from_bytes(bytes: &[u8; 32]) -> Result<Fr> {
    Fr::from_bytes(bytes)
        .into_option()
        .ok_or_else(|| anyhow!("invalid bn256 scalar encoding"))
}

pub fn fr_to_bytes(fr: &Fr) -> [u8; 32] {
    let repr = fr.to_repr();
    let mut bytes = [0u8; 32];
    bytes.copy_from_slice(repr.as_ref());
    bytes
}

pub fn fr_to_be_bytes(fr: &Fr) -> [u8; 32] {
    let mut bytes = fr_to_bytes(fr);
    bytes.reverse();
    bytes
}

pub fn reduce_be_bytes_to_fr(bytes: &[u8; 32]) -> Fr {
    let mut acc = Fr::ZERO;
    let base = Fr::from(256);
    for byte in bytes.iter() {
        acc = acc * base + Fr::from(*byte as u64);
    }
    acc
}

/// Compare two field elements by their canonical integer value.
pub fn fr_cmp(a: &Fr, b: &Fr) -> Ordering {
    fr_to_be_bytes(a).cmp(&fr_to_be_bytes(b))
}

pub fn fr_to_u64(fr: &Fr) -> Result<u64> {
    let bytes = fr_to_bytes(fr);
    ensure!(
        bytes[8..].iter().all(|&b| b == 0),
        "field element does not fit in u64"
    );
    let mut buf = [0u8; 8];
    buf.copy_from_slice(&bytes[..8]);
    Ok(u64::from_le_bytes(buf))
}

pub fn fr_to_biguint(fr: &Fr) -> BigUint {
    BigUint::from_bytes_le(&fr_to_bytes(fr))
}

/// Convert an integer into a field element, rejecting values `>= p`.
pub fn fr_from_biguint(value: &BigUint) -> Result<Fr> {
    ensure!(
        value < &*FIELD_MODULUS,
        "integer {} is not below the field modulus",
        value
    );
    let le = value.to_bytes_le();
    let mut bytes = [0u8; 32];
    bytes[..le.len()].copy_from_slice(&le);
    fr_from_bytes(&bytes)
}

/// Convert an integer into a field element, reducing it modulo `p`.
pub fn reduce_biguint_to_fr(value: &BigUint) -> Fr {
    let reduced = value % &*FIELD_MODULUS;
    let le = reduced.to_bytes_le();
    let mut bytes = [0u8; 32];
    bytes[..le.len()].copy_from_slice(&le);
    // A reduced value is always canonical.
    Fr::from_bytes(&bytes).unwrap_or(Fr::ZERO)
}

/// Render as a `0x`-prefixed, zero-padded big-endian hex string.
pub fn fr_to_hex(fr: &Fr) -> String {
    format!("0x{}", hex::encode(fr_to_be_bytes(fr)))
}

/// Parse a field element from `0x` big-endian hex or a decimal string.
pub fn parse_fr(s: &str) -> Result<Fr> {
    fr_from_biguint(&parse_biguint(s)?)
}

pub(crate) fn parse_biguint(s: &str) -> Result<BigUint> {
    let s = s.trim();
    let parsed = match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some("") => Some(BigUint::default()),
        Some(hex_digits) => BigUint::parse_bytes(hex_digits.as_bytes(), 16),
        None => BigUint::parse_bytes(s.as_bytes(), 10),
    };
    parsed.ok_or_else(|| anyhow!("invalid integer literal '{s}'"))
}

/// Serde adapter for `Fr` as a big-endian hex string.
pub mod serde_fr {
    use halo2curves_axiom::bn256::Fr;
    use serde::{de, Deserializer, Serializer};
    use std::fmt;

    pub fn serialize<S>(fr: &Fr, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&super::fr_to_hex(fr))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Fr, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct FrVisitor;

        impl de::Visitor<'_> for FrVisitor {
            type Value = Fr;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("a field element as 0x-hex or decimal string")
            }

            fn visit_str<E>(self, v: &str) -> Result<Self::Value, E>
            where
                E: de::Error,
            {
                super::parse_fr(v).map_err(E::custom)
            }

            fn visit_u64<E>(self, v: u64) -> Result<Self::Value, E>
            where
                E: de::Error,
            {
                Ok(Fr::from(v))
            }
        }

        deserializer.deserialize_any(FrVisitor)
    }
}

/// Serde adapter for `Vec<Fr>`.
pub mod serde_fr_vec {
    use halo2curves_axiom::bn256::Fr;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    #[derive(Serialize, Deserialize)]
    struct Wrapped(#[serde(with = "super::serde_fr")] Fr);

    pub fn serialize<S>(values: &[Fr], serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let wrapped: Vec<Wrapped> = values.iter().copied().map(Wrapped).collect();
        wrapped.serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Vec<Fr>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let wrapped = Vec::<Wrapped>::deserialize(deserializer)?;
        Ok(wrapped.into_iter().map(|w| w.0).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fr_bytes_round_trip() {
        let value = Fr::from(2024u64);
        let bytes = fr_to_bytes(&value);
        assert_eq!(fr_from_bytes(&bytes).unwrap(), value);
    }

    #[test]
    fn modulus_minus_one_is_largest_element() {
        let max = -Fr::ONE;
        assert_eq!(fr_to_biguint(&max) + 1u32, *FIELD_MODULUS);
        assert!(fr_from_biguint(&FIELD_MODULUS).is_err());
        assert_eq!(reduce_biguint_to_fr(&FIELD_MODULUS), Fr::ZERO);
    }

    #[test]
    fn ordering_follows_integer_value() {
        assert_eq!(fr_cmp(&Fr::from(2u64), &Fr::from(5u64)), Ordering::Less);
        assert_eq!(fr_cmp(&(-Fr::ONE), &Fr::from(5u64)), Ordering::Greater);
        assert_eq!(fr_cmp(&Fr::from(7u64), &Fr::from(7u64)), Ordering::Equal);
    }

    #[test]
    fn parse_accepts_hex_and_decimal() {
        assert_eq!(parse_fr("0x10").unwrap(), Fr::from(16u64));
        assert_eq!(parse_fr("12345").unwrap(), Fr::from(12345u64));
        let value = Fr::from(987654321u64);
        assert_eq!(parse_fr(&fr_to_hex(&value)).unwrap(), value);
        assert!(parse_fr("0xzz").is_err());
    }

    #[test]
    fn u64_conversion_rejects_wide_values() {
        assert_eq!(fr_to_u64(&Fr::from(u64::MAX)).unwrap(), u64::MAX);
        assert!(fr_to_u64(&Fr::from_u128(1u128 << 64)).is_err());
    }
}
