use std::{fmt, str::FromStr};

use anyhow::{ensure, Result};
use halo2curves_axiom::bn256::Fr;
use num_bigint::BigUint;
use serde::{de, Deserialize, Deserializer, Serialize, Serializer};

use crate::field::{fr_to_biguint, parse_biguint, reduce_biguint_to_fr};

/// Attester identifier. Attesters are contract addresses, so ids are up to
/// 160 bits wide and do not fit a machine word.
#[derive(Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct AttesterId(BigUint);

impl AttesterId {
    pub fn new(value: BigUint) -> Self {
        Self(value)
    }

    pub fn as_biguint(&self) -> &BigUint {
        &self.0
    }

    pub fn bits(&self) -> u64 {
        self.0.bits()
    }

    /// Field representation. Ids are checked against the control layout
    /// width before use, so reduction never changes a valid id.
    pub fn to_fr(&self) -> Fr {
        reduce_biguint_to_fr(&self.0)
    }

    pub fn from_fr(fr: &Fr) -> Self {
        Self(fr_to_biguint(fr))
    }

    /// Ensure the id fits in `width` bits of a control field.
    pub fn check_width(&self, width: u32) -> Result<()> {
        ensure!(
            self.0.bits() <= u64::from(width),
            "attester id {} wider than {} bits",
            self,
            width
        );
        Ok(())
    }
}

impl From<u64> for AttesterId {
    fn from(value: u64) -> Self {
        Self(BigUint::from(value))
    }
}

impl From<BigUint> for AttesterId {
    fn from(value: BigUint) -> Self {
        Self(value)
    }
}

impl fmt::Display for AttesterId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for AttesterId {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        parse_biguint(s).map(Self)
    }
}

impl Serialize for AttesterId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0.to_str_radix(10))
    }
}

impl<'de> Deserialize<'de> for AttesterId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct IdVisitor;

        impl de::Visitor<'_> for IdVisitor {
            type Value = AttesterId;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("an attester id as decimal or 0x-hex")
            }

            fn visit_str<E: de::Error>(self, v: &str) -> Result<Self::Value, E> {
                v.parse().map_err(E::custom)
            }

            fn visit_u64<E: de::Error>(self, v: u64) -> Result<Self::Value, E> {
                Ok(AttesterId::from(v))
            }
        }

        deserializer.deserialize_any(IdVisitor)
    }
}
