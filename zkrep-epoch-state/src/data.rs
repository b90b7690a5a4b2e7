//! Per-epoch-key data vectors.

use halo2curves_axiom::{bn256::Fr, ff::Field};
use serde::{Deserialize, Serialize};
use zkrep_common::{
    epoch_tree_leaf, pack_replacement, serde_fr, serde_fr_vec, unpack_replacement, Settings,
};

use crate::StateError;

/// Aggregated data of one epoch key. Sum fields hold plain values; replacement
/// fields hold `(value << repl_nonce_bits) + nonce`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataVector {
    #[serde(with = "serde_fr_vec")]
    values: Vec<Fr>,
}

impl DataVector {
    pub fn new(field_count: usize) -> Self {
        Self {
            values: vec![Fr::ZERO; field_count],
        }
    }

    pub fn from_values(values: Vec<Fr>, settings: &Settings) -> Result<Self, StateError> {
        if values.len() != settings.field_count {
            return Err(StateError::Invalid(format!(
                "data vector has {} entries, expected {}",
                values.len(),
                settings.field_count
            )));
        }
        Ok(Self { values })
    }

    pub fn values(&self) -> &[Fr] {
        &self.values
    }

    pub fn get(&self, index: usize) -> Option<Fr> {
        self.values.get(index).copied()
    }

    /// Apply one attestation. `nonce` orders writes to replacement fields;
    /// a write whose nonce is not newer than the stored one is ignored.
    /// Returns whether the vector changed.
    pub fn apply(
        &mut self,
        field_index: usize,
        value: Fr,
        nonce: u64,
        settings: &Settings,
    ) -> Result<bool, StateError> {
        if field_index >= self.values.len() {
            return Err(StateError::Invalid(format!(
                "field index {} out of range for {} fields",
                field_index,
                self.values.len()
            )));
        }
        if settings.is_sum_field(field_index) {
            self.values[field_index] += value;
            return Ok(value != Fr::ZERO);
        }
        let packed = pack_replacement(&value, nonce, settings)
            .map_err(|e| StateError::Invalid(e.to_string()))?;
        let current = self.values[field_index];
        let (_, current_nonce) = unpack_replacement(&current, settings);
        if current == Fr::ZERO || nonce > current_nonce {
            self.values[field_index] = packed;
            Ok(packed != current)
        } else {
            Ok(false)
        }
    }

    /// Values with replacement fields stripped of their nonce.
    pub fn unpacked(&self, settings: &Settings) -> Vec<Fr> {
        self.values
            .iter()
            .enumerate()
            .map(|(i, v)| {
                if settings.is_sum_field(i) {
                    *v
                } else {
                    unpack_replacement(v, settings).0
                }
            })
            .collect()
    }
}

/// `(epoch_key, data)` pair collected while an epoch is active.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EpochTreePreimage {
    #[serde(with = "serde_fr")]
    pub epoch_key: Fr,
    pub data: DataVector,
}

impl EpochTreePreimage {
    pub fn leaf(&self) -> Fr {
        epoch_tree_leaf(&self.epoch_key, self.data.values())
    }
}
