//! Protocol parameters shared by the codec, the accumulators and the
//! synchronizer. A projection database is bound to the settings it was
//! created with through [`Settings::fingerprint`].

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::field::SAFE_FIELD_BITS;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SettingsError {
    #[error("invalid settings: {0}")]
    Invalid(String),
}

/// Bit widths of the packed control-field members.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ControlLayout {
    pub epoch_key_nonce_bits: u32,
    pub epoch_bits: u32,
    pub attester_id_bits: u32,
    pub reveal_nonce_bits: u32,
    pub chain_id_bits: u32,
    pub rep_bits: u32,
}

impl Default for ControlLayout {
    fn default() -> Self {
        Self {
            epoch_key_nonce_bits: 8,
            epoch_bits: 48,
            attester_id_bits: 160,
            reveal_nonce_bits: 1,
            chain_id_bits: 36,
            rep_bits: 64,
        }
    }
}

impl ControlLayout {
    /// `[nonce, epoch, attester_id, reveal_nonce, chain_id]`
    pub fn epoch_key_widths(&self) -> [u32; 5] {
        [
            self.epoch_key_nonce_bits,
            self.epoch_bits,
            self.attester_id_bits,
            self.reveal_nonce_bits,
            self.chain_id_bits,
        ]
    }

    /// `[min_rep, max_rep, prove_min_rep, prove_max_rep, prove_zero_rep, prove_graffiti]`
    pub fn reputation_widths(&self) -> [u32; 6] {
        [self.rep_bits, self.rep_bits, 1, 1, 1, 1]
    }

    /// `[attester_id, epoch, chain_id]`
    pub fn signup_widths(&self) -> [u32; 3] {
        [self.attester_id_bits, self.epoch_bits, self.chain_id_bits]
    }

    /// `[attester_id, to_epoch, chain_id]`
    pub fn transition_widths(&self) -> [u32; 3] {
        [self.attester_id_bits, self.epoch_bits, self.chain_id_bits]
    }

    fn validate(&self) -> Result<(), SettingsError> {
        let words: [(&str, u32); 4] = [
            ("epoch key control", self.epoch_key_widths().iter().sum()),
            ("reputation control", self.reputation_widths().iter().sum()),
            ("signup control", self.signup_widths().iter().sum()),
            ("transition control", self.transition_widths().iter().sum()),
        ];
        for (name, total) in words {
            if total > SAFE_FIELD_BITS {
                return Err(SettingsError::Invalid(format!(
                    "{name} needs {total} bits, more than {SAFE_FIELD_BITS}"
                )));
            }
        }
        for (name, width) in [
            ("rep_bits", self.rep_bits),
            ("epoch_bits", self.epoch_bits),
            ("chain_id_bits", self.chain_id_bits),
        ] {
            if width == 0 || width > 64 {
                return Err(SettingsError::Invalid(format!(
                    "{name} must be in 1..=64, got {width}"
                )));
            }
        }
        if self.epoch_key_nonce_bits == 0 || self.epoch_key_nonce_bits > 32 {
            return Err(SettingsError::Invalid(format!(
                "epoch_key_nonce_bits must be in 1..=32, got {}",
                self.epoch_key_nonce_bits
            )));
        }
        if self.attester_id_bits == 0 || self.reveal_nonce_bits == 0 {
            return Err(SettingsError::Invalid(
                "attester_id_bits and reveal_nonce_bits must be non-zero".into(),
            ));
        }
        Ok(())
    }
}

/// Protocol settings.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub state_tree_depth: u32,
    pub epoch_tree_depth: u32,
    /// Length of every data vector.
    pub field_count: usize,
    /// Leading data-vector entries that are summed; the rest are replacement fields.
    pub sum_field_count: usize,
    pub repl_nonce_bits: u32,
    pub num_epoch_key_nonce_per_epoch: usize,
    pub epoch_key_bits: u32,
    pub chain_id: u64,
    pub control: ControlLayout,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            state_tree_depth: 12,
            epoch_tree_depth: 10,
            field_count: 6,
            sum_field_count: 4,
            repl_nonce_bits: 48,
            num_epoch_key_nonce_per_epoch: 3,
            epoch_key_bits: SAFE_FIELD_BITS,
            chain_id: 0,
            control: ControlLayout::default(),
        }
    }
}

impl Settings {
    pub fn validate(&self) -> Result<(), SettingsError> {
        self.control.validate()?;
        for (name, depth) in [
            ("state_tree_depth", self.state_tree_depth),
            ("epoch_tree_depth", self.epoch_tree_depth),
        ] {
            if !(1..=32).contains(&depth) {
                return Err(SettingsError::Invalid(format!(
                    "{name} must be in 1..=32, got {depth}"
                )));
            }
        }
        if self.field_count == 0 || self.sum_field_count > self.field_count {
            return Err(SettingsError::Invalid(format!(
                "sum_field_count {} must not exceed field_count {} (which must be non-zero)",
                self.sum_field_count, self.field_count
            )));
        }
        if self.repl_nonce_bits == 0 || self.repl_nonce_bits >= SAFE_FIELD_BITS {
            return Err(SettingsError::Invalid(format!(
                "repl_nonce_bits must be in 1..{SAFE_FIELD_BITS}, got {}",
                self.repl_nonce_bits
            )));
        }
        if self.epoch_key_bits == 0 || self.epoch_key_bits > SAFE_FIELD_BITS {
            return Err(SettingsError::Invalid(format!(
                "epoch_key_bits must be in 1..={SAFE_FIELD_BITS}, got {}",
                self.epoch_key_bits
            )));
        }
        let max_nonces = 1usize << self.control.epoch_key_nonce_bits.min(32);
        if self.num_epoch_key_nonce_per_epoch == 0 || self.num_epoch_key_nonce_per_epoch > max_nonces
        {
            return Err(SettingsError::Invalid(format!(
                "num_epoch_key_nonce_per_epoch must be in 1..={max_nonces}"
            )));
        }
        if self.chain_id_overflows() {
            return Err(SettingsError::Invalid(format!(
                "chain_id {} does not fit in {} bits",
                self.chain_id, self.control.chain_id_bits
            )));
        }
        Ok(())
    }

    fn chain_id_overflows(&self) -> bool {
        self.control.chain_id_bits < 64 && self.chain_id >> self.control.chain_id_bits != 0
    }

    /// Width of the value part of a replacement field.
    pub fn repl_field_bits(&self) -> u32 {
        SAFE_FIELD_BITS - self.repl_nonce_bits
    }

    pub fn state_tree_capacity(&self) -> u64 {
        1u64 << self.state_tree_depth
    }

    pub fn epoch_tree_capacity(&self) -> u64 {
        1u64 << self.epoch_tree_depth
    }

    pub fn is_sum_field(&self, field_index: usize) -> bool {
        field_index < self.sum_field_count
    }

    /// Stable identifier of these settings, hex-encoded blake3 of the JSON form.
    pub fn fingerprint(&self) -> String {
        let canonical = serde_json::to_vec(self).unwrap_or_default();
        blake3::hash(&canonical).to_hex().to_string()
    }
}
