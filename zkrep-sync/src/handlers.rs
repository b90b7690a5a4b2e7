//! Event handlers.
//!
//! A handler inspects the current projection and turns one ledger event into
//! a [`Plan`]: either the list of changes to commit, or a local rejection.
//! Handlers never mutate anything, which keeps them trivially atomic and
//! lets the writer commit the plan to storage before touching memory.

use halo2curves_axiom::bn256::Fr;
use tracing::debug;
use zkrep_common::{epoch_key_in_range, fr_to_hex, AttesterId, Settings};
use zkrep_epoch_state::{DataVector, EpochClock, EpochPhase, SealerPolicy, StateError};

use crate::{
    error::{Rejection, RejectionCode, SyncError},
    event::{EventKind, LedgerEvent},
    projection::{AttesterState, Change, Projection},
};

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Plan {
    Apply(Vec<Change>),
    Reject(Rejection),
}

/// Inputs a handler needs besides the projection.
pub struct PlanContext<'a> {
    pub settings: &'a Settings,
    pub sealer_policy: &'a SealerPolicy,
    /// Clock of an attester registered before the synced range, if the
    /// event source knows it.
    pub discovered_clock: Option<EpochClock>,
    /// Locally built ordered-tree root for `EpochSealed` events.
    pub local_epoch_root: Option<Result<Fr, StateError>>,
}

impl<'a> PlanContext<'a> {
    pub fn new(settings: &'a Settings, sealer_policy: &'a SealerPolicy) -> Self {
        Self {
            settings,
            sealer_policy,
            discovered_clock: None,
            local_epoch_root: None,
        }
    }
}

macro_rules! reject {
    ($rejection:expr) => {
        match $rejection {
            Ok(value) => value,
            Err(err) => return Ok(Plan::Reject(err.into())),
        }
    };
}

pub fn plan(projection: &Projection, ctx: &PlanContext<'_>, event: &LedgerEvent) -> Result<Plan, SyncError> {
    let attester_id = &event.attester_id;
    let now = event.block_timestamp;

    if let EventKind::AttesterSignedUp { epoch_length } = &event.kind {
        return Ok(plan_attester_signup(projection, ctx, attester_id, *epoch_length, now));
    }

    let mut changes = Vec::new();
    let discovered;
    let state = match (projection.attester(attester_id), ctx.discovered_clock) {
        (Some(state), _) => state,
        (None, Some(clock)) => {
            debug!("registering attester {} from source clock", attester_id);
            changes.push(Change::AttesterRegistered {
                attester_id: attester_id.clone(),
                clock,
            });
            discovered = AttesterState::new(clock, event.block_number);
            &discovered
        }
        (None, None) => {
            return Ok(Plan::Reject(Rejection::invalid(format!(
                "unknown attester {attester_id}"
            ))))
        }
    };

    let planned = match &event.kind {
        EventKind::AttesterSignedUp { epoch_length } => {
            plan_attester_signup(projection, ctx, attester_id, *epoch_length, now)
        }
        EventKind::UserSignedUp {
            epoch,
            identity_commitment,
            leaf_index,
            initial_data,
        } => plan_user_signup(
            projection,
            ctx.settings,
            state,
            attester_id,
            now,
            *epoch,
            identity_commitment,
            *leaf_index,
            initial_data,
        )?,
        EventKind::Attestation {
            epoch,
            epoch_key,
            field_index,
            value,
        } => plan_attestation(ctx.settings, state, attester_id, now, *epoch, epoch_key, *field_index, *value),
        EventKind::StateTreeLeaf { epoch, index, leaf } => {
            reject!(state.lifecycle.require_active(*epoch, now));
            match plan_leaf(ctx.settings, state, attester_id, *epoch, *index, *leaf)? {
                Ok(leaf_changes) => Plan::Apply(leaf_changes),
                Err(rejection) => Plan::Reject(rejection),
            }
        }
        EventKind::EpochTreeLeaf {
            epoch,
            epoch_key,
            leaf,
        } => {
            let local = state
                .epoch_data(*epoch)
                .and_then(|agg| agg.get(epoch_key))
                .map(|data| zkrep_common::epoch_tree_leaf(epoch_key, data.values()));
            match local {
                Some(local) if local == *leaf => Plan::Apply(Vec::new()),
                Some(local) => {
                    return Err(SyncError::RootMismatch(format!(
                        "epoch tree leaf of key {} in epoch {epoch}: ledger {} local {}",
                        fr_to_hex(epoch_key),
                        fr_to_hex(leaf),
                        fr_to_hex(&local)
                    )))
                }
                None => {
                    return Err(SyncError::RootMismatch(format!(
                        "ledger reports epoch tree leaf for unknown key {} in epoch {epoch}",
                        fr_to_hex(epoch_key)
                    )))
                }
            }
        }
        EventKind::EpochEnded { epoch } => {
            let current = state.lifecycle.current_epoch(now);
            if *epoch >= current {
                Plan::Reject(Rejection::new(
                    RejectionCode::EpochMismatch,
                    format!("epoch {epoch} cannot end during epoch {current}"),
                ))
            } else if state
                .lifecycle
                .record(*epoch)
                .map_or(false, |r| r.ended_observed)
            {
                Plan::Apply(Vec::new())
            } else {
                Plan::Apply(vec![Change::EpochEnded {
                    attester_id: attester_id.clone(),
                    epoch: *epoch,
                }])
            }
        }
        EventKind::EpochSealed {
            epoch,
            root,
            sealer,
        } => plan_seal(ctx, state, attester_id, now, *epoch, root, sealer)?,
        EventKind::UserStateTransitioned {
            from_epoch,
            to_epoch,
            leaf_index,
            state_tree_leaf,
            nullifiers,
        } => plan_transition(
            projection,
            ctx.settings,
            state,
            attester_id,
            now,
            *from_epoch,
            *to_epoch,
            *leaf_index,
            *state_tree_leaf,
            nullifiers,
        )?,
    };

    Ok(match planned {
        Plan::Apply(rest) => {
            changes.extend(rest);
            Plan::Apply(changes)
        }
        rejected => rejected,
    })
}

fn plan_attester_signup(
    projection: &Projection,
    ctx: &PlanContext<'_>,
    attester_id: &AttesterId,
    epoch_length: u64,
    now: u64,
) -> Plan {
    if projection.attester(attester_id).is_some() {
        return Plan::Reject(Rejection::invalid(format!(
            "attester {attester_id} already registered"
        )));
    }
    if let Err(e) = attester_id.check_width(ctx.settings.control.attester_id_bits) {
        return Plan::Reject(Rejection::invalid(e.to_string()));
    }
    match EpochClock::new(now, epoch_length) {
        Ok(clock) => Plan::Apply(vec![Change::AttesterRegistered {
            attester_id: attester_id.clone(),
            clock,
        }]),
        Err(e) => Plan::Reject(e.into()),
    }
}

#[allow(clippy::too_many_arguments)]
fn plan_user_signup(
    projection: &Projection,
    settings: &Settings,
    state: &AttesterState,
    attester_id: &AttesterId,
    now: u64,
    epoch: u64,
    identity_commitment: &Fr,
    leaf_index: u64,
    initial_data: &[Fr],
) -> Result<Plan, SyncError> {
    reject!(state.lifecycle.require_active(epoch, now));
    if !initial_data.is_empty() && initial_data.len() != settings.field_count {
        return Ok(Plan::Reject(Rejection::invalid(format!(
            "initial data has {} fields, expected {}",
            initial_data.len(),
            settings.field_count
        ))));
    }
    if projection.is_signed_up(identity_commitment, attester_id) {
        return Ok(Plan::Reject(Rejection::invalid(format!(
            "identity {} already signed up with attester {attester_id}",
            fr_to_hex(identity_commitment)
        ))));
    }
    if leaf_index >= settings.state_tree_capacity() {
        return Ok(Plan::Reject(
            StateError::TreeFull {
                capacity: settings.state_tree_capacity(),
            }
            .into(),
        ));
    }
    let next = state.state_tree_len(epoch);
    if leaf_index > next {
        return Err(SyncError::LeafIndexMismatch {
            expected: next,
            actual: leaf_index,
        });
    }
    Ok(Plan::Apply(vec![Change::SignUp {
        attester_id: attester_id.clone(),
        epoch,
        commitment: *identity_commitment,
        leaf_index,
    }]))
}

#[allow(clippy::too_many_arguments)]
fn plan_attestation(
    settings: &Settings,
    state: &AttesterState,
    attester_id: &AttesterId,
    now: u64,
    epoch: u64,
    epoch_key: &Fr,
    field_index: usize,
    value: Fr,
) -> Plan {
    if let Err(e) = state.lifecycle.require_active(epoch, now) {
        return Plan::Reject(e.into());
    }
    if field_index >= settings.field_count {
        return Plan::Reject(Rejection::invalid(format!(
            "field index {field_index} out of range"
        )));
    }
    if !epoch_key_in_range(epoch_key, settings) {
        return Plan::Reject(Rejection::invalid(format!(
            "epoch key {} exceeds {} bits",
            fr_to_hex(epoch_key),
            settings.epoch_key_bits
        )));
    }

    let aggregate = state.epoch_data(epoch);
    let existing = aggregate.and_then(|agg| agg.get(epoch_key));
    let first_seen = match existing {
        Some(_) => None,
        None => {
            let known = aggregate.map_or(0, |agg| agg.len()) as u64;
            // Room for the new key plus both sentinels.
            if known + 3 > settings.epoch_tree_capacity() {
                return Plan::Reject(
                    StateError::TreeFull {
                        capacity: settings.epoch_tree_capacity(),
                    }
                    .into(),
                );
            }
            Some(known)
        }
    };

    let nonce = state.attestation_count;
    let mut data = existing
        .cloned()
        .unwrap_or_else(|| DataVector::new(settings.field_count));
    if let Err(e) = data.apply(field_index, value, nonce, settings) {
        return Plan::Reject(e.into());
    }
    let leaf = zkrep_common::epoch_tree_leaf(epoch_key, data.values());
    Plan::Apply(vec![Change::Attestation {
        attester_id: attester_id.clone(),
        epoch,
        epoch_key: *epoch_key,
        field_index,
        value,
        nonce,
        data,
        leaf,
        first_seen,
    }])
}

/// Place a state-tree leaf reported by the ledger.
///
/// An index already filled must carry the same leaf; the next free index is
/// inserted; anything beyond it means an event was missed.
fn plan_leaf(
    settings: &Settings,
    state: &AttesterState,
    attester_id: &AttesterId,
    epoch: u64,
    index: u64,
    leaf: Fr,
) -> Result<Result<Vec<Change>, Rejection>, SyncError> {
    let next = state.state_tree_len(epoch);
    if index < next {
        let existing = state.state_tree(epoch).and_then(|t| t.leaf(index));
        return match existing {
            Some(existing) if existing == leaf => Ok(Ok(Vec::new())),
            _ => Err(SyncError::RootMismatch(format!(
                "state tree leaf {index} of epoch {epoch} differs from the ledger's {}",
                fr_to_hex(&leaf)
            ))),
        };
    }
    if index > next {
        return Err(SyncError::LeafIndexMismatch {
            expected: next,
            actual: index,
        });
    }
    let root = match state.state_tree(epoch) {
        Some(tree) => tree.root_after_insert(leaf),
        None => zkrep_epoch_state::IncrementalMerkleTree::new(settings.state_tree_depth)
            .root_after_insert(leaf),
    };
    match root {
        Ok(root) => Ok(Ok(vec![Change::StateLeaf {
            attester_id: attester_id.clone(),
            epoch,
            index,
            leaf,
            root,
        }])),
        Err(e) => Ok(Err(e.into())),
    }
}

fn plan_seal(
    ctx: &PlanContext<'_>,
    state: &AttesterState,
    attester_id: &AttesterId,
    now: u64,
    epoch: u64,
    root: &Fr,
    sealer: &AttesterId,
) -> Result<Plan, SyncError> {
    if !ctx.sealer_policy.permits(attester_id, sealer) {
        return Ok(Plan::Reject(Rejection::new(
            RejectionCode::Unauthorized,
            format!("{sealer} may not seal epochs of attester {attester_id}"),
        )));
    }
    match state.lifecycle.phase(epoch, now) {
        EpochPhase::Ended => {}
        EpochPhase::Sealed => {
            return Ok(Plan::Reject(Rejection::new(
                RejectionCode::EpochMismatch,
                format!("epoch {epoch} is already sealed"),
            )))
        }
        EpochPhase::Active => {
            return Ok(Plan::Reject(Rejection::new(
                RejectionCode::EpochMismatch,
                format!("epoch {epoch} is still active"),
            )))
        }
    }
    let local = match &ctx.local_epoch_root {
        Some(Ok(local)) => *local,
        Some(Err(e)) => {
            return Err(SyncError::RootMismatch(format!(
                "cannot rebuild epoch tree of epoch {epoch}: {e}"
            )))
        }
        None => {
            return Err(SyncError::RootMismatch(format!(
                "no local epoch tree for epoch {epoch}"
            )))
        }
    };
    if local != *root {
        return Err(SyncError::RootMismatch(format!(
            "sealed root of attester {attester_id} epoch {epoch}: ledger {} local {}",
            fr_to_hex(root),
            fr_to_hex(&local)
        )));
    }
    Ok(Plan::Apply(vec![Change::EpochSealed {
        attester_id: attester_id.clone(),
        epoch,
        root: *root,
    }]))
}

#[allow(clippy::too_many_arguments)]
fn plan_transition(
    projection: &Projection,
    settings: &Settings,
    state: &AttesterState,
    attester_id: &AttesterId,
    now: u64,
    from_epoch: u64,
    to_epoch: u64,
    leaf_index: u64,
    state_tree_leaf: Fr,
    nullifiers: &[Fr],
) -> Result<Plan, SyncError> {
    reject!(state.lifecycle.require_sealed(from_epoch, now));
    if to_epoch <= from_epoch {
        return Ok(Plan::Reject(Rejection::new(
            RejectionCode::EpochMismatch,
            format!("transition from epoch {from_epoch} to {to_epoch} does not move forward"),
        )));
    }
    reject!(state.lifecycle.require_active(to_epoch, now));
    if nullifiers.is_empty() {
        return Ok(Plan::Reject(Rejection::invalid("transition without nullifiers")));
    }
    reject!(projection.nullifiers().check_all(nullifiers));

    let mut changes = vec![Change::Nullifiers {
        attester_id: attester_id.clone(),
        epoch: from_epoch,
        values: nullifiers.to_vec(),
    }];
    match plan_leaf(settings, state, attester_id, to_epoch, leaf_index, state_tree_leaf)? {
        Ok(leaf_changes) => changes.extend(leaf_changes),
        Err(rejection) => return Ok(Plan::Reject(rejection)),
    }
    changes.push(Change::Transition {
        attester_id: attester_id.clone(),
        from_epoch,
        to_epoch,
        leaf_index,
        leaf: state_tree_leaf,
    });
    Ok(Plan::Apply(changes))
}
