//! SQLite persistence for the synchronizer.
//!
//! Stores:
//! - the event log with each event's digest and outcome
//! - attesters, epochs, state-tree leaves and roots
//! - epoch-key aggregates and the raw attestations behind them
//! - consumed nullifiers and user state transitions
//! - the sync cursor
//!
//! Every event is committed in one transaction together with its changes and
//! the cursor, so a crash never leaves a half-applied event behind.

use std::{path::Path, sync::Mutex};

use halo2curves_axiom::bn256::Fr;
use rusqlite::{params, Connection, OptionalExtension, Transaction};
use tracing::{debug, info};
use zkrep_common::{fr_from_bytes, fr_to_bytes, AttesterId, Settings};
use zkrep_epoch_state::{DataVector, EpochClock, EpochRecord};

use crate::{
    error::{Rejection, RejectionCode, SyncError},
    event::{EventId, LedgerEvent},
    projection::{AttesterState, Change, Projection},
};

/// What happened to an ingested event.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum EventOutcome {
    Applied,
    Rejected(Rejection),
    /// The event belongs to an attester this node does not track.
    Ignored,
}

impl EventOutcome {
    fn label(&self) -> &'static str {
        match self {
            EventOutcome::Applied => "applied",
            EventOutcome::Rejected(_) => "rejected",
            EventOutcome::Ignored => "ignored",
        }
    }
}

pub struct ProjectionDb {
    conn: Mutex<Connection>,
}

fn fr_column(bytes: Vec<u8>) -> Result<Fr, SyncError> {
    let raw: [u8; 32] = bytes
        .as_slice()
        .try_into()
        .map_err(|_| SyncError::Storage(format!("field element column has {} bytes", bytes.len())))?;
    fr_from_bytes(&raw).map_err(|e| SyncError::Storage(e.to_string()))
}

fn attester_column(text: String) -> Result<AttesterId, SyncError> {
    text.parse()
        .map_err(|e| SyncError::Storage(format!("attester id {text:?}: {e}")))
}

fn encode_data(values: &[Fr]) -> Vec<u8> {
    values.iter().flat_map(fr_to_bytes).collect()
}

fn decode_data(bytes: &[u8]) -> Result<Vec<Fr>, SyncError> {
    if bytes.len() % 32 != 0 {
        return Err(SyncError::Storage(format!(
            "data column has {} bytes",
            bytes.len()
        )));
    }
    bytes.chunks(32).map(|chunk| fr_column(chunk.to_vec())).collect()
}

impl ProjectionDb {
    /// Open or create the database at `path`.
    ///
    /// A database created under different settings is refused.
    pub fn open(path: impl AsRef<Path>, settings: &Settings) -> Result<Self, SyncError> {
        let conn = Connection::open(path.as_ref())
            .map_err(|e| SyncError::Storage(format!("database open failed: {e}")))?;
        let db = Self {
            conn: Mutex::new(conn),
        };
        db.init_schema(settings)?;
        info!("opened projection database at {:?}", path.as_ref());
        Ok(db)
    }

    pub fn in_memory(settings: &Settings) -> Result<Self, SyncError> {
        let conn = Connection::open_in_memory()
            .map_err(|e| SyncError::Storage(format!("in-memory db failed: {e}")))?;
        let db = Self {
            conn: Mutex::new(conn),
        };
        db.init_schema(settings)?;
        Ok(db)
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>, SyncError> {
        self.conn
            .lock()
            .map_err(|_| SyncError::Storage("database mutex poisoned".into()))
    }

    fn init_schema(&self, settings: &Settings) -> Result<(), SyncError> {
        let conn = self.lock()?;
        conn.execute_batch(
            r#"
            PRAGMA foreign_keys = ON;

            CREATE TABLE IF NOT EXISTS meta (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS sync_state (
                id INTEGER PRIMARY KEY CHECK (id = 1),
                synced_block INTEGER,
                last_block INTEGER,
                last_log_index INTEGER
            );

            INSERT OR IGNORE INTO sync_state (id) VALUES (1);

            CREATE TABLE IF NOT EXISTS event_log (
                block_number INTEGER NOT NULL,
                log_index INTEGER NOT NULL,
                attester_id TEXT NOT NULL,
                kind TEXT NOT NULL,
                digest BLOB NOT NULL,
                outcome TEXT NOT NULL,
                code TEXT,
                detail TEXT,
                PRIMARY KEY (block_number, log_index)
            );

            CREATE TABLE IF NOT EXISTS attesters (
                attester_id TEXT PRIMARY KEY,
                start_timestamp INTEGER NOT NULL,
                epoch_length INTEGER NOT NULL,
                registered_block INTEGER NOT NULL,
                attestation_count INTEGER NOT NULL DEFAULT 0
            );

            CREATE TABLE IF NOT EXISTS user_signups (
                commitment BLOB NOT NULL,
                attester_id TEXT NOT NULL REFERENCES attesters(attester_id),
                epoch INTEGER NOT NULL,
                leaf_index INTEGER NOT NULL,
                block_number INTEGER NOT NULL,
                UNIQUE (commitment, attester_id)
            );

            CREATE TABLE IF NOT EXISTS state_tree_leaves (
                attester_id TEXT NOT NULL REFERENCES attesters(attester_id),
                epoch INTEGER NOT NULL,
                leaf_index INTEGER NOT NULL,
                leaf BLOB NOT NULL,
                PRIMARY KEY (attester_id, epoch, leaf_index)
            );

            CREATE TABLE IF NOT EXISTS state_tree_roots (
                attester_id TEXT NOT NULL REFERENCES attesters(attester_id),
                epoch INTEGER NOT NULL,
                root BLOB NOT NULL,
                PRIMARY KEY (attester_id, epoch, root)
            );

            CREATE TABLE IF NOT EXISTS attestations (
                block_number INTEGER NOT NULL,
                log_index INTEGER NOT NULL,
                attester_id TEXT NOT NULL REFERENCES attesters(attester_id),
                epoch INTEGER NOT NULL,
                epoch_key BLOB NOT NULL,
                field_index INTEGER NOT NULL,
                value BLOB NOT NULL,
                nonce INTEGER NOT NULL,
                PRIMARY KEY (block_number, log_index)
            );

            CREATE TABLE IF NOT EXISTS epoch_tree_leaves (
                attester_id TEXT NOT NULL REFERENCES attesters(attester_id),
                epoch INTEGER NOT NULL,
                epoch_key BLOB NOT NULL,
                data BLOB NOT NULL,
                leaf BLOB NOT NULL,
                first_seen INTEGER NOT NULL,
                PRIMARY KEY (attester_id, epoch, epoch_key)
            );

            CREATE TABLE IF NOT EXISTS epochs (
                attester_id TEXT NOT NULL REFERENCES attesters(attester_id),
                epoch INTEGER NOT NULL,
                ended INTEGER NOT NULL DEFAULT 0,
                sealed_root BLOB,
                sealed_block INTEGER,
                PRIMARY KEY (attester_id, epoch)
            );

            CREATE TABLE IF NOT EXISTS nullifiers (
                value BLOB PRIMARY KEY,
                consumed_at_block INTEGER NOT NULL,
                attester_id TEXT NOT NULL,
                epoch INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS transitions (
                block_number INTEGER NOT NULL,
                log_index INTEGER NOT NULL,
                attester_id TEXT NOT NULL REFERENCES attesters(attester_id),
                from_epoch INTEGER NOT NULL,
                to_epoch INTEGER NOT NULL,
                leaf_index INTEGER NOT NULL,
                leaf BLOB NOT NULL,
                PRIMARY KEY (block_number, log_index)
            );

            CREATE INDEX IF NOT EXISTS idx_epoch_leaves_order
                ON epoch_tree_leaves(attester_id, epoch, first_seen);
            "#,
        )
        .map_err(|e| SyncError::Storage(format!("schema init failed: {e}")))?;

        let fingerprint = settings.fingerprint();
        conn.execute(
            "INSERT OR IGNORE INTO meta (key, value) VALUES ('settings_fingerprint', ?1)",
            params![fingerprint],
        )?;
        let stored: String = conn.query_row(
            "SELECT value FROM meta WHERE key = 'settings_fingerprint'",
            [],
            |row| row.get(0),
        )?;
        if stored != fingerprint {
            return Err(SyncError::Config(format!(
                "database was created with settings {stored}, configured settings are {fingerprint}"
            )));
        }
        Ok(())
    }

    /// Persist an event, its outcome and its changes, and move the cursor.
    pub fn commit_event(
        &self,
        event: &LedgerEvent,
        outcome: &EventOutcome,
        changes: &[Change],
    ) -> Result<(), SyncError> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        let (code, detail) = match outcome {
            EventOutcome::Rejected(r) => (Some(r.code.as_str()), Some(r.detail.as_str())),
            _ => (None, None),
        };
        tx.execute(
            r#"
            INSERT INTO event_log
                (block_number, log_index, attester_id, kind, digest, outcome, code, detail)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
            "#,
            params![
                event.block_number as i64,
                event.log_index as i64,
                event.attester_id.to_string(),
                event.kind.name(),
                event.digest().as_slice(),
                outcome.label(),
                code,
                detail,
            ],
        )?;
        for change in changes {
            write_change(&tx, event, change)?;
        }
        tx.execute(
            "UPDATE sync_state SET last_block = ?1, last_log_index = ?2 WHERE id = 1",
            params![event.block_number as i64, event.log_index as i64],
        )?;
        tx.commit()?;
        debug!(
            "committed {} event {} ({}, {} changes)",
            event.kind.name(),
            event.id(),
            outcome.label(),
            changes.len()
        );
        Ok(())
    }

    pub fn set_synced_block(&self, block: u64) -> Result<(), SyncError> {
        self.lock()?.execute(
            "UPDATE sync_state SET synced_block = ?1 WHERE id = 1",
            params![block as i64],
        )?;
        Ok(())
    }

    pub fn synced_block(&self) -> Result<Option<u64>, SyncError> {
        let block: Option<i64> = self.lock()?.query_row(
            "SELECT synced_block FROM sync_state WHERE id = 1",
            [],
            |row| row.get(0),
        )?;
        Ok(block.map(|b| b as u64))
    }

    /// Digest of an already ingested event.
    pub fn event_digest(&self, id: EventId) -> Result<Option<[u8; 32]>, SyncError> {
        let digest: Option<Vec<u8>> = self
            .lock()?
            .query_row(
                "SELECT digest FROM event_log WHERE block_number = ?1 AND log_index = ?2",
                params![id.block_number as i64, id.log_index as i64],
                |row| row.get(0),
            )
            .optional()?;
        digest
            .map(|bytes| {
                bytes
                    .as_slice()
                    .try_into()
                    .map_err(|_| SyncError::Storage("event digest is not 32 bytes".into()))
            })
            .transpose()
    }

    pub fn event_outcome(&self, id: EventId) -> Result<Option<EventOutcome>, SyncError> {
        let row: Option<(String, Option<String>, Option<String>)> = self
            .lock()?
            .query_row(
                "SELECT outcome, code, detail FROM event_log WHERE block_number = ?1 AND log_index = ?2",
                params![id.block_number as i64, id.log_index as i64],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )
            .optional()?;
        let Some((outcome, code, detail)) = row else {
            return Ok(None);
        };
        let outcome = match outcome.as_str() {
            "applied" => EventOutcome::Applied,
            "ignored" => EventOutcome::Ignored,
            "rejected" => {
                let code = code
                    .as_deref()
                    .and_then(RejectionCode::parse)
                    .ok_or_else(|| SyncError::Storage(format!("bad rejection code {code:?}")))?;
                EventOutcome::Rejected(Rejection::new(code, detail.unwrap_or_default()))
            }
            other => return Err(SyncError::Storage(format!("bad event outcome {other:?}"))),
        };
        Ok(Some(outcome))
    }

    /// Rebuild the in-memory projection from the tables.
    pub fn load_projection(&self, settings: &Settings) -> Result<Projection, SyncError> {
        let conn = self.lock()?;
        let mut projection = Projection::new(settings.clone());

        let mut stmt = conn.prepare(
            "SELECT attester_id, start_timestamp, epoch_length, registered_block, attestation_count FROM attesters",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, i64>(1)?,
                row.get::<_, i64>(2)?,
                row.get::<_, i64>(3)?,
                row.get::<_, i64>(4)?,
            ))
        })?;
        for row in rows {
            let (id, start, length, block, count) = row?;
            let clock = EpochClock::new(start as u64, length as u64)
                .map_err(|e| SyncError::Storage(e.to_string()))?;
            let mut state = AttesterState::new(clock, block as u64);
            state.attestation_count = count as u64;
            projection.register(attester_column(id)?, state);
        }

        let mut stmt = conn.prepare("SELECT attester_id, epoch, ended, sealed_root FROM epochs")?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, i64>(1)?,
                row.get::<_, bool>(2)?,
                row.get::<_, Option<Vec<u8>>>(3)?,
            ))
        })?;
        for row in rows {
            let (id, epoch, ended, sealed) = row?;
            let record = EpochRecord {
                ended_observed: ended,
                sealed_root: sealed.map(fr_column).transpose()?,
            };
            projection
                .attester_mut(&attester_column(id)?)?
                .lifecycle
                .restore(epoch as u64, record);
        }

        let depth = settings.state_tree_depth;
        let mut stmt = conn.prepare(
            "SELECT attester_id, epoch, leaf_index, leaf FROM state_tree_leaves ORDER BY attester_id, epoch, leaf_index",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, i64>(1)?,
                row.get::<_, i64>(2)?,
                row.get::<_, Vec<u8>>(3)?,
            ))
        })?;
        for row in rows {
            let (id, epoch, index, leaf) = row?;
            projection.attester_mut(&attester_column(id)?)?.restore_leaf(
                epoch as u64,
                index as u64,
                fr_column(leaf)?,
                depth,
            )?;
        }

        let mut stmt = conn.prepare("SELECT attester_id, epoch, root FROM state_tree_roots")?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, i64>(1)?,
                row.get::<_, Vec<u8>>(2)?,
            ))
        })?;
        for row in rows {
            let (id, epoch, root) = row?;
            projection
                .attester_mut(&attester_column(id)?)?
                .restore_root(epoch as u64, &fr_column(root)?);
        }

        let mut stmt = conn.prepare(
            "SELECT attester_id, epoch, epoch_key, data FROM epoch_tree_leaves ORDER BY attester_id, epoch, first_seen",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, i64>(1)?,
                row.get::<_, Vec<u8>>(2)?,
                row.get::<_, Vec<u8>>(3)?,
            ))
        })?;
        for row in rows {
            let (id, epoch, key, data) = row?;
            let data = DataVector::from_values(decode_data(&data)?, settings)
                .map_err(|e| SyncError::Storage(e.to_string()))?;
            projection
                .attester_mut(&attester_column(id)?)?
                .restore_aggregate(epoch as u64, fr_column(key)?, data);
        }

        let mut stmt = conn.prepare("SELECT commitment, attester_id FROM user_signups")?;
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, Vec<u8>>(0)?, row.get::<_, String>(1)?))
        })?;
        for row in rows {
            let (commitment, id) = row?;
            projection.restore_signup(&fr_column(commitment)?, attester_column(id)?);
        }

        let mut stmt = conn.prepare("SELECT value, consumed_at_block FROM nullifiers")?;
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, Vec<u8>>(0)?, row.get::<_, i64>(1)?))
        })?;
        for row in rows {
            let (value, block) = row?;
            projection.restore_nullifier(&fr_column(value)?, block as u64)?;
        }

        let (synced, last_block, last_log): (Option<i64>, Option<i64>, Option<i64>) = conn.query_row(
            "SELECT synced_block, last_block, last_log_index FROM sync_state WHERE id = 1",
            [],
            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
        )?;
        projection.synced_block = synced.map(|b| b as u64);
        projection.cursor = match (last_block, last_log) {
            (Some(block_number), Some(log_index)) => Some(EventId {
                block_number: block_number as u64,
                log_index: log_index as u64,
            }),
            _ => None,
        };

        info!(
            "loaded projection: {} attesters, {} nullifiers, cursor {:?}",
            projection.attesters().count(),
            projection.nullifiers().len(),
            projection.cursor
        );
        Ok(projection)
    }
}

fn write_change(tx: &Transaction<'_>, event: &LedgerEvent, change: &Change) -> Result<(), SyncError> {
    let block = event.block_number as i64;
    let log = event.log_index as i64;
    match change {
        Change::AttesterRegistered { attester_id, clock } => {
            tx.execute(
                r#"
                INSERT INTO attesters (attester_id, start_timestamp, epoch_length, registered_block)
                VALUES (?1, ?2, ?3, ?4)
                "#,
                params![
                    attester_id.to_string(),
                    clock.start_timestamp as i64,
                    clock.epoch_length as i64,
                    block,
                ],
            )?;
        }
        Change::SignUp {
            attester_id,
            epoch,
            commitment,
            leaf_index,
        } => {
            tx.execute(
                r#"
                INSERT INTO user_signups (commitment, attester_id, epoch, leaf_index, block_number)
                VALUES (?1, ?2, ?3, ?4, ?5)
                "#,
                params![
                    fr_to_bytes(commitment).as_slice(),
                    attester_id.to_string(),
                    *epoch as i64,
                    *leaf_index as i64,
                    block,
                ],
            )?;
        }
        Change::StateLeaf {
            attester_id,
            epoch,
            index,
            leaf,
            root,
        } => {
            tx.execute(
                "INSERT INTO state_tree_leaves (attester_id, epoch, leaf_index, leaf) VALUES (?1, ?2, ?3, ?4)",
                params![
                    attester_id.to_string(),
                    *epoch as i64,
                    *index as i64,
                    fr_to_bytes(leaf).as_slice(),
                ],
            )?;
            tx.execute(
                "INSERT OR IGNORE INTO state_tree_roots (attester_id, epoch, root) VALUES (?1, ?2, ?3)",
                params![attester_id.to_string(), *epoch as i64, fr_to_bytes(root).as_slice()],
            )?;
        }
        Change::Attestation {
            attester_id,
            epoch,
            epoch_key,
            field_index,
            value,
            nonce,
            data,
            leaf,
            first_seen,
        } => {
            tx.execute(
                r#"
                INSERT INTO attestations
                    (block_number, log_index, attester_id, epoch, epoch_key, field_index, value, nonce)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
                "#,
                params![
                    block,
                    log,
                    attester_id.to_string(),
                    *epoch as i64,
                    fr_to_bytes(epoch_key).as_slice(),
                    *field_index as i64,
                    fr_to_bytes(value).as_slice(),
                    *nonce as i64,
                ],
            )?;
            let encoded = encode_data(data.values());
            match first_seen {
                Some(position) => {
                    tx.execute(
                        r#"
                        INSERT INTO epoch_tree_leaves
                            (attester_id, epoch, epoch_key, data, leaf, first_seen)
                        VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                        "#,
                        params![
                            attester_id.to_string(),
                            *epoch as i64,
                            fr_to_bytes(epoch_key).as_slice(),
                            encoded,
                            fr_to_bytes(leaf).as_slice(),
                            *position as i64,
                        ],
                    )?;
                }
                None => {
                    let updated = tx.execute(
                        r#"
                        UPDATE epoch_tree_leaves SET data = ?4, leaf = ?5
                        WHERE attester_id = ?1 AND epoch = ?2 AND epoch_key = ?3
                        "#,
                        params![
                            attester_id.to_string(),
                            *epoch as i64,
                            fr_to_bytes(epoch_key).as_slice(),
                            encoded,
                            fr_to_bytes(leaf).as_slice(),
                        ],
                    )?;
                    if updated != 1 {
                        return Err(SyncError::Inconsistent(format!(
                            "no stored aggregate for epoch key in epoch {epoch}"
                        )));
                    }
                }
            }
            tx.execute(
                "UPDATE attesters SET attestation_count = ?2 WHERE attester_id = ?1",
                params![attester_id.to_string(), (*nonce + 1) as i64],
            )?;
        }
        Change::EpochEnded { attester_id, epoch } => {
            tx.execute(
                r#"
                INSERT INTO epochs (attester_id, epoch, ended) VALUES (?1, ?2, 1)
                ON CONFLICT (attester_id, epoch) DO UPDATE SET ended = 1
                "#,
                params![attester_id.to_string(), *epoch as i64],
            )?;
        }
        Change::EpochSealed {
            attester_id,
            epoch,
            root,
        } => {
            tx.execute(
                r#"
                INSERT INTO epochs (attester_id, epoch, ended, sealed_root, sealed_block)
                VALUES (?1, ?2, 1, ?3, ?4)
                ON CONFLICT (attester_id, epoch) DO UPDATE
                    SET ended = 1, sealed_root = excluded.sealed_root, sealed_block = excluded.sealed_block
                "#,
                params![
                    attester_id.to_string(),
                    *epoch as i64,
                    fr_to_bytes(root).as_slice(),
                    block,
                ],
            )?;
        }
        Change::Nullifiers {
            attester_id,
            epoch,
            values,
        } => {
            for value in values {
                tx.execute(
                    "INSERT INTO nullifiers (value, consumed_at_block, attester_id, epoch) VALUES (?1, ?2, ?3, ?4)",
                    params![
                        fr_to_bytes(value).as_slice(),
                        block,
                        attester_id.to_string(),
                        *epoch as i64,
                    ],
                )?;
            }
        }
        Change::Transition {
            attester_id,
            from_epoch,
            to_epoch,
            leaf_index,
            leaf,
        } => {
            tx.execute(
                r#"
                INSERT INTO transitions
                    (block_number, log_index, attester_id, from_epoch, to_epoch, leaf_index, leaf)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                "#,
                params![
                    block,
                    log,
                    attester_id.to_string(),
                    *from_epoch as i64,
                    *to_epoch as i64,
                    *leaf_index as i64,
                    fr_to_bytes(leaf).as_slice(),
                ],
            )?;
        }
    }
    Ok(())
}
