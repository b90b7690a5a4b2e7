//! Event sources the synchronizer pulls from.

use std::{collections::BTreeMap, io::SeekFrom, path::PathBuf, sync::Arc};

use async_trait::async_trait;
use tokio::{
    fs::File,
    io::{AsyncReadExt, AsyncSeekExt},
    sync::{Mutex, MutexGuard, RwLock},
};
use tracing::{debug, warn};
use zkrep_common::AttesterId;
use zkrep_epoch_state::EpochClock;

use crate::{
    error::SyncError,
    event::{ChainHead, EventId, LedgerEvent},
};

/// Ordered access to the ledger's event log.
#[async_trait]
pub trait EventSource: Send + Sync {
    /// Latest block known to the source.
    async fn head(&self) -> Result<ChainHead, SyncError>;

    /// Events in `from_block..=to_block`, in `(block, log_index)` order.
    async fn events(&self, from_block: u64, to_block: u64) -> Result<Vec<LedgerEvent>, SyncError>;

    /// Epoch timing of an attester registered before the synced range.
    async fn attester_clock(&self, _attester_id: &AttesterId) -> Result<Option<EpochClock>, SyncError> {
        Ok(None)
    }
}

#[derive(Debug, Default)]
struct MemoryLog {
    events: Vec<LedgerEvent>,
    head: Option<ChainHead>,
    clocks: Vec<(AttesterId, EpochClock)>,
}

/// In-process event log.
///
/// Events are served in insertion order, so callers can feed duplicates or
/// misordered logs on purpose.
#[derive(Clone, Debug, Default)]
pub struct MemoryEventSource {
    log: Arc<RwLock<MemoryLog>>,
}

impl MemoryEventSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an event and move the head forward to its block.
    pub async fn push(&self, event: LedgerEvent) {
        let mut log = self.log.write().await;
        let advance = log
            .head
            .map_or(true, |head| event.block_number >= head.block_number);
        if advance {
            log.head = Some(ChainHead {
                block_number: event.block_number,
                timestamp: event.block_timestamp,
            });
        }
        log.events.push(event);
    }

    pub async fn extend<I>(&self, events: I)
    where
        I: IntoIterator<Item = LedgerEvent>,
    {
        for event in events {
            self.push(event).await;
        }
    }

    /// Override the reported head, e.g. to simulate empty blocks or a reorg.
    pub async fn set_head(&self, head: ChainHead) {
        self.log.write().await.head = Some(head);
    }

    pub async fn set_attester_clock(&self, attester_id: AttesterId, clock: EpochClock) {
        let mut log = self.log.write().await;
        log.clocks.retain(|(id, _)| id != &attester_id);
        log.clocks.push((attester_id, clock));
    }

    pub async fn len(&self) -> usize {
        self.log.read().await.events.len()
    }
}

#[async_trait]
impl EventSource for MemoryEventSource {
    async fn head(&self) -> Result<ChainHead, SyncError> {
        Ok(self.log.read().await.head.unwrap_or(ChainHead {
            block_number: 0,
            timestamp: 0,
        }))
    }

    async fn events(&self, from_block: u64, to_block: u64) -> Result<Vec<LedgerEvent>, SyncError> {
        let log = self.log.read().await;
        Ok(log
            .events
            .iter()
            .filter(|e| e.block_number >= from_block && e.block_number <= to_block)
            .cloned()
            .collect())
    }

    async fn attester_clock(&self, attester_id: &AttesterId) -> Result<Option<EpochClock>, SyncError> {
        let log = self.log.read().await;
        Ok(log
            .clocks
            .iter()
            .find(|(id, _)| id == attester_id)
            .map(|(_, clock)| *clock))
    }
}

/// Parsed prefix of a JSON-lines log.
#[derive(Debug, Default)]
struct JsonLinesState {
    /// Bytes consumed so far, always at a line boundary.
    offset: u64,
    lines_read: usize,
    /// Events grouped by block, in file order within each block.
    blocks: BTreeMap<u64, Vec<LedgerEvent>>,
    head: Option<(EventId, ChainHead)>,
}

impl JsonLinesState {
    fn insert(&mut self, event: LedgerEvent) {
        let id = event.id();
        if self.head.map_or(true, |(head_id, _)| id > head_id) {
            self.head = Some((
                id,
                ChainHead {
                    block_number: event.block_number,
                    timestamp: event.block_timestamp,
                },
            ));
        }
        self.blocks.entry(event.block_number).or_default().push(event);
    }
}

/// Newline-delimited JSON event log an exporter keeps appending to.
///
/// Each call reads only the bytes appended since the previous one. A
/// trailing line that does not parse yet is treated as a partial write and
/// retried on the next call; a file that shrank is read again from the start.
#[derive(Clone, Debug)]
pub struct JsonLinesEventSource {
    path: PathBuf,
    state: Arc<Mutex<JsonLinesState>>,
}

impl JsonLinesEventSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            state: Arc::new(Mutex::new(JsonLinesState::default())),
        }
    }

    fn io_error(&self, op: &str, err: std::io::Error) -> SyncError {
        SyncError::Source(format!("{op} {}: {err}", self.path.display()))
    }

    fn parse_line(&self, line_no: usize, line: &str) -> Result<Option<LedgerEvent>, SyncError> {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            return Ok(None);
        }
        serde_json::from_str(line).map(Some).map_err(|e| {
            SyncError::Source(format!(
                "{}:{}: invalid event: {e}",
                self.path.display(),
                line_no
            ))
        })
    }

    /// Pull newly appended lines into the cached state.
    async fn refresh(&self) -> Result<MutexGuard<'_, JsonLinesState>, SyncError> {
        let mut state = self.state.lock().await;
        let mut file = File::open(&self.path)
            .await
            .map_err(|e| self.io_error("open", e))?;
        let len = file
            .metadata()
            .await
            .map_err(|e| self.io_error("stat", e))?
            .len();
        if len < state.offset {
            warn!("{} shrank, re-reading from the start", self.path.display());
            *state = JsonLinesState::default();
        }
        if len == state.offset {
            return Ok(state);
        }

        file.seek(SeekFrom::Start(state.offset))
            .await
            .map_err(|e| self.io_error("seek", e))?;
        let mut buf = Vec::new();
        file.read_to_end(&mut buf)
            .await
            .map_err(|e| self.io_error("read", e))?;

        let mut parsed = Vec::new();
        let mut consumed = 0usize;
        let mut line_no = state.lines_read;
        for chunk in buf.split_inclusive(|b| *b == b'\n') {
            let complete = chunk.ends_with(b"\n");
            let text = match std::str::from_utf8(chunk) {
                Ok(text) => text,
                Err(_) if !complete => break,
                Err(e) => {
                    return Err(SyncError::Source(format!(
                        "{}:{}: not UTF-8: {e}",
                        self.path.display(),
                        line_no + 1
                    )))
                }
            };
            match self.parse_line(line_no + 1, text) {
                Ok(event) => parsed.extend(event),
                Err(_) if !complete => break,
                Err(e) => return Err(e),
            }
            consumed += chunk.len();
            line_no += 1;
        }

        state.offset += consumed as u64;
        state.lines_read = line_no;
        let count = parsed.len();
        for event in parsed {
            state.insert(event);
        }
        debug!("read {} new events from {}", count, self.path.display());
        Ok(state)
    }
}

#[async_trait]
impl EventSource for JsonLinesEventSource {
    async fn head(&self) -> Result<ChainHead, SyncError> {
        let state = self.refresh().await?;
        Ok(state.head.map(|(_, head)| head).unwrap_or(ChainHead {
            block_number: 0,
            timestamp: 0,
        }))
    }

    async fn events(&self, from_block: u64, to_block: u64) -> Result<Vec<LedgerEvent>, SyncError> {
        if from_block > to_block {
            return Ok(Vec::new());
        }
        let state = self.refresh().await?;
        Ok(state
            .blocks
            .range(from_block..=to_block)
            .flat_map(|(_, events)| events.iter().cloned())
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::EventKind;
    use std::io::Write;

    fn ended(block: u64, ts: u64) -> LedgerEvent {
        LedgerEvent::new(block, 0, ts, AttesterId::from(1u64), EventKind::EpochEnded { epoch: 0 })
    }

    #[tokio::test]
    async fn memory_source_tracks_head_and_ranges() {
        let source = MemoryEventSource::new();
        source.extend([ended(1, 10), ended(3, 30), ended(5, 50)]).await;
        let head = source.head().await.unwrap();
        assert_eq!(head.block_number, 5);
        assert_eq!(head.timestamp, 50);
        let slice = source.events(2, 4).await.unwrap();
        assert_eq!(slice.len(), 1);
        assert_eq!(slice[0].block_number, 3);
    }

    #[tokio::test]
    async fn json_lines_source_reads_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        for event in [ended(2, 20), ended(4, 40)] {
            writeln!(file, "{}", serde_json::to_string(&event).unwrap()).unwrap();
        }
        writeln!(file).unwrap();
        let source = JsonLinesEventSource::new(file.path());
        assert_eq!(source.head().await.unwrap().block_number, 4);
        assert_eq!(source.events(0, 3).await.unwrap().len(), 1);
        assert!(source.attester_clock(&AttesterId::from(1u64)).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn json_lines_source_reads_only_appended_lines() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "{}", serde_json::to_string(&ended(1, 10)).unwrap()).unwrap();
        let source = JsonLinesEventSource::new(file.path());
        assert_eq!(source.head().await.unwrap().block_number, 1);
        let offset = source.state.lock().await.offset;

        // A half-written line is left for the next call.
        let line = serde_json::to_string(&ended(3, 30)).unwrap();
        let (start, rest) = line.split_at(line.len() / 2);
        write!(file, "{start}").unwrap();
        file.flush().unwrap();
        assert_eq!(source.head().await.unwrap().block_number, 1);
        assert_eq!(source.state.lock().await.offset, offset);

        writeln!(file, "{rest}").unwrap();
        writeln!(file, "{}", serde_json::to_string(&ended(3, 31)).unwrap()).unwrap();
        file.flush().unwrap();
        let head = source.head().await.unwrap();
        assert_eq!(head.block_number, 3);
        let events = source.events(2, 3).await.unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].block_timestamp, 30);
        assert_eq!(events[1].block_timestamp, 31);
        assert_eq!(source.events(0, 9).await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn json_lines_source_rereads_truncated_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        for event in [ended(2, 20), ended(4, 40)] {
            writeln!(file, "{}", serde_json::to_string(&event).unwrap()).unwrap();
        }
        let source = JsonLinesEventSource::new(file.path());
        assert_eq!(source.head().await.unwrap().block_number, 4);

        std::fs::write(
            file.path(),
            format!("{}\n", serde_json::to_string(&ended(1, 5)).unwrap()),
        )
        .unwrap();
        assert_eq!(source.head().await.unwrap().block_number, 1);
        assert_eq!(source.events(0, 9).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn json_lines_source_rejects_bad_complete_line() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "{}", serde_json::to_string(&ended(1, 10)).unwrap()).unwrap();
        writeln!(file, "{{\"not\": \"an event\"}}").unwrap();
        let source = JsonLinesEventSource::new(file.path());
        assert!(matches!(source.head().await, Err(SyncError::Source(_))));
    }

    #[tokio::test]
    async fn missing_file_is_a_source_error() {
        let source = JsonLinesEventSource::new("/nonexistent/zkrep-events.jsonl");
        assert!(matches!(source.head().await, Err(SyncError::Source(_))));
    }
}
