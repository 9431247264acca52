//! Event indexer
//!
//! Folds a block-ordered event log into the entity store, one event at a
//! time. Handlers are best effort: a decode failure, a reverted contract
//! read or a missing referenced entity is logged, recorded as a warning,
//! and the fold moves on.
//!
//! Handler families live in their own modules:
//! - `strategy`: conviction-voting pool and proposal lifecycle
//! - `collateral`: collateral vault deposits and withdrawals
//! - `sybil`: Passport and GoodDollar providers behind one trait
//! - `content`: content-addressed metadata entities

pub mod collateral;
pub mod content;
pub mod reader;
pub mod strategy;
pub mod sybil;

use std::collections::{BTreeSet, VecDeque};

use serde::Serialize;
use tracing::{debug, warn};

use crate::events::{ChainEvent, LogEvent, LogLine, RejectedLine};
use crate::model::{Address, MetadataKind};
use crate::store::snapshot::IndexSnapshot;
use crate::store::EntityStore;

pub use content::{parse_metadata, MetadataDocument, ParseError};
pub use reader::{ContractReader, ProposalState, RecordedReader, StrategyState};
pub use sybil::{SybilAction, SybilProvider};

/// Default size of the warning ring
pub const DEFAULT_WARNING_CAPACITY: usize = 1000;

/// Reader type used when the concrete reader is chosen at runtime
pub type DynReader = Box<dyn ContractReader + Send + Sync>;

/// Category of a degraded write
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WarningKind {
    DecodeFailed,
    MissingEntity,
    InsufficientCollateral,
    InvalidTransition,
    ContractCallReverted,
    MetadataSchema,
    OutOfOrder,
}

/// Structured record of a degraded write
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IndexWarning {
    pub block_number: u64,
    pub log_index: u32,
    pub kind: WarningKind,
    pub detail: String,
}

/// Position and emitter of the event being applied
#[derive(Debug, Clone, Copy)]
pub(crate) struct EventContext {
    pub address: Address,
    pub block_number: u64,
    pub block_timestamp: u64,
    pub log_index: u32,
}

impl From<&LogEvent> for EventContext {
    fn from(log: &LogEvent) -> Self {
        Self {
            address: log.address,
            block_number: log.block_number,
            block_timestamp: log.block_timestamp,
            log_index: log.log_index,
        }
    }
}

/// Replay summary
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ApplyStats {
    pub applied: usize,
    /// Lines that did not decode and were skipped
    pub rejected: usize,
    pub warnings: usize,
}

pub struct Indexer<R: ContractReader> {
    store: EntityStore,
    reader: R,
    cursor: Option<(u64, u32)>,
    pending: BTreeSet<(String, MetadataKind)>,
    warnings: VecDeque<IndexWarning>,
    warning_capacity: usize,
    warnings_total: usize,
}

impl<R: ContractReader> Indexer<R> {
    pub fn new(reader: R) -> Self {
        Self::with_warning_capacity(reader, DEFAULT_WARNING_CAPACITY)
    }

    pub fn with_warning_capacity(reader: R, warning_capacity: usize) -> Self {
        Self {
            store: EntityStore::new(),
            reader,
            cursor: None,
            pending: BTreeSet::new(),
            warnings: VecDeque::new(),
            warning_capacity: warning_capacity.max(1),
            warnings_total: 0,
        }
    }

    /// Resume from a persisted snapshot
    pub fn from_snapshot(reader: R, snapshot: IndexSnapshot, warning_capacity: usize) -> Self {
        let mut indexer = Self::with_warning_capacity(reader, warning_capacity);
        indexer.store = snapshot.store;
        indexer.cursor = snapshot.cursor;
        indexer.pending = snapshot.pending;
        indexer
    }

    pub fn snapshot(&self) -> IndexSnapshot {
        IndexSnapshot {
            store: self.store.clone(),
            cursor: self.cursor,
            pending: self.pending.clone(),
        }
    }

    pub fn store(&self) -> &EntityStore {
        &self.store
    }

    pub fn reader(&self) -> &R {
        &self.reader
    }

    pub fn reader_mut(&mut self) -> &mut R {
        &mut self.reader
    }

    /// Highest applied (block, log index)
    pub fn cursor(&self) -> Option<(u64, u32)> {
        self.cursor
    }

    /// Content sources waiting for bytes, ordered by CID then kind
    pub fn pending_content(&self) -> Vec<(String, MetadataKind)> {
        self.pending.iter().cloned().collect()
    }

    pub fn warnings(&self) -> impl Iterator<Item = &IndexWarning> {
        self.warnings.iter()
    }

    /// Warnings recorded since start, including those evicted from the ring
    pub fn warnings_total(&self) -> usize {
        self.warnings_total
    }

    /// Drop all indexed state; the reader is kept.
    pub fn reset(&mut self) {
        self.store.reset();
        self.cursor = None;
        self.pending.clear();
        self.warnings.clear();
        self.warnings_total = 0;
    }

    /// Apply a batch in order
    pub fn apply_all<'a, I>(&mut self, events: I) -> ApplyStats
    where
        I: IntoIterator<Item = &'a LogEvent>,
    {
        let before = self.warnings_total;
        let mut applied = 0;
        for event in events {
            self.apply(event);
            applied += 1;
        }
        ApplyStats { applied, rejected: 0, warnings: self.warnings_total - before }
    }

    /// Fold a parsed replay log in order. Undecodable lines are recorded as
    /// warnings and skipped; the events around them are still applied.
    pub fn replay<'a, I>(&mut self, lines: I) -> ApplyStats
    where
        I: IntoIterator<Item = &'a LogLine>,
    {
        let before = self.warnings_total;
        let mut stats = ApplyStats::default();
        for line in lines {
            match line {
                LogLine::Event(event) => {
                    self.apply(event);
                    stats.applied += 1;
                }
                LogLine::Rejected(rejected) => {
                    self.reject(rejected);
                    stats.rejected += 1;
                }
            }
        }
        stats.warnings = self.warnings_total - before;
        stats
    }

    /// Record a line that never became an event. It is placed at its own
    /// position when that much decoded, otherwise at the cursor.
    pub fn reject(&mut self, rejected: &RejectedLine) {
        let (cursor_block, cursor_index) = self.cursor.unwrap_or_default();
        let ctx = EventContext {
            address: Address::ZERO,
            block_number: rejected.block_number.unwrap_or(cursor_block),
            block_timestamp: 0,
            log_index: rejected.log_index.unwrap_or(cursor_index),
        };
        self.warn(&ctx, WarningKind::DecodeFailed, rejected.to_string());
    }

    /// Fold a single event into the store. Never fails.
    pub fn apply(&mut self, log: &LogEvent) {
        let ctx = EventContext::from(log);
        let position = log.position();

        if let Some(cursor) = self.cursor {
            if position < cursor {
                self.warn(
                    &ctx,
                    WarningKind::OutOfOrder,
                    format!(
                        "{} at {}:{} is behind cursor {}:{}",
                        log.name(),
                        position.0,
                        position.1,
                        cursor.0,
                        cursor.1
                    ),
                );
            }
        }

        debug!(
            event = log.name(),
            address = %log.address,
            block = log.block_number,
            log_index = log.log_index,
            "Applying event"
        );

        match &log.event {
            ChainEvent::CvStrategy(event) => self.apply_cv_strategy(&ctx, event),
            ChainEvent::CollateralVault(event) => self.apply_collateral(&ctx, event),
            ChainEvent::PassportScorer(event) => self.apply_sybil(&ctx, event),
            ChainEvent::GoodDollarSybil(event) => self.apply_sybil(&ctx, event),
            ChainEvent::RegistryCommunity(event) => self.apply_community(&ctx, event),
        }

        self.cursor = Some(match self.cursor {
            Some(cursor) if cursor > position => cursor,
            _ => position,
        });
    }

    /// Register a CID for out-of-band ingestion unless already resolved
    pub(crate) fn schedule_content(&mut self, cid: &str, kind: MetadataKind) {
        let cid = cid.trim();
        if cid.is_empty() || self.store.has_metadata(kind, cid) {
            return;
        }
        if self.pending.insert((cid.to_string(), kind)) {
            debug!(cid, kind = kind.as_str(), "Scheduled content ingestion");
        }
    }

    pub(crate) fn warn(&mut self, ctx: &EventContext, kind: WarningKind, detail: String) {
        warn!(
            block = ctx.block_number,
            log_index = ctx.log_index,
            kind = ?kind,
            "{}",
            detail
        );
        if self.warnings.len() == self.warning_capacity {
            self.warnings.pop_front();
        }
        self.warnings.push_back(IndexWarning {
            block_number: ctx.block_number,
            log_index: ctx.log_index,
            kind,
            detail,
        });
        self.warnings_total += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{CommunityEvent, PassportEvent};
    use num_bigint::BigUint;

    fn log(block: u64, log_index: u32, event: ChainEvent) -> LogEvent {
        LogEvent {
            address: "0x00000000000000000000000000000000000000aa".parse().unwrap(),
            block_number: block,
            block_timestamp: 1_700_000_000 + block,
            log_index,
            event,
        }
    }

    fn score(user: &str, value: u32) -> ChainEvent {
        ChainEvent::PassportScorer(PassportEvent::UserScoreAdded {
            user: user.parse().unwrap(),
            score: BigUint::from(value),
        })
    }

    #[test]
    fn test_cursor_tracks_highest_position() {
        let mut indexer = Indexer::new(RecordedReader::new());
        let user = "0x00000000000000000000000000000000000000b1";
        indexer.apply(&log(5, 1, score(user, 1)));
        indexer.apply(&log(7, 0, score(user, 2)));
        assert_eq!(indexer.cursor(), Some((7, 0)));
        assert_eq!(indexer.warnings().count(), 0);
    }

    #[test]
    fn test_out_of_order_event_is_applied_with_warning() {
        let mut indexer = Indexer::new(RecordedReader::new());
        let user = "0x00000000000000000000000000000000000000b1";
        indexer.apply(&log(9, 0, score(user, 1)));
        indexer.apply(&log(3, 0, score(user, 4)));

        assert_eq!(indexer.cursor(), Some((9, 0)));
        let warning = indexer.warnings().next().unwrap();
        assert_eq!(warning.kind, WarningKind::OutOfOrder);
        let stored = indexer
            .store()
            .sybil_user(crate::model::SybilKind::Passport, &user.parse().unwrap())
            .unwrap();
        assert_eq!(stored.score, BigUint::from(4u32));
    }

    #[test]
    fn test_warning_ring_is_bounded() {
        let mut indexer = Indexer::with_warning_capacity(RecordedReader::new(), 2);
        let ctx = EventContext {
            address: Address::ZERO,
            block_number: 1,
            block_timestamp: 0,
            log_index: 0,
        };
        for i in 0..5 {
            indexer.warn(&ctx, WarningKind::MissingEntity, format!("w{}", i));
        }
        let details: Vec<&str> = indexer.warnings().map(|w| w.detail.as_str()).collect();
        assert_eq!(details, vec!["w3", "w4"]);
        assert_eq!(indexer.warnings_total(), 5);
    }

    #[test]
    fn test_covenant_update_schedules_content_once() {
        let mut indexer = Indexer::new(RecordedReader::new());
        let event = ChainEvent::RegistryCommunity(CommunityEvent::CovenantIpfsHashUpdated {
            covenant_ipfs_hash: "QmCovenant".into(),
        });
        indexer.apply(&log(1, 0, event.clone()));
        indexer.apply(&log(2, 0, event));
        assert_eq!(
            indexer.pending_content(),
            vec![("QmCovenant".to_string(), MetadataKind::Covenant)]
        );
    }

    #[test]
    fn test_replay_skips_rejected_lines_and_keeps_going() {
        let user = "0x00000000000000000000000000000000000000b1";
        let lines = vec![
            LogLine::Event(log(1, 0, score(user, 1))),
            LogLine::Rejected(RejectedLine {
                line: 2,
                block_number: None,
                log_index: None,
                reason: "Odd number of digits".into(),
            }),
            LogLine::Event(log(3, 0, score(user, 9))),
        ];
        let mut indexer = Indexer::new(RecordedReader::new());
        let stats = indexer.replay(lines.iter());

        assert_eq!(stats, ApplyStats { applied: 2, rejected: 1, warnings: 1 });
        assert_eq!(indexer.cursor(), Some((3, 0)));
        let warning = indexer.warnings().next().unwrap();
        assert_eq!(warning.kind, WarningKind::DecodeFailed);
        assert_eq!(warning.block_number, 1);
        assert!(warning.detail.contains("line 2"));
        let stored = indexer
            .store()
            .sybil_user(crate::model::SybilKind::Passport, &user.parse().unwrap())
            .unwrap();
        assert_eq!(stored.score, BigUint::from(9u32));
    }

    #[test]
    fn test_same_cid_pending_under_two_kinds() {
        let mut indexer = Indexer::new(RecordedReader::new());
        indexer.schedule_content("QmShared", MetadataKind::Pool);
        indexer.schedule_content("QmShared", MetadataKind::Proposal);
        assert_eq!(
            indexer.pending_content(),
            vec![
                ("QmShared".to_string(), MetadataKind::Proposal),
                ("QmShared".to_string(), MetadataKind::Pool),
            ]
        );

        assert!(indexer.apply_content("QmShared", br#"{"title":"t","description":"d"}"#));
        assert!(indexer.store().pool_metadata.contains("QmShared"));
        assert!(indexer.store().proposal_metadata.contains("QmShared"));
        assert!(indexer.pending_content().is_empty());
    }

    #[test]
    fn test_snapshot_roundtrip_and_reset() {
        let mut indexer = Indexer::new(RecordedReader::new());
        indexer.apply(&log(4, 2, score("0x00000000000000000000000000000000000000b1", 3)));
        let snapshot = indexer.snapshot();

        let resumed = Indexer::from_snapshot(RecordedReader::new(), snapshot, 10);
        assert_eq!(resumed.cursor(), Some((4, 2)));
        assert_eq!(resumed.store().sybil_users.len(), 1);

        indexer.reset();
        assert!(indexer.cursor().is_none());
        assert!(indexer.store().sybil_users.is_empty());
    }
}
