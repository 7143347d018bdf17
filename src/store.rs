//! SQLite-backed whale event store
//!
//! One table, `whale_events`, keyed by the deterministic event id with the
//! transfer embedded as columns. Inserts are idempotent upserts
//! (`ON CONFLICT(id) DO UPDATE`), so re-scanning a block range after a crash
//! replaces rows instead of duplicating them.
//!
//! WAL mode gives the single writer (the indexer) concurrent readers from the
//! serving layer without extra application-level locking. Secondary indexes
//! cover wallet, chain, created_at, and significance rank.

use crate::classifier::Significance;
use crate::error::{Result, WhaleError};
use crate::models::{EventType, Transfer, WhaleEvent};
use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, Connection, Row};
use std::sync::{Arc, Mutex};

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS whale_events (
    id                TEXT PRIMARY KEY,
    event_type        TEXT NOT NULL,
    wallet            TEXT NOT NULL,
    wallet_label      TEXT,
    chain             TEXT NOT NULL,
    tx_hash           TEXT NOT NULL,
    from_address      TEXT NOT NULL,
    to_address        TEXT NOT NULL,
    value             REAL NOT NULL,
    value_usd         REAL NOT NULL,
    token             TEXT NOT NULL,
    token_symbol      TEXT,
    block_number      INTEGER NOT NULL,
    block_timestamp   INTEGER NOT NULL,
    significance      TEXT NOT NULL,
    significance_rank INTEGER NOT NULL,
    created_at        INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_whale_events_wallet ON whale_events(wallet);
CREATE INDEX IF NOT EXISTS idx_whale_events_chain ON whale_events(chain);
CREATE INDEX IF NOT EXISTS idx_whale_events_created_at ON whale_events(created_at DESC);
CREATE INDEX IF NOT EXISTS idx_whale_events_rank ON whale_events(significance_rank);
"#;

const EVENT_COLUMNS: &str = "id, event_type, wallet, wallet_label, chain, tx_hash, \
     from_address, to_address, value, value_usd, token, token_symbol, \
     block_number, block_timestamp, significance, created_at";

/// Query filter for [`EventStore::query`].
#[derive(Debug, Clone, Default)]
pub struct EventFilter {
    /// Exact chain match.
    pub chain: Option<String>,
    /// Inclusive ordinal lower bound on significance.
    pub min_significance: Option<Significance>,
    /// Result cap; 0 falls back to the default of 50.
    pub limit: usize,
    /// Opaque pagination token: exclusive upper bound on created_at, as
    /// returned by the previous page.
    pub cursor: Option<String>,
}

/// Significance tally over the most recent events.
#[derive(Debug, Clone, PartialEq)]
pub struct EventStats {
    pub total: u64,
    pub sampled: usize,
    pub low: usize,
    pub medium: usize,
    pub high: usize,
}

/// Durable, idempotent event storage with filtered, paginated query.
///
/// Clones share one connection; the store is cheap to hand to the serving
/// layer while the indexer keeps writing.
#[derive(Clone)]
pub struct EventStore {
    conn: Arc<Mutex<Connection>>,
}

impl EventStore {
    const DEFAULT_LIMIT: usize = 50;

    /// Open (or create) the database at `path` and bootstrap the schema.
    pub fn open(path: &str) -> Result<Self> {
        let conn = Connection::open(path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.execute_batch(SCHEMA)?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Idempotent upsert keyed by `event.id`.
    ///
    /// # Returns
    /// * `Err(Validation)` - id, wallet, chain or transfer hash is empty
    pub fn insert(&self, event: &WhaleEvent) -> Result<()> {
        validate(event)?;

        let conn = self.conn.lock().unwrap();
        conn.execute(
            r#"
            INSERT INTO whale_events (
                id, event_type, wallet, wallet_label, chain, tx_hash,
                from_address, to_address, value, value_usd, token, token_symbol,
                block_number, block_timestamp, significance, significance_rank,
                created_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                event_type = excluded.event_type,
                wallet = excluded.wallet,
                wallet_label = excluded.wallet_label,
                chain = excluded.chain,
                tx_hash = excluded.tx_hash,
                from_address = excluded.from_address,
                to_address = excluded.to_address,
                value = excluded.value,
                value_usd = excluded.value_usd,
                token = excluded.token,
                token_symbol = excluded.token_symbol,
                block_number = excluded.block_number,
                block_timestamp = excluded.block_timestamp,
                significance = excluded.significance,
                significance_rank = excluded.significance_rank,
                created_at = excluded.created_at
            "#,
            params![
                event.id,
                event.event_type.as_str(),
                event.wallet,
                event.wallet_label,
                event.chain,
                event.transfer.hash,
                event.transfer.from,
                event.transfer.to,
                event.transfer.value,
                event.transfer.value_usd,
                event.transfer.token,
                event.transfer.token_symbol,
                event.transfer.block_number,
                event.transfer.timestamp,
                event.significance.as_str(),
                event.significance.rank(),
                event.created_at,
            ],
        )?;

        Ok(())
    }

    /// Filtered, paginated query, strictly ordered by created_at descending.
    ///
    /// Fetches limit+1 rows internally; if more than `limit` come back, a
    /// next page exists and the continuation cursor is the created_at of the
    /// last returned row.
    ///
    /// # Returns
    /// * `(events, next_cursor)` - next_cursor is None on the last page
    pub fn query(&self, filter: &EventFilter) -> Result<(Vec<WhaleEvent>, Option<String>)> {
        let limit = if filter.limit == 0 {
            Self::DEFAULT_LIMIT
        } else {
            filter.limit
        };

        let mut sql = format!("SELECT {} FROM whale_events WHERE 1=1", EVENT_COLUMNS);
        let mut params: Vec<Value> = Vec::new();

        if let Some(chain) = &filter.chain {
            sql.push_str(" AND chain = ?");
            params.push(Value::from(chain.clone()));
        }

        if let Some(min) = filter.min_significance {
            sql.push_str(" AND significance_rank >= ?");
            params.push(Value::from(min.rank()));
        }

        if let Some(cursor) = &filter.cursor {
            let before: i64 = cursor.parse().map_err(|_| {
                WhaleError::Validation(format!("malformed cursor: {:?}", cursor))
            })?;
            sql.push_str(" AND created_at < ?");
            params.push(Value::from(before));
        }

        sql.push_str(" ORDER BY created_at DESC LIMIT ?");
        params.push(Value::from((limit + 1) as i64));

        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(&sql)?;
        let mut events = stmt
            .query_map(params_from_iter(params), row_to_event)?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        let next_cursor = if events.len() > limit {
            events.truncate(limit);
            events.last().map(|e| e.created_at.to_string())
        } else {
            None
        };

        Ok((events, next_cursor))
    }

    /// Events for one wallet address (case-insensitive), newest first.
    ///
    /// An untracked wallet is an empty result, not an error.
    pub fn get_by_wallet(&self, wallet: &str, limit: usize) -> Result<Vec<WhaleEvent>> {
        let limit = if limit == 0 { Self::DEFAULT_LIMIT } else { limit };

        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM whale_events WHERE wallet = ? ORDER BY created_at DESC LIMIT ?",
            EVENT_COLUMNS
        ))?;

        let events = stmt
            .query_map(params![wallet.to_lowercase(), limit as i64], row_to_event)?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        Ok(events)
    }

    /// Significance tally over the most recent `sample` events, plus the
    /// total row count. Serving layers derive their stats view from this.
    pub fn stats(&self, sample: usize) -> Result<EventStats> {
        let sample = if sample == 0 { 100 } else { sample };

        let conn = self.conn.lock().unwrap();

        let total: u64 = conn.query_row("SELECT COUNT(*) FROM whale_events", [], |row| row.get(0))?;

        let mut stmt = conn.prepare(
            "SELECT significance FROM whale_events ORDER BY created_at DESC LIMIT ?",
        )?;
        let labels = stmt
            .query_map(params![sample as i64], |row| row.get::<_, String>(0))?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        let mut stats = EventStats {
            total,
            sampled: labels.len(),
            low: 0,
            medium: 0,
            high: 0,
        };

        for label in labels {
            match Significance::parse(&label) {
                Some(Significance::Low) => stats.low += 1,
                Some(Significance::Medium) => stats.medium += 1,
                Some(Significance::High) => stats.high += 1,
                None => {}
            }
        }

        Ok(stats)
    }

    /// Release the underlying connection. The last clone holding it wins;
    /// earlier closes are no-ops.
    pub fn close(self) {
        if let Ok(mutex) = Arc::try_unwrap(self.conn) {
            if let Ok(conn) = mutex.into_inner() {
                let _ = conn.close();
            }
        }
    }
}

fn validate(event: &WhaleEvent) -> Result<()> {
    let missing = if event.id.is_empty() {
        Some("id")
    } else if event.wallet.is_empty() {
        Some("wallet")
    } else if event.chain.is_empty() {
        Some("chain")
    } else if event.transfer.hash.is_empty() {
        Some("transfer.hash")
    } else {
        None
    };

    match missing {
        Some(field) => Err(WhaleError::Validation(format!(
            "event is missing required field '{}'",
            field
        ))),
        None => Ok(()),
    }
}

fn row_to_event(row: &Row) -> rusqlite::Result<WhaleEvent> {
    let event_type: String = row.get(1)?;
    let significance: String = row.get(14)?;

    Ok(WhaleEvent {
        id: row.get(0)?,
        event_type: EventType::parse(&event_type).ok_or_else(|| {
            rusqlite::Error::FromSqlConversionFailure(
                1,
                rusqlite::types::Type::Text,
                format!("unknown event type: {}", event_type).into(),
            )
        })?,
        wallet: row.get(2)?,
        wallet_label: row.get(3)?,
        chain: row.get(4)?,
        transfer: Transfer {
            hash: row.get(5)?,
            chain: row.get(4)?,
            from: row.get(6)?,
            to: row.get(7)?,
            value: row.get(8)?,
            value_usd: row.get(9)?,
            token: row.get(10)?,
            token_symbol: row.get(11)?,
            block_number: row.get(12)?,
            timestamp: row.get(13)?,
        },
        significance: Significance::parse(&significance).ok_or_else(|| {
            rusqlite::Error::FromSqlConversionFailure(
                14,
                rusqlite::types::Type::Text,
                format!("unknown significance: {}", significance).into(),
            )
        })?,
        created_at: row.get(15)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::event_id;
    use tempfile::NamedTempFile;

    fn create_test_store() -> (NamedTempFile, EventStore) {
        let temp_file = NamedTempFile::new().unwrap();
        let store = EventStore::open(temp_file.path().to_str().unwrap()).unwrap();
        (temp_file, store)
    }

    fn make_event(
        tx_hash: &str,
        wallet: &str,
        chain: &str,
        value_usd: f64,
        significance: Significance,
        created_at: i64,
    ) -> WhaleEvent {
        let wallet = wallet.to_lowercase();
        WhaleEvent {
            id: event_id(chain, tx_hash, &wallet),
            event_type: EventType::TransferIn,
            wallet: wallet.clone(),
            wallet_label: Some("Test Fund".to_string()),
            chain: chain.to_string(),
            transfer: Transfer {
                hash: tx_hash.to_string(),
                chain: chain.to_string(),
                from: "0xsender".to_string(),
                to: wallet,
                value: value_usd / 3000.0,
                value_usd,
                token: "native".to_string(),
                token_symbol: Some("ETH".to_string()),
                block_number: 100,
                timestamp: created_at - 5,
            },
            significance,
            created_at,
        }
    }

    #[test]
    fn test_insert_then_query_round_trip() {
        let (_temp, store) = create_test_store();
        let event = make_event("0xaaa", "0xwallet1", "ethereum", 50_000.0, Significance::Low, 100);

        store.insert(&event).unwrap();

        let (events, cursor) = store.query(&EventFilter::default()).unwrap();
        assert_eq!(events.len(), 1);
        assert!(cursor.is_none());
        assert_eq!(events[0].id, event.id);
        assert_eq!(events[0].transfer.hash, "0xaaa");
        assert_eq!(events[0].transfer.value_usd, 50_000.0);
        assert_eq!(events[0].event_type, EventType::TransferIn);
    }

    #[test]
    fn test_reinsert_replaces_never_duplicates() {
        let (_temp, store) = create_test_store();

        let mut event =
            make_event("0xaaa", "0xwallet1", "ethereum", 50_000.0, Significance::Low, 100);
        store.insert(&event).unwrap();

        // Reprocessing the same (transfer, wallet) side: same id, new values
        event.wallet_label = Some("Renamed Fund".to_string());
        event.created_at = 200;
        store.insert(&event).unwrap();

        let (events, _) = store.query(&EventFilter::default()).unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].wallet_label.as_deref(), Some("Renamed Fund"));
        assert_eq!(events[0].created_at, 200);
    }

    #[test]
    fn test_insert_rejects_missing_required_fields() {
        let (_temp, store) = create_test_store();

        let mut event =
            make_event("0xaaa", "0xwallet1", "ethereum", 50_000.0, Significance::Low, 100);
        event.transfer.hash = String::new();

        let err = store.insert(&event).unwrap_err();
        assert!(matches!(err, WhaleError::Validation(_)));

        let (events, _) = store.query(&EventFilter::default()).unwrap();
        assert!(events.is_empty());
    }

    #[test]
    fn test_query_pagination_protocol() {
        let (_temp, store) = create_test_store();
        for (i, created_at) in [300, 200, 100].iter().enumerate() {
            let event = make_event(
                &format!("0xhash{}", i),
                "0xwallet1",
                "ethereum",
                50_000.0,
                Significance::Medium,
                *created_at,
            );
            store.insert(&event).unwrap();
        }

        let (page1, cursor) = store
            .query(&EventFilter {
                limit: 2,
                ..Default::default()
            })
            .unwrap();

        assert_eq!(page1.len(), 2);
        assert_eq!(page1[0].created_at, 300);
        assert_eq!(page1[1].created_at, 200);
        assert_eq!(cursor.as_deref(), Some("200"));

        let (page2, cursor) = store
            .query(&EventFilter {
                limit: 2,
                cursor,
                ..Default::default()
            })
            .unwrap();

        assert_eq!(page2.len(), 1);
        assert_eq!(page2[0].created_at, 100);
        assert!(cursor.is_none());
    }

    #[test]
    fn test_query_malformed_cursor_rejected() {
        let (_temp, store) = create_test_store();

        let err = store
            .query(&EventFilter {
                cursor: Some("not-a-timestamp".to_string()),
                ..Default::default()
            })
            .unwrap_err();

        assert!(matches!(err, WhaleError::Validation(_)));
    }

    #[test]
    fn test_query_min_significance_is_inclusive_lower_bound() {
        let (_temp, store) = create_test_store();
        store
            .insert(&make_event("0xa", "0xw", "ethereum", 20_000.0, Significance::Low, 100))
            .unwrap();
        store
            .insert(&make_event("0xb", "0xw", "ethereum", 200_000.0, Significance::Medium, 200))
            .unwrap();
        store
            .insert(&make_event("0xc", "0xw", "ethereum", 2_000_000.0, Significance::High, 300))
            .unwrap();

        let (events, _) = store
            .query(&EventFilter {
                min_significance: Some(Significance::Medium),
                ..Default::default()
            })
            .unwrap();

        assert_eq!(events.len(), 2);
        assert!(events.iter().all(|e| e.significance >= Significance::Medium));
    }

    #[test]
    fn test_query_chain_filter() {
        let (_temp, store) = create_test_store();
        store
            .insert(&make_event("0xa", "0xw", "ethereum", 20_000.0, Significance::Low, 100))
            .unwrap();
        store
            .insert(&make_event("0xb", "0xw", "polygon", 20_000.0, Significance::Low, 200))
            .unwrap();

        let (events, _) = store
            .query(&EventFilter {
                chain: Some("polygon".to_string()),
                ..Default::default()
            })
            .unwrap();

        assert_eq!(events.len(), 1);
        assert_eq!(events[0].chain, "polygon");
    }

    #[test]
    fn test_get_by_wallet_case_insensitive_and_ordered() {
        let (_temp, store) = create_test_store();
        store
            .insert(&make_event("0xa", "0xabcdef", "ethereum", 20_000.0, Significance::Low, 100))
            .unwrap();
        store
            .insert(&make_event("0xb", "0xabcdef", "ethereum", 20_000.0, Significance::Low, 300))
            .unwrap();
        store
            .insert(&make_event("0xc", "0xother", "ethereum", 20_000.0, Significance::Low, 200))
            .unwrap();

        let events = store.get_by_wallet("0xABCDEF", 10).unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].created_at, 300);
        assert_eq!(events[1].created_at, 100);
    }

    #[test]
    fn test_get_by_wallet_unknown_is_empty_not_error() {
        let (_temp, store) = create_test_store();
        let events = store.get_by_wallet("0xnobody", 10).unwrap();
        assert!(events.is_empty());
    }

    #[test]
    fn test_stats_tallies_recent_events() {
        let (_temp, store) = create_test_store();
        store
            .insert(&make_event("0xa", "0xw", "ethereum", 20_000.0, Significance::Low, 100))
            .unwrap();
        store
            .insert(&make_event("0xb", "0xw", "ethereum", 200_000.0, Significance::Medium, 200))
            .unwrap();
        store
            .insert(&make_event("0xc", "0xw", "ethereum", 2_000_000.0, Significance::High, 300))
            .unwrap();

        let stats = store.stats(100).unwrap();
        assert_eq!(stats.total, 3);
        assert_eq!(stats.sampled, 3);
        assert_eq!((stats.low, stats.medium, stats.high), (1, 1, 1));

        // Sample smaller than the table only tallies the newest rows
        let stats = store.stats(2).unwrap();
        assert_eq!(stats.total, 3);
        assert_eq!(stats.sampled, 2);
        assert_eq!((stats.low, stats.medium, stats.high), (0, 1, 1));
    }
}
