//! Trade ledger.
//!
//! Append-only SQLite record of every gate decision (accepted and rejected)
//! with the signal evidence behind it, plus realised position closures.
//! Open positions and realised P&L are rebuilt from these two tables on
//! restart.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::Row;
use std::str::FromStr;
use tracing::{debug, info};
use uuid::Uuid;

use crate::types::{
    AegisError, ClosureRecord, ExecutionStatus, ExitReason, LedgerEntry, OpenPosition,
};

pub struct TradeLedger {
    pool: SqlitePool,
}

impl TradeLedger {
    /// Open (or create) a ledger database file.
    pub async fn open(path: &str) -> Result<Self, AegisError> {
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(options)
            .await?;
        let ledger = Self { pool };
        ledger.migrate().await?;
        info!(path, "Trade ledger opened");
        Ok(ledger)
    }

    /// Ledger held in memory; contents vanish with the process.
    pub async fn in_memory() -> Result<Self, AegisError> {
        // One connection: each in-memory connection is its own database
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await?;
        let ledger = Self { pool };
        ledger.migrate().await?;
        Ok(ledger)
    }

    /// Close the connection pool. Later reads and writes fail.
    pub async fn close(&self) {
        self.pool.close().await;
    }

    async fn migrate(&self) -> Result<(), AegisError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS decisions (
                seq INTEGER PRIMARY KEY AUTOINCREMENT,
                id TEXT NOT NULL UNIQUE,
                tick INTEGER NOT NULL,
                recorded_at TEXT NOT NULL,
                instrument TEXT NOT NULL,
                action TEXT NOT NULL,
                confidence REAL NOT NULL,
                accepted INTEGER NOT NULL,
                reason TEXT,
                size TEXT,
                execution TEXT NOT NULL,
                payload TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS closures (
                seq INTEGER PRIMARY KEY AUTOINCREMENT,
                position_id TEXT NOT NULL UNIQUE,
                order_id TEXT NOT NULL,
                instrument TEXT NOT NULL,
                exit_price TEXT NOT NULL,
                pnl TEXT NOT NULL,
                reason TEXT NOT NULL,
                closed_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_decisions_execution ON decisions(execution)")
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    /// Append one decision with its execution outcome.
    pub async fn append(&self, entry: &LedgerEntry) -> Result<(), AegisError> {
        let decision = &entry.decision;
        let payload = serde_json::to_string(entry)?;

        sqlx::query(
            r#"
            INSERT INTO decisions
                (id, tick, recorded_at, instrument, action, confidence, accepted, reason, size, execution, payload)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(decision.id.to_string())
        .bind(entry.tick as i64)
        .bind(entry.recorded_at.to_rfc3339())
        .bind(decision.signal.instrument.id.as_str())
        .bind(decision.signal.action.to_string())
        .bind(decision.signal.confidence)
        .bind(decision.is_accepted())
        .bind(decision.rejection().map(|r| r.code()))
        .bind(decision.size().map(|s| s.to_string()))
        .bind(entry.execution.label())
        .bind(payload)
        .execute(&self.pool)
        .await?;

        debug!(id = %decision.id, tick = entry.tick, execution = entry.execution.label(), "Ledger entry appended");
        Ok(())
    }

    /// Most recent entries, newest first.
    pub async fn recent(&self, limit: u32) -> Result<Vec<LedgerEntry>, AegisError> {
        let rows = sqlx::query("SELECT payload FROM decisions ORDER BY seq DESC LIMIT ?")
            .bind(limit as i64)
            .fetch_all(&self.pool)
            .await?;
        rows.iter()
            .map(|row| -> Result<LedgerEntry, AegisError> {
                let payload: String = row.try_get("payload")?;
                Ok(serde_json::from_str(&payload)?)
            })
            .collect()
    }

    pub async fn count(&self) -> Result<u64, AegisError> {
        let row = sqlx::query("SELECT COUNT(*) AS n FROM decisions")
            .fetch_one(&self.pool)
            .await?;
        let n: i64 = row.try_get("n")?;
        Ok(n as u64)
    }

    /// Highest tick number recorded, 0 when empty.
    pub async fn last_tick(&self) -> Result<u64, AegisError> {
        let row = sqlx::query("SELECT COALESCE(MAX(tick), 0) AS t FROM decisions")
            .fetch_one(&self.pool)
            .await?;
        let t: i64 = row.try_get("t")?;
        Ok(t as u64)
    }

    pub async fn record_closure(&self, closure: &ClosureRecord) -> Result<(), AegisError> {
        sqlx::query(
            r#"
            INSERT INTO closures (position_id, order_id, instrument, exit_price, pnl, reason, closed_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(closure.position_id.to_string())
        .bind(closure.order_id.as_str())
        .bind(closure.instrument.as_str())
        .bind(closure.exit_price.to_string())
        .bind(closure.pnl.to_string())
        .bind(closure.reason.to_string())
        .bind(closure.closed_at.to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// All closures, oldest first.
    pub async fn closures(&self) -> Result<Vec<ClosureRecord>, AegisError> {
        let rows = sqlx::query(
            "SELECT position_id, order_id, instrument, exit_price, pnl, reason, closed_at \
             FROM closures ORDER BY seq ASC",
        )
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| -> Result<ClosureRecord, AegisError> {
                let position_id: String = row.try_get("position_id")?;
                let exit_price: String = row.try_get("exit_price")?;
                let pnl: String = row.try_get("pnl")?;
                let reason: String = row.try_get("reason")?;
                let closed_at: String = row.try_get("closed_at")?;
                Ok(ClosureRecord {
                    position_id: parse_uuid(&position_id)?,
                    order_id: row.try_get("order_id")?,
                    instrument: row.try_get("instrument")?,
                    exit_price: parse_decimal(&exit_price)?,
                    pnl: parse_decimal(&pnl)?,
                    reason: ExitReason::from_str(&reason)
                        .map_err(|e| AegisError::Ledger(e.to_string()))?,
                    closed_at: parse_time(&closed_at)?,
                })
            })
            .collect()
    }

    /// Filled decisions without a closure, oldest first.
    pub async fn open_positions(&self) -> Result<Vec<OpenPosition>, AegisError> {
        let rows = sqlx::query(
            r#"
            SELECT d.payload FROM decisions d
            WHERE d.execution = 'filled'
              AND NOT EXISTS (SELECT 1 FROM closures c WHERE c.position_id = d.id)
            ORDER BY d.seq ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        let mut positions = Vec::with_capacity(rows.len());
        for row in &rows {
            let payload: String = row.try_get("payload")?;
            let entry: LedgerEntry = serde_json::from_str(&payload)?;
            let (order_id, fill_price) = match &entry.execution {
                ExecutionStatus::Filled {
                    order_id,
                    fill_price,
                } => (order_id.clone(), *fill_price),
                _ => continue,
            };
            let Some(notional) = entry.decision.size() else {
                continue;
            };
            positions.push(OpenPosition {
                id: entry.decision.id,
                order_id,
                instrument: entry.decision.signal.instrument.id.clone(),
                action: entry.decision.signal.action,
                notional,
                entry_price: fill_price,
                mark_price: fill_price,
                opened_at: entry.recorded_at,
            });
        }
        Ok(positions)
    }

    /// Sum of realised P&L over all closures.
    pub async fn realized_pnl(&self) -> Result<Decimal, AegisError> {
        Ok(self.closures().await?.iter().map(|c| c.pnl).sum())
    }

    /// Losing closures since the last winning one.
    pub async fn consecutive_losses(&self) -> Result<u32, AegisError> {
        let streak = self
            .closures()
            .await?
            .iter()
            .rev()
            .take_while(|c| c.pnl < Decimal::ZERO)
            .count();
        Ok(streak as u32)
    }
}

fn parse_decimal(raw: &str) -> Result<Decimal, AegisError> {
    Decimal::from_str(raw).map_err(|e| AegisError::Ledger(format!("bad decimal {raw}: {e}")))
}

fn parse_uuid(raw: &str) -> Result<Uuid, AegisError> {
    Uuid::parse_str(raw).map_err(|e| AegisError::Ledger(format!("bad id {raw}: {e}")))
}

fn parse_time(raw: &str) -> Result<DateTime<Utc>, AegisError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| AegisError::Ledger(format!("bad timestamp {raw}: {e}")))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
