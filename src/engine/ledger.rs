//! Paper-trading ledger.
//!
//! Owns every simulated position and its lifecycle (Open -> Closed). The
//! ledger is append-only: positions are never deleted, and total realized
//! PnL is always derived from closed positions rather than stored.
//!
//! Every mutation is a locked read-modify-write against the JSON file:
//! lock, reload from disk, check, write temp, fsync, rename, update cache,
//! unlock. If any step fails, both the file and the in-memory view are
//! left as they were.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};
use uuid::Uuid;

use crate::storage::{self, FileLock, StorageError};
use crate::types::Side;

/// On-disk format version.
const LEDGER_VERSION: u32 = 1;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    #[error("market {market_id} already has open position {position_id}")]
    DuplicateOpenPosition { market_id: String, position_id: Uuid },

    #[error("position {0} not found")]
    NotFound(Uuid),

    #[error("position {0} is already closed")]
    AlreadyClosed(Uuid),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("persistence failure: {0}")]
    Persistence(#[from] StorageError),
}

impl LedgerError {
    /// Short kind label for CLI output.
    pub fn kind(&self) -> &'static str {
        match self {
            LedgerError::DuplicateOpenPosition { .. } => "DuplicateOpenPosition",
            LedgerError::NotFound(_) => "NotFound",
            LedgerError::AlreadyClosed(_) => "AlreadyClosed",
            LedgerError::InvalidInput(_) => "InvalidInput",
            LedgerError::Persistence(_) => "PersistenceFailure",
        }
    }
}

// ---------------------------------------------------------------------------
// Position
// ---------------------------------------------------------------------------

/// Lifecycle state. Close fields exist only on closed positions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum PositionStatus {
    Open,
    Closed {
        closed_at: DateTime<Utc>,
        exit_price: Decimal,
        realized_pnl: Decimal,
    },
}

/// A simulated position recorded in the ledger.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub position_id: Uuid,
    pub market_id: String,
    pub question: String,
    pub side: Side,
    /// Price of `side` at open time.
    pub entry_price: Decimal,
    pub size: Decimal,
    pub confidence: u8,
    /// Why the position was opened. Never rewritten.
    pub reasoning: String,
    pub opened_at: DateTime<Utc>,
    pub status: PositionStatus,
}

impl Position {
    pub fn is_open(&self) -> bool {
        matches!(self.status, PositionStatus::Open)
    }

    /// `(exit - entry) * direction * size` on the Yes-price basis. `price`
    /// is quoted on the same side as `entry_price`; both are converted
    /// before the sign is applied.
    pub fn pnl_at(&self, price: Decimal) -> Decimal {
        let entry = self.side.yes_basis(self.entry_price);
        let exit = self.side.yes_basis(price);
        (exit - entry) * self.side.direction_sign() * self.size
    }

    pub fn realized_pnl(&self) -> Option<Decimal> {
        match &self.status {
            PositionStatus::Closed { realized_pnl, .. } => Some(*realized_pnl),
            PositionStatus::Open => None,
        }
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} @ {} x{} [{}]",
            self.market_id, self.side, self.entry_price, self.size, self.question
        )?;
        if let PositionStatus::Closed {
            exit_price,
            realized_pnl,
            ..
        } = &self.status
        {
            write!(f, " closed @ {exit_price} pnl {realized_pnl:+}")?;
        }
        Ok(())
    }
}

/// Input for [`Ledger::open_position`].
#[derive(Debug, Clone)]
pub struct NewPosition {
    pub market_id: String,
    pub question: String,
    pub side: Side,
    pub entry_price: Decimal,
    pub size: Decimal,
    pub confidence: u8,
    pub reasoning: String,
}

impl NewPosition {
    fn validate(&self) -> Result<(), LedgerError> {
        if self.market_id.trim().is_empty() {
            return Err(LedgerError::InvalidInput("market_id is empty".into()));
        }
        if self.entry_price <= Decimal::ZERO || self.entry_price >= Decimal::ONE {
            return Err(LedgerError::InvalidInput(format!(
                "entry_price {} outside (0, 1)",
                self.entry_price
            )));
        }
        if self.size <= Decimal::ZERO {
            return Err(LedgerError::InvalidInput(format!(
                "size {} must be positive",
                self.size
            )));
        }
        if !(1..=10).contains(&self.confidence) {
            return Err(LedgerError::InvalidInput(format!(
                "confidence {} outside 1..=10",
                self.confidence
            )));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Summary
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub struct LedgerSummary {
    pub total_realized_pnl: Decimal,
    pub open_count: usize,
    pub closed_count: usize,
    pub wins: usize,
    /// wins / closed_count; 0 when nothing is closed.
    pub win_rate: f64,
}

impl fmt::Display for LedgerSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "open={} closed={} wins={} win_rate={:.1}% realized_pnl={:+}",
            self.open_count,
            self.closed_count,
            self.wins,
            self.win_rate * 100.0,
            self.total_realized_pnl
        )
    }
}

// ---------------------------------------------------------------------------
// Ledger
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize, Deserialize)]
struct LedgerFile {
    version: u32,
    positions: Vec<Position>,
}

pub struct Ledger {
    path: PathBuf,
    lock_path: PathBuf,
    lock_timeout: Duration,
    /// Cache of the last successfully read or written file contents.
    positions: Vec<Position>,
}

impl Ledger {
    /// Open the ledger at `path`, starting empty if the file doesn't exist.
    pub fn open(path: impl Into<PathBuf>, lock_timeout: Duration) -> Result<Self, LedgerError> {
        let path = path.into();
        let positions = read_positions(&path)?;
        info!(
            path = %path.display(),
            positions = positions.len(),
            open = positions.iter().filter(|p| p.is_open()).count(),
            "Ledger loaded"
        );

        Ok(Self {
            lock_path: storage::lock_path_for(&path),
            path,
            lock_timeout,
            positions,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Reload the cache from disk (picks up writes from other processes).
    pub fn refresh(&mut self) -> Result<(), LedgerError> {
        self.positions = read_positions(&self.path)?;
        Ok(())
    }

    /// Record a new Open position.
    ///
    /// Fails with `DuplicateOpenPosition` if the market already has one.
    pub fn open_position(
        &mut self,
        new: NewPosition,
        opened_at: DateTime<Utc>,
    ) -> Result<Position, LedgerError> {
        new.validate()?;

        let _lock = FileLock::acquire(&self.lock_path, self.lock_timeout)?;
        let mut positions = read_positions(&self.path)?;

        if let Some(existing) = positions
            .iter()
            .find(|p| p.is_open() && p.market_id == new.market_id)
        {
            return Err(LedgerError::DuplicateOpenPosition {
                market_id: new.market_id,
                position_id: existing.position_id,
            });
        }

        let position = Position {
            position_id: Uuid::new_v4(),
            market_id: new.market_id,
            question: new.question,
            side: new.side,
            entry_price: new.entry_price,
            size: new.size,
            confidence: new.confidence,
            reasoning: new.reasoning,
            opened_at,
            status: PositionStatus::Open,
        };
        positions.push(position.clone());

        self.commit(positions)?;
        info!(
            position_id = %position.position_id,
            market_id = %position.market_id,
            side = %position.side,
            entry_price = %position.entry_price,
            confidence = position.confidence,
            "Position opened"
        );
        Ok(position)
    }

    /// Close an Open position at `exit_price` (side basis, in [0, 1]).
    pub fn close_position(
        &mut self,
        position_id: Uuid,
        exit_price: Decimal,
        closed_at: DateTime<Utc>,
    ) -> Result<Position, LedgerError> {
        if exit_price < Decimal::ZERO || exit_price > Decimal::ONE {
            return Err(LedgerError::InvalidInput(format!(
                "exit_price {exit_price} outside [0, 1]"
            )));
        }

        let _lock = FileLock::acquire(&self.lock_path, self.lock_timeout)?;
        let mut positions = read_positions(&self.path)?;

        let position = positions
            .iter_mut()
            .find(|p| p.position_id == position_id)
            .ok_or(LedgerError::NotFound(position_id))?;
        if !position.is_open() {
            return Err(LedgerError::AlreadyClosed(position_id));
        }

        let realized_pnl = position.pnl_at(exit_price);
        position.status = PositionStatus::Closed {
            closed_at,
            exit_price,
            realized_pnl,
        };
        let closed = position.clone();

        self.commit(positions)?;
        info!(
            position_id = %closed.position_id,
            market_id = %closed.market_id,
            exit_price = %exit_price,
            realized_pnl = %realized_pnl,
            "Position closed"
        );
        Ok(closed)
    }

    /// All positions in creation order.
    pub fn positions(&self) -> &[Position] {
        &self.positions
    }

    /// Open positions in creation order.
    pub fn get_open_positions(&self) -> Vec<&Position> {
        self.positions.iter().filter(|p| p.is_open()).collect()
    }

    pub fn get_position(&self, position_id: Uuid) -> Option<&Position> {
        self.positions.iter().find(|p| p.position_id == position_id)
    }

    /// The Open position for `market_id`, if any.
    pub fn open_position_for(&self, market_id: &str) -> Option<&Position> {
        self.positions
            .iter()
            .find(|p| p.is_open() && p.market_id == market_id)
    }

    pub fn compute_summary(&self) -> LedgerSummary {
        let closed: Vec<Decimal> = self
            .positions
            .iter()
            .filter_map(|p| p.realized_pnl())
            .collect();
        let closed_count = closed.len();
        let wins = closed.iter().filter(|pnl| **pnl > Decimal::ZERO).count();

        LedgerSummary {
            total_realized_pnl: closed.iter().copied().sum(),
            open_count: self.positions.len() - closed_count,
            closed_count,
            wins,
            win_rate: if closed_count == 0 {
                0.0
            } else {
                wins as f64 / closed_count as f64
            },
        }
    }

    /// Unrealized PnL of each Open position whose market has a price in
    /// `prices` (side basis). Markets missing from the map are skipped.
    pub fn mark_to_market(&self, prices: &HashMap<String, Decimal>) -> HashMap<Uuid, Decimal> {
        self.positions
            .iter()
            .filter(|p| p.is_open())
            .filter_map(|p| {
                prices
                    .get(&p.market_id)
                    .map(|price| (p.position_id, p.pnl_at(*price)))
            })
            .collect()
    }

    fn commit(&mut self, positions: Vec<Position>) -> Result<(), LedgerError> {
        let file = LedgerFile {
            version: LEDGER_VERSION,
            positions,
        };
        storage::save_json_atomic(&file, &self.path)?;
        self.positions = file.positions;
        debug!(positions = self.positions.len(), "Ledger committed");
        Ok(())
    }
}

fn read_positions(path: &Path) -> Result<Vec<Position>, LedgerError> {
    match storage::load_json::<LedgerFile>(path)? {
        None => Ok(Vec::new()),
        Some(file) if file.version == LEDGER_VERSION => Ok(file.positions),
        Some(file) => Err(StorageError::Corrupt {
            path: path.to_path_buf(),
            message: format!("unsupported ledger version {}", file.version),
        }
        .into()),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
