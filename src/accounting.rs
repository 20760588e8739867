//! Per-user credit accounting around a batch.
//!
//! The normalization core never touches credits. Hosts that bill per
//! document reserve credits before a batch and settle afterwards, refunding
//! every document that did not produce a usable record:
//!
//! ```text
//! reserve_credits(n) ──▶ process_batch ──▶ settle_credits(stats)
//!   deduct n                                 refund n - succeeded
//! ```
//!
//! [`CreditLedger`] is the seam; [`FileLedger`] is a small JSON-file
//! implementation used by the CLI. A database-backed ledger implements the
//! same trait.

use crate::output::BatchStats;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use thiserror::Error;
use tracing::{debug, info};

/// Errors from a [`CreditLedger`].
#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("Insufficient credits for '{user}': need {required}, have {available}")]
    InsufficientCredits {
        user: String,
        required: u64,
        available: u64,
    },

    #[error("Unknown user '{0}'")]
    UnknownUser(String),

    #[error("Ledger storage error at '{path}': {detail}")]
    Storage { path: PathBuf, detail: String },
}

/// Balance store keyed by user id.
///
/// `deduct` must be all-or-nothing: it either removes the full amount or
/// leaves the balance unchanged and returns
/// [`LedgerError::InsufficientCredits`].
pub trait CreditLedger: Send + Sync {
    fn balance(&self, user: &str) -> Result<u64, LedgerError>;

    /// Remove `amount` credits; returns the new balance.
    fn deduct(&self, user: &str, amount: u64) -> Result<u64, LedgerError>;

    /// Give back `amount` credits; returns the new balance.
    fn refund(&self, user: &str, amount: u64) -> Result<u64, LedgerError>;
}

/// Credits held for one batch, returned by [`reserve_credits`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reservation {
    pub reserved: u64,
}

/// Outcome of [`settle_credits`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Settlement {
    pub charged: u64,
    pub refunded: u64,
    pub balance: u64,
}

/// Hold one credit per document before the batch starts.
pub fn reserve_credits(
    ledger: &dyn CreditLedger,
    user: &str,
    documents: usize,
) -> Result<Reservation, LedgerError> {
    let reserved = documents as u64;
    let balance = ledger.deduct(user, reserved)?;
    debug!("Reserved {} credits for '{}', {} left", reserved, user, balance);
    Ok(Reservation { reserved })
}

/// Charge only the documents that produced a usable record; refund the rest.
///
/// Placeholder rows are failures and are refunded.
pub fn settle_credits(
    ledger: &dyn CreditLedger,
    user: &str,
    reservation: Reservation,
    stats: &BatchStats,
) -> Result<Settlement, LedgerError> {
    let charged = (stats.succeeded as u64).min(reservation.reserved);
    let refunded = reservation.reserved - charged;
    let balance = if refunded > 0 {
        ledger.refund(user, refunded)?
    } else {
        ledger.balance(user)?
    };
    info!(
        "Settled '{}': charged {}, refunded {}, balance {}",
        user, charged, refunded, balance
    );
    Ok(Settlement {
        charged,
        refunded,
        balance,
    })
}

/// Refund a whole reservation, e.g. after a fatal batch error.
pub fn release_credits(
    ledger: &dyn CreditLedger,
    user: &str,
    reservation: Reservation,
) -> Result<u64, LedgerError> {
    ledger.refund(user, reservation.reserved)
}

/// JSON file of `{ "user": credits }`, rewritten atomically on every change.
///
/// The mutex serialises updates within one process; it is not a
/// cross-process lock.
#[derive(Debug)]
pub struct FileLedger {
    path: PathBuf,
    lock: Mutex<()>,
}

impl FileLedger {
    /// Open (or lazily create) the ledger at `path`.
    pub fn open(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Set a user's balance, creating the user if needed.
    pub fn set_balance(&self, user: &str, credits: u64) -> Result<(), LedgerError> {
        self.update(|balances| {
            balances.insert(user.to_string(), credits);
            Ok(credits)
        })
        .map(|_| ())
    }

    fn load(&self) -> Result<BTreeMap<String, u64>, LedgerError> {
        match std::fs::read(&self.path) {
            Ok(bytes) if bytes.is_empty() => Ok(BTreeMap::new()),
            Ok(bytes) => serde_json::from_slice(&bytes).map_err(|e| self.storage(e)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(BTreeMap::new()),
            Err(e) => Err(self.storage(e)),
        }
    }

    fn save(&self, balances: &BTreeMap<String, u64>) -> Result<(), LedgerError> {
        let bytes = serde_json::to_vec_pretty(balances).map_err(|e| self.storage(e))?;
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| self.storage(e))?;
        }
        let mut tmp_name = self.path.file_name().unwrap_or_default().to_os_string();
        tmp_name.push(".tmp");
        let tmp = self.path.with_file_name(tmp_name);
        std::fs::write(&tmp, bytes).map_err(|e| self.storage(e))?;
        std::fs::rename(&tmp, &self.path).map_err(|e| {
            let _ = std::fs::remove_file(&tmp);
            self.storage(e)
        })
    }

    fn update<F>(&self, f: F) -> Result<u64, LedgerError>
    where
        F: FnOnce(&mut BTreeMap<String, u64>) -> Result<u64, LedgerError>,
    {
        let _guard = self.lock.lock().map_err(|e| LedgerError::Storage {
            path: self.path.clone(),
            detail: format!("ledger lock poisoned: {e}"),
        })?;
        let mut balances = self.load()?;
        let balance = f(&mut balances)?;
        self.save(&balances)?;
        Ok(balance)
    }

    fn storage(&self, e: impl std::fmt::Display) -> LedgerError {
        LedgerError::Storage {
            path: self.path.clone(),
            detail: e.to_string(),
        }
    }
}

impl CreditLedger for FileLedger {
    fn balance(&self, user: &str) -> Result<u64, LedgerError> {
        self.load()?
            .get(user)
            .copied()
            .ok_or_else(|| LedgerError::UnknownUser(user.to_string()))
    }

    fn deduct(&self, user: &str, amount: u64) -> Result<u64, LedgerError> {
        self.update(|balances| {
            let available = *balances
                .get(user)
                .ok_or_else(|| LedgerError::UnknownUser(user.to_string()))?;
            if available < amount {
                return Err(LedgerError::InsufficientCredits {
                    user: user.to_string(),
                    required: amount,
                    available,
                });
            }
            let left = available - amount;
            balances.insert(user.to_string(), left);
            Ok(left)
        })
    }

    fn refund(&self, user: &str, amount: u64) -> Result<u64, LedgerError> {
        self.update(|balances| {
            let entry = balances
                .get_mut(user)
                .ok_or_else(|| LedgerError::UnknownUser(user.to_string()))?;
            *entry = entry.saturating_add(amount);
            Ok(*entry)
        })
    }
}
