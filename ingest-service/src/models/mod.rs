//! Storage models for ingest-service.

#![allow(clippy::should_implement_trait)]

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

/// Process names, also written to `updated_by` alongside every mutation.
pub mod actor {
    pub const ACCOUNTS: &str = "processAccounts";
    pub const CATEGORIES: &str = "processCategories";
    pub const TAGS: &str = "processTags";
    pub const TRANSACTIONS: &str = "processTransactions";
    pub const TRANSACTION: &str = "processTransaction";
    pub const SYNC: &str = "syncData";
}

// ============================================================================
// Enumerations
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AccountType {
    Saver,
    Transactional,
    HomeLoan,
}

impl AccountType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Saver => "SAVER",
            Self::Transactional => "TRANSACTIONAL",
            Self::HomeLoan => "HOME_LOAN",
        }
    }

    pub fn from_str(s: &str) -> Self {
        match s {
            "SAVER" => Self::Saver,
            "HOME_LOAN" => Self::HomeLoan,
            _ => Self::Transactional,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OwnershipType {
    Individual,
    Joint,
}

impl OwnershipType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Individual => "INDIVIDUAL",
            Self::Joint => "JOINT",
        }
    }

    pub fn from_str(s: &str) -> Self {
        match s {
            "JOINT" => Self::Joint,
            _ => Self::Individual,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransactionStatus {
    Held,
    Settled,
}

impl TransactionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Held => "HELD",
            Self::Settled => "SETTLED",
        }
    }

    pub fn from_str(s: &str) -> Self {
        match s {
            "SETTLED" => Self::Settled,
            _ => Self::Held,
        }
    }
}

// ============================================================================
// Rows
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub struct AccountRow {
    pub provider_id: String,
    pub account_type: AccountType,
    pub ownership_type: OwnershipType,
    pub display_name: String,
    pub currency_code: String,
    pub value: String,
    pub value_in_base_units: i64,
    pub created_at: DateTime<Utc>,
}

/// Account as stored, including the local surrogate id and audit columns.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredAccount {
    pub account_id: i64,
    pub row: AccountRow,
    pub updated_at: Option<DateTime<Utc>>,
    pub updated_by: Option<String>,
    pub deleted_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CategoryRow {
    pub category_id: String,
    pub category_name: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredCategory {
    pub category_id: String,
    pub category_name: String,
    pub category_parent_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TagRow {
    pub tag_id: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TransactionRow {
    pub provider_id: String,
    pub transaction_type: Option<String>,
    pub status: TransactionStatus,
    pub attachment_id: Option<String>,
    pub raw_text: Option<String>,
    pub description: String,
    pub message: Option<String>,
    pub note: Option<String>,
    pub card_purchase_method: Option<String>,
    pub card_number_suffix: Option<String>,
    pub customer_display_name: Option<String>,
    pub deep_link_url: Option<String>,
    pub is_categorizable: bool,
    pub currency_code: String,
    pub value: String,
    pub value_in_base_units: i64,
    pub foreign_currency_code: Option<String>,
    pub foreign_value: Option<String>,
    pub foreign_value_in_base_units: Option<i64>,
    pub created_at: DateTime<Utc>,
    pub settled_at: Option<DateTime<Utc>>,
    pub account_id: i64,
    pub transfer_account_id: Option<i64>,
    pub category_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StoredTransaction {
    pub transaction_id: i64,
    pub row: TransactionRow,
    pub updated_at: Option<DateTime<Utc>>,
    pub updated_by: Option<String>,
    pub deleted_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HoldInfoRow {
    pub transaction_id: i64,
    pub currency_code: String,
    pub value: String,
    pub value_in_base_units: i64,
    pub foreign_currency_code: Option<String>,
    pub foreign_value: Option<String>,
    pub foreign_value_in_base_units: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoundUpRow {
    pub transaction_id: i64,
    pub currency_code: String,
    pub value: String,
    pub value_in_base_units: i64,
    pub boost_currency_code: Option<String>,
    pub boost_value: Option<String>,
    pub boost_value_in_base_units: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CashbackRow {
    pub transaction_id: i64,
    pub description: String,
    pub currency_code: String,
    pub value: String,
    pub value_in_base_units: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TransactionTagRow {
    pub transaction_id: i64,
    pub tag_id: String,
}

/// `(local id, provider id)` pair returned by a transaction upsert.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct WrittenKey {
    pub transaction_id: i64,
    pub provider_id: String,
}

/// Dependent rows written in the same database transaction as their parent
/// transactions.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FanOut {
    pub tags: Vec<TransactionTagRow>,
    pub hold_info: Vec<HoldInfoRow>,
    pub round_ups: Vec<RoundUpRow>,
    pub cashback: Vec<CashbackRow>,
}

/// Local reference data used to resolve foreign keys for a page of
/// transactions. Stale as soon as it is loaded.
#[derive(Debug, Clone, Default)]
pub struct Snapshot {
    /// Provider account id → local account id.
    pub accounts: HashMap<String, i64>,
    pub categories: HashSet<String>,
    pub tags: HashSet<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_enum_round_trip_through_text() {
        for t in [AccountType::Saver, AccountType::Transactional, AccountType::HomeLoan] {
            assert_eq!(AccountType::from_str(t.as_str()), t);
        }
        assert_eq!(OwnershipType::from_str("JOINT"), OwnershipType::Joint);
        assert_eq!(TransactionStatus::from_str("SETTLED"), TransactionStatus::Settled);
    }

    #[test]
    fn test_enum_serde_uses_provider_spelling() {
        let t: AccountType = serde_json::from_str("\"HOME_LOAN\"").unwrap();
        assert_eq!(t, AccountType::HomeLoan);
        assert_eq!(
            serde_json::to_string(&TransactionStatus::Held).unwrap(),
            "\"HELD\""
        );
    }
}
