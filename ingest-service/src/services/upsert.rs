//! Bulk insert-or-update statements keyed on a stable identifier.
//!
//! A statement never touches its conflict key or creation timestamp on
//! conflict: only the listed refresh columns (plus the audit pair, when the
//! table carries one) are overwritten.

use crate::models::{
    AccountRow, CashbackRow, CategoryRow, HoldInfoRow, RoundUpRow, TagRow, TransactionRow,
    TransactionTagRow,
};
use chrono::Utc;
use sqlx::query_builder::Separated;
use sqlx::{Postgres, QueryBuilder};

/// What to do when a row with the same conflict key already exists.
#[derive(Debug, Clone, Copy)]
pub enum OnConflict {
    DoNothing,
    Update {
        /// Overwritten from the incoming row.
        refresh: &'static [&'static str],
        /// Reset to NULL.
        clear: &'static [&'static str],
    },
}

#[derive(Debug, Clone, Copy)]
pub struct UpsertSpec {
    pub table: &'static str,
    pub columns: &'static [&'static str],
    pub conflict_target: &'static str,
    pub on_conflict: OnConflict,
    /// Table has `updated_at`/`updated_by` columns.
    pub audited: bool,
    pub returning: Option<&'static str>,
}

/// Binds one row's values, in the order of [`UpsertSpec::columns`].
pub trait UpsertRow {
    fn push_binds(&self, row: &mut Separated<'_, '_, Postgres, &'static str>);
}

/// Build the bulk statement for `rows`. Returns `None` for an empty batch so
/// callers never issue an empty write.
pub fn build_upsert<R: UpsertRow>(
    spec: &UpsertSpec,
    rows: &[R],
    actor: &str,
) -> Option<QueryBuilder<'static, Postgres>> {
    if rows.is_empty() {
        return None;
    }

    let mut builder = QueryBuilder::new(format!("INSERT INTO {} (", spec.table));
    let mut columns: Vec<&str> = spec.columns.to_vec();
    if spec.audited {
        columns.extend(["updated_at", "updated_by"]);
    }
    builder.push(columns.join(", "));
    builder.push(") ");

    let now = Utc::now();
    builder.push_values(rows.iter(), |mut b, row| {
        row.push_binds(&mut b);
        if spec.audited {
            b.push_bind(now);
            b.push_bind(actor.to_string());
        }
    });

    builder.push(format!(" ON CONFLICT ({}) ", spec.conflict_target));
    match spec.on_conflict {
        OnConflict::DoNothing => {
            builder.push("DO NOTHING");
        }
        OnConflict::Update { refresh, clear } => {
            let mut sets: Vec<String> = refresh
                .iter()
                .map(|c| format!("{c} = EXCLUDED.{c}"))
                .collect();
            sets.extend(clear.iter().map(|c| format!("{c} = NULL")));
            if spec.audited {
                sets.push("updated_at = EXCLUDED.updated_at".to_string());
                sets.push("updated_by = EXCLUDED.updated_by".to_string());
            }
            builder.push("DO UPDATE SET ");
            builder.push(sets.join(", "));
        }
    }

    if let Some(returning) = spec.returning {
        builder.push(format!(" RETURNING {}", returning));
    }

    Some(builder)
}

// ============================================================================
// Table definitions
// ============================================================================

pub const ACCOUNTS: UpsertSpec = UpsertSpec {
    table: "accounts",
    columns: &[
        "provider_id",
        "type",
        "ownership_type",
        "display_name",
        "currency_code",
        "value",
        "value_in_base_units",
        "created_at",
    ],
    conflict_target: "provider_id",
    on_conflict: OnConflict::Update {
        refresh: &[
            "type",
            "ownership_type",
            "display_name",
            "currency_code",
            "value",
            "value_in_base_units",
        ],
        clear: &["deleted_at"],
    },
    audited: true,
    returning: None,
};

pub const CATEGORIES: UpsertSpec = UpsertSpec {
    table: "categories",
    columns: &["category_id", "category_name"],
    conflict_target: "category_id",
    on_conflict: OnConflict::Update {
        refresh: &["category_name"],
        clear: &[],
    },
    audited: false,
    returning: None,
};

pub const TAGS: UpsertSpec = UpsertSpec {
    table: "tags",
    columns: &["tag_id"],
    conflict_target: "tag_id",
    on_conflict: OnConflict::DoNothing,
    audited: false,
    returning: None,
};

pub const TRANSACTIONS: UpsertSpec = UpsertSpec {
    table: "transactions",
    columns: &[
        "provider_id",
        "type",
        "status",
        "attachment_id",
        "raw_text",
        "description",
        "message",
        "note",
        "card_purchase_method",
        "card_number_suffix",
        "customer_display_name",
        "deep_link_url",
        "is_categorizable",
        "currency_code",
        "value",
        "value_in_base_units",
        "foreign_currency_code",
        "foreign_value",
        "foreign_value_in_base_units",
        "created_at",
        "settled_at",
        "account_id",
        "transfer_account_id",
        "category_id",
    ],
    conflict_target: "provider_id",
    on_conflict: OnConflict::Update {
        refresh: &[
            "type",
            "status",
            "attachment_id",
            "raw_text",
            "description",
            "message",
            "note",
            "card_purchase_method",
            "card_number_suffix",
            "customer_display_name",
            "deep_link_url",
            "is_categorizable",
            "currency_code",
            "value",
            "value_in_base_units",
            "foreign_currency_code",
            "foreign_value",
            "foreign_value_in_base_units",
            "settled_at",
            "category_id",
        ],
        clear: &[],
    },
    audited: true,
    returning: Some("transaction_id, provider_id"),
};

pub const TRANSACTION_TAGS: UpsertSpec = UpsertSpec {
    table: "transaction_tags",
    columns: &["transaction_id", "tag_id"],
    conflict_target: "transaction_id, tag_id",
    on_conflict: OnConflict::DoNothing,
    audited: false,
    returning: None,
};

pub const HOLD_INFO: UpsertSpec = UpsertSpec {
    table: "transaction_hold_info",
    columns: &[
        "transaction_id",
        "currency_code",
        "value",
        "value_in_base_units",
        "foreign_currency_code",
        "foreign_value",
        "foreign_value_in_base_units",
    ],
    conflict_target: "transaction_id",
    on_conflict: OnConflict::Update {
        refresh: &[
            "currency_code",
            "value",
            "value_in_base_units",
            "foreign_currency_code",
            "foreign_value",
            "foreign_value_in_base_units",
        ],
        clear: &[],
    },
    audited: false,
    returning: None,
};

pub const ROUND_UPS: UpsertSpec = UpsertSpec {
    table: "transaction_round_up",
    columns: &[
        "transaction_id",
        "currency_code",
        "value",
        "value_in_base_units",
        "boost_currency_code",
        "boost_value",
        "boost_value_in_base_units",
    ],
    conflict_target: "transaction_id",
    on_conflict: OnConflict::Update {
        refresh: &[
            "currency_code",
            "value",
            "value_in_base_units",
            "boost_currency_code",
            "boost_value",
            "boost_value_in_base_units",
        ],
        clear: &[],
    },
    audited: false,
    returning: None,
};

pub const CASHBACK: UpsertSpec = UpsertSpec {
    table: "transaction_cashback",
    columns: &[
        "transaction_id",
        "description",
        "currency_code",
        "value",
        "value_in_base_units",
    ],
    conflict_target: "transaction_id",
    on_conflict: OnConflict::Update {
        refresh: &["description", "currency_code", "value", "value_in_base_units"],
        clear: &[],
    },
    audited: false,
    returning: None,
};

impl UpsertRow for AccountRow {
    fn push_binds(&self, b: &mut Separated<'_, '_, Postgres, &'static str>) {
        b.push_bind(self.provider_id.clone())
            .push_bind(self.account_type.as_str())
            .push_bind(self.ownership_type.as_str())
            .push_bind(self.display_name.clone())
            .push_bind(self.currency_code.clone())
            .push_bind(self.value.clone())
            .push_bind(self.value_in_base_units)
            .push_bind(self.created_at);
    }
}

impl UpsertRow for CategoryRow {
    fn push_binds(&self, b: &mut Separated<'_, '_, Postgres, &'static str>) {
        b.push_bind(self.category_id.clone())
            .push_bind(self.category_name.clone());
    }
}

impl UpsertRow for TagRow {
    fn push_binds(&self, b: &mut Separated<'_, '_, Postgres, &'static str>) {
        b.push_bind(self.tag_id.clone());
    }
}

impl UpsertRow for TransactionRow {
    fn push_binds(&self, b: &mut Separated<'_, '_, Postgres, &'static str>) {
        b.push_bind(self.provider_id.clone())
            .push_bind(self.transaction_type.clone())
            .push_bind(self.status.as_str())
            .push_bind(self.attachment_id.clone())
            .push_bind(self.raw_text.clone())
            .push_bind(self.description.clone())
            .push_bind(self.message.clone())
            .push_bind(self.note.clone())
            .push_bind(self.card_purchase_method.clone())
            .push_bind(self.card_number_suffix.clone())
            .push_bind(self.customer_display_name.clone())
            .push_bind(self.deep_link_url.clone())
            .push_bind(self.is_categorizable)
            .push_bind(self.currency_code.clone())
            .push_bind(self.value.clone())
            .push_bind(self.value_in_base_units)
            .push_bind(self.foreign_currency_code.clone())
            .push_bind(self.foreign_value.clone())
            .push_bind(self.foreign_value_in_base_units)
            .push_bind(self.created_at)
            .push_bind(self.settled_at)
            .push_bind(self.account_id)
            .push_bind(self.transfer_account_id)
            .push_bind(self.category_id.clone());
    }
}

impl UpsertRow for TransactionTagRow {
    fn push_binds(&self, b: &mut Separated<'_, '_, Postgres, &'static str>) {
        b.push_bind(self.transaction_id)
            .push_bind(self.tag_id.clone());
    }
}

impl UpsertRow for HoldInfoRow {
    fn push_binds(&self, b: &mut Separated<'_, '_, Postgres, &'static str>) {
        b.push_bind(self.transaction_id)
            .push_bind(self.currency_code.clone())
            .push_bind(self.value.clone())
            .push_bind(self.value_in_base_units)
            .push_bind(self.foreign_currency_code.clone())
            .push_bind(self.foreign_value.clone())
            .push_bind(self.foreign_value_in_base_units);
    }
}

impl UpsertRow for RoundUpRow {
    fn push_binds(&self, b: &mut Separated<'_, '_, Postgres, &'static str>) {
        b.push_bind(self.transaction_id)
            .push_bind(self.currency_code.clone())
            .push_bind(self.value.clone())
            .push_bind(self.value_in_base_units)
            .push_bind(self.boost_currency_code.clone())
            .push_bind(self.boost_value.clone())
            .push_bind(self.boost_value_in_base_units);
    }
}

impl UpsertRow for CashbackRow {
    fn push_binds(&self, b: &mut Separated<'_, '_, Postgres, &'static str>) {
        b.push_bind(self.transaction_id)
            .push_bind(self.description.clone())
            .push_bind(self.currency_code.clone())
            .push_bind(self.value.clone())
            .push_bind(self.value_in_base_units);
    }
}
