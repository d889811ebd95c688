//! Typed Up API payloads.
//!
//! Every upstream document is decoded into these records before it reaches a
//! processor; anything that does not decode is rejected at the boundary.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::{AccountType, OwnershipType, TransactionStatus};

/// Paginated listing envelope: `{ data: [...], links: { prev, next } }`.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Page<T> {
    pub data: Vec<T>,
    #[serde(default)]
    pub links: PageLinks,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct PageLinks {
    #[serde(default)]
    pub prev: Option<String>,
    #[serde(default)]
    pub next: Option<String>,
}

/// Single-resource envelope: `{ data: {...} }`.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Document<T> {
    pub data: T,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MoneyObject {
    pub currency_code: String,
    pub value: String,
    pub value_in_base_units: i64,
}

/// `{ type, id }` pointer to another resource.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct ResourceIdentifier {
    #[serde(rename = "type")]
    pub kind: String,
    pub id: String,
}

/// To-one relationship whose target may be absent.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct OptionalRelationship {
    #[serde(default)]
    pub data: Option<ResourceIdentifier>,
    #[serde(default)]
    pub links: Option<RelatedLink>,
}

impl OptionalRelationship {
    pub fn id(&self) -> Option<&str> {
        self.data.as_ref().map(|d| d.id.as_str())
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RequiredRelationship {
    pub data: ResourceIdentifier,
    #[serde(default)]
    pub links: Option<RelatedLink>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ManyRelationship {
    #[serde(default)]
    pub data: Vec<ResourceIdentifier>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RelatedLink {
    pub related: String,
}

// ============================================================================
// Accounts
// ============================================================================

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AccountResource {
    #[serde(rename = "type")]
    pub kind: String,
    pub id: String,
    pub attributes: AccountAttributes,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountAttributes {
    pub display_name: String,
    pub account_type: AccountType,
    pub ownership_type: OwnershipType,
    pub balance: MoneyObject,
    pub created_at: DateTime<Utc>,
}

// ============================================================================
// Categories
// ============================================================================

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CategoryResource {
    #[serde(rename = "type")]
    pub kind: String,
    pub id: String,
    pub attributes: CategoryAttributes,
    #[serde(default)]
    pub relationships: CategoryRelationships,
}

impl CategoryResource {
    /// Parent categories sit at the top of the tree and cannot be assigned
    /// to a transaction directly.
    pub fn is_child(&self) -> bool {
        self.relationships.parent.data.is_some()
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CategoryAttributes {
    pub name: String,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct CategoryRelationships {
    #[serde(default)]
    pub parent: OptionalRelationship,
    #[serde(default)]
    pub children: ManyRelationship,
}

// ============================================================================
// Tags
// ============================================================================

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TagResource {
    #[serde(rename = "type")]
    pub kind: String,
    pub id: String,
}

// ============================================================================
// Transactions
// ============================================================================

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TransactionResource {
    #[serde(rename = "type")]
    pub kind: String,
    pub id: String,
    pub attributes: TransactionAttributes,
    pub relationships: TransactionRelationships,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionAttributes {
    pub status: TransactionStatus,
    #[serde(default)]
    pub raw_text: Option<String>,
    pub description: String,
    #[serde(default)]
    pub message: Option<String>,
    pub is_categorizable: bool,
    #[serde(default)]
    pub hold_info: Option<HoldInfo>,
    #[serde(default)]
    pub round_up: Option<RoundUp>,
    #[serde(default)]
    pub cashback: Option<Cashback>,
    pub amount: MoneyObject,
    #[serde(default)]
    pub foreign_amount: Option<MoneyObject>,
    #[serde(default)]
    pub card_purchase_method: Option<CardPurchaseMethod>,
    #[serde(default)]
    pub settled_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub transaction_type: Option<String>,
    #[serde(default)]
    pub note: Option<Note>,
    #[serde(default)]
    pub performing_customer: Option<Customer>,
    #[serde(default, rename = "deepLinkURL")]
    pub deep_link_url: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HoldInfo {
    pub amount: MoneyObject,
    #[serde(default)]
    pub foreign_amount: Option<MoneyObject>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RoundUp {
    pub amount: MoneyObject,
    #[serde(default)]
    pub boost_portion: Option<MoneyObject>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Cashback {
    pub description: String,
    pub amount: MoneyObject,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CardPurchaseMethod {
    pub method: String,
    #[serde(default)]
    pub card_number_suffix: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Note {
    pub text: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Customer {
    pub display_name: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionRelationships {
    pub account: RequiredRelationship,
    #[serde(default)]
    pub transfer_account: OptionalRelationship,
    #[serde(default)]
    pub category: OptionalRelationship,
    #[serde(default)]
    pub parent_category: OptionalRelationship,
    #[serde(default)]
    pub tags: ManyRelationship,
    #[serde(default)]
    pub attachment: OptionalRelationship,
}

// ============================================================================
// Webhook events
// ============================================================================

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct WebhookEventCallback {
    pub data: WebhookEventResource,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct WebhookEventResource {
    #[serde(rename = "type")]
    pub kind: String,
    pub id: String,
    pub attributes: WebhookEventAttributes,
    #[serde(default)]
    pub relationships: WebhookEventRelationships,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookEventAttributes {
    pub event_type: WebhookEventType,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct WebhookEventRelationships {
    #[serde(default)]
    pub webhook: OptionalRelationship,
    #[serde(default)]
    pub transaction: Option<OptionalRelationship>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WebhookEventType {
    TransactionCreated,
    TransactionSettled,
    TransactionDeleted,
    Ping,
    #[serde(other)]
    Unknown,
}

impl WebhookEventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::TransactionCreated => "TRANSACTION_CREATED",
            Self::TransactionSettled => "TRANSACTION_SETTLED",
            Self::TransactionDeleted => "TRANSACTION_DELETED",
            Self::Ping => "PING",
            Self::Unknown => "UNKNOWN",
        }
    }
}
