//! Full cart snapshots.
//!
//! Every cart operation answers with a complete [`Cart`], never a delta, so a
//! caller can always replace its view wholesale.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::id::UserId;
use super::line_item::{LineItem, LineKey, MergeKey};
use super::price::Price;

/// Who a cart belongs to. Ownership never mixes.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "user_id", rename_all = "snake_case")]
pub enum CartOwner {
    /// This device, unauthenticated.
    Device,
    /// An authenticated user.
    User(UserId),
}

impl core::fmt::Display for CartOwner {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::Device => f.write_str("device"),
            Self::User(id) => write!(f, "user:{id}"),
        }
    }
}

/// An ordered snapshot of cart lines for one owner.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cart {
    /// Owner scope of the snapshot.
    pub owner: CartOwner,
    /// Lines in display order.
    pub lines: Vec<LineItem>,
    /// When the snapshot was confirmed by its authority.
    pub as_of: DateTime<Utc>,
}

impl Cart {
    /// An empty cart for `owner`.
    #[must_use]
    pub fn empty(owner: CartOwner) -> Self {
        Self::new(owner, Vec::new())
    }

    /// A snapshot confirmed now.
    #[must_use]
    pub fn new(owner: CartOwner, lines: Vec<LineItem>) -> Self {
        Self {
            owner,
            lines,
            as_of: Utc::now(),
        }
    }

    /// Whether the cart has no lines.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    /// Number of distinct lines.
    #[must_use]
    pub fn len(&self) -> usize {
        self.lines.len()
    }

    /// Sum of quantities across all lines.
    ///
    /// Widened to `u64`: each line may hold up to `u32::MAX` units.
    #[must_use]
    pub fn item_count(&self) -> u64 {
        self.lines.iter().map(|l| u64::from(l.quantity)).sum()
    }

    /// Sum of `unit_price * quantity` across all lines.
    #[must_use]
    pub fn subtotal(&self) -> Price {
        let currency = self
            .lines
            .first()
            .map(|l| l.unit_price.currency_code)
            .unwrap_or_default();
        self.lines.iter().fold(
            Price::new(rust_decimal::Decimal::ZERO, currency),
            |acc, line| acc + line.line_total(),
        )
    }

    /// Find a line by its caller-facing key.
    #[must_use]
    pub fn line(&self, key: &LineKey) -> Option<&LineItem> {
        self.lines.iter().find(|l| &l.key() == key)
    }

    /// Find the line for a merge key.
    #[must_use]
    pub fn entry(&self, key: &MergeKey) -> Option<&LineItem> {
        self.lines.iter().find(|l| &l.merge_key() == key)
    }

    /// Quantity recorded for a merge key, zero if absent.
    #[must_use]
    pub fn quantity_of(&self, key: &MergeKey) -> u32 {
        self.entry(key).map_or(0, |l| l.quantity)
    }
}
