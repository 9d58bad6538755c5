//! Cart line items and the merge-key identity rule.
//!
//! Two lines are the same cart entry iff their [`MergeKey`]s are equal: the
//! product id plus size, temperature and customizations, with a missing
//! attribute compared as the empty string. Both the local and the remote cart
//! increment an existing entry instead of appending a duplicate.

use serde::{Deserialize, Serialize};

use super::id::{LineId, ProductId};
use super::price::Price;

/// Errors raised when a line item fails validation.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum LineItemError {
    /// The product reference is empty.
    #[error("line item product id cannot be empty")]
    EmptyProductId,
    /// Quantity must be at least one.
    #[error("line item quantity must be at least 1")]
    ZeroQuantity,
}

/// Free-form descriptive attributes of a line.
///
/// Absence is represented as `None`; there is no "default size" sentinel.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Variant {
    /// Cup or package size.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<String>,
    /// Serving temperature.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<String>,
    /// Free-text customizations.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub customizations: Option<String>,
}

impl Variant {
    /// A variant with no attributes.
    #[must_use]
    pub const fn none() -> Self {
        Self {
            size: None,
            temperature: None,
            customizations: None,
        }
    }

    /// Set the size attribute.
    #[must_use]
    pub fn with_size(mut self, size: impl Into<String>) -> Self {
        self.size = Some(size.into());
        self
    }

    /// Set the temperature attribute.
    #[must_use]
    pub fn with_temperature(mut self, temperature: impl Into<String>) -> Self {
        self.temperature = Some(temperature.into());
        self
    }

    /// Set the customizations attribute.
    #[must_use]
    pub fn with_customizations(mut self, customizations: impl Into<String>) -> Self {
        self.customizations = Some(customizations.into());
        self
    }
}

/// The identity of a cart entry.
///
/// Built from a product id and a [`Variant`] with missing attributes
/// normalized to the empty string, so `None` and `Some("")` compare equal.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MergeKey {
    product_id: String,
    size: String,
    temperature: String,
    customizations: String,
}

impl MergeKey {
    /// Build the merge key for a product and variant.
    #[must_use]
    pub fn new(product_id: &ProductId, variant: &Variant) -> Self {
        Self {
            product_id: product_id.as_str().to_owned(),
            size: variant.size.clone().unwrap_or_default(),
            temperature: variant.temperature.clone().unwrap_or_default(),
            customizations: variant.customizations.clone().unwrap_or_default(),
        }
    }

    /// Product id component.
    #[must_use]
    pub fn product_id(&self) -> &str {
        &self.product_id
    }
}

/// Caller-facing handle for a single cart line.
///
/// Remote lines are addressed by their server-assigned [`LineId`]. Local lines
/// have no server id, so their key is derived from the merge key: the same
/// entry always gets the same key, across restarts too.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LineKey(String);

impl LineKey {
    const LOCAL_PREFIX: &'static str = "local:";

    /// Structural key of a local line.
    ///
    /// Each component is length-prefixed so free-form customizations cannot
    /// collide with the separator.
    #[must_use]
    pub fn structural(key: &MergeKey) -> Self {
        let mut encoded = String::from(Self::LOCAL_PREFIX);
        for part in [
            &key.product_id,
            &key.size,
            &key.temperature,
            &key.customizations,
        ] {
            encoded.push_str(&part.len().to_string());
            encoded.push(':');
            encoded.push_str(part);
        }
        Self(encoded)
    }

    /// Wrap an opaque key string received from a caller.
    #[must_use]
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    /// Whether this key addresses a local (never synced) line.
    #[must_use]
    pub fn is_structural(&self) -> bool {
        self.0.starts_with(Self::LOCAL_PREFIX)
    }

    /// Interpret the key as a server line id.
    #[must_use]
    pub fn to_line_id(&self) -> LineId {
        LineId::new(self.0.clone())
    }

    /// The key as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl core::fmt::Display for LineKey {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&LineId> for LineKey {
    fn from(id: &LineId) -> Self {
        Self(id.as_str().to_owned())
    }
}

impl From<&str> for LineKey {
    fn from(key: &str) -> Self {
        Self(key.to_owned())
    }
}

/// One cart entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineItem {
    /// Catalog item reference.
    pub product_id: ProductId,
    /// Number of units, always at least one.
    pub quantity: u32,
    /// Descriptive attributes that take part in the merge key.
    #[serde(default)]
    pub variant: Variant,
    /// Unit price captured when the line was created.
    pub unit_price: Price,
    /// Server-assigned id, present only on remote lines.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub line_id: Option<LineId>,
}

impl LineItem {
    /// Create a local line (no server id).
    #[must_use]
    pub const fn new(product_id: ProductId, quantity: u32, variant: Variant, unit_price: Price) -> Self {
        Self {
            product_id,
            quantity,
            variant,
            unit_price,
            line_id: None,
        }
    }

    /// Attach a server-assigned line id.
    #[must_use]
    pub fn with_line_id(mut self, line_id: LineId) -> Self {
        self.line_id = Some(line_id);
        self
    }

    /// The identity of this entry.
    #[must_use]
    pub fn merge_key(&self) -> MergeKey {
        MergeKey::new(&self.product_id, &self.variant)
    }

    /// Key callers use to address this line.
    #[must_use]
    pub fn key(&self) -> LineKey {
        self.line_id
            .as_ref()
            .map_or_else(|| LineKey::structural(&self.merge_key()), LineKey::from)
    }

    /// Whether `other` is the same cart entry.
    #[must_use]
    pub fn same_entry(&self, other: &Self) -> bool {
        self.merge_key() == other.merge_key()
    }

    /// `unit_price * quantity`.
    #[must_use]
    pub fn line_total(&self) -> Price {
        self.unit_price.times(self.quantity)
    }

    /// Check the line's invariants.
    ///
    /// # Errors
    ///
    /// Returns an error if the product id is empty or the quantity is zero.
    pub fn validate(&self) -> Result<(), LineItemError> {
        if self.product_id.is_empty() {
            return Err(LineItemError::EmptyProductId);
        }
        if self.quantity == 0 {
            return Err(LineItemError::ZeroQuantity);
        }
        Ok(())
    }
}
