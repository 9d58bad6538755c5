//! On-device guest cart.
//!
//! The local store is the sole authority while no credential is present. It
//! keeps the lines in memory and mirrors every change to a [`CartPersistence`]
//! backend as one JSON document. Reads never fail and writes are
//! fire-and-forget: a persistence error is logged and the in-memory cart stays
//! authoritative for the rest of the process.

mod persistence;

use std::path::PathBuf;

use cart_sync_core::{Cart, CartOwner, LineItem, LineKey, MergeKey, Price, ProductId, Variant};
use tracing::{debug, warn};

pub use persistence::{CartPersistence, FilePersistence, MemoryPersistence, StoreError};

/// Guest cart backed by a persistence medium.
pub struct LocalCartStore {
    persistence: Box<dyn CartPersistence>,
    lines: Vec<LineItem>,
}

impl std::fmt::Debug for LocalCartStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalCartStore")
            .field("lines", &self.lines.len())
            .finish_non_exhaustive()
    }
}

impl LocalCartStore {
    /// Open the store, loading whatever the backend holds.
    ///
    /// Missing or unreadable data yields an empty cart.
    pub fn open(persistence: impl CartPersistence + 'static) -> Self {
        let lines = match persistence.load() {
            Ok(Some(document)) => decode_document(&document),
            Ok(None) => Vec::new(),
            Err(e) => {
                warn!(error = %e, "Failed to read guest cart, starting empty");
                Vec::new()
            }
        };
        debug!(lines = lines.len(), "Guest cart loaded");

        Self {
            persistence: Box::new(persistence),
            lines,
        }
    }

    /// Open a file-backed store at `path`.
    pub fn open_file(path: impl Into<PathBuf>) -> Self {
        Self::open(FilePersistence::new(path))
    }

    /// Open a store that lives only in this process.
    #[must_use]
    pub fn in_memory() -> Self {
        Self::open(MemoryPersistence::new())
    }

    /// All lines in insertion order.
    #[must_use]
    pub fn get_all(&self) -> Vec<LineItem> {
        self.lines.clone()
    }

    /// The guest cart as a snapshot.
    #[must_use]
    pub fn snapshot(&self) -> Cart {
        Cart::new(CartOwner::Device, self.get_all())
    }

    /// Lines to replay during a merge.
    #[must_use]
    pub fn lines_for_sync(&self) -> Vec<LineItem> {
        self.get_all()
    }

    /// Add `quantity` units, incrementing the existing entry for the same
    /// merge key. Returns the line's key.
    ///
    /// The unit price of an existing entry is kept.
    pub fn upsert(
        &mut self,
        product_id: ProductId,
        quantity: u32,
        variant: Variant,
        unit_price: Price,
    ) -> LineKey {
        let key = MergeKey::new(&product_id, &variant);

        let line_key = if let Some(existing) = self.lines.iter_mut().find(|l| l.merge_key() == key) {
            existing.quantity = existing.quantity.saturating_add(quantity);
            existing.key()
        } else {
            let line = LineItem::new(product_id, quantity, variant, unit_price);
            let line_key = line.key();
            self.lines.push(line);
            line_key
        };

        self.persist();
        line_key
    }

    /// Replace a line's quantity; `quantity <= 0` removes the line.
    ///
    /// An unknown key is a no-op.
    pub fn set_quantity(&mut self, key: &LineKey, quantity: i64) {
        let quantity = u32::try_from(quantity.max(0)).unwrap_or(u32::MAX);
        if quantity == 0 {
            self.remove(key);
            return;
        }

        match self.lines.iter_mut().find(|l| &l.key() == key) {
            Some(line) => {
                line.quantity = quantity;
                self.persist();
            }
            None => debug!(key = %key, "Quantity update for absent guest line ignored"),
        }
    }

    /// Remove a line. Removing an absent key is a no-op.
    pub fn remove(&mut self, key: &LineKey) {
        let before = self.lines.len();
        self.lines.retain(|l| &l.key() != key);
        if self.lines.len() != before {
            self.persist();
        }
    }

    /// Remove every line and delete the stored document.
    pub fn clear(&mut self) {
        self.lines.clear();
        if let Err(e) = self.persistence.remove() {
            warn!(error = %e, "Failed to delete guest cart document");
        }
    }

    /// Sum of quantities.
    #[must_use]
    pub fn count(&self) -> u64 {
        self.lines.iter().map(|l| u64::from(l.quantity)).sum()
    }

    /// Sum of `unit_price * quantity`.
    #[must_use]
    pub fn total(&self) -> Price {
        self.snapshot().subtotal()
    }

    /// Whether any line is present.
    #[must_use]
    pub fn has_items(&self) -> bool {
        !self.lines.is_empty()
    }

    fn persist(&self) {
        let document = match serde_json::to_string(&self.lines) {
            Ok(document) => document,
            Err(e) => {
                warn!(error = %e, "Failed to serialize guest cart");
                return;
            }
        };
        if let Err(e) = self.persistence.save(&document) {
            warn!(error = %e, "Failed to persist guest cart");
        }
    }
}

/// Decode a stored document, dropping entries that are unreadable or invalid.
///
/// Entries sharing a merge key are coalesced into the first.
fn decode_document(document: &str) -> Vec<LineItem> {
    let entries: Vec<serde_json::Value> = match serde_json::from_str(document) {
        Ok(entries) => entries,
        Err(e) => {
            warn!(error = %e, "Guest cart document is corrupt, starting empty");
            return Vec::new();
        }
    };

    let mut lines: Vec<LineItem> = Vec::with_capacity(entries.len());
    for entry in entries {
        let line: LineItem = match serde_json::from_value(entry) {
            Ok(line) => line,
            Err(e) => {
                warn!(error = %e, "Dropping unreadable guest cart entry");
                continue;
            }
        };
        if let Err(e) = line.validate() {
            warn!(error = %e, product_id = %line.product_id, "Dropping invalid guest cart entry");
            continue;
        }
        match lines.iter_mut().find(|l| l.same_entry(&line)) {
            Some(existing) => existing.quantity = existing.quantity.saturating_add(line.quantity),
            None => lines.push(line),
        }
    }
    lines
}
