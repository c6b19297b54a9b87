use serde::{Deserialize, Serialize};

/// Where an invoice line is fulfilled.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum FulfillmentTarget {
    /// Inventory-tracked variant; receiving it moves stock.
    Sku { sku_id: i64, barcode: String },
    /// Non-stock product; receiving it only books the purchase.
    Product { product_id: i64 },
    Unresolved,
}

impl FulfillmentTarget {
    pub fn is_resolved(&self) -> bool {
        !matches!(self, FulfillmentTarget::Unresolved)
    }

    pub fn sku_id(&self) -> Option<i64> {
        match self {
            FulfillmentTarget::Sku { sku_id, .. } => Some(*sku_id),
            _ => None,
        }
    }

    pub fn product_id(&self) -> Option<i64> {
        match self {
            FulfillmentTarget::Product { product_id } => Some(*product_id),
            _ => None,
        }
    }

    /// `None` for unresolved lines, so reports serialize them as null.
    pub fn resolved(&self) -> Option<&FulfillmentTarget> {
        self.is_resolved().then_some(self)
    }
}

/// How a line got its target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchOrigin {
    Barcode,
    VendorMap,
    Override,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Resolution {
    pub target: FulfillmentTarget,
    pub origin: Option<MatchOrigin>,
}

impl Resolution {
    pub fn unresolved() -> Self {
        Self {
            target: FulfillmentTarget::Unresolved,
            origin: None,
        }
    }

    pub fn new(target: FulfillmentTarget, origin: MatchOrigin) -> Self {
        Self {
            target,
            origin: Some(origin),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OverrideKind {
    Sku,
    Product,
}

/// Manual target chosen by the operator for one line: `{"type": "sku", "target_id": 7}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineOverride {
    #[serde(rename = "type")]
    pub kind: OverrideKind,
    pub target_id: i64,
}
