use crate::models::{
    FulfillmentTarget, MatchOrigin, NfeEntryLine, Resolution, SkuRecord, VendorMapRecord,
};
use std::collections::HashMap;

/// In-memory snapshot of the SKUs and vendor maps a draft can resolve to.
///
/// Loaded in one pass per draft (every barcode and vendor code on the draft),
/// then each line is resolved without further queries.
#[derive(Debug, Default)]
pub struct MatchCatalog {
    skus_by_barcode: HashMap<String, SkuRecord>,
    maps_by_vendor_code: HashMap<String, VendorMapRecord>,
}

impl MatchCatalog {
    /// `maps` must already be restricted to the draft's supplier.
    pub fn new(skus: Vec<SkuRecord>, maps: Vec<VendorMapRecord>) -> Self {
        Self {
            skus_by_barcode: skus.into_iter().map(|s| (s.barcode.clone(), s)).collect(),
            maps_by_vendor_code: maps
                .into_iter()
                .map(|m| (m.vendor_code.clone(), m))
                .collect(),
        }
    }

    /// Barcode against active SKUs first, then the (supplier, vendor code) map.
    ///
    /// A line whose barcode is unknown still falls through to the vendor map.
    pub fn resolve(&self, barcode: Option<&str>, vendor_code: &str) -> Resolution {
        if let Some(sku) = barcode.and_then(|b| self.skus_by_barcode.get(b)) {
            return Resolution::new(
                FulfillmentTarget::Sku {
                    sku_id: sku.id,
                    barcode: sku.barcode.clone(),
                },
                MatchOrigin::Barcode,
            );
        }

        if let Some(map) = self.maps_by_vendor_code.get(vendor_code) {
            let target = match (map.sku_id, &map.sku_barcode, map.product_id) {
                (Some(sku_id), Some(barcode), _) => FulfillmentTarget::Sku {
                    sku_id,
                    barcode: barcode.clone(),
                },
                (None, _, Some(product_id)) => FulfillmentTarget::Product { product_id },
                _ => FulfillmentTarget::Unresolved,
            };
            if target.is_resolved() {
                return Resolution::new(target, MatchOrigin::VendorMap);
            }
        }

        Resolution::unresolved()
    }

    pub fn resolve_line(&self, line: &NfeEntryLine) -> Resolution {
        self.resolve(line.barcode.as_deref(), &line.vendor_code)
    }

    pub fn resolve_all(&self, lines: &[NfeEntryLine]) -> Vec<Resolution> {
        lines.iter().map(|l| self.resolve_line(l)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sku(id: i64, barcode: &str) -> SkuRecord {
        SkuRecord {
            id,
            product_id: 100 + id,
            barcode: barcode.to_string(),
            product_code: "01.01.01001".to_string(),
        }
    }

    fn map_to_sku(vendor_code: &str, sku_id: i64, barcode: &str) -> VendorMapRecord {
        VendorMapRecord {
            id: 1,
            supplier_id: 1,
            vendor_code: vendor_code.to_string(),
            sku_id: Some(sku_id),
            sku_barcode: Some(barcode.to_string()),
            product_id: None,
        }
    }

    fn map_to_product(vendor_code: &str, product_id: i64) -> VendorMapRecord {
        VendorMapRecord {
            id: 2,
            supplier_id: 1,
            vendor_code: vendor_code.to_string(),
            sku_id: None,
            sku_barcode: None,
            product_id: Some(product_id),
        }
    }

    #[test]
    fn barcode_wins_over_vendor_map() {
        let catalog = MatchCatalog::new(
            vec![sku(1, "E1"), sku(2, "E2")],
            vec![map_to_sku("V1", 2, "E2")],
        );
        let res = catalog.resolve(Some("E1"), "V1");
        assert_eq!(res.origin, Some(MatchOrigin::Barcode));
        assert_eq!(res.target.sku_id(), Some(1));
    }

    #[test]
    fn unknown_barcode_falls_through_to_map() {
        let catalog = MatchCatalog::new(vec![sku(2, "E2")], vec![map_to_sku("V1", 2, "E2")]);
        let res = catalog.resolve(Some("7890000000000"), "V1");
        assert_eq!(res.origin, Some(MatchOrigin::VendorMap));
        assert_eq!(res.target.sku_id(), Some(2));
    }

    #[test]
    fn map_can_point_to_non_stock_product() {
        let catalog = MatchCatalog::new(vec![], vec![map_to_product("USO-1", 55)]);
        let res = catalog.resolve(None, "USO-1");
        assert_eq!(res.target, FulfillmentTarget::Product { product_id: 55 });
        assert_eq!(res.origin, Some(MatchOrigin::VendorMap));
    }

    #[test]
    fn nothing_matches_is_unresolved() {
        let catalog = MatchCatalog::new(vec![sku(1, "E1")], vec![map_to_product("A", 1)]);
        let res = catalog.resolve(None, "B");
        assert_eq!(res, Resolution::unresolved());
    }

    #[test]
    fn map_to_sku_without_barcode_is_ignored() {
        // the SKU behind the map was filtered out as inactive
        let mut map = map_to_sku("V9", 9, "E9");
        map.sku_barcode = None;
        let catalog = MatchCatalog::new(vec![], vec![map]);
        assert!(!catalog.resolve(None, "V9").target.is_resolved());
    }
}
