use super::entry::{load_catalog, NfeEntryService};
use crate::db::queries;
use crate::error::{NfeError, NfeResult};
use crate::models::{InvoiceStatus, NfeEntryLine, PreviewLine, PreviewReport, Resolution};
use serde_json::json;

impl NfeEntryService {
    /// Read-only match report for a draft.
    ///
    /// The only writes are the optional supplier assignment and the
    /// `imported -> reconciled` move once every line resolves; a draft that
    /// already moved past `imported` keeps its status.
    pub async fn preview(
        &self,
        entry_id: i64,
        supplier_override: Option<i64>,
    ) -> NfeResult<PreviewReport> {
        let mut tx = self.pool.begin().await?;
        let mut entry = queries::get_entry(&mut *tx, entry_id)
            .await?
            .ok_or_else(|| NfeError::not_found("nfe_entry", entry_id))?;

        if let Some(supplier_id) = supplier_override {
            if queries::get_supplier(&mut *tx, supplier_id).await?.is_none() {
                return Err(NfeError::not_found("supplier", supplier_id));
            }
            if entry.status.is_terminal() {
                tracing::warn!(
                    entry_id,
                    status = %entry.status,
                    "supplier not recorded on a closed draft"
                );
            } else if entry.supplier_id != Some(supplier_id) {
                queries::set_supplier(&mut *tx, entry_id, supplier_id).await?;
                entry.supplier_id = Some(supplier_id);
            }
        }
        let supplier_id = supplier_override.or(entry.supplier_id);

        let lines = queries::list_lines(&mut *tx, entry_id).await?;
        let catalog = load_catalog(&mut tx, supplier_id, &lines).await?;
        let resolutions = catalog.resolve_all(&lines);
        let report_lines = build_report_lines(&lines, &resolutions);
        let resolved_lines = report_lines.iter().filter(|l| l.target.is_some()).count();

        let mut status = entry.status;
        let next = next_preview_status(status, resolved_lines, lines.len());
        if next != status {
            let moved = queries::advance_status(&mut *tx, entry_id, status, next).await?;
            if moved == 1 {
                status = next;
                queries::insert_log(
                    &mut *tx,
                    entry_id,
                    "previewed",
                    json!({
                        "resolved_lines": resolved_lines,
                        "total_lines": lines.len(),
                        "supplier_id": supplier_id,
                    }),
                )
                .await?;
            } else if let Some(current) = queries::get_entry(&mut *tx, entry_id).await? {
                status = current.status;
            }
        }
        tx.commit().await?;

        tracing::info!(
            entry_id,
            resolved = resolved_lines,
            total = lines.len(),
            status = %status,
            "preview computed"
        );

        Ok(PreviewReport {
            entry_id,
            status,
            resolved_lines,
            total_lines: lines.len(),
            lines: report_lines,
        })
    }
}

/// Status after a preview: an `imported` draft becomes `reconciled` only
/// when every line has a target; any other draft keeps its status.
pub fn next_preview_status(current: InvoiceStatus, resolved: usize, total: usize) -> InvoiceStatus {
    match current {
        InvoiceStatus::Imported if resolved == total => current
            .transition(InvoiceStatus::Reconciled)
            .unwrap_or(current),
        _ => current,
    }
}

/// One report row per line, in document order.
pub fn build_report_lines(lines: &[NfeEntryLine], resolutions: &[Resolution]) -> Vec<PreviewLine> {
    lines
        .iter()
        .zip(resolutions)
        .map(|(line, res)| PreviewLine {
            line_id: line.id,
            ordinal: line.ordinal,
            vendor_code: line.vendor_code.clone(),
            description: line.description.clone(),
            barcode: line.barcode.clone(),
            quantity: line.quantity.clone(),
            unit_price: line.unit_price.clone(),
            total: line.gross_value.clone(),
            target: res.target.resolved().cloned(),
            origin: res.origin,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{FulfillmentTarget, MatchOrigin, SkuRecord};
    use crate::service::MatchCatalog;
    use bigdecimal::BigDecimal;
    use std::str::FromStr;

    fn line(id: i64, ordinal: i32, vendor_code: &str, barcode: Option<&str>) -> NfeEntryLine {
        NfeEntryLine {
            id,
            nfe_entry_id: 1,
            ordinal,
            vendor_code: vendor_code.to_string(),
            description: format!("item {}", vendor_code),
            ncm: None,
            cfop: None,
            unit: "UN".to_string(),
            quantity: BigDecimal::from(2),
            unit_price: BigDecimal::from_str("5.00").unwrap(),
            gross_value: BigDecimal::from_str("10.00").unwrap(),
            barcode: barcode.map(str::to_string),
            discount: None,
            freight: None,
            other: None,
        }
    }

    #[test]
    fn report_keeps_order_and_nulls_unresolved_targets() {
        let catalog = MatchCatalog::new(
            vec![SkuRecord {
                id: 7,
                product_id: 70,
                barcode: "E1".to_string(),
                product_code: "P7".to_string(),
            }],
            vec![],
        );
        let lines = vec![line(11, 1, "A", Some("E1")), line(12, 2, "B", None)];
        let report = build_report_lines(&lines, &catalog.resolve_all(&lines));

        assert_eq!(report.len(), 2);
        assert_eq!(report[0].ordinal, 1);
        assert_eq!(
            report[0].target,
            Some(FulfillmentTarget::Sku {
                sku_id: 7,
                barcode: "E1".to_string()
            })
        );
        assert_eq!(report[0].origin, Some(MatchOrigin::Barcode));
        assert_eq!(report[0].total, BigDecimal::from_str("10.00").unwrap());
        assert!(report[1].target.is_none());
        assert!(report[1].origin.is_none());

        let json = serde_json::to_value(&report[1]).unwrap();
        assert!(json["target"].is_null());
    }

    #[test]
    fn reconciled_only_when_every_line_resolves() {
        use InvoiceStatus::*;
        assert_eq!(next_preview_status(Imported, 2, 2), Reconciled);
        assert_eq!(next_preview_status(Imported, 1, 2), Imported);
        assert_eq!(next_preview_status(Imported, 0, 2), Imported);
    }

    #[test]
    fn preview_never_moves_other_statuses() {
        use InvoiceStatus::*;
        for current in [Reconciled, Posted, Cancelled] {
            assert_eq!(next_preview_status(current, 1, 2), current);
            assert_eq!(next_preview_status(current, 2, 2), current);
        }
    }
}
