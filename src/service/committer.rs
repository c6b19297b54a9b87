use super::allocator::{allocate, AllocationLine, RemainderPolicy};
use super::entry::{load_catalog, NfeEntryService};
use super::matcher::MatchCatalog;
use crate::db::posting::{self, MovementInsert};
use crate::db::queries;
use crate::error::{NfeError, NfeResult};
use crate::models::{
    ConfirmOptions, ConfirmOutcome, FulfillmentTarget, InvoiceStatus, InvoiceTotals, LineRef,
    MatchOrigin, NfeEntryLine, OverrideKind, PlannedLine, PostingPlan, VendorMapInsert,
};
use chrono::Utc;
use indexmap::IndexSet;
use serde_json::json;
use sqlx::PgConnection;
use std::collections::HashMap;

/// Flags that shape a posting plan.
#[derive(Debug, Clone, Copy, Default)]
pub struct PlanFlags {
    pub allow_partial: bool,
    pub save_vendor_map: bool,
    pub remainder: RemainderPolicy,
}

/// Decides, without touching the database, what Confirm will write.
///
/// Each line goes through the catalog first; an override only fills a line
/// the catalog left unresolved. Unresolved lines fail the whole plan unless
/// `allow_partial` is set, in which case they are reported as skipped.
pub fn plan_posting(
    supplier_id: Option<i64>,
    totals: &InvoiceTotals,
    lines: &[NfeEntryLine],
    catalog: &MatchCatalog,
    overrides: &HashMap<i64, FulfillmentTarget>,
    flags: PlanFlags,
) -> NfeResult<PostingPlan> {
    let mut matched: Vec<(&NfeEntryLine, FulfillmentTarget, MatchOrigin)> = Vec::new();
    let mut skipped: Vec<LineRef> = Vec::new();
    let mut from_override: Vec<(&NfeEntryLine, FulfillmentTarget)> = Vec::new();

    for line in lines {
        let res = catalog.resolve_line(line);
        match (res.target, res.origin) {
            (target, Some(origin)) if target.is_resolved() => matched.push((line, target, origin)),
            _ => match overrides.get(&line.id) {
                Some(target) if target.is_resolved() => {
                    matched.push((line, target.clone(), MatchOrigin::Override));
                    from_override.push((line, target.clone()));
                }
                _ => skipped.push(line.to_ref()),
            },
        }
    }

    if !skipped.is_empty() && !flags.allow_partial {
        return Err(NfeError::UnresolvedLines(skipped));
    }

    let inputs: Vec<AllocationLine> = matched
        .iter()
        .map(|(line, _, _)| AllocationLine {
            gross: line.gross_value.clone(),
            quantity: line.quantity.clone(),
            own_discount: line.discount.clone(),
        })
        .collect();
    let allocations = allocate(&inputs, totals, flags.remainder);

    let planned = matched
        .into_iter()
        .zip(allocations)
        .map(|((line, target, origin), allocation)| PlannedLine {
            line_id: line.id,
            ordinal: line.ordinal,
            target,
            origin,
            quantity: line.quantity.clone(),
            unit_price: line.unit_price.clone(),
            gross_value: line.gross_value.clone(),
            allocation,
        })
        .collect();

    let vendor_maps = match (flags.save_vendor_map, supplier_id) {
        (true, Some(supplier_id)) => {
            let mut seen = IndexSet::new();
            from_override
                .into_iter()
                .filter(|(line, _)| seen.insert(line.vendor_code.clone()))
                .map(|(line, target)| VendorMapInsert {
                    supplier_id,
                    vendor_code: line.vendor_code.clone(),
                    description: line.description.clone(),
                    target,
                })
                .collect()
        }
        _ => Vec::new(),
    };

    Ok(PostingPlan {
        lines: planned,
        skipped,
        vendor_maps,
    })
}

impl NfeEntryService {
    /// Posts a draft in a single transaction.
    ///
    /// The draft row is locked before its status is checked, so a second
    /// concurrent confirm waits and then fails with a conflict. Any error
    /// drops the transaction and leaves the draft at its prior status.
    pub async fn confirm(&self, entry_id: i64, options: ConfirmOptions) -> NfeResult<ConfirmOutcome> {
        let mut tx = self.pool.begin().await?;

        let entry = posting::lock_entry(&mut tx, entry_id)
            .await?
            .ok_or_else(|| NfeError::not_found("nfe_entry", entry_id))?;
        let next = entry.status.transition(InvoiceStatus::Posted)?;

        let lines = queries::list_lines(&mut *tx, entry_id).await?;
        let overrides = resolve_overrides(&mut tx, &lines, &options).await?;
        let catalog = load_catalog(&mut tx, entry.supplier_id, &lines).await?;

        if options.save_vendor_map && entry.supplier_id.is_none() && !overrides.is_empty() {
            tracing::warn!(entry_id, "draft has no supplier, overrides not saved as vendor maps");
        }

        let plan = plan_posting(
            entry.supplier_id,
            &entry.totals(),
            &lines,
            &catalog,
            &overrides,
            PlanFlags {
                allow_partial: options.allow_partial,
                save_vendor_map: options.save_vendor_map,
                remainder: self.remainder_policy,
            },
        )?;

        let purchase_id = posting::upsert_purchase(&mut tx, &entry).await?;
        posting::insert_purchase_lines(&mut tx, purchase_id, &plan.lines).await?;

        let moved_on = Utc::now().date_naive();
        for line in &plan.lines {
            if let FulfillmentTarget::Sku { sku_id, barcode } = &line.target {
                let balance =
                    posting::add_inventory(&mut tx, entry.store_id, *sku_id, &line.quantity).await?;
                posting::insert_movement(
                    &mut tx,
                    &MovementInsert {
                        store_id: entry.store_id,
                        sku_id: *sku_id,
                        barcode: barcode.as_str(),
                        quantity: &line.quantity,
                        unit_cost: &line.allocation.landed_unit_cost,
                        document: entry.number.as_str(),
                        moved_on,
                    },
                )
                .await?;
                tracing::debug!(entry_id, sku_id, %balance, "stock received");
            }
        }

        let vendor_maps_saved = posting::insert_vendor_maps(&mut tx, &plan.vendor_maps).await?;
        posting::set_status(&mut tx, entry_id, next).await?;

        let sku_ids = plan.sku_ids();
        queries::insert_log(
            &mut *tx,
            entry_id,
            "confirmed",
            json!({
                "purchase_id": purchase_id,
                "lines_created": plan.lines.len(),
                "skus_updated": sku_ids.len(),
                "skipped": plan.skipped.iter().map(|l| l.line_id).collect::<Vec<_>>(),
            }),
        )
        .await?;
        if vendor_maps_saved > 0 {
            let codes: Vec<&str> = plan.vendor_maps.iter().map(|m| m.vendor_code.as_str()).collect();
            queries::insert_log(
                &mut *tx,
                entry_id,
                "vendor_map_saved",
                json!({ "saved": vendor_maps_saved, "vendor_codes": codes }),
            )
            .await?;
        }

        tx.commit().await?;

        tracing::info!(
            entry_id,
            purchase_id,
            lines = plan.lines.len(),
            skus = sku_ids.len(),
            skipped = plan.skipped.len(),
            vendor_maps = vendor_maps_saved,
            "invoice posted"
        );

        let partial = !plan.skipped.is_empty() || options.allow_partial;
        Ok(ConfirmOutcome {
            entry_id,
            status: next,
            purchase_id,
            lines_created: plan.lines.len(),
            skus_updated: sku_ids.len(),
            vendor_maps_saved,
            skipped_lines: partial.then_some(plan.skipped),
        })
    }
}

/// Validates every override and turns it into a concrete target.
///
/// Ids are checked even for lines the catalog will resolve on its own, so a
/// typo in the request never slips through silently.
async fn resolve_overrides(
    conn: &mut PgConnection,
    lines: &[NfeEntryLine],
    options: &ConfirmOptions,
) -> NfeResult<HashMap<i64, FulfillmentTarget>> {
    let mut resolved = HashMap::with_capacity(options.overrides.len());
    for (line_id, ov) in &options.overrides {
        if !lines.iter().any(|l| l.id == *line_id) {
            return Err(NfeError::not_found("nfe_entry_line", *line_id));
        }
        let target = match ov.kind {
            OverrideKind::Sku => {
                let sku = queries::find_active_sku(&mut *conn, ov.target_id)
                    .await?
                    .ok_or_else(|| NfeError::not_found("sku", ov.target_id))?;
                FulfillmentTarget::Sku {
                    sku_id: sku.id,
                    barcode: sku.barcode,
                }
            }
            OverrideKind::Product => {
                if !queries::product_exists(&mut *conn, ov.target_id).await? {
                    return Err(NfeError::not_found("product", ov.target_id));
                }
                FulfillmentTarget::Product {
                    product_id: ov.target_id,
                }
            }
        };
        resolved.insert(*line_id, target);
    }
    Ok(resolved)
}
