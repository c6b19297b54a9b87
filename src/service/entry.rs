use super::ingestor;
use super::matcher::MatchCatalog;
use super::RemainderPolicy;
use crate::db::{posting, queries};
use crate::error::{NfeError, NfeResult};
use crate::models::{
    CancelOutcome, InvoiceStatus, NfeEntry, NfeEntryDetail, NfeEntryLine, ParsedInvoice,
};
use serde_json::json;
use sqlx::{PgConnection, PgPool};

/// NF-e entry pipeline: upload, preview, confirm, cancel.
pub struct NfeEntryService {
    pub(crate) pool: PgPool,
    pub(crate) remainder_policy: RemainderPolicy,
}

/// Caller input for Upload.
#[derive(Debug, Clone, Copy)]
pub struct UploadTarget {
    pub store_id: i64,
    pub supplier_id: Option<i64>,
    /// Store the caller is bound to, if any
    pub scope: Option<i64>,
}

impl NfeEntryService {
    pub fn new(pool: PgPool, remainder_policy: RemainderPolicy) -> Self {
        Self {
            pool,
            remainder_policy,
        }
    }

    /// Parses and persists a new draft with status `imported`.
    pub async fn upload(&self, target: UploadTarget, payload: &[u8]) -> NfeResult<NfeEntryDetail> {
        if let Some(scope) = target.scope {
            if scope != target.store_id {
                return Err(NfeError::Forbidden {
                    store_id: target.store_id,
                });
            }
        }

        let parsed = ingestor::parse_document(payload)?;
        if parsed.issued_at_fallback {
            tracing::warn!(
                access_key = %parsed.access_key,
                "document has no usable emission date, using current time"
            );
        }

        if let Some(existing_id) = queries::find_entry_id_by_key(&self.pool, &parsed.access_key).await? {
            tracing::info!(access_key = %parsed.access_key, existing_id, "duplicate invoice rejected");
            return Err(NfeError::DuplicateInvoice {
                access_key: parsed.access_key,
                existing_id,
            });
        }

        if !queries::store_exists(&self.pool, target.store_id).await? {
            return Err(NfeError::not_found("store", target.store_id));
        }
        let supplier_id = self.resolve_supplier(target.supplier_id, &parsed).await?;

        let raw_document = String::from_utf8_lossy(payload);
        let mut tx = self.pool.begin().await?;
        let entry_id = match queries::insert_entry(
            &mut tx,
            &parsed,
            target.store_id,
            supplier_id,
            &raw_document,
        )
        .await
        {
            Ok(id) => id,
            Err(sqlx::Error::Database(db)) if db.is_unique_violation() => {
                // lost the race against a concurrent upload of the same key
                drop(tx);
                return Err(self.duplicate_of(parsed.access_key).await);
            }
            Err(e) => return Err(e.into()),
        };
        let line_count = queries::insert_lines(&mut tx, entry_id, &parsed).await?;
        queries::insert_log(
            &mut *tx,
            entry_id,
            "uploaded",
            json!({
                "access_key": parsed.access_key,
                "store_id": target.store_id,
                "supplier_id": supplier_id,
                "lines": line_count,
            }),
        )
        .await?;
        tx.commit().await?;

        tracing::info!(
            entry_id,
            access_key = %parsed.access_key,
            store_id = target.store_id,
            supplier_id = ?supplier_id,
            lines = line_count,
            "invoice imported"
        );

        self.get(entry_id, None).await
    }

    /// Explicit supplier first, else the first supplier whose tax id matches the issuer.
    async fn resolve_supplier(
        &self,
        explicit: Option<i64>,
        parsed: &ParsedInvoice,
    ) -> NfeResult<Option<i64>> {
        if let Some(supplier_id) = explicit {
            return match queries::get_supplier(&self.pool, supplier_id).await? {
                Some(s) => Ok(Some(s.id)),
                None => Err(NfeError::not_found("supplier", supplier_id)),
            };
        }

        let candidates = queries::find_suppliers_by_tax_id(&self.pool, &parsed.issuer_tax_id).await?;
        let chosen = candidates.first().map(|s| s.id);
        if candidates.len() > 1 {
            let ids: Vec<i64> = candidates.iter().map(|s| s.id).collect();
            tracing::warn!(
                tax_id = %parsed.issuer_tax_id,
                candidates = ?ids,
                chosen = ?chosen,
                "several suppliers share the issuer tax id, picking the oldest"
            );
        } else if chosen.is_none() {
            tracing::info!(tax_id = %parsed.issuer_tax_id, "no supplier matches the issuer tax id");
        }
        Ok(chosen)
    }

    async fn duplicate_of(&self, access_key: String) -> NfeError {
        match queries::find_entry_id_by_key(&self.pool, &access_key).await {
            Ok(Some(existing_id)) => NfeError::DuplicateInvoice {
                access_key,
                existing_id,
            },
            Ok(None) => NfeError::MalformedInput(format!("access key {} rejected", access_key)),
            Err(e) => e.into(),
        }
    }

    /// Draft with its lines; drafts of other stores are hidden from scoped callers.
    pub async fn get(&self, entry_id: i64, scope: Option<i64>) -> NfeResult<NfeEntryDetail> {
        let entry = queries::get_entry(&self.pool, entry_id)
            .await?
            .filter(|e| scope.map_or(true, |s| s == e.store_id))
            .ok_or_else(|| NfeError::not_found("nfe_entry", entry_id))?;
        let lines = queries::list_lines(&self.pool, entry_id).await?;
        Ok(NfeEntryDetail { entry, lines })
    }

    pub async fn list(&self, scope: Option<i64>) -> NfeResult<Vec<NfeEntry>> {
        Ok(queries::list_entries(&self.pool, scope).await?)
    }

    /// imported|reconciled -> cancelled. Never touches inventory: nothing
    /// has been posted before this transition is allowed.
    pub async fn cancel(&self, entry_id: i64) -> NfeResult<CancelOutcome> {
        let mut tx = self.pool.begin().await?;
        let entry = posting::lock_entry(&mut tx, entry_id)
            .await?
            .ok_or_else(|| NfeError::not_found("nfe_entry", entry_id))?;

        let next = entry.status.transition(InvoiceStatus::Cancelled)?;
        posting::set_status(&mut tx, entry_id, next).await?;
        queries::insert_log(&mut *tx, entry_id, "cancelled", json!({ "from": entry.status })).await?;
        tx.commit().await?;

        tracing::info!(entry_id, from = %entry.status, "invoice cancelled");
        Ok(CancelOutcome {
            entry_id,
            status: next,
        })
    }
}

/// Loads the catalog snapshot for a draft's lines in two queries.
pub(crate) async fn load_catalog(
    conn: &mut PgConnection,
    supplier_id: Option<i64>,
    lines: &[NfeEntryLine],
) -> Result<MatchCatalog, sqlx::Error> {
    let mut barcodes: Vec<String> = lines.iter().filter_map(|l| l.barcode.clone()).collect();
    barcodes.sort();
    barcodes.dedup();
    let skus = if barcodes.is_empty() {
        Vec::new()
    } else {
        queries::skus_by_barcodes(&mut *conn, &barcodes).await?
    };

    let maps = match supplier_id {
        Some(supplier_id) => {
            let mut codes: Vec<String> = lines.iter().map(|l| l.vendor_code.clone()).collect();
            codes.sort();
            codes.dedup();
            queries::vendor_maps_for(&mut *conn, supplier_id, &codes).await?
        }
        None => Vec::new(),
    };

    Ok(MatchCatalog::new(skus, maps))
}
