use crate::models::{IllegalTransition, InvoiceStatus, LineRef};
use thiserror::Error;

/// Errors surfaced by the NF-e entry pipeline.
///
/// Every variant is raised before any durable write of the failing call, or
/// inside a transaction that is then rolled back.
#[derive(Debug, Error)]
pub enum NfeError {
    #[error("malformed document: {0}")]
    MalformedInput(String),

    #[error("invoice {access_key} already imported as entry {existing_id}")]
    DuplicateInvoice { access_key: String, existing_id: i64 },

    #[error("{} line(s) without a fulfillment target", .0.len())]
    UnresolvedLines(Vec<LineRef>),

    #[error("illegal transition {from} -> {to}")]
    IllegalTransition {
        from: InvoiceStatus,
        to: InvoiceStatus,
    },

    #[error("{entity} {id} not found")]
    ReferenceNotFound { entity: &'static str, id: i64 },

    #[error("store {store_id} is outside the caller's scope")]
    Forbidden { store_id: i64 },

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),
}

impl From<IllegalTransition> for NfeError {
    fn from(e: IllegalTransition) -> Self {
        NfeError::IllegalTransition {
            from: e.from,
            to: e.to,
        }
    }
}

impl From<roxmltree::Error> for NfeError {
    fn from(e: roxmltree::Error) -> Self {
        NfeError::MalformedInput(e.to_string())
    }
}

impl NfeError {
    pub fn not_found(entity: &'static str, id: i64) -> Self {
        NfeError::ReferenceNotFound { entity, id }
    }
}

pub type NfeResult<T> = Result<T, NfeError>;
