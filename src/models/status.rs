use serde::{Deserialize, Serialize};
use sqlx::encode::IsNull;
use sqlx::error::BoxDynError;
use sqlx::postgres::{PgArgumentBuffer, PgTypeInfo, PgValueRef, Postgres};
use sqlx::{Decode, Encode, Type};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Lifecycle of an inbound invoice draft.
///
/// ```text
/// imported ──► reconciled ──► posted
///    │  └──────────────────────▲
///    └──► cancelled ◄── reconciled
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InvoiceStatus {
    Imported,
    Reconciled,
    Posted,
    Cancelled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("illegal transition {from} -> {to}")]
pub struct IllegalTransition {
    pub from: InvoiceStatus,
    pub to: InvoiceStatus,
}

#[derive(Debug, Error)]
#[error("unknown invoice status '{0}'")]
pub struct UnknownStatus(String);

impl InvoiceStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            InvoiceStatus::Imported => "imported",
            InvoiceStatus::Reconciled => "reconciled",
            InvoiceStatus::Posted => "posted",
            InvoiceStatus::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, InvoiceStatus::Posted | InvoiceStatus::Cancelled)
    }

    pub fn can_transition_to(self, next: InvoiceStatus) -> bool {
        use InvoiceStatus::*;
        matches!(
            (self, next),
            (Imported, Reconciled)
                | (Imported, Posted)
                | (Reconciled, Posted)
                | (Imported, Cancelled)
                | (Reconciled, Cancelled)
        )
    }

    /// Validates `self -> next` against the transition table.
    pub fn transition(self, next: InvoiceStatus) -> Result<InvoiceStatus, IllegalTransition> {
        if self.can_transition_to(next) {
            Ok(next)
        } else {
            Err(IllegalTransition { from: self, to: next })
        }
    }
}

impl fmt::Display for InvoiceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for InvoiceStatus {
    type Err = UnknownStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "imported" => Ok(InvoiceStatus::Imported),
            "reconciled" => Ok(InvoiceStatus::Reconciled),
            "posted" => Ok(InvoiceStatus::Posted),
            "cancelled" => Ok(InvoiceStatus::Cancelled),
            other => Err(UnknownStatus(other.to_string())),
        }
    }
}

// stored as VARCHAR
impl Type<Postgres> for InvoiceStatus {
    fn type_info() -> PgTypeInfo {
        <String as Type<Postgres>>::type_info()
    }

    fn compatible(ty: &PgTypeInfo) -> bool {
        <String as Type<Postgres>>::compatible(ty)
    }
}

impl<'r> Decode<'r, Postgres> for InvoiceStatus {
    fn decode(value: PgValueRef<'r>) -> Result<Self, BoxDynError> {
        let raw = <&str as Decode<Postgres>>::decode(value)?;
        Ok(raw.parse()?)
    }
}

impl Encode<'_, Postgres> for InvoiceStatus {
    fn encode_by_ref(&self, buf: &mut PgArgumentBuffer) -> IsNull {
        <&str as Encode<Postgres>>::encode(self.as_str(), buf)
    }
}
