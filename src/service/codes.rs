use crate::db::sequence;
use crate::error::NfeResult;
use serde::Serialize;
use sqlx::PgPool;

/// GS1 country prefix (Brazil) followed by the company prefix.
const EAN_PREFIX: &str = "7891234";
const EAN_COUNTER: &str = "ean13";

#[derive(Debug, Clone, Serialize)]
pub struct GeneratedCode {
    pub sequence: i64,
    pub ean13: String,
}

/// Internal barcode generator backed by a row-locked counter.
pub struct CodeGenerator {
    pool: PgPool,
}

impl CodeGenerator {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn next_ean13(&self) -> NfeResult<GeneratedCode> {
        let mut tx = self.pool.begin().await?;
        let sequence = sequence::next_value(&mut tx, EAN_COUNTER).await?;
        tx.commit().await?;

        let ean13 = build_ean13(sequence);
        tracing::info!(sequence, %ean13, "internal barcode generated");
        Ok(GeneratedCode { sequence, ean13 })
    }
}

/// Standard EAN-13 check digit for a 12-digit base.
/// Non-digit characters are ignored.
pub fn ean13_check_digit(base12: &str) -> u32 {
    let sum: u32 = base12
        .chars()
        .filter_map(|c| c.to_digit(10))
        .enumerate()
        .map(|(i, d)| if i % 2 == 0 { d } else { d * 3 })
        .sum();
    (10 - sum % 10) % 10
}

pub fn build_ean13(sequence: i64) -> String {
    let base = format!("{}{:05}", EAN_PREFIX, sequence.rem_euclid(100_000));
    let check = ean13_check_digit(&base);
    format!("{}{}", base, check)
}
