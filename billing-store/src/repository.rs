//! Fact query and ledger write side of the clinical schema
//!
//! `FactRepository` supplies the ordered treatment join; `LedgerTx` buffers
//! ledger inserts in one transaction so a pass commits all-or-nothing.

use std::collections::HashSet;

use async_trait::async_trait;
use billing_engine::{
    BillingError, BillingRecord, BillingResult, FactSource, LedgerSink, OrderedFacts,
    TreatmentFact,
};
use sqlx::{Postgres, Row, Transaction};
use tracing::debug;

use crate::connection::BillingPool;

/// Candidate rows for billing, ordered by consultation then treatment date.
/// The fee-once rule depends on this ORDER BY.
const FACT_QUERY: &str = r#"
SELECT
    t.tid AS treatment_id,
    t.treatment_date,
    d.cid AS consultation_id,
    tc.treatment_cost,
    c.consultation_fee,
    i.payment_model,
    i.coverage_percentage,
    i.discount_percentage
FROM treatment_info t
JOIN diagnosis_info d ON t.did = d.did
JOIN consultation_info c ON d.cid = c.cid
JOIN insurance_info i ON c.insid = i.insid
JOIN treatment_costs tc ON t.tcid = tc.tcid
ORDER BY d.cid, t.treatment_date
"#;

const INSERT_QUERY: &str = r#"
INSERT INTO billing_info (
    bid, tid, billing_date,
    treatment_cost, consultation_fee,
    gross_amount, insurance_amount, patient_amount,
    payment_model
)
VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
"#;

/// Read side: the joined clinical-financial facts
pub struct FactRepository {
    pool: BillingPool,
}

impl FactRepository {
    pub fn new(pool: BillingPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl FactSource for FactRepository {
    async fn fetch_ordered_facts(&self) -> BillingResult<OrderedFacts> {
        let rows = sqlx::query_as::<_, TreatmentFact>(FACT_QUERY)
            .fetch_all(self.pool.pool())
            .await
            .map_err(|e| BillingError::DataSource(format!("fact query failed: {e}")))?;

        debug!(rows = rows.len(), "fetched candidate fact rows");
        OrderedFacts::new(rows)
    }
}

/// Write side: billing ledger within a single transaction
///
/// Begun from the pool, committed once after the pass. Dropping it without
/// [`LedgerTx::commit`] rolls everything back.
pub struct LedgerTx {
    tx: Transaction<'static, Postgres>,
}

impl LedgerTx {
    pub async fn begin(pool: &BillingPool) -> BillingResult<Self> {
        let tx = pool
            .pool()
            .begin()
            .await
            .map_err(|e| BillingError::DataSource(format!("begin failed: {e}")))?;
        Ok(Self { tx })
    }

    /// Commit every insert of the pass at once.
    pub async fn commit(self) -> BillingResult<()> {
        self.tx
            .commit()
            .await
            .map_err(|e| BillingError::DataSource(format!("commit failed: {e}")))
    }
}

#[async_trait]
impl LedgerSink for LedgerTx {
    async fn exists(&mut self, treatment_id: &str) -> BillingResult<bool> {
        let found = sqlx::query("SELECT bid FROM billing_info WHERE tid = $1")
            .bind(treatment_id)
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(|e| BillingError::DataSource(format!("existence check failed: {e}")))?;
        Ok(found.is_some())
    }

    async fn insert(&mut self, record: &BillingRecord) -> BillingResult<()> {
        sqlx::query(INSERT_QUERY)
            .bind(&record.billing_id)
            .bind(&record.treatment_id)
            .bind(record.billing_date)
            .bind(record.treatment_cost)
            .bind(record.consultation_fee)
            .bind(record.gross_amount)
            .bind(record.insurance_amount)
            .bind(record.patient_amount)
            .bind(&record.payment_model)
            .execute(&mut *self.tx)
            .await
            .map_err(insert_error)?;
        Ok(())
    }

    async fn consultations_charged(&mut self) -> BillingResult<HashSet<String>> {
        // The ledger stores no consultation id; recover it through the
        // diagnosis join for rows that carried the fee.
        let rows = sqlx::query(
            r#"
            SELECT DISTINCT d.cid
            FROM billing_info b
            JOIN treatment_info t ON b.tid = t.tid
            JOIN diagnosis_info d ON t.did = d.did
            WHERE b.consultation_fee > 0
            "#,
        )
        .fetch_all(&mut *self.tx)
        .await
        .map_err(|e| BillingError::DataSource(format!("fee history query failed: {e}")))?;

        Ok(rows.iter().map(|r| r.get::<String, _>("cid")).collect())
    }
}

fn insert_error(e: sqlx::Error) -> BillingError {
    match &e {
        sqlx::Error::Database(db) if db.is_unique_violation() => {
            BillingError::ConstraintViolation(db.to_string())
        }
        _ => BillingError::DataSource(e.to_string()),
    }
}
