use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use crate::error::{BillingError, BillingResult};

/// Joined clinical-financial fact for one treatment
///
/// One row of the treatment ⋈ diagnosis ⋈ consultation ⋈ insurance join,
/// as supplied by the data source.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct TreatmentFact {
    pub treatment_id: String,
    pub treatment_date: NaiveDate,
    pub consultation_id: String,
    pub treatment_cost: Decimal,
    pub consultation_fee: Decimal,
    /// Raw payment-model label, kept verbatim for the ledger
    pub payment_model: String,
    pub coverage_percentage: Option<Decimal>,
    pub discount_percentage: Option<Decimal>,
}

impl TreatmentFact {
    /// Rows without identifiers cannot be billed or deduplicated.
    pub fn check_identifiers(&self) -> BillingResult<()> {
        if self.treatment_id.trim().is_empty() {
            return Err(BillingError::MalformedInput(
                "missing treatment id".to_string(),
            ));
        }
        if self.consultation_id.trim().is_empty() {
            return Err(BillingError::MalformedInput(format!(
                "treatment {}: missing consultation id",
                self.treatment_id
            )));
        }
        Ok(())
    }
}

/// Normalized payment model
///
/// Parsed from the policy's free-text label; anything unrecognized falls
/// back to self-pay.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentModel {
    Copay,
    DentalDiscount,
    SelfPay,
}

impl PaymentModel {
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_lowercase().as_str() {
            "copay" => PaymentModel::Copay,
            "dental discount" => PaymentModel::DentalDiscount,
            _ => PaymentModel::SelfPay,
        }
    }
}

/// Billing ledger entry, one per treatment
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct BillingRecord {
    pub billing_id: String,
    pub treatment_id: String,
    pub billing_date: NaiveDate,
    pub treatment_cost: Decimal,
    /// 0 unless this record carries the consultation's one-time fee
    pub consultation_fee: Decimal,
    pub gross_amount: Decimal,
    pub insurance_amount: Decimal,
    pub patient_amount: Decimal,
    /// Original label as stored on the policy, for display and audit
    pub payment_model: String,
}

impl BillingRecord {
    /// Ledger key, derived 1:1 from the treatment id.
    pub fn id_for(treatment_id: &str) -> String {
        format!("B{treatment_id}")
    }
}

/// Scope of consultation-fee deduplication
///
/// `PerRun` reproduces the historical ledger behavior: the fee-charged set
/// starts empty each run, so a consultation split across runs is charged
/// twice. `Global` seeds the set from ledger history and closes that gap.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeeScope {
    #[default]
    PerRun,
    Global,
}

impl std::str::FromStr for FeeScope {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "per-run" | "per_run" | "run" => Ok(FeeScope::PerRun),
            "global" => Ok(FeeScope::Global),
            other => Err(format!("unknown fee scope '{other}' (expected per-run or global)")),
        }
    }
}

/// Facts sorted by `(consultation_id, treatment_date)` ascending
///
/// The fee-once rule depends on this order, so it is verified at
/// construction rather than assumed from the query.
#[derive(Debug, Clone)]
pub struct OrderedFacts(Vec<TreatmentFact>);

impl OrderedFacts {
    pub fn new(rows: Vec<TreatmentFact>) -> BillingResult<Self> {
        let mut prev: Option<(&str, NaiveDate)> = None;
        for row in &rows {
            // Rows without identifiers have no sort position; they stay in
            // the sequence for the generator to warn on and count.
            if row.check_identifiers().is_err() {
                continue;
            }
            let key = (row.consultation_id.as_str(), row.treatment_date);
            if let Some(p) = prev {
                if key < p {
                    return Err(BillingError::DataSource(format!(
                        "facts out of order at treatment {}: ({}, {}) after ({}, {})",
                        row.treatment_id, key.0, key.1, p.0, p.1
                    )));
                }
            }
            prev = Some(key);
        }
        Ok(Self(rows))
    }

    pub fn iter(&self) -> std::slice::Iter<'_, TreatmentFact> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}
