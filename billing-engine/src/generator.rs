use std::collections::HashSet;

use async_trait::async_trait;
use chrono::{Duration, NaiveDate};
use rand::Rng;
use rust_decimal::Decimal;
use tracing::{debug, info, warn};

use crate::error::BillingResult;
use crate::models::{BillingRecord, FeeScope, OrderedFacts, PaymentModel, TreatmentFact};

/// Maximum billing lag behind the treatment date, in days.
pub const MAX_LAG_DAYS: i64 = 7;

/// Source of the per-record billing lag (0..=[`MAX_LAG_DAYS`] days)
///
/// Injectable so tests can pin the billing date while production draws a
/// uniform lag.
pub trait BillingLag {
    fn days(&mut self) -> i64;
}

/// Uniform 0-7 day lag, modelling realistic billing delay
#[derive(Debug, Clone, Copy, Default)]
pub struct UniformLag;

impl BillingLag for UniformLag {
    fn days(&mut self) -> i64 {
        rand::thread_rng().gen_range(0..=MAX_LAG_DAYS)
    }
}

/// Fixed lag for repeatable billing dates in tests
#[derive(Debug, Clone, Copy)]
pub struct FixedLag(pub i64);

impl BillingLag for FixedLag {
    fn days(&mut self) -> i64 {
        self.0
    }
}

/// Provider of the ordered fact rows (the query side of the data store)
#[async_trait]
pub trait FactSource {
    async fn fetch_ordered_facts(&self) -> BillingResult<OrderedFacts>;
}

/// Ledger write side: existence check, insertion, and fee history
///
/// Implementations are expected to buffer writes in one transaction and
/// commit after the pass; the generator itself never commits.
#[async_trait]
pub trait LedgerSink {
    async fn exists(&mut self, treatment_id: &str) -> BillingResult<bool>;

    async fn insert(&mut self, record: &BillingRecord) -> BillingResult<()>;

    /// Consultations whose fee was already charged in an earlier run.
    /// Only consulted under [`FeeScope::Global`].
    async fn consultations_charged(&mut self) -> BillingResult<HashSet<String>>;
}

/// Fold state threaded explicitly through the pass
#[derive(Debug, Default)]
pub struct RunState {
    charged_consultations: HashSet<String>,
}

impl RunState {
    fn seeded(charged_consultations: HashSet<String>) -> Self {
        Self {
            charged_consultations,
        }
    }

    /// True if this consultation's fee is still unclaimed; claims it.
    fn take_fee(&mut self, consultation_id: &str) -> bool {
        self.charged_consultations.insert(consultation_id.to_string())
    }
}

/// Outcome counts for one billing pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub billed: usize,
    pub skipped_existing: usize,
    pub skipped_malformed: usize,
}

/// Per-row billing rule: fee, gross, and the insurer/patient split
///
/// Pure of any storage or randomness; the caller supplies the fee-once
/// decision and the billing date.
pub fn bill_row(fact: &TreatmentFact, fee_charged: bool, billing_date: NaiveDate) -> BillingRecord {
    let consultation_fee = if fee_charged {
        fact.consultation_fee
    } else {
        Decimal::ZERO
    };
    let gross = fact.treatment_cost + consultation_fee;

    let (insurance_amount, patient_amount) = match PaymentModel::parse(&fact.payment_model) {
        PaymentModel::Copay => {
            let coverage = fact.coverage_percentage.unwrap_or(Decimal::ZERO);
            let insurer = gross * coverage / Decimal::ONE_HUNDRED;
            (insurer, gross - insurer)
        }
        PaymentModel::DentalDiscount => {
            let discount = fact.discount_percentage.unwrap_or(Decimal::ZERO);
            let patient = gross * (Decimal::ONE - discount / Decimal::ONE_HUNDRED);
            (Decimal::ZERO, patient)
        }
        PaymentModel::SelfPay => (Decimal::ZERO, gross),
    };

    BillingRecord {
        billing_id: BillingRecord::id_for(&fact.treatment_id),
        treatment_id: fact.treatment_id.clone(),
        billing_date,
        treatment_cost: fact.treatment_cost,
        consultation_fee,
        gross_amount: gross.round_dp(2),
        insurance_amount: insurance_amount.round_dp(2),
        patient_amount: patient_amount.round_dp(2),
        payment_model: fact.payment_model.clone(),
    }
}

/// Billing pass driver
///
/// Folds the ordered facts into ledger insertions: skip-if-exists by
/// treatment id, consultation fee charged once per [`FeeScope`], payment
/// model dispatched per row.
pub struct BillingGenerator<L: BillingLag> {
    lag: L,
    fee_scope: FeeScope,
}

impl BillingGenerator<UniformLag> {
    pub fn new() -> Self {
        Self {
            lag: UniformLag,
            fee_scope: FeeScope::PerRun,
        }
    }
}

impl Default for BillingGenerator<UniformLag> {
    fn default() -> Self {
        Self::new()
    }
}

impl<L: BillingLag> BillingGenerator<L> {
    pub fn with_fee_scope(mut self, fee_scope: FeeScope) -> Self {
        self.fee_scope = fee_scope;
        self
    }

    pub fn with_lag<M: BillingLag>(self, lag: M) -> BillingGenerator<M> {
        BillingGenerator {
            lag,
            fee_scope: self.fee_scope,
        }
    }

    /// Run one billing pass
    ///
    /// Writes go to the sink in fact order; the caller commits (or discards)
    /// the sink's transaction afterwards, so a failed pass leaves the ledger
    /// untouched and re-running is safe.
    pub async fn run(
        &mut self,
        source: &impl FactSource,
        sink: &mut impl LedgerSink,
    ) -> BillingResult<RunSummary> {
        let facts = source.fetch_ordered_facts().await?;
        info!(
            rows = facts.len(),
            fee_scope = ?self.fee_scope,
            "starting billing pass"
        );

        let mut state = match self.fee_scope {
            FeeScope::PerRun => RunState::default(),
            FeeScope::Global => RunState::seeded(sink.consultations_charged().await?),
        };
        let mut summary = RunSummary::default();

        for fact in facts.iter() {
            if let Err(err) = fact.check_identifiers() {
                warn!("skipping unbillable row: {err}");
                summary.skipped_malformed += 1;
                continue;
            }

            if sink.exists(&fact.treatment_id).await? {
                summary.skipped_existing += 1;
                continue;
            }

            // Fee is claimed only by rows that actually get billed.
            let fee_charged = state.take_fee(&fact.consultation_id);
            let lag = self.lag.days().clamp(0, MAX_LAG_DAYS);
            let billing_date = fact.treatment_date + Duration::days(lag);

            let record = bill_row(fact, fee_charged, billing_date);
            debug!(
                billing_id = %record.billing_id,
                treatment_id = %record.treatment_id,
                fee_charged,
                "inserting ledger entry"
            );
            sink.insert(&record).await?;
            summary.billed += 1;
        }

        info!(
            billed = summary.billed,
            skipped_existing = summary.skipped_existing,
            skipped_malformed = summary.skipped_malformed,
            "billing pass complete"
        );
        Ok(summary)
    }
}
