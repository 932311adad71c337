use thiserror::Error;

#[derive(Error, Debug)]
pub enum BillingError {
    #[error("Data source error: {0}")]
    DataSource(String),

    #[error("Ledger constraint violation: {0}")]
    ConstraintViolation(String),

    #[error("Malformed input row: {0}")]
    MalformedInput(String),
}

pub type BillingResult<T> = Result<T, BillingError>;
