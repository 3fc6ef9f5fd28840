//! Human-enterable identifiers and the insert-and-retry loop that keeps them
//! unique.

use chrono::{DateTime, Utc};
use rand::Rng;

use crate::core::error::ApiError;
use crate::core::store::{StoreError, UniqueField};

/// No 0/O or 1/I, so codes survive being read aloud or retyped.
pub const CODE_ALPHABET: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";
pub const COMPANY_CODE_LEN: usize = 7;
pub const LOGIN_CODE_LEN: usize = 8;
pub const QUEUE_SUFFIX_LEN: usize = 5;
pub const MAX_CODE_ATTEMPTS: usize = 10;

pub fn random_code(len: usize) -> String {
    let mut rng = rand::thread_rng();
    (0..len)
        .map(|_| CODE_ALPHABET[rng.gen_range(0..CODE_ALPHABET.len())] as char)
        .collect()
}

pub fn company_code() -> String {
    random_code(COMPANY_CODE_LEN)
}

pub fn login_code() -> String {
    random_code(LOGIN_CODE_LEN)
}

/// `SR-<YYMMDD>-<5 chars>`.
pub fn service_queue_id(now: DateTime<Utc>) -> String {
    format!("SR-{}-{}", now.format("%y%m%d"), random_code(QUEUE_SUFFIX_LEN))
}

/// Runs `attempt` with fresh codes until the insert succeeds.
///
/// Only a violation of `field` is retried. Any other uniqueness violation is
/// a caller error and surfaces immediately as a 400 conflict. After
/// `MAX_CODE_ATTEMPTS` collisions the operation fails with a 500.
pub fn insert_with_unique_code<T, G, F>(
    field: UniqueField,
    mut generate: G,
    mut attempt: F,
) -> Result<T, ApiError>
where
    G: FnMut() -> String,
    F: FnMut(&str) -> Result<T, StoreError>,
{
    for n in 1..=MAX_CODE_ATTEMPTS {
        let code = generate();
        match attempt(&code) {
            Ok(value) => return Ok(value),
            Err(StoreError::UniqueViolation(violated)) if violated == field => {
                tracing::debug!("{} collision on attempt {n}, regenerating", field.label());
            }
            Err(other) => return Err(other.into()),
        }
    }
    tracing::error!(
        "Exhausted {MAX_CODE_ATTEMPTS} attempts generating a unique {}",
        field.label()
    );
    Err(ApiError::RetryExhausted(format!(
        "Could not generate a unique {}",
        field.label()
    )))
}

/// Retry loop for inserts that carry more than one generated code.
///
/// `regenerate` receives the field that collided and replaces that code on
/// `target` before the next `attempt`.
pub fn insert_with_unique_codes<S, T, R, F>(
    fields: &[UniqueField],
    target: &mut S,
    mut regenerate: R,
    mut attempt: F,
) -> Result<T, ApiError>
where
    R: FnMut(&mut S, UniqueField),
    F: FnMut(&S) -> Result<T, StoreError>,
{
    let mut last = fields.first().copied();
    for n in 1..=MAX_CODE_ATTEMPTS {
        match attempt(target) {
            Ok(value) => return Ok(value),
            Err(StoreError::UniqueViolation(violated)) if fields.contains(&violated) => {
                tracing::debug!("{} collision on attempt {n}, regenerating", violated.label());
                regenerate(target, violated);
                last = Some(violated);
            }
            Err(other) => return Err(other.into()),
        }
    }
    let label = last.map_or("code", |f| f.label());
    tracing::error!("Exhausted {MAX_CODE_ATTEMPTS} attempts generating a unique {label}");
    Err(ApiError::RetryExhausted(format!(
        "Could not generate a unique {label}"
    )))
}
