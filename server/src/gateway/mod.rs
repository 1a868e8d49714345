//! Hosted-checkout payment processor seam.

use async_trait::async_trait;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use std::sync::Arc;
use thiserror::Error;
use uuid::Uuid;

pub mod stripe;
pub mod webhook;

pub use stripe::StripeGateway;

/// Currencies the processor charges in whole units.
const ZERO_DECIMAL_CURRENCIES: &[&str] = &[
    "bif", "clp", "djf", "gnf", "jpy", "kmf", "krw", "mga", "pyg", "rwf", "ugx", "vnd", "vuv",
    "xaf", "xof", "xpf",
];

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("payment gateway unreachable: {0}")]
    Unreachable(String),

    #[error("payment gateway rejected the request ({status}): {message}")]
    Rejected { status: u16, message: String },

    #[error("malformed payment gateway response: {0}")]
    Malformed(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckoutRequest {
    pub amount_minor: i64,
    pub currency: String,
    pub product_name: String,
    pub description: String,
    pub customer_email: String,
    pub success_url: String,
    pub cancel_url: String,
    pub event_id: Uuid,
    pub registration_id: Uuid,
    pub user_id: Uuid,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckoutSession {
    pub id: String,
    pub url: String,
}

#[async_trait]
pub trait CheckoutGateway: Send + Sync {
    async fn create_checkout(&self, request: &CheckoutRequest)
        -> Result<CheckoutSession, GatewayError>;
}

pub type SharedGateway = Arc<dyn CheckoutGateway>;

/// Converts a price into the processor's smallest currency unit.
pub fn to_minor_units(amount: Decimal, currency: &str) -> Option<i64> {
    let scale = if ZERO_DECIMAL_CURRENCIES.contains(&currency.to_ascii_lowercase().as_str()) {
        Decimal::ONE
    } else {
        Decimal::ONE_HUNDRED
    };
    (amount * scale).round().to_i64()
}
