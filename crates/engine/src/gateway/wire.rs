//! Wire types for the REST cart contract and their conversions.

use cart_sync_core::{CurrencyCode, LineId, LineItem, Price, ProductId, Variant};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::warn;

use super::{GatewayError, GatewayErrorKind};

/// Envelope every backend response is wrapped in.
#[derive(Debug, Deserialize)]
pub struct ApiEnvelope {
    pub success: bool,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub data: Option<serde_json::Value>,
}

/// `POST cart/add` body.
#[derive(Debug, Serialize)]
pub struct AddLineRequest<'a> {
    pub product_id: &'a str,
    pub quantity: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub customizations: Option<&'a str>,
}

impl<'a> AddLineRequest<'a> {
    pub fn new(product_id: &'a ProductId, quantity: u32, variant: &'a Variant) -> Self {
        Self {
            product_id: product_id.as_str(),
            quantity,
            size: variant.size.as_deref(),
            temperature: variant.temperature.as_deref(),
            customizations: variant.customizations.as_deref(),
        }
    }
}

/// `PUT cart/update/{id}` body.
#[derive(Debug, Serialize)]
pub struct UpdateLineRequest {
    pub quantity: u32,
}

/// Product details some backends embed in a line.
#[derive(Debug, Deserialize)]
pub struct WireProduct {
    #[serde(default)]
    pub price: Option<Decimal>,
}

/// A cart line as the backend returns it.
#[derive(Debug, Deserialize)]
pub struct WireLine {
    pub id: String,
    pub product_id: String,
    pub quantity: i64,
    #[serde(default)]
    pub size: Option<String>,
    #[serde(default)]
    pub temperature: Option<String>,
    #[serde(default)]
    pub customizations: Option<String>,
    #[serde(default)]
    pub unit_price: Option<Decimal>,
    #[serde(default)]
    pub currency_code: Option<CurrencyCode>,
    #[serde(default)]
    pub product: Option<WireProduct>,
}

/// What a successful response carried.
#[derive(Debug)]
pub enum Payload {
    /// The full post-operation cart.
    Snapshot(Vec<LineItem>),
    /// An acknowledgement without a usable snapshot; the caller must fetch.
    Ack,
}

/// Interpret a decoded envelope.
pub fn decode_envelope(envelope: ApiEnvelope) -> Result<Payload, GatewayError> {
    if !envelope.success {
        return Err(GatewayError::new(
            GatewayErrorKind::Rejected,
            envelope
                .message
                .unwrap_or_else(|| "backend reported failure".to_string()),
        ));
    }

    match envelope.data {
        Some(serde_json::Value::Array(items)) => {
            let lines: Vec<WireLine> = serde_json::from_value(serde_json::Value::Array(items))
                .map_err(|e| GatewayError::malformed(format!("invalid cart lines: {e}")))?;
            let mut converted = Vec::with_capacity(lines.len());
            for line in lines {
                if let Some(item) = convert_line(line)? {
                    converted.push(item);
                }
            }
            Ok(Payload::Snapshot(converted))
        }
        _ => Ok(Payload::Ack),
    }
}

/// Convert one wire line.
///
/// Lines with a non-positive quantity are dropped with a warning; a line
/// without any price makes the whole body malformed.
pub fn convert_line(line: WireLine) -> Result<Option<LineItem>, GatewayError> {
    let Ok(quantity) = u32::try_from(line.quantity) else {
        warn!(line_id = %line.id, quantity = line.quantity, "Dropping remote line with invalid quantity");
        return Ok(None);
    };
    if quantity == 0 || line.product_id.is_empty() {
        warn!(line_id = %line.id, "Dropping empty remote line");
        return Ok(None);
    }

    let amount = line
        .unit_price
        .or_else(|| line.product.as_ref().and_then(|p| p.price))
        .ok_or_else(|| GatewayError::malformed(format!("line {} has no price", line.id)))?;

    let variant = Variant {
        size: line.size.filter(|s| !s.is_empty()),
        temperature: line.temperature.filter(|s| !s.is_empty()),
        customizations: line.customizations.filter(|s| !s.is_empty()),
    };

    Ok(Some(
        LineItem::new(
            ProductId::new(line.product_id),
            quantity,
            variant,
            Price::new(amount, line.currency_code.unwrap_or_default()),
        )
        .with_line_id(LineId::new(line.id)),
    ))
}
