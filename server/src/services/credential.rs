//! Scan credentials: opaque random lookup keys rendered as QR codes.
//!
//! A payload carries no registrant data. It only resolves to a registration
//! through the store, so a leaked image reveals nothing by itself.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, Utc};
use image::{GrayImage, ImageFormat, Luma};
use qrcode::{Color, EcLevel, QrCode};
use rand::rngs::OsRng;
use rand::RngCore;
use std::io::Cursor;
use thiserror::Error;
use uuid::Uuid;

use crate::models::Credential;

pub const PAYLOAD_PREFIX: &str = "EH1-";
const PAYLOAD_ENTROPY_BYTES: usize = 24;

/// Pixels per QR module.
pub const MODULE_SIZE: u32 = 8;
/// Light border around the symbol, in modules.
pub const QUIET_ZONE: u32 = 4;

const DARK: Luma<u8> = Luma([0x00]);
const LIGHT: Luma<u8> = Luma([0xFF]);

#[derive(Debug, Error)]
pub enum RenderError {
    #[error("payload cannot be encoded as a QR code: {0}")]
    Encode(String),

    #[error("failed to encode PNG: {0}")]
    Png(String),
}

/// Issues a fresh credential for a registration. The payload comes from the
/// OS RNG and is independent of the registration id.
pub fn issue(registration_id: Uuid, now: DateTime<Utc>) -> Credential {
    let mut entropy = [0u8; PAYLOAD_ENTROPY_BYTES];
    OsRng.fill_bytes(&mut entropy);
    let payload = format!("{}{}", PAYLOAD_PREFIX, URL_SAFE_NO_PAD.encode(entropy));

    Credential::new(registration_id, payload, now)
}

/// Cheap shape check so obvious garbage from the scanner never reaches the store.
pub fn is_well_formed(payload: &str) -> bool {
    match payload.strip_prefix(PAYLOAD_PREFIX) {
        Some(body) => URL_SAFE_NO_PAD
            .decode(body)
            .map(|bytes| bytes.len() == PAYLOAD_ENTROPY_BYTES)
            .unwrap_or(false),
        None => false,
    }
}

/// Rasterises `payload` as a black-on-white QR code. Same payload, same pixels.
pub fn render_image(payload: &str) -> Result<GrayImage, RenderError> {
    let code = QrCode::with_error_correction_level(payload.as_bytes(), EcLevel::M)
        .map_err(|e| RenderError::Encode(e.to_string()))?;

    let modules = code.width() as u32;
    let colors = code.to_colors();
    let side = (modules + 2 * QUIET_ZONE) * MODULE_SIZE;

    Ok(GrayImage::from_fn(side, side, |x, y| {
        let mx = (x / MODULE_SIZE).checked_sub(QUIET_ZONE);
        let my = (y / MODULE_SIZE).checked_sub(QUIET_ZONE);
        match (mx, my) {
            (Some(mx), Some(my)) if mx < modules && my < modules => {
                match colors[(my * modules + mx) as usize] {
                    Color::Dark => DARK,
                    Color::Light => LIGHT,
                }
            }
            _ => LIGHT,
        }
    }))
}

/// PNG bytes of [`render_image`].
pub fn render(payload: &str) -> Result<Vec<u8>, RenderError> {
    let image = render_image(payload)?;
    let mut bytes = Vec::new();
    image
        .write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
        .map_err(|e| RenderError::Png(e.to_string()))?;
    Ok(bytes)
}
