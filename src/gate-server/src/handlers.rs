//! Demonstration endpoints exercising the clearance gate
//!
//! Handlers read the identity the gate resolved from the request's
//! [`ClearanceContext`]. With enforcement disabled the context is empty.

use crate::error::{ApiError, Result};
use crate::state::AppState;
use axum::{extract::State, Extension, Json};
use clearance_authz::{Clearance, ClearanceContext, Device, TokenId};
use serde_json::{json, Value};

/// Minimum clearance for the high-security endpoint
pub const HIGH_SECURITY_CLEARANCE: Clearance = Clearance::LEVEL_7;

fn hex_token(token: Option<TokenId>) -> Option<String> {
    token.map(|t| format!("0x{:04X}", t))
}

fn device_summary(device: &Device) -> Value {
    json!({
        "id": device.id,
        "name": device.name,
        "layer": device.layer,
        "class": device.class,
    })
}

/// Service banner
pub async fn root(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "service": "clearance-gate",
        "status": "running",
        "version": clearance_authz::VERSION,
        "uptime_seconds": state.uptime_seconds(),
    }))
}

pub async fn public() -> Json<Value> {
    Json(json!({
        "message": "This is a public endpoint",
        "access": "unrestricted",
    }))
}

/// Echoes the clearance and device the gate resolved
pub async fn restricted(ctx: Option<Extension<ClearanceContext>>) -> Json<Value> {
    let mut response = json!({
        "message": "This is a restricted endpoint",
        "access": "granted",
    });

    if let Some(Extension(ctx)) = ctx {
        if let Some(clearance) = ctx.clearance {
            response["clearance"] = json!(clearance.to_string());
        }
        if let Some(device) = &ctx.device {
            response["device"] = device_summary(device);
        }
    }

    Json(response)
}

pub async fn device_only(ctx: Option<Extension<ClearanceContext>>) -> Result<Json<Value>> {
    let device = ctx
        .and_then(|Extension(ctx)| ctx.device)
        .ok_or_else(|| ApiError::Forbidden("device registration required".to_string()))?;

    let mut summary = device_summary(&device);
    summary["status_token"] = json!(hex_token(device.status_token()));
    summary["config_token"] = json!(hex_token(device.config_token()));
    summary["data_token"] = json!(hex_token(device.data_token()));

    Ok(Json(json!({
        "message": "This is a device-only endpoint",
        "device": summary,
    })))
}

pub async fn device_status(ctx: Option<Extension<ClearanceContext>>) -> Result<Json<Value>> {
    let ctx = ctx.map(|Extension(ctx)| ctx).unwrap_or_default();
    let device = ctx
        .device
        .ok_or_else(|| ApiError::Forbidden("device not found in context".to_string()))?;

    let clearance = ctx.clearance.unwrap_or(device.clearance);

    Ok(Json(json!({
        "device_id": device.id,
        "name": device.name,
        "layer": device.layer,
        "class": device.class,
        "clearance": clearance.to_string(),
        "status": "operational",
        "tokens": {
            "status": hex_token(device.status_token()),
            "config": hex_token(device.config_token()),
            "data": hex_token(device.data_token()),
        },
    })))
}

/// Requires level 7 on top of whatever the policy demands
pub async fn high_security(ctx: Option<Extension<ClearanceContext>>) -> Result<Json<Value>> {
    let clearance = ctx
        .and_then(|Extension(ctx)| ctx.clearance)
        .ok_or_else(|| ApiError::Unauthorized("clearance required".to_string()))?;

    if !clearance.is_higher_or_equal(HIGH_SECURITY_CLEARANCE) {
        return Err(ApiError::InsufficientClearance {
            required: HIGH_SECURITY_CLEARANCE,
            provided: clearance,
        });
    }

    Ok(Json(json!({
        "message": "Access granted to high security endpoint",
        "clearance": clearance.to_string(),
        "level": clearance.level(),
    })))
}
