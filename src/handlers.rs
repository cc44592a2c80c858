use crate::client::{mask, CertificateQuery, InpsClient, Session};
use crate::config::Config;
use crate::errors::AppError;
use crate::models::*;
use axum::{
    extract::State,
    http::{HeaderMap, StatusCode},
    Json,
};
use serde_json::json;
use std::sync::Arc;

/// Shared application state injected into handlers.
#[derive(Clone)]
pub struct AppState {
    /// Application configuration.
    pub config: Config,
    /// Client for the INPS portal.
    pub client: InpsClient,
}

/// Health check endpoint.
///
/// Returns the service status and version. Does not contact INPS.
pub async fn health() -> (StatusCode, Json<serde_json::Value>) {
    (
        StatusCode::OK,
        Json(json!({
            "status": "healthy",
            "service": "certificati-inps",
            "version": env!("CARGO_PKG_VERSION")
        })),
    )
}

/// GET /api/v1/captcha
///
/// Opens a new INPS session and returns its id together with the CAPTCHA
/// image (base64 PNG) the caller has to solve.
///
/// # Returns
///
/// * `Result<Json<CaptchaChallenge>, AppError>` - The session and the image, or an error.
pub async fn get_captcha(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<CaptchaChallenge>, AppError> {
    tracing::info!("GET /captcha");
    validate_api_key(&state, &headers)?;

    let challenge = state.client.get_captcha().await?;
    Ok(Json(challenge))
}

/// POST /api/v1/certificates
///
/// Looks the certificate up in the session the CAPTCHA was issued for and
/// returns its decoded fields, plus the base64 PDF when `pdf` is true.
///
/// # Returns
///
/// * `Result<Json<Certificate>, AppError>` - The certificate record or an error.
pub async fn get_certificate(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(request): Json<CertificateRequest>,
) -> Result<Json<Certificate>, AppError> {
    tracing::info!(
        "POST /certificates - protocol: {}, fiscal code: {}, pdf: {}",
        request.protocol_number.trim(),
        mask(request.fiscal_code.trim()),
        request.pdf
    );
    validate_api_key(&state, &headers)?;

    let (session, query) = validate_request(&request)?;
    let certificate = state
        .client
        .fetch_certificate(&session, &query, request.pdf)
        .await?;

    Ok(Json(certificate))
}

/// Checks the request fields before anything is sent to INPS.
///
/// The fiscal code is uppercased; the protocol number must be numeric.
pub fn validate_request(request: &CertificateRequest) -> Result<(Session, CertificateQuery), AppError> {
    let session_id = required("session_id", &request.session_id)?;
    let captcha = required("captcha", &request.captcha)?;
    let fiscal_code = required("fiscal_code", &request.fiscal_code)?.to_uppercase();
    let protocol_number = required("protocol_number", &request.protocol_number)?;

    if !is_valid_fiscal_code(&fiscal_code) {
        return Err(AppError::BadRequest(
            "fiscal_code must be 16 alphanumeric characters".to_string(),
        ));
    }

    if !protocol_number.chars().all(|c| c.is_ascii_digit()) {
        return Err(AppError::BadRequest(
            "protocol_number must contain only digits".to_string(),
        ));
    }

    Ok((
        Session::new(session_id),
        CertificateQuery {
            fiscal_code,
            protocol_number: protocol_number.to_string(),
            captcha: captcha.to_string(),
        },
    ))
}

fn required<'a>(name: &str, value: &'a str) -> Result<&'a str, AppError> {
    let value = value.trim();
    if value.is_empty() {
        return Err(AppError::BadRequest(format!("{} is required", name)));
    }
    Ok(value)
}

/// Shape check of an Italian fiscal code: 16 ASCII letters or digits.
///
/// The checksum character is not verified; INPS does that.
pub fn is_valid_fiscal_code(code: &str) -> bool {
    code.len() == 16 && code.chars().all(|c| c.is_ascii_alphanumeric())
}

/// Validate API key from X-Api-Key header
fn validate_api_key(state: &AppState, headers: &HeaderMap) -> Result<(), AppError> {
    // If no key is configured, skip validation (warn was already logged at startup)
    let Some(ref expected_key) = state.config.api_key else {
        return Ok(());
    };

    let key = headers
        .get("X-Api-Key")
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| AppError::Unauthorized("Missing X-Api-Key header".to_string()))?;

    if !constant_time_compare(key, expected_key) {
        tracing::warn!("Invalid API key received");
        return Err(AppError::Unauthorized("Invalid API key".to_string()));
    }

    Ok(())
}

/// Constant-time string comparison (basic implementation)
fn constant_time_compare(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }

    a.as_bytes()
        .iter()
        .zip(b.as_bytes().iter())
        .fold(0u8, |acc, (x, y)| acc | (x ^ y))
        == 0
}
