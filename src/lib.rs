//! INPS Sick-Leave Certificate Retrieval Library
//!
//! This library retrieves a citizen's sick-leave certificate ("certificato di
//! malattia") from the INPS citizen portal: it opens a portal session, fetches
//! the CAPTCHA to be solved by the caller, submits the identifiers, decodes the
//! returned certificate page and optionally downloads the PDF.
//!
//! # Modules
//!
//! - `api`: API definitions.
//! - `core`: Core domain logic.
//! - `integrations`: External service integrations.
//! - `client`: INPS portal client (session, CAPTCHA, certificate, PDF).
//! - `config`: Configuration management.
//! - `errors`: Error handling types.
//! - `extractor`: Positional decoding of the certificate page.
//! - `handlers`: HTTP request handlers.
//! - `models`: Certificate and request/response models.

pub mod api;
pub mod core;
pub mod integrations;

// Re-export primary modules for shared use in tests and other binaries
pub mod client;
pub mod config;
pub mod errors;
pub mod extractor;
pub mod handlers;
pub mod models;
