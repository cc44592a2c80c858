use crate::config::Config;
use crate::errors::{
    AppError, ResultExt, MSG_INVALID_INPUT, MSG_SERVICE_UNAVAILABLE, MSG_UNEXPECTED_PROTOCOL,
};
use crate::extractor;
use crate::models::{CaptchaChallenge, Certificate};
use base64::Engine;
use reqwest::cookie::{CookieStore, Jar};
use reqwest::header::{HeaderValue, COOKIE};
use reqwest::{Client, Response, Url};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Cookie that binds requests to one portal session.
pub const SESSION_COOKIE: &str = "JSESSIONID_CERTIFICATI";

const CAPTCHA_PATH: &str = "MyCaptcha.png";
const CERTIFICATE_PATH: &str = "attivaMain?cmd=immessoCertificato";
const PDF_PATH: &str = "attivaMain?cmd=stampa";

/// Handle on one portal session.
///
/// Every step after the session is acquired goes through the same handle, and
/// the portal keeps per-session state (the CAPTCHA it showed, the certificate
/// it last loaded), so a handle must not be shared between concurrent flows.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    id: String,
}

impl Session {
    pub fn new(id: impl Into<String>) -> Self {
        Self { id: id.into() }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    fn cookie(&self) -> String {
        format!("{}={}", SESSION_COOKIE, self.id)
    }
}

/// Identifiers of the certificate to look up.
#[derive(Debug, Clone)]
pub struct CertificateQuery {
    pub fiscal_code: String,
    pub protocol_number: String,
    /// Solution of the CAPTCHA shown in this session.
    pub captcha: String,
}

/// Client for the INPS citizen-certificate portal.
#[derive(Clone)]
pub struct InpsClient {
    client: Client,
    base_url: Url,
    timeout: Duration,
}

impl InpsClient {
    /// Creates a new `InpsClient`.
    ///
    /// # Arguments
    ///
    /// * `base_url` - Portal root; endpoint paths are joined below it.
    /// * `timeout` - Per-request timeout.
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, AppError> {
        let base_url = Url::parse(base_url).map_err(|e| {
            AppError::InternalError(format!("Invalid INPS base URL '{}': {}", base_url, e))
        })?;

        let client = Client::builder().timeout(timeout).build().map_err(|e| {
            AppError::InternalError(format!("Failed to create INPS client: {}", e))
        })?;

        Ok(Self {
            client,
            base_url,
            timeout,
        })
    }

    pub fn from_config(config: &Config) -> Result<Self, AppError> {
        Self::new(
            &config.inps_base_url,
            Duration::from_secs(config.inps_timeout_secs),
        )
    }

    fn endpoint(&self, path: &str) -> Result<Url, AppError> {
        self.base_url
            .join(path)
            .map_err(|e| AppError::InternalError(format!("Failed to build URL '{}': {}", path, e)))
    }

    /// Opens a session and fetches the CAPTCHA to solve within it.
    ///
    /// # Returns
    ///
    /// * `Result<CaptchaChallenge, AppError>` - The session id and the base64 image.
    pub async fn get_captcha(&self) -> Result<CaptchaChallenge, AppError> {
        let session = self.acquire_session().await?;
        let captcha = self.fetch_captcha(&session).await?;

        Ok(CaptchaChallenge {
            session_id: session.id,
            captcha,
        })
    }

    /// Requests the portal root with an empty cookie store and reads the
    /// session cookie it sets.
    pub async fn acquire_session(&self) -> Result<Session, AppError> {
        tracing::info!("Acquiring INPS session: {}", self.base_url);

        let jar = Arc::new(SessionJar::default());
        let client = Client::builder()
            .cookie_provider(Arc::clone(&jar))
            .timeout(self.timeout)
            .build()
            .map_err(|e| AppError::InternalError(format!("Failed to create INPS client: {}", e)))?;

        let response = client.get(self.base_url.clone()).send().await?;
        check_status(&response, "session")?;

        match jar.session_id() {
            Some(id) => {
                tracing::info!("✓ INPS session acquired");
                Ok(Session::new(id))
            }
            None => {
                tracing::error!("INPS did not set the {} cookie", SESSION_COOKIE);
                Err(AppError::UnexpectedProtocol(format!(
                    "{} ({} cookie missing)",
                    MSG_UNEXPECTED_PROTOCOL, SESSION_COOKIE
                )))
            }
        }
    }

    /// Downloads the CAPTCHA image for the session, base64-encoded.
    pub async fn fetch_captcha(&self, session: &Session) -> Result<String, AppError> {
        let url = self.endpoint(CAPTCHA_PATH)?;
        tracing::info!("Fetching CAPTCHA from INPS");

        let response = self
            .client
            .get(url)
            .header(COOKIE, session.cookie())
            .send()
            .await?;
        check_status(&response, "captcha")?;

        let bytes = response.bytes().await?;
        tracing::debug!("CAPTCHA image is {} bytes", bytes.len());

        Ok(base64::engine::general_purpose::STANDARD.encode(&bytes))
    }

    /// Submits the identifiers and returns the certificate page, flattened
    /// to a single line.
    ///
    /// # Errors
    ///
    /// * [`AppError::ServiceUnavailable`] - The portal answered with status >= 400.
    /// * [`AppError::InvalidInput`] - The portal rejected the CAPTCHA or the identifiers.
    pub async fn submit(&self, session: &Session, query: &CertificateQuery) -> Result<String, AppError> {
        let url = self.endpoint(CERTIFICATE_PATH)?;
        tracing::info!(
            "Requesting certificate {} for {}",
            query.protocol_number,
            mask(&query.fiscal_code)
        );

        let response = self
            .client
            .post(url)
            .header(COOKIE, session.cookie())
            .form(&[
                ("codicefisc", query.fiscal_code.as_str()),
                ("numerocert", query.protocol_number.as_str()),
                ("controllo", query.captcha.as_str()),
            ])
            .send()
            .await?;
        check_status(&response, "certificate")?;

        let html = extractor::flatten(&response.text().await?);

        if extractor::is_rejection(&html) {
            tracing::warn!(
                "INPS rejected the request for certificate {}",
                query.protocol_number
            );
            return Err(AppError::InvalidInput(MSG_INVALID_INPUT.to_string()));
        }

        Ok(html)
    }

    /// Downloads the PDF of the certificate loaded in the session, base64-encoded.
    ///
    /// The portal prints whichever certificate the session last loaded and
    /// takes no identifier, so this is only called from `fetch_certificate`
    /// once the submitted page has been decoded.
    async fn fetch_pdf(&self, session: &Session) -> Result<String, AppError> {
        let url = self.endpoint(PDF_PATH)?;
        tracing::info!("Fetching certificate PDF from INPS");

        let response = self
            .client
            .get(url)
            .header(COOKIE, session.cookie())
            .send()
            .await?;
        check_status(&response, "pdf")?;

        let bytes = response.bytes().await?;
        tracing::debug!("PDF is {} bytes", bytes.len());

        Ok(base64::engine::general_purpose::STANDARD.encode(&bytes))
    }

    /// Runs the whole lookup: submit, decode the page and, when asked,
    /// download the PDF within the same session.
    ///
    /// Nothing is returned unless every step succeeds.
    pub async fn fetch_certificate(
        &self,
        session: &Session,
        query: &CertificateQuery,
        with_pdf: bool,
    ) -> Result<Certificate, AppError> {
        let html = self
            .submit(session, query)
            .await
            .context("Submitting certificate request")?;

        let data = extractor::extract(&html)
            .with_context(|| format!("Decoding certificate {}", query.protocol_number))?;

        let pdf = if with_pdf {
            Some(
                self.fetch_pdf(session)
                    .await
                    .context("Downloading certificate PDF")?,
            )
        } else {
            None
        };

        tracing::info!("✓ Certificate {} retrieved", query.protocol_number);
        Ok(Certificate::new(query.protocol_number.clone(), data, pdf, html))
    }
}

/// Cookie store used while acquiring a session.
///
/// Behaves like a plain [`Jar`] for the redirects of the session request, and
/// also records the session cookie by name whatever `Path` it was set with.
#[derive(Default)]
struct SessionJar {
    jar: Jar,
    session: Mutex<Option<String>>,
}

impl SessionJar {
    fn session_id(&self) -> Option<String> {
        self.session.lock().ok().and_then(|session| session.clone())
    }
}

impl CookieStore for SessionJar {
    fn set_cookies(&self, cookie_headers: &mut dyn Iterator<Item = &HeaderValue>, url: &Url) {
        let headers: Vec<&HeaderValue> = cookie_headers.collect();

        // Only the leading name=value pair; the rest are attributes
        let found = headers
            .iter()
            .filter_map(|header| header.to_str().ok())
            .filter_map(|header| header.split(';').next())
            .filter_map(|pair| find_cookie(pair, SESSION_COOKIE))
            .last();

        if let Some(id) = found {
            if let Ok(mut session) = self.session.lock() {
                *session = Some(id);
            }
        }

        self.jar.set_cookies(&mut headers.into_iter(), url);
    }

    fn cookies(&self, url: &Url) -> Option<HeaderValue> {
        self.jar.cookies(url)
    }
}

fn check_status(response: &Response, step: &str) -> Result<(), AppError> {
    let status = response.status();
    if status.is_client_error() || status.is_server_error() {
        tracing::error!("INPS {} request returned {}", step, status);
        return Err(AppError::ServiceUnavailable(format!(
            "{} ({} request returned {})",
            MSG_SERVICE_UNAVAILABLE, step, status
        )));
    }
    Ok(())
}

/// Finds a cookie value in a `name=value; name=value` header.
fn find_cookie(header: &str, name: &str) -> Option<String> {
    header
        .split(';')
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(key, _)| *key == name)
        .map(|(_, value)| value.to_string())
}

/// Keeps the first six characters of a fiscal code for logging.
pub fn mask(fiscal_code: &str) -> String {
    let visible: String = fiscal_code.chars().take(6).collect();
    format!("{}**********", visible)
}
