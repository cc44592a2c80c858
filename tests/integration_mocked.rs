/// Integration tests with a mocked INPS portal
/// Tests the complete retrieval flow without hitting the real service
use axum::extract::State;
use axum::http::{HeaderMap, HeaderValue};
use axum::Json;
use base64::Engine;
use certificati_inps::client::{CertificateQuery, InpsClient, Session, SESSION_COOKIE};
use certificati_inps::config::Config;
use certificati_inps::errors::ErrorKind;
use certificati_inps::handlers::{self, AppState};
use certificati_inps::models::{CertificateData, CertificateRequest};
use std::sync::Arc;
use std::time::Duration;
use wiremock::matchers::{body_string_contains, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

const FIXTURE_HTML: &str = include_str!("fixtures/certificato.html");
const FIXTURE_JSON: &str = include_str!("fixtures/certificato.json");

const SESSION_ID: &str = "0000r7IPypVzqgr95i1dM66C3Yd:16j983198";
const PNG_BYTES: &[u8] = &[0x89, b'P', b'N', b'G', 0x0d, 0x0a, 0x1a, 0x0a];
const PDF_BYTES: &[u8] = b"%PDF-1.4\n%test certificate\n";

fn base_url(server: &MockServer) -> String {
    format!("{}/AttestatiCittadinoWeb/", server.uri())
}

fn session_cookie() -> String {
    format!("{}={}", SESSION_COOKIE, SESSION_ID)
}

/// Helper function to create test config
fn create_test_config(inps_base_url: String) -> Config {
    Config {
        port: 8080,
        inps_base_url,
        inps_timeout_secs: 5,
        api_key: None,
    }
}

fn client(server: &MockServer) -> InpsClient {
    InpsClient::new(&base_url(server), Duration::from_secs(5)).unwrap()
}

fn query() -> CertificateQuery {
    CertificateQuery {
        fiscal_code: "RSSMRA80A01H501U".to_string(),
        protocol_number: "389564456".to_string(),
        captcha: "farc4".to_string(),
    }
}

async fn mount_session(server: &MockServer) {
    Mock::given(method("GET"))
        .and(path("/AttestatiCittadinoWeb/"))
        .respond_with(ResponseTemplate::new(200).insert_header(
            "Set-Cookie",
            format!("{}; Path=/; HttpOnly", session_cookie()).as_str(),
        ))
        .mount(server)
        .await;
}

async fn mount_captcha(server: &MockServer, expected_calls: u64) {
    Mock::given(method("GET"))
        .and(path("/AttestatiCittadinoWeb/MyCaptcha.png"))
        .and(header("cookie", session_cookie().as_str()))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(PNG_BYTES))
        .expect(expected_calls)
        .mount(server)
        .await;
}

async fn mount_certificate(server: &MockServer, response: ResponseTemplate, expected_calls: u64) {
    Mock::given(method("POST"))
        .and(path("/AttestatiCittadinoWeb/attivaMain"))
        .and(query_param("cmd", "immessoCertificato"))
        .and(header("cookie", session_cookie().as_str()))
        .and(body_string_contains("codicefisc=RSSMRA80A01H501U"))
        .and(body_string_contains("numerocert=389564456"))
        .and(body_string_contains("controllo=farc4"))
        .respond_with(response)
        .expect(expected_calls)
        .mount(server)
        .await;
}

async fn mount_pdf(server: &MockServer, expected_calls: u64) {
    Mock::given(method("GET"))
        .and(path("/AttestatiCittadinoWeb/attivaMain"))
        .and(query_param("cmd", "stampa"))
        .and(header("cookie", session_cookie().as_str()))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(PDF_BYTES))
        .expect(expected_calls)
        .mount(server)
        .await;
}

#[tokio::test]
async fn test_get_captcha_success() {
    let mock_server = MockServer::start().await;
    mount_session(&mock_server).await;
    mount_captcha(&mock_server, 1).await;

    let challenge = client(&mock_server).get_captcha().await.unwrap();

    assert_eq!(challenge.session_id, SESSION_ID);
    assert_eq!(
        challenge.captcha,
        base64::engine::general_purpose::STANDARD.encode(PNG_BYTES)
    );
}

#[tokio::test]
async fn test_session_error_stops_the_flow() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/AttestatiCittadinoWeb/"))
        .respond_with(ResponseTemplate::new(500).set_body_string("Internal Server Error"))
        .expect(1)
        .mount(&mock_server)
        .await;
    mount_captcha(&mock_server, 0).await;

    let err = client(&mock_server).get_captcha().await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ServiceUnavailable);
}

#[tokio::test]
async fn test_missing_session_cookie_is_unexpected_protocol() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/AttestatiCittadinoWeb/"))
        .respond_with(
            ResponseTemplate::new(200).insert_header("Set-Cookie", "JSESSIONID=other; Path=/"),
        )
        .mount(&mock_server)
        .await;
    mount_captcha(&mock_server, 0).await;

    let err = client(&mock_server).get_captcha().await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::UnexpectedProtocol);
}

#[tokio::test]
async fn test_session_cookie_with_narrower_path_is_found() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/AttestatiCittadinoWeb/"))
        .respond_with(ResponseTemplate::new(200).insert_header(
            "Set-Cookie",
            format!("{}; Path=/AttestatiCittadinoWeb/pages", session_cookie()).as_str(),
        ))
        .mount(&mock_server)
        .await;

    let session = client(&mock_server).acquire_session().await.unwrap();
    assert_eq!(session.id(), SESSION_ID);
}

#[tokio::test]
async fn test_captcha_error_is_service_unavailable() {
    let mock_server = MockServer::start().await;
    mount_session(&mock_server).await;

    Mock::given(method("GET"))
        .and(path("/AttestatiCittadinoWeb/MyCaptcha.png"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&mock_server)
        .await;

    let err = client(&mock_server).get_captcha().await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ServiceUnavailable);
}

#[tokio::test]
async fn test_fetch_certificate_without_pdf() {
    let mock_server = MockServer::start().await;
    mount_certificate(
        &mock_server,
        ResponseTemplate::new(200).set_body_string(FIXTURE_HTML),
        1,
    )
    .await;
    mount_pdf(&mock_server, 0).await;

    let certificate = client(&mock_server)
        .fetch_certificate(&Session::new(SESSION_ID), &query(), false)
        .await
        .unwrap();

    let expected: CertificateData = serde_json::from_str(FIXTURE_JSON).unwrap();
    assert_eq!(certificate.data(), &expected);
    assert_eq!(certificate.to_string(), "389564456");
    assert_eq!(certificate.pdf(), None);
    assert!(!certificate.html().contains('\n'));
}

#[tokio::test]
async fn test_fetch_certificate_with_pdf_after_submission() {
    let mock_server = MockServer::start().await;
    mount_certificate(
        &mock_server,
        ResponseTemplate::new(200).set_body_string(FIXTURE_HTML),
        1,
    )
    .await;
    mount_pdf(&mock_server, 1).await;

    let certificate = client(&mock_server)
        .fetch_certificate(&Session::new(SESSION_ID), &query(), true)
        .await
        .unwrap();

    assert_eq!(certificate.pdf_bytes().unwrap().as_deref(), Some(PDF_BYTES));

    let requests = mock_server.received_requests().await.unwrap();
    let queries: Vec<Option<&str>> = requests.iter().map(|r| r.url.query()).collect();
    assert_eq!(queries, vec![Some("cmd=immessoCertificato"), Some("cmd=stampa")]);
}

#[tokio::test]
async fn test_captcha_rejection_is_invalid_input() {
    let mock_server = MockServer::start().await;
    let rejection = "<html><body>\n<p class=\"errore\">Il Codice di controllo inserito non &egrave; corretto</p>\n</body></html>";
    mount_certificate(
        &mock_server,
        ResponseTemplate::new(200).set_body_string(rejection),
        1,
    )
    .await;
    mount_pdf(&mock_server, 0).await;

    let err = client(&mock_server)
        .fetch_certificate(&Session::new(SESSION_ID), &query(), true)
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::InvalidInput);
}

#[tokio::test]
async fn test_page_without_cells_is_bad_response() {
    let mock_server = MockServer::start().await;
    mount_certificate(
        &mock_server,
        ResponseTemplate::new(200)
            .set_body_string("<html><body>Servizio momentaneamente non disponibile</body></html>"),
        1,
    )
    .await;
    mount_pdf(&mock_server, 0).await;

    let err = client(&mock_server)
        .fetch_certificate(&Session::new(SESSION_ID), &query(), true)
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::BadResponse);
}

#[tokio::test]
async fn test_certificate_server_error_is_service_unavailable() {
    let mock_server = MockServer::start().await;
    mount_certificate(&mock_server, ResponseTemplate::new(502), 1).await;

    let err = client(&mock_server)
        .fetch_certificate(&Session::new(SESSION_ID), &query(), false)
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::ServiceUnavailable);
}

#[tokio::test]
async fn test_pdf_error_fails_the_whole_lookup() {
    let mock_server = MockServer::start().await;
    mount_certificate(
        &mock_server,
        ResponseTemplate::new(200).set_body_string(FIXTURE_HTML),
        1,
    )
    .await;

    Mock::given(method("GET"))
        .and(path("/AttestatiCittadinoWeb/attivaMain"))
        .and(query_param("cmd", "stampa"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&mock_server)
        .await;

    let err = client(&mock_server)
        .fetch_certificate(&Session::new(SESSION_ID), &query(), true)
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::ServiceUnavailable);
}

#[tokio::test]
async fn test_handlers_full_flow() {
    let mock_server = MockServer::start().await;
    mount_session(&mock_server).await;
    mount_captcha(&mock_server, 1).await;
    mount_certificate(
        &mock_server,
        ResponseTemplate::new(200).set_body_string(FIXTURE_HTML),
        1,
    )
    .await;

    let config = create_test_config(base_url(&mock_server));
    let state = Arc::new(AppState {
        client: InpsClient::from_config(&config).unwrap(),
        config,
    });

    let Json(challenge) = handlers::get_captcha(State(state.clone()), HeaderMap::new())
        .await
        .unwrap();

    let request = CertificateRequest {
        session_id: challenge.session_id,
        captcha: "farc4".to_string(),
        fiscal_code: "rssmra80a01h501u".to_string(),
        protocol_number: "389564456".to_string(),
        pdf: false,
    };

    let Json(certificate) =
        handlers::get_certificate(State(state), HeaderMap::new(), Json(request))
            .await
            .unwrap();

    let json = serde_json::to_value(&certificate).unwrap();
    assert_eq!(json["protocollo"], "389564456");
    assert_eq!(json["tipo_visita"], "Domiciliare");
    assert!(json.get("html").is_none());
}

#[tokio::test]
async fn test_handler_rejects_invalid_request_before_contacting_inps() {
    let mock_server = MockServer::start().await;
    mount_certificate(&mock_server, ResponseTemplate::new(200), 0).await;

    let config = create_test_config(base_url(&mock_server));
    let state = Arc::new(AppState {
        client: InpsClient::from_config(&config).unwrap(),
        config,
    });

    let request = CertificateRequest {
        session_id: SESSION_ID.to_string(),
        captcha: "farc4".to_string(),
        fiscal_code: "NOT-A-CODE".to_string(),
        protocol_number: "389564456".to_string(),
        pdf: false,
    };

    let err = handlers::get_certificate(State(state), HeaderMap::new(), Json(request))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::BadRequest);
}

#[tokio::test]
async fn test_handler_requires_api_key_when_configured() {
    let mock_server = MockServer::start().await;
    mount_session(&mock_server).await;
    mount_captcha(&mock_server, 1).await;

    let mut config = create_test_config(base_url(&mock_server));
    config.api_key = Some("test_key".to_string());
    let state = Arc::new(AppState {
        client: InpsClient::from_config(&config).unwrap(),
        config,
    });

    let err = handlers::get_captcha(State(state.clone()), HeaderMap::new())
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Unauthorized);

    let mut headers = HeaderMap::new();
    headers.insert("X-Api-Key", HeaderValue::from_static("test_key"));
    let result = handlers::get_captcha(State(state), headers).await;
    assert!(result.is_ok());
}
