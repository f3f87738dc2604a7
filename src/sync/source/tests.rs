use reqwest::header::{HeaderMap, HeaderValue, SET_COOKIE};
use reqwest::StatusCode;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::sync::oneshot;

use super::portal::{classify_status, cookie_header, record_url, renewed_credential};
use super::*;
use crate::sync::domain::{RawRecord, SessionToken};
use crate::sync::testing::at;

fn token() -> SessionToken {
    SessionToken::new("7001234", "cred-a", at(1))
}

// =========================================================================
// JsonExtractor
// =========================================================================

#[test]
fn extractor_accepts_bare_array_and_wrapped_object() {
    let bare = r#"[{"title":"Link","diff":"3","achievements":97.44}]"#;
    let wrapped = r#"{"records":[{"title":"Link"},{"title":"Panopticon"}]}"#;

    let records = JsonExtractor.extract(bare).unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].difficulty.as_deref(), Some("3"));
    assert_eq!(records[0].achievement.as_deref(), Some("97.44"));

    assert_eq!(JsonExtractor.extract(wrapped).unwrap().len(), 2);
}

#[test]
fn extractor_keeps_malformed_entries_for_validation() {
    let records = JsonExtractor.extract(r#"[{"title":"Link"}, 42, "junk"]"#).unwrap();
    assert_eq!(records.len(), 3);
    assert_eq!(records[1], RawRecord::default());
}

#[test]
fn unreadable_page_is_not_an_auth_failure() {
    assert!(matches!(
        JsonExtractor.extract("<html>maintenance</html>"),
        Err(SourceError::Network { .. })
    ));
    assert!(matches!(
        JsonExtractor.extract(r#"{"items":[]}"#),
        Err(SourceError::Network { .. })
    ));
}

// =========================================================================
// Portal helpers
// =========================================================================

#[test]
fn status_classification() {
    assert!(classify_status(StatusCode::OK, None).is_ok());

    for status in [StatusCode::FOUND, StatusCode::UNAUTHORIZED, StatusCode::FORBIDDEN] {
        assert!(matches!(
            classify_status(status, Some("/maimai-mobile/error/")),
            Err(SourceError::Auth(_))
        ));
    }
    for status in [
        StatusCode::INTERNAL_SERVER_ERROR,
        StatusCode::BAD_GATEWAY,
        StatusCode::TOO_MANY_REQUESTS,
        StatusCode::NOT_FOUND,
    ] {
        assert!(matches!(
            classify_status(status, None),
            Err(SourceError::Network { .. })
        ));
    }
}

#[test]
fn renewed_credential_comes_from_t_cookie() {
    let mut headers = HeaderMap::new();
    headers.append(SET_COOKIE, HeaderValue::from_static("JSESSIONID=xyz; Path=/"));
    headers.append(SET_COOKIE, HeaderValue::from_static("_t=cred-b; Path=/; HttpOnly"));
    assert_eq!(renewed_credential(&headers).as_deref(), Some("cred-b"));

    let mut cleared = HeaderMap::new();
    cleared.append(SET_COOKIE, HeaderValue::from_static("_t=; Max-Age=0"));
    assert_eq!(renewed_credential(&cleared), None);
}

#[test]
fn cookie_and_url_shapes() {
    assert_eq!(cookie_header(&token()), "_t=cred-a; userId=7001234");

    let url = record_url("https://maimai.wahlap.com/maimai-mobile", "/record/").unwrap();
    assert_eq!(url.as_str(), "https://maimai.wahlap.com/maimai-mobile/record/");
    assert!(record_url("not a url", "record/").is_err());
}

// =========================================================================
// PortalSource against a local server
// =========================================================================

/// Serves exactly one canned HTTP response and hands back the raw request.
async fn serve_once(response: String) -> (String, oneshot::Receiver<String>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (tx, rx) = oneshot::channel();

    tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.unwrap();
        let mut request = Vec::new();
        let mut buf = [0u8; 1024];
        while !request.windows(4).any(|w| w == b"\r\n\r\n") {
            let n = socket.read(&mut buf).await.unwrap();
            if n == 0 {
                break;
            }
            request.extend_from_slice(&buf[..n]);
        }
        socket.write_all(response.as_bytes()).await.unwrap();
        socket.shutdown().await.unwrap();
        let _ = tx.send(String::from_utf8_lossy(&request).into_owned());
    });

    (format!("http://{addr}/maimai-mobile/"), rx)
}

fn http_response(status: &str, extra_headers: &[&str], body: &str) -> String {
    let mut out = format!("HTTP/1.1 {status}\r\nContent-Length: {}\r\nConnection: close\r\n", body.len());
    for header in extra_headers {
        out.push_str(header);
        out.push_str("\r\n");
    }
    out.push_str("\r\n");
    out.push_str(body);
    out
}

fn portal_for(base_url: String) -> PortalSource {
    PortalSource::new(&PortalConfig {
        base_url,
        use_system_proxy: false,
        ..PortalConfig::default()
    })
    .unwrap()
}

#[tokio::test]
async fn portal_fetch_sends_cookie_and_reads_rotation() {
    let body = r#"{"records":[{"idx":"101","title":"Link","diff":"master","achievement":"97.4400"}]}"#;
    let (base, request) = serve_once(http_response(
        "200 OK",
        &["Set-Cookie: _t=cred-b; Path=/"],
        body,
    ))
    .await;

    let mut portal = portal_for(base);
    let outcome = portal.fetch(&token()).await.unwrap();

    assert_eq!(outcome.records.len(), 1);
    assert_eq!(outcome.renewed_credential.as_deref(), Some("cred-b"));

    let request = request.await.unwrap();
    assert!(request.starts_with("GET /maimai-mobile/record/ "));
    assert!(request.to_ascii_lowercase().contains("cookie: _t=cred-a; userid=7001234"));
}

#[tokio::test]
async fn portal_redirect_is_auth_failure() {
    let (base, _request) = serve_once(http_response(
        "302 Found",
        &["Location: https://maimai.wahlap.com/maimai-mobile/error/"],
        "",
    ))
    .await;

    let err = portal_for(base).fetch(&token()).await.unwrap_err();
    assert!(matches!(err, SourceError::Auth(_)));
}

#[tokio::test]
async fn portal_error_page_is_auth_failure() {
    let page = "<html><a href=\"/maimai-mobile/error/\">エラーコード：100001</a></html>";
    let (base, _request) = serve_once(http_response("200 OK", &[], page)).await;

    let err = portal_for(base).fetch(&token()).await.unwrap_err();
    assert!(matches!(err, SourceError::Auth(_)));
}

#[tokio::test]
async fn portal_server_error_is_network_failure() {
    let (base, _request) = serve_once(http_response("503 Service Unavailable", &[], "busy")).await;

    let err = portal_for(base).fetch(&token()).await.unwrap_err();
    assert!(matches!(err, SourceError::Network { .. }));
}

#[tokio::test]
async fn unreadable_page_still_hands_back_the_rotated_credential() {
    let (base, _request) = serve_once(http_response(
        "200 OK",
        &["Set-Cookie: _t=cred-b; Path=/"],
        "<html>maintenance</html>",
    ))
    .await;

    let err = portal_for(base).fetch(&token()).await.unwrap_err();
    assert!(matches!(err, SourceError::Network { .. }));
    assert_eq!(err.renewed_credential(), Some("cred-b"));
}

#[tokio::test]
async fn server_error_with_rotation_hands_back_the_credential() {
    let (base, _request) = serve_once(http_response(
        "502 Bad Gateway",
        &["Set-Cookie: _t=cred-b; Path=/"],
        "",
    ))
    .await;

    let err = portal_for(base).fetch(&token()).await.unwrap_err();
    assert_eq!(err.renewed_credential(), Some("cred-b"));
}

#[test]
fn auth_failures_never_carry_a_credential() {
    let err = SourceError::Auth("redirected".into()).with_renewed_credential(Some("cred-b".into()));
    assert_eq!(err.renewed_credential(), None);
    assert_eq!(SourceError::network("reset").renewed_credential(), None);
}

#[tokio::test]
async fn unreachable_portal_is_network_failure() {
    // Bind then drop, so the port is very likely closed.
    let addr = TcpListener::bind("127.0.0.1:0").await.unwrap().local_addr().unwrap();
    let err = portal_for(format!("http://{addr}/"))
        .fetch(&token())
        .await
        .unwrap_err();
    assert!(matches!(err, SourceError::Network { .. }));
}

// =========================================================================
// Mock
// =========================================================================

#[tokio::test]
async fn mock_serves_script_then_empty() {
    let mut mock = MockRecordSource::new();
    mock.push_error(SourceError::network("reset"))
        .push_rotation(Vec::new(), "cred-b");

    assert!(mock.fetch(&token()).await.is_err());
    assert_eq!(
        mock.fetch(&token()).await.unwrap().renewed_credential.as_deref(),
        Some("cred-b")
    );
    assert_eq!(mock.fetch(&token()).await.unwrap(), FetchOutcome::default());
    assert_eq!(mock.calls(), 3);
}
