use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};
use std::time::Duration;

/// Mounts an HTML page at `url_path` on an existing server.
///
/// `set_body_string` would force `text/plain`, so the body is set raw with an HTML content type.
pub async fn mount_html_page(server: &MockServer, url_path: &str, html: &str) {
    Mock::given(method("GET"))
        .and(path(url_path))
        .respond_with(ResponseTemplate::new(200).set_body_raw(html.as_bytes().to_vec(), "text/html; charset=utf-8"))
        .mount(server)
        .await;
}

/// Mounts raw page bytes at `url_path` with an explicit content type, for non-UTF-8 pages.
pub async fn mount_encoded_page(server: &MockServer, url_path: &str, body: Vec<u8>, content_type: &str) {
    Mock::given(method("GET"))
        .and(path(url_path))
        .respond_with(ResponseTemplate::new(200).set_body_raw(body, content_type))
        .mount(server)
        .await;
}

/// Creates a mock state tax agency site serving one HTML page.
pub async fn mock_state_page(url_path: &str, html: &str) -> MockServer {
    let server = MockServer::start().await;
    mount_html_page(&server, url_path, html).await;
    server
}

/// Mounts a fixed status code for GET requests to `url_path`.
pub async fn mount_error_page(server: &MockServer, url_path: &str, status_code: u16) {
    Mock::given(method("GET"))
        .and(path(url_path))
        .respond_with(ResponseTemplate::new(status_code))
        .mount(server)
        .await;
}

/// Creates a mock HTTP server that delays responses to simulate network timeouts.
///
/// The server will wait for `delay_ms` milliseconds before responding with a 200 OK.
pub async fn mock_timeout_server(delay_ms: u64) -> MockServer {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_raw("<html><body>late</body></html>", "text/html")
                .set_delay(Duration::from_millis(delay_ms)),
        )
        .mount(&server)
        .await;

    server
}

/// Creates a mock HTTP server that returns the specified HTTP error status code
/// for every request, GET or POST.
pub async fn mock_error_server(status_code: u16) -> MockServer {
    let server = MockServer::start().await;

    Mock::given(wiremock::matchers::any())
        .respond_with(ResponseTemplate::new(status_code).set_body_string("upstream unavailable"))
        .mount(&server)
        .await;

    server
}

/// `generateContent` response body whose first candidate carries `text`.
pub fn gemini_response(text: &str) -> serde_json::Value {
    serde_json::json!({
        "candidates": [{
            "content": {
                "role": "model",
                "parts": [{ "text": text }]
            },
            "finishReason": "STOP"
        }]
    })
}

/// Creates a mock Gemini endpoint answering every prompt for `model` with `answer`.
/// Requests must carry `api_key` in the `x-goog-api-key` header.
pub async fn mock_gemini_server(model: &str, api_key: &str, answer: &str) -> MockServer {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path(format!("/v1beta/models/{}:generateContent", model)))
        .and(header("x-goog-api-key", api_key))
        .respond_with(ResponseTemplate::new(200).set_body_json(gemini_response(answer)))
        .mount(&server)
        .await;

    server
}

/// Creates a mock Gemini endpoint that answers every request with `status_code`.
pub async fn mock_gemini_status(status_code: u16, body: &str) -> MockServer {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(status_code).set_body_string(body.to_string()))
        .mount(&server)
        .await;

    server
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mock_state_page_serves_html() {
        let html = "<html><body><h2>Entire net income</h2></body></html>";
        let server = mock_state_page("/bus/ct/def_art9a.htm", html).await;

        let client = reqwest::Client::new();
        let response = client
            .get(format!("{}/bus/ct/def_art9a.htm", server.uri()))
            .send()
            .await
            .unwrap();

        assert_eq!(response.status(), 200);
        let content_type = response.headers()["content-type"].to_str().unwrap().to_string();
        assert!(content_type.starts_with("text/html"));
        let body = response.text().await.unwrap();
        assert!(body.contains("Entire net income"));
    }

    #[tokio::test]
    async fn test_mock_error_server_returns_status_code() {
        let server = mock_error_server(503).await;

        let client = reqwest::Client::new();
        let response = client
            .get(format!("{}/any-path", server.uri()))
            .send()
            .await
            .unwrap();

        assert_eq!(response.status(), 503);
    }
}
