//! HTTP retrieval of state tax pages with a primary to backup URL chain.

use crate::config::HttpConfig;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Error, Debug, Clone, PartialEq)]
pub enum FetchError {
    #[error("failed to build HTTP client: {0}")]
    Client(String),

    #[error("invalid URL '{0}'")]
    InvalidUrl(String),

    #[error("request to {url} timed out")]
    Timeout { url: String },

    #[error("HTTP {status} from {url}")]
    Status { url: String, status: u16 },

    #[error("unsupported content type '{content_type}' from {url}")]
    ContentType { url: String, content_type: String },

    #[error("empty response body from {url}")]
    EmptyBody { url: String },

    #[error("request to {url} failed: {message}")]
    Transport { url: String, message: String },
}

/// Every URL of a state failed.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("all {} URL(s) failed", attempts.len())]
pub struct FetchFailure {
    pub attempts: Vec<FetchError>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FetchedPage {
    /// The URL that actually served the page
    pub url: String,
    pub html: String,
}

/// Charset named by a `Content-Type` header, UTF-8 when absent or unknown.
fn charset_from_content_type(content_type: &str) -> &'static encoding_rs::Encoding {
    content_type
        .split(';')
        .skip(1)
        .filter_map(|param| param.split_once('='))
        .find(|(name, _)| name.trim().eq_ignore_ascii_case("charset"))
        .and_then(|(_, label)| encoding_rs::Encoding::for_label(label.trim().trim_matches('"').as_bytes()))
        .unwrap_or(encoding_rs::UTF_8)
}

/// Stream a response body, truncating once `max_bytes` have been read, and
/// decode it with the charset from `content_type`.
async fn read_response_body_capped(
    response: reqwest::Response,
    max_bytes: usize,
    url: &str,
    content_type: &str,
) -> Result<String, FetchError> {
    use futures::StreamExt;

    let mut body = Vec::with_capacity(max_bytes.min(256 * 1024));
    let mut stream = response.bytes_stream();
    let mut total = 0usize;

    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(|e| classify_error(url, e))?;
        let remaining = max_bytes.saturating_sub(total);
        if remaining == 0 {
            debug!("HTTP response truncated at {} bytes (limit: {})", total, max_bytes);
            break;
        }
        let take = chunk.len().min(remaining);
        body.extend_from_slice(&chunk[..take]);
        total += take;
    }

    // A byte order mark overrides the header
    let (text, encoding, had_errors) = charset_from_content_type(content_type).decode(&body);
    if had_errors {
        debug!("Malformed {} sequences in body from {}", encoding.name(), url);
    }
    Ok(text.into_owned())
}

fn classify_error(url: &str, e: reqwest::Error) -> FetchError {
    if e.is_timeout() {
        FetchError::Timeout { url: url.to_string() }
    } else {
        FetchError::Transport {
            url: url.to_string(),
            message: e.to_string(),
        }
    }
}

/// Fetches HTML pages with a descriptive User-Agent and a hard timeout.
pub struct PageFetcher {
    client: reqwest::Client,
    max_body_bytes: usize,
}

impl PageFetcher {
    pub fn new(config: &HttpConfig) -> Result<Self, FetchError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .user_agent(config.user_agent.clone())
            .redirect(reqwest::redirect::Policy::limited(config.max_redirects))
            .build()
            .map_err(|e| FetchError::Client(e.to_string()))?;

        Ok(Self {
            client,
            max_body_bytes: config.max_body_bytes,
        })
    }

    /// GET one URL and return its body as text.
    pub async fn fetch(&self, url: &str) -> Result<String, FetchError> {
        let parsed = url::Url::parse(url).map_err(|_| FetchError::InvalidUrl(url.to_string()))?;
        if parsed.scheme() != "http" && parsed.scheme() != "https" {
            return Err(FetchError::InvalidUrl(url.to_string()));
        }

        let response = self
            .client
            .get(parsed)
            .send()
            .await
            .map_err(|e| classify_error(url, e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        let content_type = response
            .headers()
            .get("content-type")
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_lowercase();

        // Agencies sometimes mislabel pages as text/plain; only clearly binary types are refused.
        let is_textual = content_type.is_empty()
            || content_type.starts_with("text/")
            || content_type.starts_with("application/xhtml");
        if !is_textual {
            return Err(FetchError::ContentType {
                url: url.to_string(),
                content_type,
            });
        }

        let body = read_response_body_capped(response, self.max_body_bytes, url, &content_type).await?;
        if body.trim().is_empty() {
            return Err(FetchError::EmptyBody { url: url.to_string() });
        }

        Ok(body)
    }

    /// Try each URL in order and return the first page that loads.
    pub async fn fetch_first<'u, I>(&self, urls: I) -> Result<FetchedPage, FetchFailure>
    where
        I: IntoIterator<Item = &'u str>,
    {
        let mut attempts = Vec::new();

        for url in urls {
            debug!("Fetching {}", url);
            match self.fetch(url).await {
                Ok(html) => {
                    info!("Fetched {} ({} bytes)", url, html.len());
                    return Ok(FetchedPage {
                        url: url.to_string(),
                        html,
                    });
                }
                Err(e) => {
                    warn!("Fetch failed: {}", e);
                    attempts.push(e);
                }
            }
        }

        Err(FetchFailure { attempts })
    }
}
