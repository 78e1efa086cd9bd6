//! `HttpTransport`: a [`Transport`] implementation that fetches over HTTP(S), retrying
//! transient failures with exponential backoff and resuming via byte-range requests when the
//! server supports them.

use crate::transport::{Transport, TransportError, TransportErrorKind};
use log::{debug, error, trace};
use reqwest::blocking::{Client, ClientBuilder, Request, Response};
use reqwest::header::{self, HeaderValue, ACCEPT_RANGES};
use reqwest::{Method, StatusCode};
use std::cmp::Ordering;
use std::io::Read;
use std::time::Duration;
use url::Url;

/// Settings for the HTTP client including retry strategy and timeouts.
#[derive(Clone, Copy, Debug)]
pub struct ClientSettings {
    /// Set a timeout for connect, read and write operations.
    pub timeout: Duration,
    /// Set a timeout for only the connect phase.
    pub connect_timeout: Duration,
    /// The total number of times we will try to get the response.
    pub tries: u32,
    /// The pause between the first and second try.
    pub initial_backoff: Duration,
    /// The maximum length of a pause between retries.
    pub max_backoff: Duration,
    /// The exponential backoff factor, the factor by which the pause time will increase after each
    /// try until reaching `max_backoff`.
    pub backoff_factor: f32,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(10),
            // try / 100ms / try / 150ms / try / 220ms / try
            tries: 4,
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_secs(1),
            backoff_factor: 1.5,
        }
    }
}

/// An HTTP [`Transport`] with retry logic.
#[derive(Clone, Copy, Debug, Default)]
pub struct HttpTransport {
    settings: ClientSettings,
}

impl HttpTransport {
    /// Create a new `HttpTransport` with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a new `HttpTransport` with specific settings.
    pub fn from_settings(settings: ClientSettings) -> Self {
        Self { settings }
    }
}

impl Transport for HttpTransport {
    /// Send a GET request to the URL. The request is retried per the `ClientSettings`; the
    /// returned `Read` will also retry as necessary per the `ClientSettings`.
    fn fetch(&self, url: Url) -> Result<Box<dyn Read + Send>, TransportError> {
        let mut r = RetryState::new(self.settings.initial_backoff);
        let retry_read = fetch_with_retries(&mut r, &self.settings, &url)?;
        Ok(Box::new(retry_read))
    }
}

/// This serves as a `Read`, but carries with it the necessary information to do retries.
#[derive(Debug)]
pub struct RetryRead {
    retry_state: RetryState,
    settings: ClientSettings,
    response: Response,
    url: Url,
}

impl Read for RetryRead {
    /// Read bytes into `buf`, retrying as necessary.
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        loop {
            let retry_err = match self.response.read(buf) {
                Ok(sz) => {
                    self.retry_state.next_byte += sz;
                    return Ok(sz);
                }
                Err(err) => err,
            };
            debug!("error during read of '{}': {:?}", self.url, retry_err);

            if self.retry_state.current_try >= self.settings.tries - 1 {
                return Err(retry_err);
            }
            self.retry_state.increment(&self.settings);
            std::thread::sleep(self.retry_state.wait);
            if !self.supports_range() {
                error!(
                    "an error occurred and we cannot retry because the server \
                    does not support range requests '{}': {:?}",
                    self.url, retry_err
                );
                return Err(retry_err);
            }
            let new_retry_read =
                fetch_with_retries(&mut self.retry_state, &self.settings, &self.url)
                    .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))?;
            self.response = new_retry_read.response;
        }
    }
}

impl RetryRead {
    /// Checks for the header `Accept-Ranges: bytes`
    fn supports_range(&self) -> bool {
        self.response
            .headers()
            .get(ACCEPT_RANGES)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|v| v.contains("bytes"))
    }
}

/// A private struct that serves as the retry counter.
#[derive(Clone, Copy, Debug)]
struct RetryState {
    /// The current try we are on. First try is zero.
    current_try: u32,
    /// The amount that we should sleep before the next retry.
    wait: Duration,
    /// The next byte that we should read. e.g. the last read byte + 1.
    next_byte: usize,
}

impl RetryState {
    fn new(initial_wait: Duration) -> Self {
        Self {
            current_try: 0,
            wait: initial_wait,
            next_byte: 0,
        }
    }

    /// Increments the try count and the wait duration.
    fn increment(&mut self, settings: &ClientSettings) {
        if self.current_try > 0 {
            let new_wait = self.wait.mul_f32(settings.backoff_factor);
            match new_wait.cmp(&settings.max_backoff) {
                Ordering::Less => self.wait = new_wait,
                Ordering::Greater => self.wait = settings.max_backoff,
                Ordering::Equal => {}
            }
        }
        self.current_try += 1;
    }
}

/// Sends a `GET` request to `url`, retrying per `cs`.
fn fetch_with_retries(r: &mut RetryState, cs: &ClientSettings, url: &Url) -> Result<RetryRead, TransportError> {
    trace!("beginning fetch for '{}'", url);
    let client = ClientBuilder::new()
        .timeout(cs.timeout)
        .connect_timeout(cs.connect_timeout)
        .build()
        .map_err(|e| TransportError::new(TransportErrorKind::Other, url.as_str(), e))?;

    loop {
        let request = build_request(&client, r.next_byte, url)?;

        let result = client.execute(request).and_then(Response::error_for_status);

        let retry_err = match result {
            Ok(response) => {
                return Ok(RetryRead {
                    retry_state: *r,
                    settings: *cs,
                    response,
                    url: url.clone(),
                });
            }
            Err(err) => {
                if let Some(status) = err.status() {
                    // 404 is a first-class, non-retryable outcome distinct from any other
                    // status: the root chain walk relies on it to recognize "no N+1.root.json
                    // yet" rather than a transport failure.
                    if status == StatusCode::NOT_FOUND {
                        return Err(TransportError::new(
                            TransportErrorKind::FileNotFound,
                            url.as_str(),
                            err,
                        ));
                    }
                    if !status.is_success() && !status.is_server_error() {
                        return Err(TransportError::new(
                            TransportErrorKind::Other,
                            url.as_str(),
                            err,
                        ));
                    }
                }
                err
            }
        };

        if r.current_try >= cs.tries - 1 {
            return Err(TransportError::new(
                TransportErrorKind::Other,
                url.as_str(),
                retry_err,
            ));
        }
        r.increment(cs);
        std::thread::sleep(r.wait);
    }
}

fn build_request(client: &Client, next_byte: usize, url: &Url) -> Result<Request, TransportError> {
    let builder = client.request(Method::GET, url.as_str());
    let builder = if next_byte == 0 {
        builder
    } else {
        let header_value_string = format!("bytes={next_byte}-");
        let header_value = HeaderValue::from_str(&header_value_string).map_err(|e| {
            TransportError::new(TransportErrorKind::Other, url.as_str(), e)
        })?;
        builder.header(header::RANGE, header_value)
    };
    builder
        .build()
        .map_err(|e| TransportError::new(TransportErrorKind::Other, url.as_str(), e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use httptest::matchers::*;
    use httptest::responders::status_code;
    use httptest::{Expectation, Server};

    #[test]
    fn fetches_a_simple_url() {
        let server = Server::run();
        server.expect(
            Expectation::matching(request::method_path("GET", "/hello"))
                .respond_with(status_code(200).body("hello world")),
        );
        let url = Url::parse(&server.url_str("/hello")).unwrap();

        let transport = HttpTransport::new();
        let mut body = String::new();
        transport
            .fetch(url)
            .unwrap()
            .read_to_string(&mut body)
            .unwrap();
        assert_eq!(body, "hello world");
    }

    #[test]
    fn surfaces_a_404_as_file_not_found() {
        let server = Server::run();
        server.expect(
            Expectation::matching(request::method_path("GET", "/missing"))
                .respond_with(status_code(404)),
        );
        let url = Url::parse(&server.url_str("/missing")).unwrap();

        let transport = HttpTransport::new();
        let err = transport.fetch(url).unwrap_err();
        assert!(matches!(err.kind, TransportErrorKind::FileNotFound));
    }
}
