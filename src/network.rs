use std::{error::Error, io};

use slog::debug;

use crate::error::FetchError;
use crate::location::ApiResponse;

pub const DEFAULT_ENDPOINT: &str = "https://ipapi.co/json/";

/// Anything that can look up the caller's location. Called from a helper
/// thread, never from the event loop.
pub trait LocationSource: Send + Sync {
    fn lookup(&self) -> Result<ApiResponse, FetchError>;
}

pub struct HttpLocationSource {
    log: slog::Logger,
    http_agent: ureq::Agent,
    endpoint: String,
}
impl HttpLocationSource {
    pub fn new(log: &slog::Logger, http_agent: ureq::Agent, endpoint: String) -> Self {
        Self {
            log: log.clone(),
            http_agent,
            endpoint,
        }
    }
}
impl LocationSource for HttpLocationSource {
    fn lookup(&self) -> Result<ApiResponse, FetchError> {
        fetch_location(&self.log, &self.http_agent, &self.endpoint)
    }
}

/// Issues a single GET against the location API. Every failure is mapped onto
/// a [`FetchError`] so callers only have to deal with one failure shape.
pub fn fetch_location(
    log: &slog::Logger,
    http_agent: &ureq::Agent,
    endpoint: &str,
) -> Result<ApiResponse, FetchError> {
    debug!(log, "network: requesting location"; "endpoint" => endpoint);
    let resp = http_agent.get(endpoint).call().map_err(classify)?;
    let status = resp.status();
    let body = resp.into_string().map_err(|e| classify_source(&e))?;

    debug!(log, "network: location response"; "status" => status, "resp" => &body);

    serde_json::from_str(&body).map_err(|e| FetchError::InvalidData(e.to_string()))
}

fn classify(err: ureq::Error) -> FetchError {
    match err {
        ureq::Error::Status(code, resp) => {
            FetchError::NetworkError(format!("{code} {}", resp.status_text()))
        }
        ureq::Error::Transport(transport) => match transport.kind() {
            // nothing a retry could fix
            ureq::ErrorKind::InvalidUrl
            | ureq::ErrorKind::UnknownScheme
            | ureq::ErrorKind::InsecureRequestHttpsOnly => FetchError::Unknown {
                message: transport.to_string(),
                status: "invalid".to_string(),
            },
            _ => classify_source(&transport),
        },
    }
}

fn classify_source(err: &(dyn Error + 'static)) -> FetchError {
    let message = err.to_string();
    match io_error_kind(err) {
        Some(io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock) => {
            FetchError::NetworkTimeout(message)
        }
        Some(io::ErrorKind::ConnectionAborted | io::ErrorKind::Interrupted) => {
            FetchError::Aborted(message)
        }
        // ureq does not always keep the io::Error around
        _ if message.contains("timed out") => FetchError::NetworkTimeout(message),
        _ => FetchError::NetworkError(message),
    }
}

fn io_error_kind(err: &(dyn Error + 'static)) -> Option<io::ErrorKind> {
    let mut current = Some(err);
    while let Some(err) = current {
        if let Some(io_err) = err.downcast_ref::<io::Error>() {
            return Some(io_err.kind());
        }
        current = err.source();
    }
    None
}
