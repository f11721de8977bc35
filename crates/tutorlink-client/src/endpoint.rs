//! Endpoint resolution.
//!
//! Turns the configured connection inputs into a `ws://` or `wss://` URL whose
//! path ends with the required suffix. An explicit URL always wins; otherwise
//! the environment identifier is used, either verbatim when it carries a
//! scheme or with the scheme inferred from the host.

use std::net::IpAddr;

use url::Url;

use crate::config::ClientConfig;
use crate::error::{ClientError, Result};

/// Resolves the endpoint for a client configuration.
pub fn resolve_config(config: &ClientConfig) -> Result<Url> {
    resolve(
        config.endpoint_url.as_deref(),
        config.environment.as_deref(),
        &config.path,
    )
}

/// Resolves a WebSocket URL from an explicit URL or an environment identifier.
///
/// # Examples
///
/// ```
/// use tutorlink_client::endpoint::resolve;
///
/// let url = resolve(None, Some("localhost:8080"), "/realtime").unwrap();
/// assert_eq!(url.as_str(), "ws://localhost:8080/realtime");
///
/// let url = resolve(None, Some("api.example.com"), "/realtime").unwrap();
/// assert_eq!(url.as_str(), "wss://api.example.com/realtime");
/// ```
///
/// # Errors
///
/// Returns `ClientError::InvalidEnvironment` when neither input is usable.
pub fn resolve(explicit: Option<&str>, environment: Option<&str>, path: &str) -> Result<Url> {
    let explicit = explicit.map(str::trim).filter(|s| !s.is_empty());
    let environment = environment.map(str::trim).filter(|s| !s.is_empty());

    let mut url = match (explicit, environment) {
        (Some(raw), _) => parse_with_scheme(raw)?,
        (None, Some(identifier)) => {
            if has_known_scheme(identifier) {
                parse_with_scheme(identifier)?
            } else {
                parse_identifier(identifier)?
            }
        }
        (None, None) => {
            return Err(ClientError::invalid_environment(
                "no endpoint URL or environment identifier provided",
            ));
        }
    };

    ensure_path_suffix(&mut url, path);
    Ok(url)
}

fn has_known_scheme(s: &str) -> bool {
    let lower = s.to_ascii_lowercase();
    ["ws://", "wss://", "http://", "https://"]
        .iter()
        .any(|prefix| lower.starts_with(prefix))
}

/// Parses a URL that already carries a scheme, mapping `http(s)` onto `ws(s)`.
fn parse_with_scheme(raw: &str) -> Result<Url> {
    let mut url = Url::parse(raw)
        .map_err(|e| ClientError::invalid_environment(format!("invalid URL '{raw}': {e}")))?;

    let scheme = match url.scheme() {
        "ws" | "http" => "ws",
        "wss" | "https" => "wss",
        other => {
            return Err(ClientError::invalid_environment(format!(
                "unsupported scheme '{other}' in '{raw}'"
            )));
        }
    };
    if url.scheme() != scheme && url.set_scheme(scheme).is_err() {
        return Err(ClientError::invalid_environment(format!(
            "cannot convert '{raw}' to a WebSocket URL"
        )));
    }

    if url.host_str().map_or(true, str::is_empty) {
        return Err(ClientError::invalid_environment(format!(
            "URL '{raw}' has no host"
        )));
    }
    Ok(url)
}

/// Parses a scheme-less `host[:port][/path]` identifier.
fn parse_identifier(identifier: &str) -> Result<Url> {
    let (authority, path) = identifier
        .find('/')
        .map_or((identifier, ""), |idx| identifier.split_at(idx));

    if authority.is_empty() {
        return Err(ClientError::invalid_environment(format!(
            "environment identifier '{identifier}' has no host"
        )));
    }

    // A bare IPv6 literal needs brackets before it can carry a scheme.
    let authority = if authority.matches(':').count() > 1 && !authority.starts_with('[') {
        format!("[{authority}]")
    } else {
        authority.to_string()
    };

    let scheme = if is_loopback(host_of(&authority)) {
        "ws"
    } else {
        "wss"
    };

    Url::parse(&format!("{scheme}://{authority}{path}")).map_err(|e| {
        ClientError::invalid_environment(format!(
            "invalid environment identifier '{identifier}': {e}"
        ))
    })
}

/// Strips the port from an authority, keeping IPv6 brackets out of the result.
fn host_of(authority: &str) -> &str {
    if let Some(rest) = authority.strip_prefix('[') {
        return rest.split(']').next().unwrap_or(rest);
    }
    authority
        .rsplit_once(':')
        .map_or(authority, |(host, _port)| host)
}

fn is_loopback(host: &str) -> bool {
    let host = host.to_ascii_lowercase();
    if host == "localhost" || host.ends_with(".localhost") {
        return true;
    }
    host.parse::<IpAddr>().is_ok_and(|ip| ip.is_loopback())
}

/// Appends the required path segments unless the path already ends with them.
fn ensure_path_suffix(url: &mut Url, suffix: &str) {
    let required: Vec<&str> = suffix.split('/').filter(|s| !s.is_empty()).collect();
    if required.is_empty() {
        return;
    }

    let mut segments: Vec<String> = url
        .path()
        .split('/')
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect();

    let already_present = segments.len() >= required.len()
        && segments[segments.len() - required.len()..]
            .iter()
            .zip(&required)
            .all(|(have, want)| have == want);

    if !already_present {
        segments.extend(required.iter().map(|s| (*s).to_string()));
    }
    url.set_path(&format!("/{}", segments.join("/")));
}
