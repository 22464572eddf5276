use reqwest::Client;
use std::time::Duration;
use tracing::warn;

const USER_AGENT: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"));

/// Timeouts for calls to the import pipeline. Status checks are short reads,
/// so the request timeout stays well under the poll interval.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HttpTimeouts {
    pub request: Duration,
    pub connect: Duration,
}

impl Default for HttpTimeouts {
    fn default() -> Self {
        Self {
            request: Duration::from_secs(4),
            connect: Duration::from_secs(2),
        }
    }
}

impl HttpTimeouts {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let secs = |key: &str| {
            lookup(key)
                .and_then(|v| v.trim().parse::<u64>().ok())
                .filter(|v| *v > 0)
                .map(Duration::from_secs)
        };
        let defaults = Self::default();
        let request = secs("HTTP_TIMEOUT_SECS").unwrap_or(defaults.request);
        let connect = secs("HTTP_CONNECT_TIMEOUT_SECS")
            .unwrap_or(defaults.connect)
            .min(request);
        Self { request, connect }
    }
}

pub fn build_client(timeouts: HttpTimeouts) -> Client {
    Client::builder()
        .timeout(timeouts.request)
        .connect_timeout(timeouts.connect)
        .user_agent(USER_AGENT)
        .build()
        .unwrap_or_else(|err| {
            warn!(target = "travelone.http", error = %err, "falling back to default http client");
            Client::new()
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn timeouts(pairs: &[(&str, &str)]) -> HttpTimeouts {
        let env: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        HttpTimeouts::from_lookup(|key| env.get(key).cloned())
    }

    #[test]
    fn defaults_apply_when_unset_or_invalid() {
        assert_eq!(timeouts(&[]), HttpTimeouts::default());
        assert_eq!(
            timeouts(&[("HTTP_TIMEOUT_SECS", "soon"), ("HTTP_CONNECT_TIMEOUT_SECS", "0")]),
            HttpTimeouts::default()
        );
    }

    #[test]
    fn connect_timeout_never_exceeds_request_timeout() {
        let parsed = timeouts(&[("HTTP_TIMEOUT_SECS", "3"), ("HTTP_CONNECT_TIMEOUT_SECS", "10")]);
        assert_eq!(parsed.request, Duration::from_secs(3));
        assert_eq!(parsed.connect, Duration::from_secs(3));
    }
}
