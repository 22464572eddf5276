use crate::models::ApiError;
use axum::{
    Json,
    body::Body,
    extract::State,
    http::{self, Request, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use std::{collections::HashMap, convert::Infallible, env, sync::Arc};
use tracing::{info, warn};

const AGENT_KEY_HEADER: &str = "X-Agent-Key";

#[derive(Clone)]
pub struct AuthState {
    agents: Arc<HashMap<String, AgentContext>>,
}

/// Agent resolved from the presented key, attached to the request extensions.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AgentContext {
    pub agent_id: u64,
    pub key_id: String,
}

impl AuthState {
    pub fn from_env() -> Self {
        let raw = env::var("DASHBOARD_API_KEYS").unwrap_or_default();
        Self::from_entries(&raw)
    }

    /// Parses `agent_id:key` pairs separated by commas.
    pub fn from_entries(raw: &str) -> Self {
        let mut agents = HashMap::new();
        for (idx, entry) in raw.split(',').enumerate() {
            let trimmed = entry.trim();
            if trimmed.is_empty() {
                continue;
            }
            let parsed = trimmed.split_once(':').and_then(|(id, key)| {
                let id = id.trim().parse::<u64>().ok()?;
                let key = key.trim();
                (!key.is_empty()).then(|| (id, key.to_string()))
            });
            match parsed {
                Some((agent_id, key)) => {
                    agents.insert(
                        key,
                        AgentContext {
                            agent_id,
                            key_id: format!("key-{:02}", idx + 1),
                        },
                    );
                }
                None => warn!(
                    target = "travelone.auth",
                    "ignored malformed DASHBOARD_API_KEYS entry #{}",
                    idx + 1
                ),
            }
        }

        if agents.is_empty() {
            warn!(
                target = "travelone.auth",
                "no agent keys configured; every gated request will be rejected"
            );
        } else {
            info!(
                target = "travelone.auth",
                key_count = agents.len(),
                "loaded agent keys"
            );
        }

        Self {
            agents: Arc::new(agents),
        }
    }

    fn authenticate(&self, presented: &str) -> Option<AgentContext> {
        self.agents.get(presented).cloned()
    }
}

pub async fn require_agent_auth(
    State(state): State<AuthState>,
    mut request: Request<Body>,
    next: Next,
) -> Result<Response, Infallible> {
    let Some(presented) = extract_api_key(request.headers()) else {
        return Ok(unauthorized_response(
            "missing_api_key",
            "Provide X-Agent-Key or Bearer token",
        ));
    };

    let Some(context) = state.authenticate(&presented) else {
        return Ok(unauthorized_response("invalid_api_key", "Key not recognized"));
    };

    request.extensions_mut().insert(context);
    Ok(next.run(request).await)
}

fn extract_api_key(headers: &http::HeaderMap) -> Option<String> {
    if let Some(value) = headers.get(http::header::AUTHORIZATION)
        && let Ok(raw) = value.to_str()
        && let Some((scheme, key)) = raw.trim_start().split_once(char::is_whitespace)
        && scheme.eq_ignore_ascii_case("bearer")
    {
        return Some(key.trim().to_string()).filter(|v| !v.is_empty());
    }
    headers
        .get(AGENT_KEY_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn unauthorized_response(code: &str, message: &str) -> Response {
    (StatusCode::UNAUTHORIZED, Json(ApiError::new(code, message))).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::{HeaderMap, HeaderValue};

    #[test]
    fn parses_agent_entries_and_skips_malformed_ones() {
        let state = AuthState::from_entries("1:alpha, 2:beta ,bogus, x:gamma, 3:");
        assert_eq!(state.agents.len(), 2);
        assert_eq!(
            state.authenticate("alpha"),
            Some(AgentContext {
                agent_id: 1,
                key_id: "key-01".into()
            })
        );
        assert_eq!(state.authenticate("beta").map(|c| c.agent_id), Some(2));
        assert!(state.authenticate("gamma").is_none());
    }

    #[test]
    fn bearer_header_wins_over_agent_header() {
        let mut headers = HeaderMap::new();
        headers.insert(AGENT_KEY_HEADER, HeaderValue::from_static("from-header"));
        assert_eq!(extract_api_key(&headers).as_deref(), Some("from-header"));

        headers.insert(
            http::header::AUTHORIZATION,
            HeaderValue::from_static("Bearer  from-bearer "),
        );
        assert_eq!(extract_api_key(&headers).as_deref(), Some("from-bearer"));
    }

    #[test]
    fn blank_keys_are_absent() {
        let mut headers = HeaderMap::new();
        headers.insert(AGENT_KEY_HEADER, HeaderValue::from_static("   "));
        assert_eq!(extract_api_key(&headers), None);
    }

    #[test]
    fn bearer_scheme_needs_a_separating_space() {
        let mut headers = HeaderMap::new();
        headers.insert(
            http::header::AUTHORIZATION,
            HeaderValue::from_static("BearerXYZ"),
        );
        assert_eq!(extract_api_key(&headers), None);

        headers.insert(AGENT_KEY_HEADER, HeaderValue::from_static("from-header"));
        assert_eq!(extract_api_key(&headers).as_deref(), Some("from-header"));

        headers.insert(
            http::header::AUTHORIZATION,
            HeaderValue::from_static("bearer XYZ"),
        );
        assert_eq!(extract_api_key(&headers).as_deref(), Some("XYZ"));
    }
}
