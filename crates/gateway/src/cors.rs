//! Browser origin policy for the coordinator's HTTP and WebSocket surface.
//!
//! `server.cors.allowed_origins` accepts three spellings:
//! a lone `"*"` (any origin), exact origins such as `https://ops.example`,
//! and host patterns ending in `:*` that accept any numeric port on that
//! host (`http://localhost:*`).

use axum::http::{header, HeaderValue, Method};
use tower_http::cors::{AllowOrigin, Any, CorsLayer};

use leitl_domain::config::CorsConfig;

/// Parsed form of the configured origin list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OriginPolicy {
    Anyone,
    Listed {
        exact: Vec<String>,
        /// Scheme and host up to and including the `:` before the port.
        any_port: Vec<String>,
    },
}

impl OriginPolicy {
    pub fn from_config(cors: &CorsConfig) -> Self {
        if matches!(cors.allowed_origins.as_slice(), [only] if only == "*") {
            return Self::Anyone;
        }

        let mut exact = Vec::new();
        let mut any_port = Vec::new();
        for origin in &cors.allowed_origins {
            match origin.strip_suffix('*') {
                Some(host) if host.ends_with(':') => any_port.push(host.to_owned()),
                _ if HeaderValue::from_str(origin).is_ok() => exact.push(origin.clone()),
                _ => tracing::warn!(origin = %origin, "unusable CORS origin ignored"),
            }
        }
        Self::Listed { exact, any_port }
    }

    pub fn allows(&self, origin: &str) -> bool {
        match self {
            Self::Anyone => true,
            Self::Listed { exact, any_port } => {
                exact.iter().any(|e| e == origin)
                    || any_port.iter().any(|host| {
                        origin.strip_prefix(host.as_str()).is_some_and(|port| {
                            !port.is_empty() && port.bytes().all(|b| b.is_ascii_digit())
                        })
                    })
            }
        }
    }

    pub fn into_layer(self) -> CorsLayer {
        let layer = CorsLayer::new()
            .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
            .allow_headers([header::CONTENT_TYPE]);

        match self {
            Self::Anyone => {
                tracing::warn!("CORS open to every origin");
                layer.allow_origin(Any)
            }
            policy => layer.allow_origin(AllowOrigin::predicate(move |origin, _| {
                origin.to_str().is_ok_and(|o| policy.allows(o))
            })),
        }
    }
}
