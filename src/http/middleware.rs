//! Captive-portal redirect middleware (`spec` §4.J).
//!
//! While the hotspot is active, OS captive-portal probes (Apple, Google,
//! Microsoft, Firefox) are redirected to the provisioning page instead of
//! getting their expected "internet is fine" response — this is what makes
//! the phone or laptop pop the captive-portal sheet at all. Everything else
//! (the provisioning UI itself, its static assets, the API routes) is let
//! through untouched.

use axum::extract::{Request, State};
use axum::http::{header, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};

use super::AppState;

const HOTSPOT_GATEWAY: &str = "10.42.0.1";

/// Hostnames the major platforms probe to decide whether a network has a
/// captive portal. None of these are expected to resolve to anything but the
/// hotspot's own wildcard DNS while the AP is up.
const PROBE_HOSTS: &[&str] = &[
    "captive.apple.com",
    "connectivitycheck.gstatic.com",
    "connectivitycheck.android.com",
    "clients3.google.com",
    "www.msftconnecttest.com",
    "www.msftncsi.com",
    "detectportal.firefox.com",
];

/// Paths the redirect must never intercept: the provisioning page itself,
/// its static assets (served from both `/static` and the bundled `/lib`
/// vendor directory, e.g. `/lib/bootstrap.css`), the API it calls, and the
/// Swagger UI used to exercise it by hand.
const ALLOWED_PREFIXES: &[&str] = &["/provision", "/api", "/swagger", "/static", "/lib"];

pub async fn captive_portal_redirect(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Response {
    let hotspot_active = state.wifi.status().await.hotspot_active;
    if !hotspot_active {
        return next.run(request).await;
    }

    let path = request.uri().path();
    if ALLOWED_PREFIXES.iter().any(|prefix| path.starts_with(prefix)) {
        return next.run(request).await;
    }

    let host = request
        .headers()
        .get(header::HOST)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");
    if !is_captive_probe_host(host) {
        return next.run(request).await;
    }

    (StatusCode::FOUND, [(header::LOCATION, "/provision")]).into_response()
}

fn is_captive_probe_host(host: &str) -> bool {
    let host_only = host.split(':').next().unwrap_or(host);
    host_only == HOTSPOT_GATEWAY || PROBE_HOSTS.contains(&host_only)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recognizes_known_probe_hosts() {
        assert!(is_captive_probe_host("captive.apple.com"));
        assert!(is_captive_probe_host("connectivitycheck.gstatic.com"));
        assert!(is_captive_probe_host("10.42.0.1"));
        assert!(is_captive_probe_host("10.42.0.1:5000"));
        assert!(!is_captive_probe_host("example.com"));
    }

    #[test]
    fn allowlisted_prefixes_cover_provisioning_surface() {
        assert!(ALLOWED_PREFIXES.iter().any(|p| "/provision".starts_with(p)));
        assert!(ALLOWED_PREFIXES.iter().any(|p| "/api/Admin/Provision/status".starts_with(p)));
        assert!(!ALLOWED_PREFIXES.iter().any(|p| "/whatever".starts_with(p)));
    }

    #[test]
    fn lib_static_assets_pass_through() {
        assert!(ALLOWED_PREFIXES.iter().any(|p| "/lib/bootstrap.css".starts_with(p)));
    }
}
