use axum::{
    extract::{FromRef, Request, State},
    middleware::Next,
    response::{IntoResponse, Redirect, Response},
};
use axum_extra::extract::cookie::CookieJar;
use lazy_static::lazy_static;
use regex::Regex;
use tracing::debug;

use super::claims::{Role, SessionClaims};
use super::jwt::SessionKeys;
use super::SESSION_COOKIE;
use crate::state::AppState;

/// Navigational path classes the guard cares about.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteClass {
    /// Requires a valid session (`/dashboard`, `/admin`).
    Protected,
    /// Only makes sense without a session (`/auth/login`, `/auth/register`).
    AuthOnly,
    Public,
}

/// `None` means the guard does not apply: API routes authorize themselves,
/// static assets and image files pass straight through.
pub fn classify(path: &str) -> Option<RouteClass> {
    lazy_static! {
        static ref STATIC_EXT: Regex =
            Regex::new(r"\.(?:svg|png|jpg|jpeg|gif|webp|ico|css|js|map|woff2?)$").unwrap();
    }

    if path == "/api" || path.starts_with("/api/") || path.starts_with("/assets/") {
        return None;
    }
    if STATIC_EXT.is_match(path) {
        return None;
    }

    if path == "/dashboard" || path.starts_with("/dashboard/") || path == "/admin"
        || path.starts_with("/admin/")
    {
        Some(RouteClass::Protected)
    } else if path == "/auth/login" || path == "/auth/register" {
        Some(RouteClass::AuthOnly)
    } else {
        Some(RouteClass::Public)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GuardDecision {
    Allow,
    /// Send to login, remembering the intended destination.
    ToLogin { from: String },
    ToDashboard,
}

/// The guard's rule table, evaluated in order. Pure so the whole state
/// machine can be tested without HTTP.
pub fn decide(path: &str, session: Option<&SessionClaims>) -> GuardDecision {
    let class = match classify(path) {
        Some(class) => class,
        None => return GuardDecision::Allow,
    };

    match (class, session) {
        (RouteClass::Protected, None) => GuardDecision::ToLogin {
            from: path.to_string(),
        },
        (RouteClass::AuthOnly, Some(_)) => GuardDecision::ToDashboard,
        (RouteClass::Protected, Some(claims)) => {
            if path.starts_with("/admin/super") && claims.role < Role::SuperAdmin {
                GuardDecision::ToDashboard
            } else if path.starts_with("/admin") && claims.role < Role::Admin {
                GuardDecision::ToDashboard
            } else {
                GuardDecision::Allow
            }
        }
        _ => GuardDecision::Allow,
    }
}

/// Runs on every request; validates the session cookie and redirects or
/// forwards per the rule table.
pub async fn route_guard(
    State(state): State<AppState>,
    jar: CookieJar,
    req: Request,
    next: Next,
) -> Response {
    let path = req.uri().path().to_string();

    let keys = SessionKeys::from_ref(&state);
    let session = jar
        .get(SESSION_COOKIE)
        .and_then(|cookie| keys.verify(cookie.value()));

    match decide(&path, session.as_ref()) {
        GuardDecision::Allow => next.run(req).await,
        GuardDecision::ToLogin { from } => {
            debug!(path = %from, "unauthenticated access to protected path");
            Redirect::temporary(&format!("/auth/login?redirect={}", from)).into_response()
        }
        GuardDecision::ToDashboard => Redirect::temporary("/dashboard").into_response(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn claims(role: Role) -> SessionClaims {
        SessionClaims {
            sub: Uuid::new_v4(),
            email: "client@example.com".into(),
            role,
            iat: 0,
            exp: usize::MAX,
        }
    }

    #[test]
    fn classify_table() {
        assert_eq!(classify("/dashboard"), Some(RouteClass::Protected));
        assert_eq!(classify("/dashboard/projects"), Some(RouteClass::Protected));
        assert_eq!(classify("/admin"), Some(RouteClass::Protected));
        assert_eq!(classify("/admin/super"), Some(RouteClass::Protected));
        assert_eq!(classify("/auth/login"), Some(RouteClass::AuthOnly));
        assert_eq!(classify("/auth/register"), Some(RouteClass::AuthOnly));
        assert_eq!(classify("/"), Some(RouteClass::Public));
        assert_eq!(classify("/auth/forgot-password"), Some(RouteClass::Public));
        // Exempt: API, assets, image files.
        assert_eq!(classify("/api/projects"), None);
        assert_eq!(classify("/assets/app.css"), None);
        assert_eq!(classify("/hero.jpg"), None);
        assert_eq!(classify("/favicon.ico"), None);
    }

    #[test]
    fn protected_without_session_redirects_to_login_with_destination() {
        assert_eq!(
            decide("/dashboard", None),
            GuardDecision::ToLogin {
                from: "/dashboard".into()
            }
        );
    }

    #[test]
    fn protected_with_session_passes() {
        assert_eq!(
            decide("/dashboard", Some(&claims(Role::User))),
            GuardDecision::Allow
        );
    }

    #[test]
    fn auth_only_with_session_goes_to_dashboard() {
        assert_eq!(
            decide("/auth/login", Some(&claims(Role::User))),
            GuardDecision::ToDashboard
        );
        assert_eq!(
            decide("/auth/register", Some(&claims(Role::Admin))),
            GuardDecision::ToDashboard
        );
        assert_eq!(decide("/auth/login", None), GuardDecision::Allow);
    }

    #[test]
    fn admin_paths_require_admin_role() {
        assert_eq!(
            decide("/admin", Some(&claims(Role::User))),
            GuardDecision::ToDashboard
        );
        assert_eq!(
            decide("/admin", Some(&claims(Role::Admin))),
            GuardDecision::Allow
        );
        assert_eq!(
            decide("/admin", Some(&claims(Role::SuperAdmin))),
            GuardDecision::Allow
        );
    }

    #[test]
    fn super_admin_paths_require_super_admin_role() {
        assert_eq!(
            decide("/admin/super", Some(&claims(Role::Admin))),
            GuardDecision::ToDashboard
        );
        assert_eq!(
            decide("/admin/super", Some(&claims(Role::SuperAdmin))),
            GuardDecision::Allow
        );
    }

    #[test]
    fn public_paths_always_pass() {
        assert_eq!(decide("/", None), GuardDecision::Allow);
        assert_eq!(decide("/", Some(&claims(Role::User))), GuardDecision::Allow);
    }
}
