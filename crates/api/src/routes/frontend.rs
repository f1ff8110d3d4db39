//! Static single-page app serving.
//!
//! Client-side routes all load `index.html`; which view renders, and whether
//! the user is bounced to the login page, is decided in the browser.

use axum::{
    body::Body,
    extract::State,
    http::{header, StatusCode, Uri},
    response::{IntoResponse, Redirect, Response},
};
use std::path::{Component, Path, PathBuf};
use tokio::fs;
use tracing::warn;

use domain::services::Route;

use crate::app::AppState;

/// Hashed build assets never change under the same name.
const IMMUTABLE_MAX_AGE: u32 = 31_536_000;
const MUTABLE_MAX_AGE: u32 = 60;

/// GET /
pub async fn root_redirect() -> Redirect {
    Redirect::permanent(Route::Map.path())
}

/// Fallback for every path no other route matched.
pub async fn serve_frontend(State(state): State<AppState>, uri: Uri) -> Response {
    if uri.path().starts_with("/api/") {
        return StatusCode::NOT_FOUND.into_response();
    }

    let base_dir = &state.config.frontend.base_dir;
    match plan(uri.path()) {
        Plan::Index => serve_index(base_dir).await,
        Plan::Redirect(route) => Redirect::permanent(route.path()).into_response(),
        Plan::Asset(relative) => {
            let file_path = base_dir.join(&relative);
            if !is_safe_path(base_dir, &file_path) {
                warn!(requested_path = %uri.path(), "Path traversal attempt detected");
                return StatusCode::FORBIDDEN.into_response();
            }
            match serve_file(&file_path).await {
                Ok(response) => response,
                Err(_) => StatusCode::NOT_FOUND.into_response(),
            }
        }
    }
}

#[derive(Debug, PartialEq)]
enum Plan {
    Index,
    Redirect(Route),
    Asset(PathBuf),
}

/// Known client routes get the app shell; other extension-less paths go to
/// the map; anything with an extension is a static asset.
fn plan(path: &str) -> Plan {
    if Route::from_path(path).is_some() {
        return Plan::Index;
    }
    let relative = path.trim_start_matches('/');
    let last_segment = relative.rsplit('/').next().unwrap_or_default();
    if relative.is_empty() || !last_segment.contains('.') {
        return Plan::Redirect(Route::Map);
    }
    Plan::Asset(PathBuf::from(relative))
}

async fn serve_index(base_dir: &Path) -> Response {
    match serve_file(&base_dir.join("index.html")).await {
        Ok(response) => response,
        Err(e) => {
            warn!(dir = %base_dir.display(), error = %e, "Frontend index.html not available");
            (StatusCode::SERVICE_UNAVAILABLE, "Frontend not available").into_response()
        }
    }
}

async fn serve_file(path: &Path) -> Result<Response, std::io::Error> {
    let content = fs::read(path).await?;
    let mime = mime_guess::from_path(path).first_or_octet_stream();

    let cache_control = if is_immutable_asset(path) {
        format!("public, max-age={}, immutable", IMMUTABLE_MAX_AGE)
    } else {
        format!("public, max-age={}", MUTABLE_MAX_AGE)
    };

    Ok((
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, mime.as_ref().to_string()),
            (header::CACHE_CONTROL, cache_control),
        ],
        Body::from(content),
    )
        .into_response())
}

fn is_safe_path(base: &Path, path: &Path) -> bool {
    if path.exists() {
        match (base.canonicalize(), path.canonicalize()) {
            (Ok(canonical_base), Ok(canonical_path)) => canonical_path.starts_with(canonical_base),
            _ => false,
        }
    } else {
        normalize_path(path).starts_with(normalize_path(base))
    }
}

fn normalize_path(path: &Path) -> PathBuf {
    let mut result = PathBuf::new();
    for component in path.components() {
        match component {
            Component::ParentDir => {
                result.pop();
            }
            Component::CurDir => {}
            component => result.push(component),
        }
    }
    result
}

fn is_immutable_asset(path: &Path) -> bool {
    path.components().any(|c| c.as_os_str() == "assets")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plan_client_routes() {
        for path in ["/map", "/dashboard", "/parents", "/contacts", "/login", "/signup/"] {
            assert_eq!(plan(path), Plan::Index, "{}", path);
        }
    }

    #[test]
    fn test_plan_unknown_routes_redirect_to_map() {
        assert_eq!(plan("/"), Plan::Redirect(Route::Map));
        assert_eq!(plan("/settings"), Plan::Redirect(Route::Map));
        assert_eq!(plan("/map/extra"), Plan::Redirect(Route::Map));
    }

    #[test]
    fn test_plan_assets() {
        assert_eq!(
            plan("/assets/index-3f2a.js"),
            Plan::Asset(PathBuf::from("assets/index-3f2a.js"))
        );
        assert_eq!(plan("/favicon.ico"), Plan::Asset(PathBuf::from("favicon.ico")));
    }

    #[test]
    fn test_is_immutable_asset() {
        assert!(is_immutable_asset(Path::new("frontend/dist/assets/index-3f2a.js")));
        assert!(!is_immutable_asset(Path::new("frontend/dist/index.html")));
    }

    #[test]
    fn test_normalize_path() {
        assert_eq!(
            normalize_path(Path::new("/app/frontend/../other")),
            PathBuf::from("/app/other")
        );
        assert_eq!(
            normalize_path(Path::new("/app/./frontend")),
            PathBuf::from("/app/frontend")
        );
    }

    #[test]
    fn test_is_safe_path() {
        let base = Path::new("/app/frontend");
        assert!(is_safe_path(base, Path::new("/app/frontend/assets/app.js")));
        assert!(!is_safe_path(base, Path::new("/app/frontend/../etc/passwd")));
    }
}
