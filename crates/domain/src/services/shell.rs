//! Route resolution and layout chrome.

use serde::Serialize;

use super::map_search::MapSearchSession;
use crate::models::Identity;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Route {
    Map,
    Dashboard,
    Parents,
    Login,
    Signup,
}

impl Route {
    pub const ALL: [Route; 5] = [
        Route::Map,
        Route::Dashboard,
        Route::Parents,
        Route::Login,
        Route::Signup,
    ];

    pub fn path(&self) -> &'static str {
        match self {
            Route::Map => "/map",
            Route::Dashboard => "/dashboard",
            Route::Parents => "/parents",
            Route::Login => "/login",
            Route::Signup => "/signup",
        }
    }

    /// Trailing slashes are ignored; `/contacts` is an alias of `/parents`.
    pub fn from_path(path: &str) -> Option<Route> {
        let trimmed = path.trim_end_matches('/');
        match trimmed {
            "/map" => Some(Route::Map),
            "/dashboard" => Some(Route::Dashboard),
            "/parents" | "/contacts" => Some(Route::Parents),
            "/login" => Some(Route::Login),
            "/signup" => Some(Route::Signup),
            _ => None,
        }
    }

    pub fn requires_auth(&self) -> bool {
        !matches!(self, Route::Login | Route::Signup)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    Render(Route),
    Redirect(Route),
}

/// Unknown paths (including `/`) go to the map; the map in turn sends
/// signed-out users to the login page.
pub fn resolve_path(path: &str, authenticated: bool) -> Resolution {
    let Some(route) = Route::from_path(path) else {
        return Resolution::Redirect(Route::Map);
    };
    match (route.requires_auth(), authenticated) {
        (true, false) => Resolution::Redirect(Route::Login),
        (false, true) => Resolution::Redirect(Route::Map),
        _ => Resolution::Render(route),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct NavLink {
    pub label: &'static str,
    pub href: &'static str,
    pub route: Route,
}

pub const NAV_LINKS: [NavLink; 3] = [
    NavLink {
        label: "Map View",
        href: "/map",
        route: Route::Map,
    },
    NavLink {
        label: "Dashboard",
        href: "/dashboard",
        route: Route::Dashboard,
    },
    NavLink {
        label: "Contacts",
        href: "/contacts",
        route: Route::Parents,
    },
];

/// What the layout shows around the current view.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Chrome {
    pub nav_links: Vec<NavLink>,
    pub active_link: Option<Route>,
    pub show_profile_menu: bool,
    pub show_project_sidebar: bool,
    pub search_action_available: bool,
    pub user_label: Option<String>,
}

impl Chrome {
    pub fn compose(identity: Option<&Identity>, route: Route, search: &MapSearchSession) -> Self {
        let Some(identity) = identity else {
            return Self {
                nav_links: Vec::new(),
                active_link: None,
                show_profile_menu: false,
                show_project_sidebar: false,
                search_action_available: false,
                user_label: None,
            };
        };

        let label = if identity.display_name.trim().is_empty() {
            identity.email.clone()
        } else {
            identity.display_name.clone()
        };

        Self {
            nav_links: NAV_LINKS.to_vec(),
            active_link: NAV_LINKS
                .iter()
                .find(|link| link.route == route)
                .map(|link| link.route),
            show_profile_menu: true,
            show_project_sidebar: true,
            search_action_available: route == Route::Map
                && search.current_project_id().is_some(),
            user_label: Some(label),
        }
    }
}
