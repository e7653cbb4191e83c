//! Navigation surface: the paths the frontends move between.

use crate::model::UserId;

/// A navigable location in the app.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Route {
    Login,
    Signup,
    /// The shared chat room.
    Room,
    /// Private conversation with the given user.
    PrivateChat(UserId),
}

impl Route {
    pub fn path(&self) -> String {
        match self {
            Route::Login => "/".to_string(),
            Route::Signup => "/signup".to_string(),
            Route::Room => "/chat".to_string(),
            Route::PrivateChat(uid) => format!("/chat/{}", uid),
        }
    }

    /// Parse a path. `/login` is accepted as an alias for the login route.
    pub fn parse(path: &str) -> Option<Route> {
        let path = path.trim_end_matches('/');
        match path {
            "" | "/login" => Some(Route::Login),
            "/signup" => Some(Route::Signup),
            "/chat" => Some(Route::Room),
            _ => {
                let uid = path.strip_prefix("/chat/")?;
                if uid.is_empty() || uid.contains('/') {
                    None
                } else {
                    Some(Route::PrivateChat(uid.to_string()))
                }
            }
        }
    }
}
