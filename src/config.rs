use std::env;
use std::str::FromStr;

use log::warn;

/// Which room-access policy `rooms::resolve_or_create` applies.
///
/// `Strict` re-verifies the project and the requester's role/client email on
/// every join or send. `Trusting` assumes an upstream tier already authorized
/// the caller and only maintains room membership.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthorizationMode {
    Strict,
    Trusting,
}

impl FromStr for AuthorizationMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "strict" => Ok(AuthorizationMode::Strict),
            "trusting" => Ok(AuthorizationMode::Trusting),
            other => Err(format!("unknown authorization mode: {}", other)),
        }
    }
}

#[derive(Clone)]
pub struct Config {
    pub mongo_uri: String,
    pub database_name: String,
    pub jwt_secret: String,
    /// Name of the session cookie checked first for the bearer token.
    pub session_cookie: String,
    pub frontend_origin: String,
    pub port: u16,
    pub authorization_mode: AuthorizationMode,
    pub push_endpoint: String,
}

impl Config {
    pub fn from_env() -> Self {
        dotenv::dotenv().ok();

        let authorization_mode = match env::var("AUTHORIZATION_MODE") {
            Ok(raw) => raw.parse().unwrap_or_else(|e: String| {
                warn!("{}; falling back to strict", e);
                AuthorizationMode::Strict
            }),
            Err(_) => AuthorizationMode::Strict,
        };

        Self {
            mongo_uri: env::var("MONGO_URI").expect("MONGO_URI must be set"),
            database_name: env::var("DATABASE_NAME")
                .unwrap_or_else(|_| "project_chat".to_string()),
            jwt_secret: env::var("JWT_SECRET").unwrap_or_else(|_| {
                warn!("JWT_SECRET not set, using insecure default");
                "secret".to_string()
            }),
            session_cookie: env::var("SESSION_COOKIE")
                .unwrap_or_else(|_| "app_session".to_string()),
            frontend_origin: env::var("FRONTEND_ORIGIN")
                .unwrap_or_else(|_| "http://localhost:3000".to_string()),
            port: env::var("PORT")
                .ok()
                .and_then(|p| p.parse().ok())
                .unwrap_or(4000),
            authorization_mode,
            push_endpoint: env::var("EXPO_PUSH_URL")
                .unwrap_or_else(|_| "https://exp.host/--/api/v2/push/send".to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_authorization_mode_parse() {
        assert_eq!(
            "strict".parse::<AuthorizationMode>().unwrap(),
            AuthorizationMode::Strict
        );
        assert_eq!(
            "Trusting".parse::<AuthorizationMode>().unwrap(),
            AuthorizationMode::Trusting
        );
        assert_eq!(
            " STRICT ".parse::<AuthorizationMode>().unwrap(),
            AuthorizationMode::Strict
        );
        assert!("open".parse::<AuthorizationMode>().is_err());
    }
}
