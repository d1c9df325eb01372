use crate::calls::negotiation::{DEFAULT_NEGOTIATION_CEILING, DEFAULT_NEGOTIATION_WINDOW};
use serde_json::{Map, Value};
use std::time::Duration;

#[derive(Clone, Debug)]
pub struct SessionConfig {
    /// Quiet period after the last gathered candidate before a description is sent.
    pub negotiation_window: Duration,
    /// Hard limit on how long a call may negotiate before it is ended.
    pub negotiation_ceiling: Duration,
    /// Outbound calls beyond this many live calls are refused.
    pub max_concurrent_calls: usize,
    /// Sent as `userVariables` with the login request.
    pub user_variables: Map<String, Value>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            negotiation_window: DEFAULT_NEGOTIATION_WINDOW,
            negotiation_ceiling: DEFAULT_NEGOTIATION_CEILING,
            max_concurrent_calls: 4,
            user_variables: Map::new(),
        }
    }
}

/// Login credentials. A token wins over user/password when both are set.
#[derive(Clone, Default)]
pub struct Credentials {
    pub login_token: Option<String>,
    pub login: Option<String>,
    pub password: Option<String>,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("login_token", &self.login_token.as_ref().map(|_| "<redacted>"))
            .field("login", &self.login)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

/// The login method actually used.
#[derive(Clone, PartialEq, Eq)]
pub enum LoginMethod {
    Token(String),
    UserPassword { login: String, password: String },
}

impl std::fmt::Debug for LoginMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Token(_) => f.write_str("Token(<redacted>)"),
            Self::UserPassword { login, .. } => f
                .debug_struct("UserPassword")
                .field("login", login)
                .finish_non_exhaustive(),
        }
    }
}

impl Credentials {
    pub fn token(token: impl Into<String>) -> Self {
        Self {
            login_token: Some(token.into()),
            ..Default::default()
        }
    }

    pub fn user_password(login: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            login: Some(login.into()),
            password: Some(password.into()),
            ..Default::default()
        }
    }

    /// Resolve which login to send, or `None` when nothing usable is configured.
    pub fn login_method(&self) -> Option<LoginMethod> {
        if let Some(token) = self.login_token.as_ref().filter(|t| !t.is_empty()) {
            return Some(LoginMethod::Token(token.clone()));
        }
        match (&self.login, &self.password) {
            (Some(login), Some(password)) if !login.is_empty() => {
                Some(LoginMethod::UserPassword {
                    login: login.clone(),
                    password: password.clone(),
                })
            }
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_takes_precedence() {
        let creds = Credentials {
            login_token: Some("T".into()),
            login: Some("alice".into()),
            password: Some("pw".into()),
        };
        assert_eq!(creds.login_method(), Some(LoginMethod::Token("T".into())));
    }

    #[test]
    fn test_user_password_when_no_token() {
        let creds = Credentials::user_password("alice", "pw");
        assert_eq!(
            creds.login_method(),
            Some(LoginMethod::UserPassword {
                login: "alice".into(),
                password: "pw".into()
            })
        );
    }

    #[test]
    fn test_incomplete_credentials() {
        assert_eq!(Credentials::default().login_method(), None);
        assert_eq!(Credentials::token("").login_method(), None);
        let user_only = Credentials {
            login: Some("alice".into()),
            ..Default::default()
        };
        assert_eq!(user_only.login_method(), None);
    }

    #[test]
    fn test_debug_redacts_secrets() {
        let creds = Credentials {
            login_token: Some("secret-token".into()),
            login: Some("alice".into()),
            password: Some("hunter2".into()),
        };
        let shown = format!("{creds:?}");
        assert!(!shown.contains("secret-token"));
        assert!(!shown.contains("hunter2"));
        assert!(shown.contains("alice"));
    }
}
