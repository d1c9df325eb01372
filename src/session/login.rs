use crate::config::LoginMethod;
use crate::signaling::Params;
use serde_json::{Map, Value};

/// Params of the `login` request. Token and user/password are mutually exclusive.
pub fn login_params(method: &LoginMethod, user_variables: &Map<String, Value>) -> Params {
    let mut params = Params::new();
    match method {
        LoginMethod::Token(token) => {
            params.insert("login_token".into(), Value::from(token.as_str()));
        }
        LoginMethod::UserPassword { login, password } => {
            params.insert("login".into(), Value::from(login.as_str()));
            params.insert("passwd".into(), Value::from(password.as_str()));
        }
    }
    params.insert("userVariables".into(), Value::Object(user_variables.clone()));
    params.insert("loginParams".into(), Value::Object(Map::new()));
    params
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_login_has_no_password_fields() {
        let params = login_params(&LoginMethod::Token("T".into()), &Map::new());
        assert_eq!(params["login_token"], "T");
        assert!(params.get("login").is_none());
        assert!(params.get("passwd").is_none());
        assert!(params["userVariables"].as_object().unwrap().is_empty());
    }

    #[test]
    fn test_password_login_carries_user_variables() {
        let mut vars = Map::new();
        vars.insert("agent".into(), Value::from("desk"));
        let params = login_params(
            &LoginMethod::UserPassword {
                login: "1000@example.com".into(),
                password: "pw".into(),
            },
            &vars,
        );
        assert_eq!(params["login"], "1000@example.com");
        assert_eq!(params["passwd"], "pw");
        assert!(params.get("login_token").is_none());
        assert_eq!(params["userVariables"]["agent"], "desk");
    }
}
