//! Authentication: JWT validation for NATS requests.
//!
//! Tokens are issued elsewhere; the worker only checks them. A request with
//! a valid token is authenticated, and that is the only gate imports have.

use anyhow::{anyhow, Result};
use jsonwebtoken::{decode, DecodingKey, Validation};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::services::import::ImportCaller;
use crate::types::Request;

/// JWT claims
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// Subject (user ID)
    pub sub: String,
    #[serde(default)]
    pub email: Option<String>,
    /// Issued at (unix timestamp)
    pub iat: usize,
    /// Expiration (unix timestamp)
    pub exp: usize,
}

/// Authentication result from extract_auth
#[derive(Debug, Clone)]
pub struct AuthInfo {
    pub user_id: Uuid,
    pub email: Option<String>,
}

impl AuthInfo {
    /// Staged imports are owned by the authenticated user.
    pub fn caller(&self) -> ImportCaller {
        ImportCaller::authenticated(self.user_id)
    }
}

/// Validate a JWT token and return claims
pub fn validate_token(token: &str, secret: &str) -> Result<Claims> {
    let token_data = decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &Validation::default(),
    )
    .map_err(|e| anyhow!("Invalid token: {}", e))?;

    Ok(token_data.claims)
}

/// Extract authentication info from a NATS request.
pub fn extract_auth<T>(request: &Request<T>, jwt_secret: &str) -> Result<AuthInfo> {
    let token = request
        .token
        .as_deref()
        .ok_or_else(|| anyhow!("Missing access token"))?;
    let claims = validate_token(token, jwt_secret)?;
    let user_id =
        Uuid::parse_str(&claims.sub).map_err(|e| anyhow!("Invalid user_id in token: {}", e))?;

    Ok(AuthInfo {
        user_id,
        email: claims.email,
    })
}

/// Sign a token the way the identity service does. Tests only.
#[cfg(test)]
pub fn generate_token(user_id: Uuid, email: &str, secret: &str) -> Result<String> {
    use jsonwebtoken::{encode, EncodingKey, Header};

    let now = chrono::Utc::now().timestamp() as usize;
    let claims = Claims {
        sub: user_id.to_string(),
        email: Some(email.to_string()),
        iat: now,
        exp: now + 60 * 60,
    };
    Ok(encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )?)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &str = "test-secret-key-at-least-32-bytes-long!!";

    #[test]
    fn test_generate_and_validate_token() {
        let user_id = Uuid::new_v4();
        let token = generate_token(user_id, "office@school.edu", SECRET).unwrap();
        let claims = validate_token(&token, SECRET).unwrap();
        assert_eq!(claims.sub, user_id.to_string());
        assert_eq!(claims.email.as_deref(), Some("office@school.edu"));
    }

    #[test]
    fn test_validate_token_wrong_secret() {
        let token = generate_token(Uuid::new_v4(), "a@b.c", SECRET).unwrap();
        assert!(validate_token(&token, "another-secret-key-at-least-32-bytes!!").is_err());
    }

    #[test]
    fn test_validate_token_malformed() {
        assert!(validate_token("not.a.token", SECRET).is_err());
    }

    #[test]
    fn test_extract_auth_with_valid_token() {
        let user_id = Uuid::new_v4();
        let token = generate_token(user_id, "a@b.c", SECRET).unwrap();
        let request = Request::with_token(token, ());
        let auth = extract_auth(&request, SECRET).unwrap();
        assert_eq!(auth.user_id, user_id);
        assert_eq!(auth.caller(), ImportCaller::authenticated(user_id));
    }

    #[test]
    fn test_extract_auth_without_token_fails() {
        let request = Request {
            id: Uuid::new_v4(),
            timestamp: chrono::Utc::now(),
            token: None,
            payload: (),
        };
        assert!(extract_auth(&request, SECRET).is_err());
    }

    #[test]
    fn test_extract_auth_invalid_token_fails() {
        let request = Request::with_token("garbage".to_string(), ());
        assert!(extract_auth(&request, SECRET).is_err());
    }
}
