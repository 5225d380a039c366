//! Bearer JWT extraction into an `AuthContext` (spec §4.9, §4.10: SQL scope
//! enforcement and cross-user detection both need an integer user id plus
//! an admin flag, which `actix-middleware::jwt_auth::UserId` does not carry
//! since it is keyed on a `Uuid`). Validated directly with `jsonwebtoken`
//! the same way `jwt_auth.rs` validates tokens, against this service's own
//! claim shape.

use std::future::{ready, Ready};

use actix_web::{dev::Payload, FromRequest, HttpRequest};
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::Deserialize;

use crate::config::JwtConfig;
use crate::error::AppError;

#[derive(Debug, Clone, Deserialize)]
struct Claims {
    #[serde(default)]
    sub: Option<String>,
    #[serde(default)]
    nameid: Option<String>,
    email: String,
    #[serde(default)]
    name: String,
    #[serde(default)]
    is_admin: bool,
    #[serde(default)]
    aud: Option<String>,
}

#[derive(Debug, Clone)]
pub struct AuthContext {
    pub user_id: i64,
    pub email: String,
    pub name: String,
    pub is_admin: bool,
}

impl AuthContext {
    pub fn decode(token: &str, config: &JwtConfig) -> Result<Self, AppError> {
        let algorithm = match config.algorithm.as_str() {
            "HS256" => Algorithm::HS256,
            "HS384" => Algorithm::HS384,
            "HS512" => Algorithm::HS512,
            other => {
                return Err(AppError::InternalError(format!(
                    "unsupported JWT algorithm configured: {other}"
                )))
            }
        };

        let mut validation = Validation::new(algorithm);
        validation.set_audience(&[config.audience.clone()]);

        let decoded = decode::<Claims>(
            token,
            &DecodingKey::from_secret(config.secret.as_bytes()),
            &validation,
        )
        .map_err(|e| AppError::Unauthorized(format!("invalid token: {e}")))?;

        let claims = decoded.claims;
        let user_id: i64 = claims
            .sub
            .as_deref()
            .or(claims.nameid.as_deref())
            .ok_or_else(|| AppError::Unauthorized("token carries neither sub nor nameid".to_string()))?
            .parse()
            .map_err(|_| AppError::Unauthorized("token subject is not a numeric user id".to_string()))?;

        Ok(AuthContext {
            user_id,
            email: claims.email,
            name: claims.name,
            is_admin: claims.is_admin,
        })
    }
}

impl FromRequest for AuthContext {
    type Error = actix_web::Error;
    type Future = Ready<Result<Self, Self::Error>>;

    fn from_request(req: &HttpRequest, _payload: &mut Payload) -> Self::Future {
        let result = (|| -> Result<Self, actix_web::Error> {
            let config = req
                .app_data::<actix_web::web::Data<JwtConfig>>()
                .ok_or_else(|| actix_web::error::ErrorInternalServerError("JWT config not configured"))?;

            let header = req
                .headers()
                .get("Authorization")
                .and_then(|h| h.to_str().ok())
                .ok_or_else(|| actix_web::error::ErrorUnauthorized("missing Authorization header"))?;

            let token = header
                .strip_prefix("Bearer ")
                .ok_or_else(|| actix_web::error::ErrorUnauthorized("malformed Authorization header"))?;

            AuthContext::decode(token, config.get_ref())
                .map_err(|e| actix_web::error::ErrorUnauthorized(e.to_string()))
        })();

        ready(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jsonwebtoken::{encode, EncodingKey, Header};

    fn config() -> JwtConfig {
        JwtConfig {
            secret: "test-secret".to_string(),
            algorithm: "HS256".to_string(),
            audience: "marketplace-clients".to_string(),
        }
    }

    #[test]
    fn decodes_valid_token() {
        let cfg = config();
        let claims = serde_json::json!({
            "sub": "42",
            "email": "jane@example.com",
            "name": "Jane Doe",
            "is_admin": false,
            "aud": "marketplace-clients",
            "exp": 9_999_999_999i64,
        });
        let token = encode(
            &Header::new(Algorithm::HS256),
            &claims,
            &EncodingKey::from_secret(cfg.secret.as_bytes()),
        )
        .unwrap();

        let ctx = AuthContext::decode(&token, &cfg).unwrap();
        assert_eq!(ctx.user_id, 42);
        assert!(!ctx.is_admin);
    }

    #[test]
    fn rejects_wrong_audience() {
        let cfg = config();
        let claims = serde_json::json!({
            "sub": "42",
            "email": "jane@example.com",
            "aud": "some-other-service",
            "exp": 9_999_999_999i64,
        });
        let token = encode(
            &Header::new(Algorithm::HS256),
            &claims,
            &EncodingKey::from_secret(cfg.secret.as_bytes()),
        )
        .unwrap();

        assert!(AuthContext::decode(&token, &cfg).is_err());
    }

    #[test]
    fn falls_back_to_nameid_when_sub_absent() {
        let cfg = config();
        let claims = serde_json::json!({
            "nameid": "42",
            "email": "jane@example.com",
            "aud": "marketplace-clients",
            "exp": 9_999_999_999i64,
        });
        let token = encode(
            &Header::new(Algorithm::HS256),
            &claims,
            &EncodingKey::from_secret(cfg.secret.as_bytes()),
        )
        .unwrap();

        let ctx = AuthContext::decode(&token, &cfg).unwrap();
        assert_eq!(ctx.user_id, 42);
    }

    #[test]
    fn rejects_non_numeric_subject() {
        let cfg = config();
        let claims = serde_json::json!({
            "sub": "not-a-number",
            "email": "jane@example.com",
            "aud": "marketplace-clients",
            "exp": 9_999_999_999i64,
        });
        let token = encode(
            &Header::new(Algorithm::HS256),
            &claims,
            &EncodingKey::from_secret(cfg.secret.as_bytes()),
        )
        .unwrap();

        assert!(AuthContext::decode(&token, &cfg).is_err());
    }
}
