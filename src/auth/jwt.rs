use anyhow::Result;
use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::AppConfig;

#[derive(Clone)]
pub struct JwtService {
    encoding: EncodingKey,
    decoding: DecodingKey,
    issuer: String,
    audience: String,
    expiry: Duration,
}

impl JwtService {
    pub fn from_config(config: &AppConfig) -> Result<Self> {
        Ok(Self::new(
            &config.jwt_secret,
            &config.jwt_issuer,
            &config.jwt_audience,
            config.jwt_expiry_minutes,
        ))
    }

    pub fn new(secret: &str, issuer: &str, audience: &str, expiry_minutes: i64) -> Self {
        Self {
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
            issuer: issuer.to_owned(),
            audience: audience.to_owned(),
            expiry: Duration::minutes(expiry_minutes),
        }
    }

    pub fn generate_token(&self, user_id: Uuid, username: &str, is_staff: bool) -> Result<String> {
        let now = Utc::now();
        let exp = now + self.expiry;
        let claims = Claims {
            sub: user_id,
            username: username.to_owned(),
            is_staff,
            iss: self.issuer.clone(),
            aud: self.audience.clone(),
            iat: now.timestamp() as usize,
            exp: exp.timestamp() as usize,
        };

        Ok(encode(&Header::default(), &claims, &self.encoding)?)
    }

    pub fn verify_token(&self, token: &str) -> Result<Claims> {
        let mut validation = Validation::default();
        validation.set_audience(&[self.audience.clone()]);
        validation.set_issuer(&[self.issuer.clone()]);
        let data = decode::<Claims>(token, &self.decoding, &validation)?;
        Ok(data.claims)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: Uuid,
    pub username: String,
    #[serde(default)]
    pub is_staff: bool,
    pub iss: String,
    pub aud: String,
    pub iat: usize,
    pub exp: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn issued_tokens_verify() {
        let jwt = JwtService::new("secret", "ecombot", "ecombot-clients", 5);
        let user_id = Uuid::new_v4();
        let token = jwt.generate_token(user_id, "shopper", true).unwrap();

        let claims = jwt.verify_token(&token).unwrap();
        assert_eq!(claims.sub, user_id);
        assert_eq!(claims.username, "shopper");
        assert!(claims.is_staff);
    }

    #[test]
    fn tokens_for_another_audience_are_rejected() {
        let issuer = JwtService::new("secret", "ecombot", "someone-else", 5);
        let verifier = JwtService::new("secret", "ecombot", "ecombot-clients", 5);
        let token = issuer.generate_token(Uuid::new_v4(), "shopper", false).unwrap();
        assert!(verifier.verify_token(&token).is_err());
    }

    #[test]
    fn tokens_signed_with_another_secret_are_rejected() {
        let issuer = JwtService::new("other", "ecombot", "ecombot-clients", 5);
        let verifier = JwtService::new("secret", "ecombot", "ecombot-clients", 5);
        let token = issuer.generate_token(Uuid::new_v4(), "shopper", false).unwrap();
        assert!(verifier.verify_token(&token).is_err());
    }
}
