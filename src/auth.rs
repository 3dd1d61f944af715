use std::time::{Duration, SystemTime, SystemTimeError, UNIX_EPOCH};

use jsonwebtoken::{
    errors::Result as JwtResult, Algorithm, DecodingKey, EncodingKey, Header,
    Validation,
};

use crate::conf;

/// Identity handed to us by the sign-in provider. `sub` is the user id the
/// quota is keyed by.
#[derive(serde::Serialize, serde::Deserialize, Debug, PartialEq)]
pub struct Claims {
    pub sub: String,
    aud: String,
    iss: String,
    exp: u64,
}

impl Claims {
    pub fn new(
        sub: &str,
        ttl: Duration,
        jwt_conf: &conf::Jwt,
    ) -> Result<Self, SystemTimeError> {
        let now = SystemTime::now().duration_since(UNIX_EPOCH)?;
        let exp = now.saturating_add(ttl).as_secs();
        Ok(Self {
            sub: sub.to_string(),
            aud: jwt_conf.audience.clone(),
            iss: jwt_conf.issuer.clone(),
            exp,
        })
    }

    pub fn to_str(&self, jwt_conf: &conf::Jwt) -> JwtResult<String> {
        let key = EncodingKey::from_secret(jwt_conf.secret.as_bytes());
        jsonwebtoken::encode(&Header::new(Algorithm::HS256), self, &key)
    }

    /// Rejects tokens from another issuer or for another audience, and
    /// tokens whose `exp` has passed, with no leeway.
    pub fn from_str(str: &str, jwt_conf: &conf::Jwt) -> JwtResult<Self> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 0;
        validation.set_audience(&[&jwt_conf.audience]);
        validation.set_issuer(&[&jwt_conf.issuer]);
        let key = DecodingKey::from_secret(jwt_conf.secret.as_bytes());
        let data = jsonwebtoken::decode::<Self>(str, &key, &validation)?;
        Ok(data.claims)
    }
}
