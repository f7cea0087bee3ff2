//! The rolling `kid`-keyed verification window: signs with the single
//! active key, verifies against every key still inside the grace window.

use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation};
use quiz_models::JwtKey;

use crate::claims::AccessClaims;
use crate::key_crypto::MasterKey;
use crate::AuthError;

pub struct KeyRing {
    master_key: MasterKey,
}

impl KeyRing {
    pub fn new(master_key: MasterKey) -> Self {
        Self { master_key }
    }

    fn decrypt_secret(&self, key: &JwtKey) -> Result<Vec<u8>, AuthError> {
        Ok(self
            .master_key
            .decrypt(&key.encrypted_secret, &key.nonce)
            .map_err(|err| AuthError::Crypto(anyhow::Error::new(err)))?)
    }

    /// Mints a fresh HS256-signed JWT under the given active key, with
    /// `kid` in the header so verification knows which key to try first.
    pub fn sign(&self, active_key: &JwtKey, claims: &AccessClaims) -> Result<String, AuthError> {
        let secret = self.decrypt_secret(active_key)?;
        let mut header = Header::new(Algorithm::HS256);
        header.kid = Some(active_key.kid.clone());
        jsonwebtoken::encode(&header, claims, &EncodingKey::from_secret(&secret))
            .map_err(|_| AuthError::InvalidToken)
    }

    /// Verifies `token` against whichever of `window_keys` matches its
    /// `kid` header. A token whose `kid` names a key outside the window
    /// (expired past the grace period, already pruned) is rejected the
    /// same as a bad signature — the caller cannot distinguish "unknown
    /// key" from "forged token", which is the point.
    pub fn verify(
        &self,
        token: &str,
        window_keys: &[JwtKey],
    ) -> Result<AccessClaims, AuthError> {
        let header = jsonwebtoken::decode_header(token).map_err(|_| AuthError::InvalidToken)?;
        let kid = header.kid.ok_or(AuthError::InvalidToken)?;

        let key = window_keys
            .iter()
            .find(|k| k.kid == kid)
            .ok_or(AuthError::InvalidToken)?;

        let secret = self.decrypt_secret(key)?;
        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_exp = true;
        validation.required_spec_claims.clear();

        let data = jsonwebtoken::decode::<AccessClaims>(
            token,
            &DecodingKey::from_secret(&secret),
            &validation,
        )
        .map_err(|err| match err.kind() {
            jsonwebtoken::errors::ErrorKind::ExpiredSignature => AuthError::TokenExpired,
            _ => AuthError::InvalidToken,
        })?;

        Ok(data.claims)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_key(kid: &str, master: &MasterKey, active: bool) -> JwtKey {
        let (encrypted_secret, nonce) = master.encrypt(b"hmac-secret-material").unwrap();
        JwtKey {
            kid: kid.to_string(),
            encrypted_secret,
            nonce,
            algorithm: "HS256".to_string(),
            is_active: active,
            expires_at: chrono::Utc::now() + chrono::Duration::days(30),
            rotated_at: None,
        }
    }

    #[test]
    fn signs_and_verifies_round_trip() {
        let master = MasterKey::from_bytes(&[9u8; 32]).unwrap();
        let key = test_key("kid-1", &master, true);
        let ring = KeyRing::new(MasterKey::from_bytes(&[9u8; 32]).unwrap());

        let claims = AccessClaims::new(
            quiz_models::Id::generate(),
            quiz_models::Id::generate(),
            "csrf-hash".to_string(),
            chrono::Utc::now(),
            chrono::Duration::minutes(15),
        );
        let token = ring.sign(&key, &claims).unwrap();
        let verified = ring.verify(&token, &[key]).unwrap();
        assert_eq!(verified.sub, claims.sub);
        let _ = master;
    }

    #[test]
    fn rejects_token_whose_kid_left_the_window() {
        let master = MasterKey::from_bytes(&[3u8; 32]).unwrap();
        let signing_key = test_key("kid-old", &master, false);
        let ring = KeyRing::new(MasterKey::from_bytes(&[3u8; 32]).unwrap());

        let claims = AccessClaims::new(
            quiz_models::Id::generate(),
            quiz_models::Id::generate(),
            "csrf-hash".to_string(),
            chrono::Utc::now(),
            chrono::Duration::minutes(15),
        );
        let token = ring.sign(&signing_key, &claims).unwrap();

        assert!(matches!(
            ring.verify(&token, &[]),
            Err(AuthError::InvalidToken)
        ));
    }

    #[test]
    fn rejects_expired_token() {
        let master = MasterKey::from_bytes(&[5u8; 32]).unwrap();
        let key = test_key("kid-1", &master, true);
        let ring = KeyRing::new(MasterKey::from_bytes(&[5u8; 32]).unwrap());

        let claims = AccessClaims::new(
            quiz_models::Id::generate(),
            quiz_models::Id::generate(),
            "csrf-hash".to_string(),
            chrono::Utc::now() - chrono::Duration::hours(1),
            chrono::Duration::minutes(15),
        );
        let token = ring.sign(&key, &claims).unwrap();
        assert!(matches!(
            ring.verify(&token, &[key]),
            Err(AuthError::TokenExpired)
        ));
    }
}
