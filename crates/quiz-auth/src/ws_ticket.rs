//! Short-lived, single-audience WS tickets (§4.8). The socket endpoint
//! accepts only these, never the long-lived access token, so a URL query
//! string or access log leak can't be replayed against anything else.

use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation};
use quiz_models::Id;

use crate::AuthError;

pub const WS_TICKET_AUDIENCE: &str = "websocket";

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct WsTicketClaims {
    pub sub: Id,
    pub email: String,
    pub aud: String,
    pub exp: i64,
}

/// WS tickets are signed with their own short-lived secret derived from
/// the active JWT signing key's material rather than re-using access-token
/// claims verification, so a compromised ticket can't be replayed as an
/// access token and vice versa (they don't even share a claims shape).
pub fn issue(
    user_id: Id,
    email: &str,
    ttl: chrono::Duration,
    secret: &[u8],
) -> Result<String, AuthError> {
    let claims = WsTicketClaims {
        sub: user_id,
        email: email.to_string(),
        aud: WS_TICKET_AUDIENCE.to_string(),
        exp: (chrono::Utc::now() + ttl).timestamp(),
    };
    jsonwebtoken::encode(
        &Header::new(Algorithm::HS256),
        &claims,
        &EncodingKey::from_secret(secret),
    )
    .map_err(|_| AuthError::InvalidToken)
}

pub fn verify(ticket: &str, secret: &[u8]) -> Result<WsTicketClaims, AuthError> {
    let mut validation = Validation::new(Algorithm::HS256);
    validation.set_audience(&[WS_TICKET_AUDIENCE]);
    validation.required_spec_claims.clear();
    validation.required_spec_claims.insert("exp".to_string());
    validation.required_spec_claims.insert("aud".to_string());

    let data = jsonwebtoken::decode::<WsTicketClaims>(
        ticket,
        &DecodingKey::from_secret(secret),
        &validation,
    )
    .map_err(|err| match err.kind() {
        jsonwebtoken::errors::ErrorKind::ExpiredSignature => AuthError::TokenExpired,
        _ => AuthError::InvalidToken,
    })?;
    Ok(data.claims)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn issues_and_verifies_round_trip() {
        let secret = b"ws-ticket-secret-material";
        let ticket = issue(Id::generate(), "a@b.com", chrono::Duration::seconds(60), secret).unwrap();
        let claims = verify(&ticket, secret).unwrap();
        assert_eq!(claims.email, "a@b.com");
        assert_eq!(claims.aud, WS_TICKET_AUDIENCE);
    }

    #[test]
    fn rejects_expired_ticket() {
        let secret = b"ws-ticket-secret-material";
        let ticket = issue(
            Id::generate(),
            "a@b.com",
            chrono::Duration::seconds(-1),
            secret,
        )
        .unwrap();
        assert!(matches!(verify(&ticket, secret), Err(AuthError::TokenExpired)));
    }

    #[test]
    fn rejects_wrong_secret() {
        let ticket = issue(Id::generate(), "a@b.com", chrono::Duration::seconds(60), b"secret-a").unwrap();
        assert!(matches!(verify(&ticket, b"secret-b"), Err(AuthError::InvalidToken)));
    }
}
