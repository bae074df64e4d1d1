use base64::Engine as _;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::ChatError;
use crate::router::InboundRequest;

/// Identity of the caller, derived from claims verified upstream.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthContext {
    pub user_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default)]
    pub claims: Map<String, Value>,
}

impl AuthContext {
    pub fn from_claims(claims: Map<String, Value>) -> Option<Self> {
        let user_id = ["sub", "cognito:username", "username"]
            .iter()
            .find_map(|key| claims.get(*key).and_then(Value::as_str))
            .filter(|id| !id.is_empty())?
            .to_string();
        let email = claims
            .get("email")
            .and_then(Value::as_str)
            .map(str::to_string);
        Some(Self {
            user_id,
            email,
            claims,
        })
    }
}

/// Produces the caller's identity for a request.
pub trait AuthExtractor: Send + Sync {
    fn extract(&self, request: &InboundRequest) -> Result<AuthContext, ChatError>;
}

/// Reads claims forwarded by the authorizer.
///
/// Bearer token payloads are only consulted when enabled with
/// [`ClaimsAuthExtractor::trusting_bearer_payload`]. Their signatures are not checked, so that
/// mode is only sound behind a gateway that has already verified the token.
#[derive(Debug, Default, Clone)]
pub struct ClaimsAuthExtractor {
    trust_bearer_payload: bool,
}

impl ClaimsAuthExtractor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Falls back to the payload of an unverified bearer token when no claims were forwarded.
    pub fn trusting_bearer_payload() -> Self {
        Self {
            trust_bearer_payload: true,
        }
    }

    fn bearer_claims(request: &InboundRequest) -> Option<Map<String, Value>> {
        let header = request.header("authorization")?;
        let token = header
            .strip_prefix("Bearer ")
            .or_else(|| header.strip_prefix("bearer "))?
            .trim();
        let payload = token.split('.').nth(1)?;
        let bytes = URL_SAFE_NO_PAD
            .decode(payload.trim_end_matches('='))
            .ok()?;
        match serde_json::from_slice(&bytes).ok()? {
            Value::Object(map) => Some(map),
            _ => None,
        }
    }
}

impl AuthExtractor for ClaimsAuthExtractor {
    fn extract(&self, request: &InboundRequest) -> Result<AuthContext, ChatError> {
        request
            .claims
            .clone()
            .filter(|claims| !claims.is_empty())
            .or_else(|| {
                self.trust_bearer_payload
                    .then(|| Self::bearer_claims(request))
                    .flatten()
            })
            .and_then(AuthContext::from_claims)
            .ok_or_else(|| ChatError::Unauthorized("Unauthorized".to_string()))
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;

    /// Builds an unsigned JWT carrying `claims`.
    pub fn fake_jwt(claims: Value) -> String {
        let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"none","typ":"JWT"}"#);
        let payload = URL_SAFE_NO_PAD.encode(claims.to_string());
        format!("{header}.{payload}.")
    }

    /// Extractor that accepts every request as the same user.
    pub struct StaticAuth(pub AuthContext);

    impl AuthExtractor for StaticAuth {
        fn extract(&self, _request: &InboundRequest) -> Result<AuthContext, ChatError> {
            Ok(self.0.clone())
        }
    }

    pub fn user(id: &str) -> AuthContext {
        AuthContext {
            user_id: id.to_string(),
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::fake_jwt;
    use super::*;
    use serde_json::json;

    #[test]
    fn authorizer_claims_take_precedence() {
        let claims = json!({"sub": "from-authorizer", "email": "a@example.com"});
        let request = InboundRequest::new("POST", "/chat/v1/stream")
            .with_claims(claims.as_object().unwrap().clone())
            .with_header(
                "Authorization",
                format!("Bearer {}", fake_jwt(json!({"sub": "from-token"}))),
            );

        let auth = ClaimsAuthExtractor::trusting_bearer_payload()
            .extract(&request)
            .unwrap();
        assert_eq!(auth.user_id, "from-authorizer");
        assert_eq!(auth.email.as_deref(), Some("a@example.com"));
    }

    #[test]
    fn bearer_token_payload_is_used_when_trusted() {
        let request = InboundRequest::new("POST", "/chat/v1/stream").with_header(
            "authorization",
            format!("Bearer {}", fake_jwt(json!({"cognito:username": "u-7"}))),
        );
        let auth = ClaimsAuthExtractor::trusting_bearer_payload()
            .extract(&request)
            .unwrap();
        assert_eq!(auth.user_id, "u-7");
        assert_eq!(auth.email, None);
    }

    #[test]
    fn unverified_bearer_is_ignored_by_default() {
        let forged = InboundRequest::new("POST", "/chat/v1/stream").with_header(
            "Authorization",
            format!("Bearer {}forged", fake_jwt(json!({"sub": "admin-user"}))),
        );
        assert!(matches!(
            ClaimsAuthExtractor::new().extract(&forged),
            Err(ChatError::Unauthorized(_))
        ));
    }

    #[test]
    fn missing_identity_is_unauthorized() {
        let bare = InboundRequest::new("POST", "/chat/v1/stream");
        let extractor = ClaimsAuthExtractor::trusting_bearer_payload();
        assert!(matches!(
            extractor.extract(&bare),
            Err(ChatError::Unauthorized(_))
        ));

        let garbage = bare.clone().with_header("Authorization", "Bearer not-a-jwt");
        assert!(extractor.extract(&garbage).is_err());

        let no_subject = bare.with_header(
            "Authorization",
            format!("Bearer {}", fake_jwt(json!({"email": "x@example.com"}))),
        );
        assert!(extractor.extract(&no_subject).is_err());
    }
}
