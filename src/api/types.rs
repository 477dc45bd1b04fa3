use serde::{Deserialize, Serialize};

use crate::{SecretString, SessionError};

/// JSON body of a session failure response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
}

impl From<&SessionError> for ErrorResponse {
    fn from(err: &SessionError) -> Self {
        ErrorResponse {
            error: err.to_string(),
            code: err.code().to_owned(),
        }
    }
}

/// Response extension carrying a store failure from the completion phase.
///
/// The response itself is still delivered; an outer layer can look for this
/// extension to report the failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionCommitError(pub SessionError);

/// Request extension providing a signing secret when none is configured.
///
/// Set by a layer that runs before the session middleware.
#[derive(Debug, Clone)]
pub struct UpstreamSecret(pub SecretString);

/// Request extension marking the connection itself as TLS.
///
/// Servers that terminate TLS in-process insert it per connection so that
/// `secure` cookies are issued without trusting forwarding headers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct EncryptedConnection;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::StoreError;

    #[test]
    fn test_error_response_from_session_error() {
        let response = ErrorResponse::from(&SessionError::MissingSecret);
        assert_eq!(response.error, "secret option required for sessions");
        assert_eq!(response.code, "SESSION_SECRET_MISSING");

        let response = ErrorResponse::from(&SessionError::Store(StoreError::Backend("down".to_owned())));
        assert_eq!(response.code, "SESSION_STORE");
        assert_eq!(
            serde_json::to_value(&response).unwrap(),
            serde_json::json!({"error": "store backend error: down", "code": "SESSION_STORE"})
        );
    }
}
