use thiserror::Error;

/// Failures of the model query step. None of them is retried.
#[derive(Error, Debug)]
pub enum LlmError {
    /// Transport failure: connection refused, DNS, TLS, timeout, broken stream.
    #[error("request to model server failed: {0}")]
    Network(String),

    /// The server answered with a non-success HTTP status.
    #[error("model server returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    /// The server reported an error inside an otherwise successful response.
    #[error("model server error: {0}")]
    Api(String),

    /// The response body was not the JSON we expected.
    #[error("could not decode model response: {0}")]
    Decode(String),

    /// Unknown provider or missing credentials.
    #[error("invalid model configuration: {0}")]
    Config(String),

    /// The model produced no text.
    #[error("model returned an empty response")]
    Empty,
}

impl From<reqwest::Error> for LlmError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            LlmError::Decode(err.to_string())
        } else {
            LlmError::Network(err.to_string())
        }
    }
}

impl From<serde_json::Error> for LlmError {
    fn from(err: serde_json::Error) -> Self {
        LlmError::Decode(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_display() {
        let err = LlmError::Status {
            status: 404,
            body: "model 'x' not found".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "model server returned HTTP 404: model 'x' not found"
        );
    }

    #[test]
    fn test_json_error_maps_to_decode() {
        let err: LlmError = serde_json::from_str::<serde_json::Value>("{").unwrap_err().into();
        assert!(matches!(err, LlmError::Decode(_)));
    }
}
