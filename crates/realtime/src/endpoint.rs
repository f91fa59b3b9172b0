//! Backend endpoints and handshake requests.

use secrecy::{ExposeSecret, SecretString};
use tokio_tungstenite::tungstenite::{client::IntoClientRequest, handshake::client::Request};

use crate::transport::TransportError;

const OPENAI_URL: &str = "wss://api.openai.com/v1/realtime";
const AZURE_API_VERSION: &str = "2024-10-01-preview";
/// The GA model rejects the beta header.
const GA_MODEL: &str = "gpt-realtime";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Provider {
    OpenAi,
    /// `endpoint` is the resource host, with or without a scheme.
    Azure { endpoint: String },
    /// A fixed URL, used against local servers.
    Custom { url: String },
}

#[derive(Debug, Clone)]
pub struct Endpoint {
    pub provider: Provider,
    pub model: String,
    pub api_key: SecretString,
}

impl Endpoint {
    pub fn new(provider: Provider, model: impl Into<String>, api_key: SecretString) -> Self {
        Self {
            provider,
            model: model.into(),
            api_key,
        }
    }

    pub fn url(&self) -> String {
        match &self.provider {
            Provider::OpenAi => format!("{}?model={}", OPENAI_URL, self.model),
            Provider::Azure { endpoint } => {
                let host = endpoint
                    .trim_start_matches("https://")
                    .trim_start_matches("wss://")
                    .trim_end_matches('/');
                format!(
                    "wss://{}/openai/realtime?api-version={}&deployment={}",
                    host, AZURE_API_VERSION, self.model
                )
            }
            Provider::Custom { url } => url.clone(),
        }
    }

    /// Builds the handshake request with the provider's auth headers.
    pub fn request(&self) -> Result<Request, TransportError> {
        let mut request = self
            .url()
            .into_client_request()
            .map_err(|e| TransportError::Request(e.to_string()))?;
        let headers = request.headers_mut();
        match &self.provider {
            Provider::OpenAi | Provider::Custom { .. } => {
                let bearer = format!("Bearer {}", self.api_key.expose_secret());
                headers.insert(
                    "Authorization",
                    bearer
                        .parse()
                        .map_err(|_| TransportError::Header("Authorization".into()))?,
                );
                if self.model != GA_MODEL {
                    headers.insert(
                        "OpenAI-Beta",
                        "realtime=v1"
                            .parse()
                            .map_err(|_| TransportError::Header("OpenAI-Beta".into()))?,
                    );
                }
            }
            Provider::Azure { .. } => {
                headers.insert(
                    "api-key",
                    self.api_key
                        .expose_secret()
                        .parse()
                        .map_err(|_| TransportError::Header("api-key".into()))?,
                );
            }
        }
        Ok(request)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key() -> SecretString {
        SecretString::from("sk-test".to_string())
    }

    #[test]
    fn test_openai_url_and_headers() {
        let endpoint = Endpoint::new(Provider::OpenAi, "gpt-4o-realtime-preview", key());
        assert_eq!(
            endpoint.url(),
            "wss://api.openai.com/v1/realtime?model=gpt-4o-realtime-preview"
        );
        let request = endpoint.request().unwrap();
        assert_eq!(request.headers()["Authorization"], "Bearer sk-test");
        assert_eq!(request.headers()["OpenAI-Beta"], "realtime=v1");
    }

    #[test]
    fn test_ga_model_skips_beta_header() {
        let endpoint = Endpoint::new(Provider::OpenAi, "gpt-realtime", key());
        let request = endpoint.request().unwrap();
        assert!(request.headers().get("OpenAI-Beta").is_none());
    }

    #[test]
    fn test_azure_url_and_key_header() {
        let endpoint = Endpoint::new(
            Provider::Azure {
                endpoint: "https://my-res.openai.azure.com/".into(),
            },
            "my-deployment",
            key(),
        );
        assert_eq!(
            endpoint.url(),
            "wss://my-res.openai.azure.com/openai/realtime?api-version=2024-10-01-preview&deployment=my-deployment"
        );
        let request = endpoint.request().unwrap();
        assert_eq!(request.headers()["api-key"], "sk-test");
        assert!(request.headers().get("Authorization").is_none());
    }
}
