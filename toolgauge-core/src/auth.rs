//! Authorization-code-with-PKCE negotiation against MCP authorization servers.
//!
//! The flow tolerates servers that do not separate resource and authorization
//! roles: protected-resource metadata discovery is optional, authorization
//! server metadata discovery and the token exchange are not. State handed to
//! the caller is opaque and serializable so the flow can resume in a different
//! process instance after the external redirect.

use std::fmt;
use std::time::Duration;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use url::Url;

/// Errors emitted by the authorization flow.
#[derive(Debug)]
pub enum AuthError {
    /// Authorization-server metadata discovery failed; the attempt is over.
    DiscoveryFailed(String),
    /// Dynamic client registration failed; the attempt is over.
    RegistrationFailed(String),
    /// The code-for-token exchange failed; the attempt is over.
    TokenExchangeFailed(String),
    /// The opaque resume state could not be decoded.
    InvalidState(String),
    /// A URL in the flow could not be parsed.
    InvalidUrl(String),
}

impl fmt::Display for AuthError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AuthError::DiscoveryFailed(message) => {
                write!(f, "authorization server discovery failed: {message}")
            }
            AuthError::RegistrationFailed(message) => {
                write!(f, "client registration failed: {message}")
            }
            AuthError::TokenExchangeFailed(message) => {
                write!(f, "token exchange failed: {message}")
            }
            AuthError::InvalidState(message) => write!(f, "invalid resume state: {message}"),
            AuthError::InvalidUrl(message) => write!(f, "invalid URL: {message}"),
        }
    }
}

impl std::error::Error for AuthError {}

/// Protected-resource metadata, when the server publishes it.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ResourceMetadata {
    /// Canonical resource identifier to send with the token exchange.
    #[serde(default)]
    pub resource: Option<String>,
    /// Authorization servers that protect the resource.
    #[serde(default)]
    pub authorization_servers: Vec<String>,
}

/// Authorization-server metadata from the well-known endpoint.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AuthorizationServerMetadata {
    #[serde(default)]
    pub issuer: Option<String>,
    pub authorization_endpoint: String,
    pub token_endpoint: String,
    #[serde(default)]
    pub registration_endpoint: Option<String>,
}

/// Credentials returned by dynamic client registration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ClientRegistration {
    pub client_id: String,
    #[serde(default)]
    pub client_secret: Option<String>,
}

/// Everything the token exchange needs, serialized opaquely across the
/// redirect round-trip. Consumed exactly once by [`AuthFlow::exchange`].
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AuthorizationSession {
    pub registration: ClientRegistration,
    pub code_verifier: String,
    pub authorization_metadata: AuthorizationServerMetadata,
    #[serde(default)]
    pub resource_metadata: Option<ResourceMetadata>,
}

/// Token material for the remainder of one evaluation session.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TokenSet {
    pub access_token: String,
    pub token_type: String,
    #[serde(default)]
    pub scope: Option<String>,
}

/// Authorization progress, exposing only the capabilities valid per variant.
#[derive(Clone, Debug)]
pub enum AuthContext {
    /// No authorization attempted or required.
    Unauthenticated,
    /// Waiting for the external redirect to return an authorization code.
    Authenticating(AuthorizationSession),
    /// Token exchange completed.
    Authenticated(TokenSet),
}

impl AuthContext {
    /// Returns the token when authenticated.
    pub fn token(&self) -> Option<&TokenSet> {
        match self {
            AuthContext::Authenticated(tokens) => Some(tokens),
            _ => None,
        }
    }

    /// Takes the in-flight session, leaving the context unauthenticated.
    pub fn take_session(&mut self) -> Option<AuthorizationSession> {
        match std::mem::replace(self, AuthContext::Unauthenticated) {
            AuthContext::Authenticating(session) => Some(session),
            other => {
                *self = other;
                None
            }
        }
    }
}

/// Payload round-tripped through the opaque `state` parameter.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct ResumeState {
    /// The server under evaluation, so resumption needs no other context.
    pub server_url: String,
    /// RFC 3339 timestamp of when the flow started.
    pub issued_at: String,
}

/// Encodes resume state as URL-safe base64 JSON.
pub fn encode_state(state: &ResumeState) -> String {
    let payload = serde_json::to_vec(state).unwrap_or_default();
    URL_SAFE_NO_PAD.encode(payload)
}

/// Decodes resume state, rejecting anything that does not round-trip.
pub fn decode_state(raw: &str) -> Result<ResumeState, AuthError> {
    let bytes = URL_SAFE_NO_PAD
        .decode(raw)
        .map_err(|error| AuthError::InvalidState(error.to_string()))?;
    serde_json::from_slice(&bytes).map_err(|error| AuthError::InvalidState(error.to_string()))
}

/// A prepared authorization hand-off: the URL to present and the session to
/// keep for the exchange.
#[derive(Clone, Debug)]
pub struct PendingAuthorization {
    pub authorize_url: String,
    pub state: String,
    pub session: AuthorizationSession,
}

/// Configuration for the authorization flow.
#[derive(Clone, Debug)]
pub struct AuthFlowConfig {
    /// Redirect URL registered with the authorization server.
    pub redirect_url: String,
    /// Descriptive client name sent during registration.
    pub client_name: String,
    /// Timeout in seconds for discovery, registration, and exchange calls.
    pub timeout_secs: u64,
}

impl Default for AuthFlowConfig {
    fn default() -> Self {
        Self {
            redirect_url: "http://localhost:8765/callback".to_string(),
            client_name: "toolgauge".to_string(),
            timeout_secs: 30,
        }
    }
}

/// Drives the authorization-code-with-PKCE grant.
pub struct AuthFlow {
    http: reqwest::Client,
    config: AuthFlowConfig,
}

impl AuthFlow {
    /// Creates a flow with its own HTTP client.
    pub fn new(config: AuthFlowConfig) -> Result<Self, AuthError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs.max(1)))
            .build()
            .map_err(|error| AuthError::DiscoveryFailed(error.to_string()))?;
        Ok(Self { http, config })
    }

    /// Runs discovery and registration, returning the authorization URL and
    /// the session state the caller must hold across the redirect.
    pub async fn begin(&self, server_url: &str) -> Result<PendingAuthorization, AuthError> {
        let server =
            Url::parse(server_url).map_err(|error| AuthError::InvalidUrl(error.to_string()))?;

        let resource_metadata = self.discover_resource_metadata(&server).await;
        let authorization_base = resource_metadata
            .as_ref()
            .and_then(|metadata| metadata.authorization_servers.first().cloned())
            .unwrap_or_else(|| server.origin().ascii_serialization());

        let authorization_metadata = self
            .discover_authorization_metadata(&authorization_base)
            .await?;
        let registration = self.register_client(&authorization_metadata).await?;

        let code_verifier = generate_code_verifier();
        let state = encode_state(&ResumeState {
            server_url: server_url.to_string(),
            issued_at: chrono::Utc::now().to_rfc3339(),
        });

        let mut authorize_url = Url::parse(&authorization_metadata.authorization_endpoint)
            .map_err(|error| AuthError::InvalidUrl(error.to_string()))?;
        authorize_url
            .query_pairs_mut()
            .append_pair("response_type", "code")
            .append_pair("client_id", &registration.client_id)
            .append_pair("redirect_uri", &self.config.redirect_url)
            .append_pair("state", &state)
            .append_pair("code_challenge", &code_challenge(&code_verifier))
            .append_pair("code_challenge_method", "S256");

        Ok(PendingAuthorization {
            authorize_url: authorize_url.to_string(),
            state,
            session: AuthorizationSession {
                registration,
                code_verifier,
                authorization_metadata,
                resource_metadata,
            },
        })
    }

    /// Exchanges the authorization code for a token, consuming the session.
    ///
    /// The `resource` parameter is included only when protected-resource
    /// metadata was available during discovery.
    pub async fn exchange(
        &self,
        session: AuthorizationSession,
        code: &str,
    ) -> Result<TokenSet, AuthError> {
        let mut form: Vec<(&str, &str)> = vec![
            ("grant_type", "authorization_code"),
            ("code", code),
            ("redirect_uri", &self.config.redirect_url),
            ("client_id", &session.registration.client_id),
            ("code_verifier", &session.code_verifier),
        ];
        if let Some(secret) = &session.registration.client_secret {
            form.push(("client_secret", secret));
        }
        if let Some(resource) = session
            .resource_metadata
            .as_ref()
            .and_then(|metadata| metadata.resource.as_deref())
        {
            form.push(("resource", resource));
        }

        let response = self
            .http
            .post(&session.authorization_metadata.token_endpoint)
            .form(&form)
            .send()
            .await
            .map_err(|error| AuthError::TokenExchangeFailed(error.to_string()))?;
        let response = response
            .error_for_status()
            .map_err(|error| AuthError::TokenExchangeFailed(error.to_string()))?;
        response
            .json::<TokenSet>()
            .await
            .map_err(|error| AuthError::TokenExchangeFailed(error.to_string()))
    }

    async fn discover_resource_metadata(&self, server: &Url) -> Option<ResourceMetadata> {
        let url = match well_known_url(server, "oauth-protected-resource") {
            Ok(url) => url,
            Err(error) => {
                log::warn!("protected-resource metadata skipped: {error}");
                return None;
            }
        };
        match self.fetch_json::<ResourceMetadata>(url.clone()).await {
            Ok(metadata) => Some(metadata),
            Err(message) => {
                log::warn!(
                    "protected-resource metadata unavailable at {url}, \
                     treating the target as its own authorization server: {message}"
                );
                None
            }
        }
    }

    async fn discover_authorization_metadata(
        &self,
        authorization_base: &str,
    ) -> Result<AuthorizationServerMetadata, AuthError> {
        let base = Url::parse(authorization_base)
            .map_err(|error| AuthError::DiscoveryFailed(error.to_string()))?;
        let url = well_known_url(&base, "oauth-authorization-server")
            .map_err(|error| AuthError::DiscoveryFailed(error.to_string()))?;
        self.fetch_json::<AuthorizationServerMetadata>(url)
            .await
            .map_err(AuthError::DiscoveryFailed)
    }

    async fn register_client(
        &self,
        metadata: &AuthorizationServerMetadata,
    ) -> Result<ClientRegistration, AuthError> {
        let endpoint = metadata.registration_endpoint.as_deref().ok_or_else(|| {
            AuthError::RegistrationFailed(
                "server does not advertise dynamic client registration".to_string(),
            )
        })?;
        let body = serde_json::json!({
            "client_name": self.config.client_name,
            "redirect_uris": [self.config.redirect_url],
            "grant_types": ["authorization_code"],
            "response_types": ["code"],
            "token_endpoint_auth_method": "none",
        });
        let response = self
            .http
            .post(endpoint)
            .json(&body)
            .send()
            .await
            .map_err(|error| AuthError::RegistrationFailed(error.to_string()))?;
        let response = response
            .error_for_status()
            .map_err(|error| AuthError::RegistrationFailed(error.to_string()))?;
        response
            .json::<ClientRegistration>()
            .await
            .map_err(|error| AuthError::RegistrationFailed(error.to_string()))
    }

    async fn fetch_json<T: serde::de::DeserializeOwned>(&self, url: Url) -> Result<T, String> {
        let response = self
            .http
            .get(url)
            .send()
            .await
            .map_err(|error| error.to_string())?;
        let response = response
            .error_for_status()
            .map_err(|error| error.to_string())?;
        response.json::<T>().await.map_err(|error| error.to_string())
    }
}

fn well_known_url(base: &Url, suffix: &str) -> Result<Url, String> {
    let mut url = base.clone();
    if url.cannot_be_a_base() {
        return Err(format!("{base} cannot carry a well-known path"));
    }
    url.set_path(&format!("/.well-known/{suffix}"));
    url.set_query(None);
    url.set_fragment(None);
    Ok(url)
}

fn generate_code_verifier() -> String {
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

fn code_challenge(verifier: &str) -> String {
    URL_SAFE_NO_PAD.encode(Sha256::digest(verifier.as_bytes()))
}
