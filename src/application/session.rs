use crate::domain::models::Credential;
use crate::infrastructure::credential_store::CredentialStore;
use crate::infrastructure::error::InfraError;
use crate::infrastructure::http_client::{ApiRequest, ApiResponse, ApiTransport, RequestAuth};
use chrono::{DateTime, Duration, Utc};
use futures::future::{BoxFuture, FutureExt, Shared};
use std::sync::{Arc, Mutex};

const REFRESH_SEGMENTS: [&str; 2] = ["users", "token-refresh"];
const DEFAULT_ACCESS_TOKEN_TTL_SECONDS: i64 = 300;

pub type NowProvider = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

type RefreshOutcome = Result<Credential, Arc<InfraError>>;
type InFlightRefresh = Shared<BoxFuture<'static, RefreshOutcome>>;

/// Which stored secret a request should carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthScheme {
    /// Session access token.
    Session,
    /// Personal token if one is stored, otherwise the session access token.
    WorkToken,
}

/// Explicit session context: the only owner of the credential store for authenticated calls.
///
/// Every authenticated request goes through [`SessionClient::execute`], which retries at most
/// once after an authentication failure. Concurrent failures share one refresh call.
pub struct SessionClient<S, T>
where
    S: CredentialStore,
    T: ApiTransport,
{
    store: Arc<S>,
    transport: Arc<T>,
    in_flight: Mutex<Option<InFlightRefresh>>,
    access_token_ttl_seconds: i64,
    now_provider: NowProvider,
}

impl<S, T> SessionClient<S, T>
where
    S: CredentialStore + 'static,
    T: ApiTransport + 'static,
{
    pub fn new(store: Arc<S>, transport: Arc<T>) -> Self {
        Self {
            store,
            transport,
            in_flight: Mutex::new(None),
            access_token_ttl_seconds: DEFAULT_ACCESS_TOKEN_TTL_SECONDS,
            now_provider: Arc::new(Utc::now),
        }
    }

    pub fn with_now_provider(mut self, now_provider: NowProvider) -> Self {
        self.now_provider = now_provider;
        self
    }

    pub fn with_access_token_ttl(mut self, seconds: i64) -> Self {
        self.access_token_ttl_seconds = seconds.max(1);
        self
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// Sends a request that needs no credential.
    pub async fn execute_public(&self, request: ApiRequest) -> Result<ApiResponse, InfraError> {
        self.transport.send(request.with_auth(RequestAuth::None)).await
    }

    pub async fn execute(
        &self,
        request: ApiRequest,
        scheme: AuthScheme,
    ) -> Result<ApiResponse, InfraError> {
        // a rejected personal token is not recoverable by refreshing the session
        if let Some(personal_token) = self.personal_token_for(scheme)? {
            return self
                .transport
                .send(request.with_auth(RequestAuth::WorkToken(personal_token)))
                .await;
        }

        let mut credential = self.store.read()?;
        let expired_locally = credential.as_ref().is_some_and(|current| {
            !current.is_valid_at((self.now_provider)(), 0) && current.refresh_token.is_some()
        });
        if expired_locally {
            tracing::debug!("stored access token expired locally; refreshing before request");
            credential = match self.refresh_shared().await {
                Ok(refreshed) => Some(refreshed),
                Err(error) => {
                    return Err(InfraError::LogoutRequired(format!(
                        "session refresh failed: {error}"
                    )));
                }
            };
        }

        let credential = credential.ok_or(InfraError::NotAuthenticated)?;
        let used_access_token = credential.access_token.clone();
        let response = self
            .transport
            .send(request.clone().with_auth(session_auth(scheme, &credential)))
            .await?;
        if !response.is_auth_failure() {
            return Ok(response);
        }

        tracing::info!(
            path = %request.path(),
            status = response.status,
            "authenticated request rejected; recovering session"
        );

        let current = self.store.read()?;
        let fresh = match current {
            Some(current) if current.access_token != used_access_token => current,
            _ => match self.refresh_shared().await {
                Ok(refreshed) => refreshed,
                Err(error) => {
                    tracing::warn!(
                        path = %request.path(),
                        status = response.status,
                        "session refresh failed: {error}"
                    );
                    return Err(InfraError::LogoutRequired(format!(
                        "{} returned http {}; session refresh failed: {error}",
                        request.path(),
                        response.status
                    )));
                }
            },
        };

        self.transport
            .send(request.with_auth(session_auth(scheme, &fresh)))
            .await
    }

    pub async fn refresh(&self) -> Result<Credential, InfraError> {
        self.refresh_shared().await.map_err(|error| {
            InfraError::LogoutRequired(format!("session refresh failed: {error}"))
        })
    }

    /// Clears every stored credential.
    pub fn logout(&self) -> Result<(), InfraError> {
        self.store.clear()
    }

    /// Builds a credential from a login or refresh response.
    ///
    /// Accepts the token either as Set-Cookie headers or as a JSON body.
    pub fn credential_from_response(
        &self,
        response: &ApiResponse,
        fallback_refresh_token: Option<String>,
    ) -> Option<Credential> {
        credential_from_response(
            response,
            fallback_refresh_token,
            (self.now_provider)(),
            self.access_token_ttl_seconds,
        )
    }

    fn personal_token_for(&self, scheme: AuthScheme) -> Result<Option<String>, InfraError> {
        match scheme {
            AuthScheme::WorkToken => self.store.read_personal_token(),
            AuthScheme::Session => Ok(None),
        }
    }

    async fn refresh_shared(&self) -> RefreshOutcome {
        let refresh = {
            let mut in_flight = self.in_flight.lock().map_err(|error| {
                Arc::new(InfraError::Credential(format!("refresh lock poisoned: {error}")))
            })?;
            match in_flight.as_ref() {
                Some(existing) => existing.clone(),
                None => {
                    let created = run_refresh(
                        Arc::clone(&self.store),
                        Arc::clone(&self.transport),
                        Arc::clone(&self.now_provider),
                        self.access_token_ttl_seconds,
                    )
                    .map(|outcome| outcome.map_err(Arc::new))
                    .boxed()
                    .shared();
                    *in_flight = Some(created.clone());
                    created
                }
            }
        };

        let outcome = refresh.clone().await;

        if let Ok(mut in_flight) = self.in_flight.lock() {
            if in_flight
                .as_ref()
                .is_some_and(|current| current.ptr_eq(&refresh))
            {
                *in_flight = None;
            }
        }
        outcome
    }
}

fn session_auth(scheme: AuthScheme, credential: &Credential) -> RequestAuth {
    match scheme {
        AuthScheme::Session => RequestAuth::AccessCookie(credential.access_token.clone()),
        AuthScheme::WorkToken => RequestAuth::WorkToken(credential.access_token.clone()),
    }
}

async fn run_refresh<S, T>(
    store: Arc<S>,
    transport: Arc<T>,
    now_provider: NowProvider,
    access_token_ttl_seconds: i64,
) -> Result<Credential, InfraError>
where
    S: CredentialStore,
    T: ApiTransport,
{
    let stored = store.read()?;
    let Some(refresh_token) = stored.as_ref().and_then(|value| value.refresh_token.clone()) else {
        store.clear()?;
        return Err(InfraError::AuthExpired("no refresh token stored".to_string()));
    };

    let request = ApiRequest::post(&REFRESH_SEGMENTS).with_auth(RequestAuth::RefreshCookie(refresh_token.clone()));
    let response = match transport.send(request).await {
        Ok(response) => response,
        Err(error) => {
            store.clear()?;
            return Err(error);
        }
    };
    if !response.is_success() {
        store.clear()?;
        return Err(InfraError::AuthExpired(format!(
            "token refresh rejected with http {}",
            response.status
        )));
    }

    let Some(credential) = credential_from_response(
        &response,
        Some(refresh_token),
        now_provider(),
        access_token_ttl_seconds,
    ) else {
        store.clear()?;
        return Err(InfraError::AuthExpired(
            "token refresh response carried no access token".to_string(),
        ));
    };

    store.write_credential(&credential)?;
    tracing::info!(expires_at = %credential.expires_at, "session refreshed");
    Ok(credential)
}

#[derive(Debug, serde::Deserialize)]
struct TokenPayload {
    access_token: Option<String>,
    expires_in: Option<i64>,
    refresh_token: Option<String>,
}

fn credential_from_response(
    response: &ApiResponse,
    fallback_refresh_token: Option<String>,
    now: DateTime<Utc>,
    access_token_ttl_seconds: i64,
) -> Option<Credential> {
    if let Some(cookie) = response.cookie("access_token") {
        let ttl = cookie.max_age.unwrap_or(access_token_ttl_seconds).max(0);
        let refresh_token = response
            .cookie("refresh_token")
            .map(|cookie| cookie.value.clone())
            .or(fallback_refresh_token);
        return Some(Credential {
            access_token: cookie.value.clone(),
            expires_at: now + Duration::seconds(ttl),
            refresh_token,
        });
    }

    let payload = serde_json::from_str::<TokenPayload>(&response.body).ok()?;
    let access_token = payload
        .access_token
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())?;
    let ttl = payload.expires_in.unwrap_or(access_token_ttl_seconds).max(0);
    Some(Credential {
        access_token,
        expires_at: now + Duration::seconds(ttl),
        refresh_token: payload.refresh_token.or(fallback_refresh_token),
    })
}
