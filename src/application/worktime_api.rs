use crate::application::session::{AuthScheme, SessionClient};
use crate::domain::models::{
    Credential, EmployeeCreate, EmployeeCreated, EmployeeOverview, EmployeeProfile,
    EmployeeWorkDetail, LoginRequest, RegisterRequest, ReportPeriod,
};
use crate::infrastructure::credential_store::CredentialStore;
use crate::infrastructure::error::InfraError;
use crate::infrastructure::http_client::{ApiRequest, ApiTransport};
use async_trait::async_trait;
use std::sync::Arc;

/// Remote work session operations the timer waits on before it transitions.
#[async_trait]
pub trait WorkSessionGateway: Send + Sync {
    async fn start_work(&self) -> Result<(), InfraError>;
    async fn end_work(&self) -> Result<(), InfraError>;
}

pub struct WorktimeService<S, T>
where
    S: CredentialStore,
    T: ApiTransport,
{
    session: Arc<SessionClient<S, T>>,
}

impl<S, T> Clone for WorktimeService<S, T>
where
    S: CredentialStore,
    T: ApiTransport,
{
    fn clone(&self) -> Self {
        Self {
            session: Arc::clone(&self.session),
        }
    }
}

impl<S, T> WorktimeService<S, T>
where
    S: CredentialStore + 'static,
    T: ApiTransport + 'static,
{
    pub fn new(session: Arc<SessionClient<S, T>>) -> Self {
        Self { session }
    }

    pub fn session(&self) -> &Arc<SessionClient<S, T>> {
        &self.session
    }

    pub async fn login(&self, request: LoginRequest) -> Result<Credential, InfraError> {
        request.validate().map_err(InfraError::Validation)?;
        let body = serde_json::json!({
            "email": request.email.trim(),
            "password": request.password,
        });
        let response = self
            .session
            .execute_public(ApiRequest::post(&["users", "login"]).with_json(body))
            .await?
            .ensure_success()?;

        let credential = self
            .session
            .credential_from_response(&response, None)
            .ok_or_else(|| InfraError::Api {
                status: response.status,
                message: "login response carried no access token".to_string(),
            })?;
        self.session.store().write_credential(&credential)?;
        tracing::info!(email = %request.email.trim(), "logged in");
        Ok(credential)
    }

    pub async fn register(&self, request: RegisterRequest) -> Result<(), InfraError> {
        request.validate().map_err(InfraError::Validation)?;
        let body = serde_json::json!({
            "first_name": request.first_name.trim(),
            "last_name": request.last_name.trim(),
            "email": request.email.trim(),
            "password1": request.password1,
            "password2": request.password2,
        });
        self.session
            .execute_public(ApiRequest::post(&["users", "register"]).with_json(body))
            .await?
            .ensure_success()?;
        tracing::info!(email = %request.email.trim(), "registered account");
        Ok(())
    }

    pub fn logout(&self) -> Result<(), InfraError> {
        self.session.logout()?;
        tracing::info!("logged out; stored credentials cleared");
        Ok(())
    }

    pub fn set_personal_token(&self, token: &str) -> Result<(), InfraError> {
        let token = token.trim();
        if token.is_empty() {
            return Err(InfraError::Validation(
                "personal token must not be empty".to_string(),
            ));
        }
        self.session.store().write_personal_token(token)
    }

    pub async fn employee_by_token(&self, token: &str) -> Result<EmployeeProfile, InfraError> {
        let token = token.trim();
        if token.is_empty() {
            return Err(InfraError::Validation(
                "personal token must not be empty".to_string(),
            ));
        }
        self.session
            .execute(
                ApiRequest::get(&["employees", "by-token", token]),
                AuthScheme::Session,
            )
            .await?
            .ensure_success()?
            .json()
    }

    /// Profile of whoever the stored personal token belongs to.
    pub async fn current_employee(&self) -> Result<EmployeeProfile, InfraError> {
        let token = self
            .session
            .store()
            .read_personal_token()?
            .ok_or_else(|| {
                InfraError::Validation(
                    "no personal token stored; run `worktime personal-token <token>`".to_string(),
                )
            })?;
        self.employee_by_token(&token).await
    }

    pub async fn list_employees(&self) -> Result<Vec<EmployeeOverview>, InfraError> {
        self.session
            .execute(ApiRequest::get(&["employees"]), AuthScheme::Session)
            .await?
            .ensure_success()?
            .json()
    }

    /// Creates an employee; the response carries the employee's personal token.
    pub async fn create_employee(
        &self,
        request: EmployeeCreate,
    ) -> Result<EmployeeCreated, InfraError> {
        request.validate().map_err(InfraError::Validation)?;
        let body = serde_json::json!({
            "full_name": request.full_name.trim(),
            "email": request.email.trim(),
            "phone_number": request.phone_number,
            "workplace_id": request.workplace_id,
        });
        let created: EmployeeCreated = self
            .session
            .execute(ApiRequest::post(&["employees"]).with_json(body), AuthScheme::Session)
            .await?
            .ensure_success()?
            .json()?;
        tracing::info!(
            full_name = %request.full_name.trim(),
            workplace_id = request.workplace_id,
            "employee created"
        );
        Ok(created)
    }

    pub async fn employee_work(
        &self,
        employee_id: i64,
        period: ReportPeriod,
    ) -> Result<EmployeeWorkDetail, InfraError> {
        let id = employee_id.to_string();
        let (key, value) = period.query_pair();
        self.session
            .execute(
                ApiRequest::get(&["employees", id.as_str()]).with_query(key, value),
                AuthScheme::Session,
            )
            .await?
            .ensure_success()?
            .json()
    }

    async fn post_work(&self, action: &str) -> Result<(), InfraError> {
        self.session
            .execute(
                ApiRequest::post(&["employees", "work", action]),
                AuthScheme::WorkToken,
            )
            .await?
            .ensure_success()?;
        Ok(())
    }
}

#[async_trait]
impl<S, T> WorkSessionGateway for WorktimeService<S, T>
where
    S: CredentialStore + 'static,
    T: ApiTransport + 'static,
{
    async fn start_work(&self) -> Result<(), InfraError> {
        self.post_work("start").await
    }

    async fn end_work(&self) -> Result<(), InfraError> {
        self.post_work("end").await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::session::tests::{
        FakeTransport, network_failure, refreshed_response, status_response, stored_credential,
    };
    use crate::infrastructure::credential_store::InMemoryCredentialStore;
    use crate::infrastructure::http_client::{ApiResponse, RequestAuth, SetCookie};
    use chrono::NaiveDate;
    use std::sync::atomic::Ordering;

    fn service_with(
        credential: Option<Credential>,
        transport: FakeTransport,
    ) -> (
        WorktimeService<InMemoryCredentialStore, FakeTransport>,
        Arc<InMemoryCredentialStore>,
        Arc<FakeTransport>,
    ) {
        let store = Arc::new(InMemoryCredentialStore::default());
        if let Some(credential) = credential {
            store.write_credential(&credential).expect("seed credential");
        }
        let transport = Arc::new(transport);
        let session = SessionClient::new(Arc::clone(&store), Arc::clone(&transport));
        (WorktimeService::new(Arc::new(session)), store, transport)
    }

    #[tokio::test]
    async fn login_stores_cookie_credential() {
        let transport = FakeTransport::default();
        transport.push(
            "/users/login",
            ApiResponse {
                status: 200,
                body: r#"{"msg": "success"}"#.to_string(),
                cookies: vec![
                    SetCookie {
                        name: "access_token".to_string(),
                        value: "access-1".to_string(),
                        max_age: Some(900),
                    },
                    SetCookie {
                        name: "refresh_token".to_string(),
                        value: "refresh-1".to_string(),
                        max_age: None,
                    },
                ],
            },
        );
        let (service, store, transport) = service_with(None, transport);

        let credential = service
            .login(LoginRequest {
                email: " worker@example.com ".to_string(),
                password: "correct-horse".to_string(),
            })
            .await
            .expect("login");

        assert_eq!(credential.access_token, "access-1");
        assert_eq!(credential.refresh_token.as_deref(), Some("refresh-1"));
        assert_eq!(store.read().expect("read"), Some(credential));
        let sent = transport.last_request("/users/login").expect("login request");
        assert_eq!(sent.auth, RequestAuth::None);
        assert_eq!(
            sent.body.as_ref().and_then(|body| body.get("email")).and_then(|value| value.as_str()),
            Some("worker@example.com")
        );
    }

    #[tokio::test]
    async fn login_rejects_invalid_input_without_network_call() {
        let (service, _store, transport) = service_with(None, FakeTransport::default());
        let result = service
            .login(LoginRequest {
                email: "not-an-email".to_string(),
                password: "correct-horse".to_string(),
            })
            .await;
        assert!(matches!(result, Err(InfraError::Validation(_))));
        assert_eq!(transport.calls_to("/users/login"), 0);
    }

    #[tokio::test]
    async fn register_reports_server_validation_detail() {
        let transport = FakeTransport::default();
        transport.push(
            "/users/register",
            status_response(409, r#"{"detail": "User already exists"}"#),
        );
        let (service, _store, _transport) = service_with(None, transport);

        let result = service
            .register(RegisterRequest {
                first_name: "Olena".to_string(),
                last_name: "Shevchenko".to_string(),
                email: "olena@example.com".to_string(),
                password1: "long-enough".to_string(),
                password2: "long-enough".to_string(),
            })
            .await;

        match result {
            Err(InfraError::Validation(message)) => assert_eq!(message, "User already exists"),
            other => panic!("expected validation error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn register_checks_password_confirmation_locally() {
        let (service, _store, transport) = service_with(None, FakeTransport::default());
        let result = service
            .register(RegisterRequest {
                first_name: "Olena".to_string(),
                last_name: "Shevchenko".to_string(),
                email: "olena@example.com".to_string(),
                password1: "long-enough".to_string(),
                password2: "different-one".to_string(),
            })
            .await;
        match result {
            Err(InfraError::Validation(message)) => assert_eq!(message, "passwords do not match"),
            other => panic!("expected validation error, got {other:?}"),
        }
        assert_eq!(transport.calls_to("/users/register"), 0);
    }

    #[tokio::test]
    async fn dashboard_fetch_recovers_from_expired_token() {
        let transport = FakeTransport::default();
        transport.reject_token("expired");
        transport.push("/users/token-refresh", refreshed_response("fresh"));
        transport.push(
            "/employees",
            status_response(
                200,
                r#"[{"id": 3, "full_name": "Ivan Petrenko", "timeToday": {"hours": 2, "minutes": 15}}]"#,
            ),
        );
        let (service, _store, transport) = service_with(Some(stored_credential("expired")), transport);

        let employees = service.list_employees().await.expect("list employees");

        assert_eq!(employees.len(), 1);
        assert_eq!(employees[0].full_name, "Ivan Petrenko");
        assert_eq!(employees[0].time_today.total_minutes(), 135);
        assert!(employees[0].is_active);
        assert_eq!(transport.refresh_calls.load(Ordering::SeqCst), 1);
        assert_eq!(transport.calls_to("/employees"), 2);
    }

    #[tokio::test]
    async fn employee_work_sends_period_query() {
        let transport = FakeTransport::default();
        transport.push(
            "/employees/12",
            status_response(
                200,
                r#"{
                    "employee": {"id": 12, "full_name": "Mariia Bondar"},
                    "days": [{"date": "2026-03-02", "seconds": 28800}],
                    "total_seconds": 28800
                }"#,
            ),
        );
        let (service, _store, transport) = service_with(Some(stored_credential("access")), transport);
        let anchor = NaiveDate::from_ymd_opt(2026, 3, 4).expect("date");

        let detail = service
            .employee_work(12, ReportPeriod::Week(anchor))
            .await
            .expect("employee work");

        assert_eq!(detail.employee.full_name, "Mariia Bondar");
        assert_eq!(detail.days.len(), 1);
        let sent = transport.last_request("/employees/12").expect("request");
        assert_eq!(sent.query, vec![("week".to_string(), "2026-03-04".to_string())]);
        assert_eq!(sent.auth, RequestAuth::AccessCookie("access".to_string()));
    }

    #[tokio::test]
    async fn work_gateway_uses_token_header_and_reports_failures() {
        let transport = FakeTransport::default();
        transport.push("/employees/work/end", network_failure());
        let (service, store, transport) = service_with(Some(stored_credential("access")), transport);
        store.write_personal_token("personal-7").expect("personal token");

        service.start_work().await.expect("start work");
        assert_eq!(
            transport.last_request("/employees/work/start").map(|request| request.auth),
            Some(RequestAuth::WorkToken("personal-7".to_string()))
        );

        let result = service.end_work().await;
        assert!(matches!(result, Err(ref error) if error.is_transport()));
    }

    fn new_employee(phone_number: &str) -> EmployeeCreate {
        EmployeeCreate {
            full_name: "Taras Melnyk".to_string(),
            email: "taras@example.com".to_string(),
            phone_number: phone_number.to_string(),
            workplace_id: 4,
        }
    }

    #[tokio::test]
    async fn create_employee_posts_with_session_and_returns_personal_token() {
        let transport = FakeTransport::default();
        transport.push(
            "/employees",
            status_response(200, r#"{"msg": "success", "personal_token": "emp-token-9"}"#),
        );
        let (service, store, transport) = service_with(Some(stored_credential("access")), transport);
        store.write_personal_token("existing").expect("personal token");

        let created = service
            .create_employee(new_employee("+380501112233"))
            .await
            .expect("create employee");

        assert_eq!(created.personal_token, "emp-token-9");
        let sent = transport.last_request("/employees").expect("request");
        assert_eq!(sent.auth, RequestAuth::AccessCookie("access".to_string()));
        let body = sent.body.expect("json body");
        assert_eq!(body["phone_number"], "+380501112233");
        assert_eq!(body["workplace_id"], 4);
        assert_eq!(store.read_personal_token().expect("read").as_deref(), Some("existing"));
    }

    #[tokio::test]
    async fn create_employee_rejects_bad_phone_without_network_call() {
        let (service, _store, transport) =
            service_with(Some(stored_credential("access")), FakeTransport::default());

        let result = service.create_employee(new_employee("0501112233")).await;

        match result {
            Err(InfraError::Validation(message)) => assert!(message.contains("+380XXXXXXXXX")),
            other => panic!("expected validation error, got {other:?}"),
        }
        assert_eq!(transport.calls_to("/employees"), 0);
    }

    #[tokio::test]
    async fn logout_clears_credentials_and_personal_token() {
        let (service, store, _transport) =
            service_with(Some(stored_credential("access")), FakeTransport::default());
        service.set_personal_token("personal").expect("personal token");

        service.logout().expect("logout");

        assert!(store.read().expect("read").is_none());
        assert!(store.read_personal_token().expect("read").is_none());
        assert!(matches!(
            service.list_employees().await,
            Err(InfraError::NotAuthenticated)
        ));
    }

    #[test]
    fn empty_personal_token_is_rejected() {
        let (service, _store, _transport) = service_with(None, FakeTransport::default());
        assert!(matches!(
            service.set_personal_token("   "),
            Err(InfraError::Validation(_))
        ));
    }
}
