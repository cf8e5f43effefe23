use crate::application::bootstrap::{BootstrapResult, bootstrap_workspace};
use crate::application::reports::{ReportSummary, chart_series, summarize};
use crate::application::session::SessionClient;
use crate::application::work_timer::{Transition, WorkTimer, format_hms};
use crate::application::worktime_api::WorktimeService;
use crate::domain::models::{
    ChartPoint, CompletedSession, EmployeeCreate, EmployeeOverview, EmployeeProfile,
    LoginRequest, RegisterRequest, ReportPeriod, TimerSnapshot,
};
use crate::infrastructure::config::{AppSettings, CredentialBackend};
use crate::infrastructure::credential_store::{
    ConfiguredCredentialStore, CredentialStore, KeyringCredentialStore, SqliteCredentialStore,
};
use crate::infrastructure::error::InfraError;
use crate::infrastructure::http_client::ReqwestApiTransport;
use chrono::{NaiveDate, Utc};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;

pub type AppService = WorktimeService<ConfiguredCredentialStore, ReqwestApiTransport>;

pub struct AppState {
    config_dir: PathBuf,
    database_path: PathBuf,
    settings: AppSettings,
    service: AppService,
    timer: WorkTimer<AppService>,
}

impl AppState {
    pub fn new(workspace_root: PathBuf) -> Result<Self, InfraError> {
        let bootstrap = bootstrap_workspace(&workspace_root)?;
        Self::from_bootstrap(bootstrap)
    }

    pub fn from_bootstrap(bootstrap: BootstrapResult) -> Result<Self, InfraError> {
        let settings = bootstrap.settings;
        let store = match settings.credential_backend {
            CredentialBackend::Keyring => ConfiguredCredentialStore::Keyring(
                KeyringCredentialStore::new(settings.keyring_service.clone()),
            ),
            CredentialBackend::Sqlite => ConfiguredCredentialStore::Sqlite(
                SqliteCredentialStore::new(&bootstrap.database_path),
            ),
        };
        let transport =
            ReqwestApiTransport::new(settings.api_base_url.clone(), settings.request_timeout)?;
        let session = SessionClient::new(Arc::new(store), Arc::new(transport))
            .with_access_token_ttl(settings.access_token_ttl_seconds);
        let service = WorktimeService::new(Arc::new(session));
        let timer = WorkTimer::new(Arc::new(service.clone()));

        Ok(Self {
            config_dir: bootstrap.config_dir,
            database_path: bootstrap.database_path,
            settings,
            service,
            timer,
        })
    }

    pub fn config_dir(&self) -> &Path {
        &self.config_dir
    }

    pub fn database_path(&self) -> &Path {
        &self.database_path
    }

    pub fn settings(&self) -> &AppSettings {
        &self.settings
    }

    pub fn timer(&self) -> &WorkTimer<AppService> {
        &self.timer
    }

    pub fn command_error(&self, command: &str, error: &InfraError) -> String {
        self.log_error(command, &error.to_string());
        if error.requires_login() {
            format!("{error}\nrun `worktime login` to sign in again")
        } else {
            error.to_string()
        }
    }

    pub fn log_info(&self, command: &str, message: &str) {
        tracing::info!(command, "{message}");
    }

    pub fn log_error(&self, command: &str, message: &str) {
        tracing::error!(command, "{message}");
    }

    fn today(&self) -> NaiveDate {
        Utc::now().with_timezone(&self.settings.timezone).date_naive()
    }
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct TimerStateResponse {
    pub status: String,
    pub accumulated_seconds: u64,
    pub current_session_seconds: u64,
    pub total_seconds: u64,
    pub display: String,
    pub session_start: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct TrackActionResponse {
    /// False when the call was ignored (wrong state or a transition still pending).
    pub applied: bool,
    pub timer: TimerStateResponse,
    pub completed: Option<CompletedSession>,
}

#[derive(Debug, Clone, Serialize)]
pub struct LoginResponse {
    pub expires_at: String,
    pub has_refresh_token: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct SessionStatusResponse {
    pub api_base_url: String,
    pub authenticated: bool,
    pub expires_at: Option<String>,
    pub has_personal_token: bool,
    pub timer: TimerStateResponse,
}

#[derive(Debug, Clone, Serialize)]
pub struct CreateEmployeeResponse {
    pub personal_token: String,
    /// True when the token replaced the stored personal token.
    pub stored: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct EmployeeReportResponse {
    pub employee: EmployeeProfile,
    pub period: String,
    pub anchor: NaiveDate,
    pub series: Vec<ChartPoint>,
    pub summary: ReportSummary,
}

pub async fn login_impl(
    state: &AppState,
    email: String,
    password: String,
) -> Result<LoginResponse, InfraError> {
    let credential = state.service.login(LoginRequest { email, password }).await?;
    state.log_info("login", "stored new session credential");
    Ok(LoginResponse {
        expires_at: credential.expires_at.to_rfc3339(),
        has_refresh_token: credential.refresh_token.is_some(),
    })
}

pub async fn register_impl(state: &AppState, request: RegisterRequest) -> Result<(), InfraError> {
    state.service.register(request).await?;
    state.log_info("register", "account created");
    Ok(())
}

pub fn logout_impl(state: &AppState) -> Result<(), InfraError> {
    state.service.logout()?;
    state.log_info("logout", "credentials cleared");
    Ok(())
}

pub fn set_personal_token_impl(state: &AppState, token: String) -> Result<(), InfraError> {
    state.service.set_personal_token(&token)?;
    state.log_info("personal_token", "personal token stored");
    Ok(())
}

pub async fn whoami_impl(state: &AppState) -> Result<EmployeeProfile, InfraError> {
    state.service.current_employee().await
}

pub async fn list_employees_impl(state: &AppState) -> Result<Vec<EmployeeOverview>, InfraError> {
    let employees = state.service.list_employees().await?;
    state.log_info("employees", &format!("fetched {} employees", employees.len()));
    Ok(employees)
}

pub async fn create_employee_impl(
    state: &AppState,
    request: EmployeeCreate,
    store_token: bool,
) -> Result<CreateEmployeeResponse, InfraError> {
    let created = state.service.create_employee(request).await?;
    if store_token {
        state.service.set_personal_token(&created.personal_token)?;
    }
    state.log_info("employees_add", "employee created");
    Ok(CreateEmployeeResponse {
        personal_token: created.personal_token,
        stored: store_token,
    })
}

pub async fn employee_report_impl(
    state: &AppState,
    employee_id: i64,
    week: Option<String>,
    month: Option<String>,
) -> Result<EmployeeReportResponse, InfraError> {
    let period = resolve_report_period(week.as_deref(), month.as_deref(), state.today())?;
    let detail = state.service.employee_work(employee_id, period).await?;
    let series = chart_series(&detail, period);
    let summary = summarize(&series);
    let (period_name, _) = period.query_pair();

    Ok(EmployeeReportResponse {
        employee: detail.employee,
        period: period_name.to_string(),
        anchor: period.anchor(),
        series,
        summary,
    })
}

pub async fn start_work_impl(state: &AppState) -> Result<TrackActionResponse, InfraError> {
    let transition = state.timer.start().await?;
    if matches!(transition, Transition::Started(_)) {
        state.log_info("start_work", "work session started");
    }
    track_response(state, transition)
}

pub async fn stop_work_impl(state: &AppState) -> Result<TrackActionResponse, InfraError> {
    let transition = state.timer.stop().await?;
    if let Transition::Stopped(session) = &transition {
        state.log_info(
            "stop_work",
            &format!("work session stopped after {}s", session.duration_seconds),
        );
    }
    track_response(state, transition)
}

pub fn timer_state_impl(state: &AppState) -> Result<TimerStateResponse, InfraError> {
    Ok(to_timer_state_response(&state.timer.snapshot()?))
}

pub fn work_history_impl(state: &AppState) -> Vec<CompletedSession> {
    state.timer.history()
}

pub fn set_work_description_impl(state: &AppState, description: String) {
    state.timer.set_description(&description);
}

/// Seeds the timer with today's confirmed time for the personal token owner.
pub async fn sync_timer_baseline_impl(state: &AppState) -> Result<TimerStateResponse, InfraError> {
    let profile = state.service.current_employee().await?;
    let seconds = profile.time_today.total_minutes() * 60;
    if state.timer.hydrate(seconds)? {
        state.log_info("track", &format!("timer baseline set to {seconds}s"));
    }
    timer_state_impl(state)
}

pub fn session_status_impl(state: &AppState) -> Result<SessionStatusResponse, InfraError> {
    let store = state.service.session().store();
    let credential = store.read()?;
    Ok(SessionStatusResponse {
        api_base_url: state.settings.api_base_url.to_string(),
        authenticated: credential.is_some(),
        expires_at: credential.map(|value| value.expires_at.to_rfc3339()),
        has_personal_token: store.read_personal_token()?.is_some(),
        timer: timer_state_impl(state)?,
    })
}

fn track_response(
    state: &AppState,
    transition: Transition,
) -> Result<TrackActionResponse, InfraError> {
    let timer = timer_state_impl(state)?;
    Ok(match transition {
        Transition::Started(_) => TrackActionResponse {
            applied: true,
            timer,
            completed: None,
        },
        Transition::Stopped(session) => TrackActionResponse {
            applied: true,
            timer,
            completed: Some(session),
        },
        Transition::Ignored => TrackActionResponse {
            applied: false,
            timer,
            completed: None,
        },
    })
}

fn to_timer_state_response(snapshot: &TimerSnapshot) -> TimerStateResponse {
    TimerStateResponse {
        status: snapshot.status.as_str().to_string(),
        accumulated_seconds: snapshot.accumulated_seconds,
        current_session_seconds: snapshot.current_session_seconds,
        total_seconds: snapshot.total_seconds,
        display: format_hms(snapshot.total_seconds),
        session_start: snapshot.session_start.map(|value| value.to_rfc3339()),
    }
}

fn resolve_report_period(
    week: Option<&str>,
    month: Option<&str>,
    today: NaiveDate,
) -> Result<ReportPeriod, InfraError> {
    match (normalized(week), normalized(month)) {
        (Some(_), Some(_)) => Err(InfraError::Validation(
            "choose either week or month, not both".to_string(),
        )),
        (Some(week), None) => Ok(ReportPeriod::Week(parse_date_input(week, "week")?)),
        (None, Some(month)) => Ok(ReportPeriod::Month(parse_date_input(month, "month")?)),
        (None, None) => Ok(ReportPeriod::Week(today)),
    }
}

fn normalized(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|value| !value.is_empty())
}

fn parse_date_input(value: &str, field_name: &str) -> Result<NaiveDate, InfraError> {
    NaiveDate::parse_from_str(value, "%Y-%m-%d").map_err(|error| {
        InfraError::Validation(format!("{field_name} must be YYYY-MM-DD: {error}"))
    })
}
