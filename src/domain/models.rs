use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TimerStatus {
    Idle,
    Running,
}

impl TimerStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Running => "running",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TimerState {
    pub status: TimerStatus,
    pub accumulated_seconds: u64,
    pub session_start: Option<DateTime<Utc>>,
    pub current_session_seconds: u64,
}

impl Default for TimerState {
    fn default() -> Self {
        Self {
            status: TimerStatus::Idle,
            accumulated_seconds: 0,
            session_start: None,
            current_session_seconds: 0,
        }
    }
}

impl TimerState {
    pub fn validate(&self) -> Result<(), String> {
        let running = self.status == TimerStatus::Running;
        if self.session_start.is_some() != running {
            return Err("timer.session_start must be set iff timer is running".to_string());
        }
        if !running && self.current_session_seconds != 0 {
            return Err("timer.current_session_seconds must be 0 while idle".to_string());
        }
        Ok(())
    }

    /// Seconds elapsed since `session_start`, clamped at zero for clocks that moved back.
    pub fn elapsed_at(&self, now: DateTime<Utc>) -> u64 {
        self.session_start
            .map(|start| (now - start).num_seconds().max(0) as u64)
            .unwrap_or(0)
    }
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct TimerSnapshot {
    pub status: TimerStatus,
    pub accumulated_seconds: u64,
    pub current_session_seconds: u64,
    pub total_seconds: u64,
    pub session_start: Option<DateTime<Utc>>,
}

impl TimerSnapshot {
    pub fn from_state(state: &TimerState) -> Self {
        Self {
            status: state.status,
            accumulated_seconds: state.accumulated_seconds,
            current_session_seconds: state.current_session_seconds,
            total_seconds: state
                .accumulated_seconds
                .saturating_add(state.current_session_seconds),
            session_start: state.session_start,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CompletedSession {
    pub id: String,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    pub duration_seconds: u64,
    pub description: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Credential {
    pub access_token: String,
    pub expires_at: DateTime<Utc>,
    pub refresh_token: Option<String>,
}

impl Credential {
    pub fn is_valid_at(&self, now: DateTime<Utc>, leeway_seconds: i64) -> bool {
        self.expires_at > now + chrono::Duration::seconds(leeway_seconds)
            && !self.access_token.trim().is_empty()
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct TimeLog {
    pub hours: u64,
    pub minutes: u64,
}

impl TimeLog {
    pub fn from_seconds(seconds: u64) -> Self {
        let minutes = seconds / 60;
        Self {
            hours: minutes / 60,
            minutes: minutes % 60,
        }
    }

    pub fn total_minutes(&self) -> u64 {
        self.hours * 60 + self.minutes
    }
}

impl std::fmt::Display for TimeLog {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(formatter, "{}h {:02}m", self.hours, self.minutes)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct EmployeeOverview {
    pub id: i64,
    pub full_name: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub phone_number: Option<String>,
    #[serde(default = "default_active")]
    pub is_active: bool,
    #[serde(default, alias = "timeToday")]
    pub time_today: TimeLog,
    #[serde(default, alias = "timeWeek")]
    pub time_week: TimeLog,
    #[serde(default, alias = "timeMonth")]
    pub time_month: TimeLog,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct EmployeeProfile {
    pub id: i64,
    pub full_name: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub workplace_id: Option<i64>,
    #[serde(default, alias = "timeToday")]
    pub time_today: TimeLog,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DailyWork {
    pub date: NaiveDate,
    pub seconds: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct EmployeeWorkDetail {
    pub employee: EmployeeProfile,
    #[serde(default)]
    pub days: Vec<DailyWork>,
    #[serde(default)]
    pub total_seconds: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportPeriod {
    Week(NaiveDate),
    Month(NaiveDate),
}

impl ReportPeriod {
    pub fn anchor(&self) -> NaiveDate {
        match self {
            Self::Week(date) | Self::Month(date) => *date,
        }
    }

    pub fn query_pair(&self) -> (&'static str, String) {
        match self {
            Self::Week(date) => ("week", date.format("%Y-%m-%d").to_string()),
            Self::Month(date) => ("month", date.format("%Y-%m-%d").to_string()),
        }
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ChartPoint {
    pub label: String,
    pub date: NaiveDate,
    pub hours: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

impl LoginRequest {
    pub fn validate(&self) -> Result<(), String> {
        validate_email(&self.email, "login.email")?;
        validate_password(&self.password, "login.password")?;
        if self.password.chars().count() > 70 {
            return Err("login.password must be at most 70 characters".to_string());
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RegisterRequest {
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub password1: String,
    pub password2: String,
}

impl RegisterRequest {
    pub fn validate(&self) -> Result<(), String> {
        validate_non_empty(&self.first_name, "register.first_name")?;
        validate_non_empty(&self.last_name, "register.last_name")?;
        validate_email(&self.email, "register.email")?;
        validate_password(&self.password1, "register.password1")?;
        if self.password1 != self.password2 {
            return Err("passwords do not match".to_string());
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct EmployeeCreate {
    pub full_name: String,
    pub email: String,
    pub phone_number: String,
    pub workplace_id: i64,
}

impl EmployeeCreate {
    pub fn validate(&self) -> Result<(), String> {
        validate_non_empty(&self.full_name, "employee.full_name")?;
        validate_email(&self.email, "employee.email")?;
        validate_phone(&self.phone_number, "employee.phone_number")?;
        if self.workplace_id <= 0 {
            return Err("employee.workplace_id must be positive".to_string());
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct EmployeeCreated {
    #[serde(default)]
    pub msg: Option<String>,
    pub personal_token: String,
}

fn default_active() -> bool {
    true
}

fn validate_non_empty(value: &str, field_name: &str) -> Result<(), String> {
    if value.trim().is_empty() {
        return Err(format!("{field_name} must not be empty"));
    }
    Ok(())
}

fn validate_email(value: &str, field_name: &str) -> Result<(), String> {
    let value = value.trim();
    let Some((local, domain)) = value.split_once('@') else {
        return Err(format!("{field_name} must be a valid email"));
    };
    if local.is_empty()
        || domain.starts_with('.')
        || domain.ends_with('.')
        || !domain.contains('.')
        || value.chars().any(char::is_whitespace)
    {
        return Err(format!("{field_name} must be a valid email"));
    }
    Ok(())
}

/// Ukrainian mobile format: `+380` followed by nine digits.
fn validate_phone(value: &str, field_name: &str) -> Result<(), String> {
    let valid = value
        .strip_prefix("+380")
        .is_some_and(|rest| rest.len() == 9 && rest.chars().all(|c| c.is_ascii_digit()));
    if !valid {
        return Err(format!("{field_name} must be in format +380XXXXXXXXX"));
    }
    Ok(())
}

fn validate_password(value: &str, field_name: &str) -> Result<(), String> {
    if value.chars().count() < 8 {
        return Err(format!("{field_name} must be at least 8 characters"));
    }
    Ok(())
}
