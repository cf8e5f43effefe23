pub mod application;
pub mod domain;
pub mod infrastructure;

use application::bootstrap::{bootstrap_workspace, default_workspace_root};
use application::commands::{
    AppState, EmployeeReportResponse, TimerStateResponse, TrackActionResponse,
    create_employee_impl, employee_report_impl, list_employees_impl, login_impl, logout_impl,
    register_impl, session_status_impl, set_personal_token_impl, set_work_description_impl,
    start_work_impl, stop_work_impl, sync_timer_baseline_impl, timer_state_impl, whoami_impl,
    work_history_impl,
};
use application::work_timer::format_hms;
use clap::{Parser, Subcommand};
use domain::models::{EmployeeCreate, RegisterRequest, TimeLog, TimerStatus};
use infrastructure::logging::init_logging;
use std::io::Write;
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};

#[derive(Debug, Parser)]
#[command(name = "worktime")]
#[command(about = "Track employee work time against the worktime API")]
#[command(version)]
struct Cli {
    /// Directory holding config/, state/ and logs/ (defaults to $WORKTIME_HOME or ./.worktime)
    #[arg(short = 'w', long, global = true)]
    workspace: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Sign in and store the session credential
    Login {
        email: String,
        #[arg(long, env = "WORKTIME_PASSWORD", hide_env_values = true)]
        password: Option<String>,
    },
    /// Create a new account
    Register {
        first_name: String,
        last_name: String,
        email: String,
        #[arg(long, env = "WORKTIME_PASSWORD", hide_env_values = true)]
        password: Option<String>,
    },
    /// Forget every stored credential
    Logout,
    /// Store the personal token used to start and end work sessions
    PersonalToken { token: String },
    /// Show the employee owning the stored personal token
    Whoami,
    /// List employees with today/week/month totals, or add one
    Employees {
        #[command(subcommand)]
        action: Option<EmployeesAction>,
    },
    /// Per-day hours for one employee
    Report {
        employee_id: i64,
        /// Any date inside the week (YYYY-MM-DD)
        #[arg(long, conflicts_with = "month")]
        week: Option<String>,
        /// Any date inside the month (YYYY-MM-DD)
        #[arg(long)]
        month: Option<String>,
    },
    /// Interactive work timer: start, stop, status, history, quit
    Track {
        #[arg(short, long)]
        description: Option<String>,
    },
    /// Show credential and timer state
    Status,
}

#[derive(Debug, Subcommand)]
enum EmployeesAction {
    /// Create an employee and print their personal token
    Add {
        full_name: String,
        email: String,
        /// Phone number in +380XXXXXXXXX form
        phone_number: String,
        #[arg(long)]
        workplace_id: i64,
        /// Also keep the returned token as this machine's personal token
        #[arg(long)]
        store_token: bool,
    },
}

impl Command {
    fn name(&self) -> &'static str {
        match self {
            Self::Login { .. } => "login",
            Self::Register { .. } => "register",
            Self::Logout => "logout",
            Self::PersonalToken { .. } => "personal_token",
            Self::Whoami => "whoami",
            Self::Employees { action: None } => "employees",
            Self::Employees { action: Some(_) } => "employees_add",
            Self::Report { .. } => "report",
            Self::Track { .. } => "track",
            Self::Status => "status",
        }
    }
}

pub fn run() -> ExitCode {
    let cli = Cli::parse();
    let workspace_root = cli.workspace.clone().unwrap_or_else(default_workspace_root);

    let bootstrap = match bootstrap_workspace(&workspace_root) {
        Ok(bootstrap) => bootstrap,
        Err(error) => {
            eprintln!("error: {error}");
            return ExitCode::FAILURE;
        }
    };
    let _log_guard = match init_logging(&bootstrap.logs_dir) {
        Ok(guard) => Some(guard),
        Err(error) => {
            eprintln!("warning: {error}");
            None
        }
    };

    let runtime = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(error) => {
            eprintln!("error: failed to start runtime: {error}");
            return ExitCode::FAILURE;
        }
    };

    let outcome = runtime.block_on(async {
        let state = AppState::from_bootstrap(bootstrap).map_err(|error| error.to_string())?;
        let command_name = cli.command.name();
        dispatch(&state, cli.command)
            .await
            .map_err(|error| state.command_error(command_name, &error))
    });
    // stdin reads may still be parked on a blocking thread
    runtime.shutdown_timeout(Duration::from_millis(200));

    match outcome {
        Ok(()) => ExitCode::SUCCESS,
        Err(message) => {
            eprintln!("error: {message}");
            ExitCode::FAILURE
        }
    }
}

async fn dispatch(
    state: &AppState,
    command: Command,
) -> Result<(), infrastructure::error::InfraError> {
    match command {
        Command::Login { email, password } => {
            let password = match password {
                Some(password) => password,
                None => prompt_lines(&["password: "]).await?.remove(0),
            };
            let response = login_impl(state, email, password).await?;
            println!("signed in; session valid until {}", response.expires_at);
        }
        Command::Register {
            first_name,
            last_name,
            email,
            password,
        } => {
            let (password1, password2) = match password {
                Some(password) => (password.clone(), password),
                None => {
                    let mut answers = prompt_lines(&["password: ", "repeat password: "]).await?;
                    let repeated = answers.remove(1);
                    (answers.remove(0), repeated)
                }
            };
            register_impl(
                state,
                RegisterRequest {
                    first_name,
                    last_name,
                    email,
                    password1,
                    password2,
                },
            )
            .await?;
            println!("account created; run `worktime login` to sign in");
        }
        Command::Logout => {
            logout_impl(state)?;
            println!("signed out");
        }
        Command::PersonalToken { token } => {
            set_personal_token_impl(state, token)?;
            println!("personal token stored");
        }
        Command::Whoami => {
            let profile = whoami_impl(state).await?;
            println!("{} (#{})", profile.full_name, profile.id);
            if let Some(email) = profile.email {
                println!("email: {email}");
            }
            println!("today: {}", profile.time_today);
        }
        Command::Employees {
            action:
                Some(EmployeesAction::Add {
                    full_name,
                    email,
                    phone_number,
                    workplace_id,
                    store_token,
                }),
        } => {
            let created = create_employee_impl(
                state,
                EmployeeCreate {
                    full_name,
                    email,
                    phone_number,
                    workplace_id,
                },
                store_token,
            )
            .await?;
            println!("employee created; personal token: {}", created.personal_token);
            if created.stored {
                println!("personal token stored");
            }
        }
        Command::Employees { action: None } => {
            let employees = list_employees_impl(state).await?;
            if employees.is_empty() {
                println!("no employees");
            }
            for employee in employees {
                println!(
                    "{:>5}  {:<28} {:>9} {:>9} {:>9}{}",
                    employee.id,
                    employee.full_name,
                    employee.time_today.to_string(),
                    employee.time_week.to_string(),
                    employee.time_month.to_string(),
                    if employee.is_active { "" } else { "  (inactive)" }
                );
            }
        }
        Command::Report {
            employee_id,
            week,
            month,
        } => {
            let report = employee_report_impl(state, employee_id, week, month).await?;
            print_report(&report);
        }
        Command::Track { description } => track(state, description).await?,
        Command::Status => {
            let status = session_status_impl(state)?;
            println!("api: {}", status.api_base_url);
            match status.expires_at {
                Some(expires_at) => println!("signed in; access token expires {expires_at}"),
                None => println!("signed out"),
            }
            println!(
                "personal token: {}",
                if status.has_personal_token { "stored" } else { "missing" }
            );
            println!("timer: {}", timer_line(&status.timer));
        }
    }
    Ok(())
}

async fn track(
    state: &AppState,
    description: Option<String>,
) -> Result<(), infrastructure::error::InfraError> {
    if let Some(description) = description {
        set_work_description_impl(state, description);
    }
    match sync_timer_baseline_impl(state).await {
        Ok(timer) => println!("today so far: {}", timer.display),
        Err(error) => eprintln!("could not load today's time: {error}"),
    }
    println!("commands: start, stop, status, history, quit");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut snapshots = state.timer().subscribe();
    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line? else {
                    break;
                };
                match line.trim() {
                    "" => {}
                    "start" => report_action(start_work_impl(state).await, state, "start_work"),
                    "stop" => report_action(stop_work_impl(state).await, state, "stop_work"),
                    "status" => println!("{}", timer_line(&timer_state_impl(state)?)),
                    "history" => {
                        let history = work_history_impl(state);
                        if history.is_empty() {
                            println!("no completed sessions yet");
                        }
                        for session in history {
                            println!(
                                "{} - {}  {}  {}",
                                session.started_at.format("%H:%M:%S"),
                                session.ended_at.format("%H:%M:%S"),
                                format_hms(session.duration_seconds),
                                session.description
                            );
                        }
                    }
                    "quit" | "exit" => break,
                    other => println!("unknown command: {other}"),
                }
            }
            changed = snapshots.changed() => {
                if changed.is_err() {
                    break;
                }
                let snapshot = snapshots.borrow_and_update().clone();
                if snapshot.status == TimerStatus::Running {
                    print!("\r{}  ", format_hms(snapshot.total_seconds));
                    let _ = std::io::stdout().flush();
                }
            }
        }
    }

    if state.timer().snapshot()?.status == TimerStatus::Running {
        eprintln!("work session is still open on the server; run `track` and `stop` to close it");
    }
    Ok(())
}

fn report_action(
    result: Result<TrackActionResponse, infrastructure::error::InfraError>,
    state: &AppState,
    command: &str,
) {
    match result {
        Ok(response) if !response.applied => {
            println!("\rignored; timer is {}", response.timer.status);
        }
        Ok(response) => match response.completed {
            Some(session) => println!(
                "\rstopped after {}; total {}",
                format_hms(session.duration_seconds),
                response.timer.display
            ),
            None => println!("\rstarted; total {}", response.timer.display),
        },
        Err(error) => eprintln!("\r{}", state.command_error(command, &error)),
    }
}

fn timer_line(timer: &TimerStateResponse) -> String {
    match &timer.session_start {
        Some(start) => format!("{} {} (since {start})", timer.status, timer.display),
        None => format!("{} {}", timer.status, timer.display),
    }
}

fn print_report(report: &EmployeeReportResponse) {
    println!(
        "{} (#{}), {} of {}",
        report.employee.full_name, report.employee.id, report.period, report.anchor
    );
    for point in &report.series {
        let bar = "#".repeat((point.hours * 2.0).round() as usize);
        println!("{:>4} {}  {:>5.1}h {bar}", point.label, point.date, point.hours);
    }
    let total_seconds = (report.summary.total_hours * 3600.0).round() as u64;
    println!(
        "total {} ({:.1}h), average {:.1}h/day, {} days worked",
        TimeLog::from_seconds(total_seconds),
        report.summary.total_hours,
        report.summary.average_hours,
        report.summary.worked_days
    );
}

/// Reads one stdin line per label through a single buffered reader.
async fn prompt_lines(labels: &[&str]) -> Result<Vec<String>, infrastructure::error::InfraError> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut answers = Vec::with_capacity(labels.len());
    for label in labels {
        print!("{label}");
        std::io::stdout().flush()?;
        answers.push(lines.next_line().await?.unwrap_or_default());
    }
    Ok(answers)
}
