use std::io::Read;
use std::process::ExitCode;
use std::sync::Arc;

use serde_json::{json, Value};
use thiserror::Error;
use tracing::{error, info};
use ulid::Ulid;

use katu_scheduler::compactor::compact_if_needed;
use katu_scheduler::config::Config;
use katu_scheduler::dto::{AppointmentDto, AppointmentPatch, ListQuery, NewAppointment};
use katu_scheduler::error::SchedulerError;
use katu_scheduler::observability;
use katu_scheduler::scheduler::Scheduler;
use katu_scheduler::store::WalStore;

const USAGE: &str = "usage: katu-scheduler <create | update <id> | delete <id> | get <id> | \
list [professionalId=..] [patientId=..] [date=..] | compact>";

enum Command {
    Create,
    Update(Ulid),
    Delete(Ulid),
    Get(Ulid),
    List(ListQuery),
    Compact,
}

#[derive(Debug, Error)]
enum CliError {
    #[error("{0}")]
    Usage(String),
    #[error("invalid JSON input: {0}")]
    Json(#[from] serde_json::Error),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Scheduler(#[from] SchedulerError),
}

impl CliError {
    fn code(&self) -> &'static str {
        match self {
            CliError::Usage(_) => "usage",
            CliError::Json(_) => "invalid_json",
            CliError::Io(_) => "internal_error",
            CliError::Scheduler(e) => e.code(),
        }
    }
}

fn parse_id(raw: Option<&String>) -> Result<Ulid, CliError> {
    let raw = raw.ok_or_else(|| CliError::Usage(USAGE.into()))?;
    Ulid::from_string(raw)
        .map_err(|_| SchedulerError::validation(format!("invalid appointment id {raw:?}")).into())
}

fn parse_command(args: &[String]) -> Result<Command, CliError> {
    let Some(name) = args.first() else {
        return Err(CliError::Usage(USAGE.into()));
    };
    match name.as_str() {
        "create" => Ok(Command::Create),
        "update" => parse_id(args.get(1)).map(Command::Update),
        "delete" => parse_id(args.get(1)).map(Command::Delete),
        "get" => parse_id(args.get(1)).map(Command::Get),
        "compact" => Ok(Command::Compact),
        "list" => {
            let mut query = ListQuery::default();
            for arg in &args[1..] {
                let (key, value) = arg
                    .split_once('=')
                    .ok_or_else(|| CliError::Usage(format!("expected key=value, got {arg:?}")))?;
                let slot = match key {
                    "professionalId" => &mut query.professional_id,
                    "patientId" => &mut query.patient_id,
                    "date" => &mut query.date,
                    other => return Err(CliError::Usage(format!("unknown filter {other:?}"))),
                };
                *slot = Some(value.to_string());
            }
            Ok(Command::List(query))
        }
        other => Err(CliError::Usage(format!("unknown command {other:?}\n{USAGE}"))),
    }
}

fn read_stdin() -> Result<String, CliError> {
    let mut input = String::new();
    std::io::stdin().read_to_string(&mut input)?;
    Ok(input)
}

async fn run(command: Command, scheduler: &Scheduler, store: &WalStore) -> Result<Value, CliError> {
    let value = match command {
        Command::Create => {
            let req: NewAppointment = serde_json::from_str(&read_stdin()?)?;
            let appt = scheduler.create_appointment(req).await?;
            serde_json::to_value(AppointmentDto::from(&appt))?
        }
        Command::Update(id) => {
            let patch: AppointmentPatch = serde_json::from_str(&read_stdin()?)?;
            let appt = scheduler.update_appointment(id, patch).await?;
            serde_json::to_value(AppointmentDto::from(&appt))?
        }
        Command::Delete(id) => {
            scheduler.delete_appointment(id).await?;
            json!({ "deleted": id })
        }
        Command::Get(id) => {
            let appt = scheduler.get_appointment(id).await?;
            serde_json::to_value(AppointmentDto::from(&appt))?
        }
        Command::List(query) => {
            let appts = scheduler.list_appointments(query).await?;
            let dtos: Vec<AppointmentDto> = appts.iter().map(AppointmentDto::from).collect();
            serde_json::to_value(dtos)?
        }
        Command::Compact => {
            store.compact_wal().await.map_err(SchedulerError::from)?;
            json!({ "compacted": true, "appointments": store.appointment_count() })
        }
    };
    Ok(value)
}

fn fail(err: &CliError) -> ExitCode {
    error!("{err}");
    println!("{}", json!({ "error": err.code() }));
    ExitCode::FAILURE
}

#[tokio::main]
async fn main() -> ExitCode {
    observability::init_tracing();

    let config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            error!("{e}");
            println!("{}", json!({ "error": "invalid_config" }));
            return ExitCode::FAILURE;
        }
    };
    observability::init(config.metrics_port);

    let args: Vec<String> = std::env::args().skip(1).collect();
    let command = match parse_command(&args) {
        Ok(command) => command,
        Err(e) => return fail(&e),
    };

    if let Err(e) = std::fs::create_dir_all(&config.data_dir) {
        return fail(&CliError::from(e));
    }
    let wal_path = config.wal_path();
    let store = match WalStore::open(&wal_path) {
        Ok(store) => Arc::new(store),
        Err(e) => return fail(&CliError::from(e)),
    };
    info!(
        "data: {}, timezone: {}, compact threshold: {}",
        wal_path.display(),
        config.timezone,
        config.compact_threshold
    );
    let scheduler = Scheduler::new(store.clone(), config.timezone);

    let result = run(command, &scheduler, &store).await;
    compact_if_needed(&store, config.compact_threshold).await;

    match result {
        Ok(value) => {
            match serde_json::to_string_pretty(&value) {
                Ok(out) => println!("{out}"),
                Err(e) => return fail(&CliError::from(e)),
            }
            ExitCode::SUCCESS
        }
        Err(e) => fail(&e),
    }
}
