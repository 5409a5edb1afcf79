use airtwin_core::{
    Engine, EngineConfig, EngineError, InterventionRequest, MetersPerSecond, RefreshEvent,
    RefreshScheduler, Secrets, StagnationLevel, StationSnapshot, StoreTarget, WeatherScenario,
    Wind,
};
use clap::{Parser, Subcommand};
use serde_json::json;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::mpsc::RecvTimeoutError;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

/// Environmental telemetry fusion daemon
#[derive(Parser, Debug)]
#[command(name = "airtwin-daemon")]
#[command(about = "Fuses air-quality feeds and answers planning queries as JSON", long_about = None)]
struct Args {
    /// TOML configuration file (built-in defaults when omitted)
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Refresh the live store on the configured interval until Ctrl-C
    Run,
    /// List every station with concentrations, profile and token
    Stations,
    /// Run one refresh pass and print the report
    Refresh,
    /// Current weather for a city
    Weather { city: String },
    /// Dispersion grid for a city
    Dispersion {
        city: String,
        /// Wind speed override in m/s
        #[arg(long, requires = "wind_direction")]
        wind_speed: Option<f64>,
        /// Wind direction override in degrees (blowing from; 0=North, 90=East)
        #[arg(long, requires = "wind_speed")]
        wind_direction: Option<f64>,
    },
    /// Apply an intervention to a station
    Intervene {
        station: String,
        /// Store to modify: baseline, live or auto
        #[arg(short, long, default_value = "auto")]
        target: String,
        /// Planner efficiency in percent (0-50)
        #[arg(short, long)]
        efficiency: Option<f64>,
        /// Method label recorded with the intervention
        #[arg(short, long)]
        method: Option<String>,
        /// Use the city's live weather as the scenario
        #[arg(long)]
        live_weather: bool,
        /// Stagnation level: high, elevated, normal, low
        #[arg(long)]
        stagnation: Option<String>,
        /// Scenario wind speed in m/s
        #[arg(long)]
        scenario_wind: Option<f64>,
        /// Scenario mixing height in meters
        #[arg(long)]
        mixing_height: Option<f64>,
        /// Echoed station snapshot as JSON (requires --token)
        #[arg(long, requires = "token")]
        snapshot: Option<String>,
        /// Integrity token for --snapshot
        #[arg(long, requires = "snapshot")]
        token: Option<String>,
    },
    /// Switch the baseline to a calendar date and print the station count
    Baseline { month: u32, day: u32 },
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<(), EngineError> {
    let text = serde_json::to_string_pretty(value)
        .map_err(|e| EngineError::InvalidParameter(format!("cannot serialize output: {e}")))?;
    println!("{text}");
    Ok(())
}

fn scenario(
    stagnation: Option<&str>,
    wind: Option<f64>,
    mixing_height: Option<f64>,
) -> Option<WeatherScenario> {
    if stagnation.is_none() && wind.is_none() && mixing_height.is_none() {
        return None;
    }
    Some(WeatherScenario {
        stagnation: stagnation.map(StagnationLevel::parse),
        wind_speed: wind.map(MetersPerSecond::new),
        mixing_height_m: mixing_height,
    })
}

fn run_scheduler(engine: Arc<Engine>, config: &EngineConfig) -> Result<(), EngineError> {
    let scheduler = RefreshScheduler::spawn(engine, config.refresh.interval())?;
    let ctx = scheduler.context();
    {
        let ctx = ctx.clone();
        ctrlc::set_handler(move || {
            tracing::info!("got SIGINT, stopping scheduler");
            ctx.cancel();
        })
        .map_err(|e| EngineError::Config(format!("could not set SIGINT handler: {e}")))?;
    }

    while !ctx.is_cancelled() {
        match scheduler.events().recv_timeout(Duration::from_millis(500)) {
            Ok(RefreshEvent::Completed(report)) => print_json(&report)?,
            Ok(RefreshEvent::Panicked(message)) => {
                print_json(&json!({"source": "panicked", "message": message}))?;
            }
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }
    scheduler.shutdown();
    tracing::info!("shut down");
    Ok(())
}

fn execute(args: Args) -> Result<(), EngineError> {
    let config = match &args.config {
        Some(path) => EngineConfig::load(path)?,
        None => EngineConfig::default(),
    };
    let secrets = Secrets::from_env(&config)?;
    let engine = Engine::from_config(&config, &secrets)?;

    match args.command {
        Command::Run => {
            if !config.refresh.enabled {
                return Err(EngineError::Config("refresh is disabled in configuration".into()));
            }
            run_scheduler(Arc::new(engine), &config)
        }
        Command::Stations => print_json(&engine.stations()),
        Command::Refresh => print_json(&engine.refresh_now()),
        Command::Weather { city } => match engine.weather(&city)? {
            Some(report) => print_json(&report),
            None => Err(EngineError::NotFound(format!("no stations in city '{city}'"))),
        },
        Command::Dispersion {
            city,
            wind_speed,
            wind_direction,
        } => {
            let wind = wind_speed
                .zip(wind_direction)
                .map(|(speed, direction)| Wind::new(speed, direction));
            print_json(&engine.dispersion(&city, wind))
        }
        Command::Intervene {
            station,
            target,
            efficiency,
            method,
            live_weather,
            stagnation,
            scenario_wind,
            mixing_height,
            snapshot,
            token,
        } => {
            let snapshot = snapshot
                .map(|s| serde_json::from_str::<StationSnapshot>(&s))
                .transpose()
                .map_err(|e| EngineError::InvalidParameter(format!("snapshot: {e}")))?;
            let request = InterventionRequest {
                target: StoreTarget::parse(&target),
                efficiency,
                method,
                weather: scenario(stagnation.as_deref(), scenario_wind, mixing_height),
                use_live_weather: live_weather,
                snapshot,
                token,
                ..InterventionRequest::new(station)
            };
            print_json(&engine.apply_intervention(&request)?)
        }
        Command::Baseline { month, day } => {
            let stations = engine.switch_baseline(month, day)?;
            print_json(&json!({"month": month, "day": day, "stations": stations}))
        }
    }
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    match execute(args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, "command failed");
            eprintln!("{}", json!({"error": e.code(), "message": e.to_string()}));
            ExitCode::FAILURE
        }
    }
}
