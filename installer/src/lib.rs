// Froxlor command-line installer
// Library entry point

pub mod api;
pub mod cli;
pub mod config;
pub mod database;
pub mod installation;
pub mod models;
pub mod utils;

use log::info;
use std::path::Path;
use std::sync::OnceLock;
use uuid::Uuid;

use crate::api::installer::Installer;
use crate::api::preflight::PhpHostEnvironment;
use crate::api::setup::EnvFieldSource;
use crate::config::InstallerSettings;
use crate::database::connection::MySqlConnector;
use crate::database::provisioning::MysqlDump;

static RUN_ID: OnceLock<String> = OnceLock::new();

fn run_id() -> &'static str {
    RUN_ID.get_or_init(|| Uuid::new_v4().to_string())
}

/// Initialize logging with dual format (JSON + human-readable), files only.
///
/// Stdout carries the operator-facing report, so no console chain is added.
fn init_logging(configured_dir: Option<&Path>) -> Result<(), Box<dyn std::error::Error>> {
    let log_dir = utils::path_resolver::resolve_log_folder(configured_dir)?;
    std::fs::create_dir_all(&log_dir)?;

    let timestamp = chrono::Utc::now().format("%Y-%m-%d-%H%M%S");
    let json_log_file = log_dir.join(format!("install-{}.log", timestamp));
    let txt_log_file = log_dir.join(format!("install-{}.txt", timestamp));

    fern::Dispatch::new()
        .level(log::LevelFilter::Debug)
        .level_for("sqlx", log::LevelFilter::Warn)
        .chain(
            fern::Dispatch::new()
                .format(move |out, message, record| {
                    let timestamp_utc = chrono::Utc::now().to_rfc3339();
                    let message_str = format!("{}", message);
                    let (phase, step, cleaned_message) =
                        utils::logging::parse_log_metadata(&message_str);
                    let json_line = utils::logging::format_json_log(
                        &timestamp_utc,
                        record.level(),
                        record.target(),
                        &cleaned_message,
                        phase.as_deref(),
                        step.as_deref(),
                        Some(run_id()),
                    );
                    out.finish(format_args!("{}\n", json_line));
                })
                .chain(fern::log_file(json_log_file)?),
        )
        .chain(
            fern::Dispatch::new()
                .format(move |out, message, record| {
                    let timestamp_local = chrono::Local::now().format("%Y-%m-%d %H:%M:%S%.3f");
                    let message_str = format!("{}", message);
                    let (phase, step, cleaned_message) =
                        utils::logging::parse_log_metadata(&message_str);
                    let txt_line = utils::logging::format_human_readable_log(
                        &timestamp_local.to_string(),
                        record.level(),
                        record.target(),
                        &cleaned_message,
                        phase.as_deref(),
                        step.as_deref(),
                    );
                    out.finish(format_args!("{}\n", txt_line));
                })
                .chain(fern::log_file(txt_log_file)?),
        )
        .apply()?;

    info!(
        "[PHASE: initialization] Logging initialized, log directory: {:?} (run_id={})",
        log_dir,
        run_id()
    );
    Ok(())
}

/// Command-line installer. Returns the process exit code.
pub fn run_cli() -> i32 {
    let args: Vec<String> = std::env::args().collect();

    let settings = match InstallerSettings::load() {
        Ok(settings) => settings,
        Err(e) => {
            eprintln!("Failed to load installer settings: {:#}", e);
            return 1;
        }
    };

    if let Err(e) = init_logging(settings.log_dir.as_deref()) {
        eprintln!("Failed to initialize logging: {}", e);
    }

    info!(
        "[PHASE: initialization] Installer starting at {} (version={})",
        chrono::Utc::now(),
        env!("CARGO_PKG_VERSION")
    );

    let basepath = utils::path_resolver::resolve_basepath(settings.basepath.as_deref());
    info!(
        "[PHASE: initialization] [STEP: basepath] Panel basepath: {:?}",
        basepath
    );

    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(rt) => rt,
        Err(e) => {
            log::error!("[PHASE: initialization] [STEP: runtime] {}", e);
            eprintln!("Failed to start async runtime: {}", e);
            return 1;
        }
    };

    let host = PhpHostEnvironment::from_settings(&settings);
    let connector = MySqlConnector::new(settings.connect_timeout());
    let dump_tool = MysqlDump::new(settings.dump_binaries.clone(), settings.dump_timeout());
    let fields = EnvFieldSource::new();
    let installer = Installer {
        host: &host,
        connector: &connector,
        dump_tool: &dump_tool,
        fields: &fields,
        settings: &settings,
        basepath,
    };

    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    let code = runtime.block_on(cli::run(&args, &installer, &mut out));
    info!("[PHASE: initialization] [STEP: exit] Exiting with code {}", code);
    log::logger().flush();
    code
}
