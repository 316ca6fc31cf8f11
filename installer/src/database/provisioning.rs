// Database provisioning: (re)create the panel database and its unprivileged role
//
// Steps (each reports exactly one CheckResult, first fatal stops):
// 1. Backup an existing database with the dump helper before anything is dropped
// 2. Drop the role on every access host + the database, recreate both, grant, set password
//
// Key design decisions:
// - Account-management statements (CREATE USER/GRANT/ALTER USER) are not preparable in MySQL;
//   names and passwords are emitted as escaped string literals, the database name is a
//   backtick-quoted identifier with embedded backticks doubled, so it names the same database
//   the existence check and the dump helper see
// - DROP USER IF EXISTS replaces the row-level deletes from mysql.user/db/tables_priv/columns_priv
// - The dump password travels through MYSQL_PWD, never through argv

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, TimeZone};
use log::{error, info, warn};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::database::connection::{SqlSession, SqlValue};
use crate::installation::{run_cmd_with_timeout_once, CommandOutput};
use crate::models::requests::InstallationConfig;
use crate::models::responses::CheckResult;
use crate::utils::validation::{mysql_account, quote_mysql_identifier, quote_mysql_string};

pub const BACKUP_LABEL: &str = "Creating backup of old database";
pub const CREATE_LABEL: &str = "Creating database and username";

// =============================================================================
// Access hosts
// =============================================================================

/// Host patterns the unprivileged role is created for. Insertion-ordered, no duplicates.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AccessHostSet {
    hosts: Vec<String>,
}

impl AccessHostSet {
    /// Build the set from a comma separated access host list and the server IP.
    ///
    /// `127.0.0.1` and `localhost` always come as a pair; the server IP is always included.
    pub fn normalize(access_host: &str, server_ip: &str) -> Self {
        let mut set = AccessHostSet::default();
        for host in access_host.split(',') {
            set.insert(host);
        }

        let has_loopback = set.contains("127.0.0.1");
        let has_localhost = set.contains("localhost");
        if has_loopback && !has_localhost {
            set.insert("localhost");
        }
        if has_localhost && !has_loopback {
            set.insert("127.0.0.1");
        }

        set.insert(server_ip);
        set
    }

    fn insert(&mut self, host: &str) {
        let host = host.trim();
        if !host.is_empty() && !self.contains(host) {
            self.hosts.push(host.to_string());
        }
    }

    pub fn contains(&self, host: &str) -> bool {
        self.hosts.iter().any(|h| h == host)
    }

    pub fn hosts(&self) -> &[String] {
        &self.hosts
    }

    /// Comma-joined form stored in the panel settings.
    pub fn joined(&self) -> String {
        self.hosts.join(",")
    }
}

// =============================================================================
// Statement builders
// =============================================================================

pub fn database_exists_query() -> &'static str {
    "SELECT SCHEMA_NAME FROM INFORMATION_SCHEMA.SCHEMATA WHERE SCHEMA_NAME = ?"
}

pub fn drop_user_stmt(user: &str, host: &str) -> String {
    format!("DROP USER IF EXISTS {}", mysql_account(user, host))
}

pub fn drop_database_stmt(database: &str) -> String {
    format!("DROP DATABASE IF EXISTS {}", quote_mysql_identifier(database))
}

pub fn create_database_stmt(database: &str) -> String {
    format!(
        "CREATE DATABASE {} CHARACTER SET=utf8 COLLATE=utf8_general_ci",
        quote_mysql_identifier(database)
    )
}

pub fn create_user_stmt(user: &str, host: &str) -> String {
    format!("CREATE USER IF NOT EXISTS {}", mysql_account(user, host))
}

pub fn grant_all_stmt(database: &str, user: &str, host: &str) -> String {
    format!(
        "GRANT ALL PRIVILEGES ON {}.* TO {}",
        quote_mysql_identifier(database),
        mysql_account(user, host)
    )
}

pub fn set_password_stmt(user: &str, host: &str, password: &str) -> String {
    format!(
        "ALTER USER {} IDENTIFIED BY {}",
        mysql_account(user, host),
        quote_mysql_string(password)
    )
}

/// Full statement sequence for dropping and recreating database + role.
pub fn recreate_statements(
    database: &str,
    user: &str,
    password: &str,
    hosts: &AccessHostSet,
) -> Vec<String> {
    let mut stmts = Vec::new();
    for host in hosts.hosts() {
        stmts.push(drop_user_stmt(user, host));
    }
    stmts.push(drop_database_stmt(database));
    stmts.push("FLUSH PRIVILEGES".to_string());
    stmts.push(create_database_stmt(database));
    for host in hosts.hosts() {
        stmts.push(create_user_stmt(user, host));
        stmts.push(grant_all_stmt(database, user, host));
        stmts.push(set_password_stmt(user, host, password));
    }
    stmts.push("FLUSH PRIVILEGES".to_string());
    stmts
}

// =============================================================================
// Dump helper
// =============================================================================

#[derive(Debug, Clone)]
pub struct DumpRequest {
    pub host: String,
    pub database: String,
    pub user: String,
    pub password: String,
    pub result_file: PathBuf,
}

/// External dump program used for the pre-overwrite backup.
#[async_trait]
pub trait DumpTool: Send + Sync {
    /// First existing helper binary, if any.
    fn locate(&self) -> Option<PathBuf>;

    async fn dump(&self, binary: &Path, request: &DumpRequest) -> Result<CommandOutput>;
}

/// `mysqldump` run through the shared subprocess runner (single attempt, bounded).
pub struct MysqlDump {
    candidates: Vec<PathBuf>,
    timeout: Duration,
}

impl MysqlDump {
    pub fn new(candidates: Vec<PathBuf>, timeout: Duration) -> Self {
        Self {
            candidates,
            timeout,
        }
    }
}

pub fn dump_args(request: &DumpRequest) -> Vec<String> {
    vec![
        format!("--host={}", request.host),
        format!("--user={}", request.user),
        format!("--result-file={}", request.result_file.display()),
        request.database.clone(),
    ]
}

#[async_trait]
impl DumpTool for MysqlDump {
    fn locate(&self) -> Option<PathBuf> {
        self.candidates.iter().find(|p| p.is_file()).cloned()
    }

    async fn dump(&self, binary: &Path, request: &DumpRequest) -> Result<CommandOutput> {
        let envs = vec![("MYSQL_PWD".to_string(), request.password.clone())];
        run_cmd_with_timeout_once(
            &binary.to_string_lossy(),
            &dump_args(request),
            &envs,
            self.timeout,
            "backup_database",
        )
        .await
    }
}

/// `<dir>/froxlor_backup_<YYYYMMDDHHmm>.sql`
pub fn backup_file_name<Tz: TimeZone>(dir: &Path, now: &DateTime<Tz>) -> PathBuf
where
    Tz::Offset: std::fmt::Display,
{
    dir.join(format!("froxlor_backup_{}.sql", now.format("%Y%m%d%H%M")))
}

/// A dump counts as failed on a non-zero exit or when its output mentions an error.
pub fn dump_failed(output: &CommandOutput) -> bool {
    !output.success() || output.combined().to_ascii_lowercase().contains("error")
}

// =============================================================================
// Steps
// =============================================================================

/// Back up the target database if it already exists.
pub async fn backup_existing_database(
    session: &mut dyn SqlSession,
    config: &InstallationConfig,
    dump_tool: &dyn DumpTool,
    backup_dir: &Path,
) -> CheckResult {
    let params = [SqlValue::from(config.mysql_database.as_str())];
    let existing = match session
        .fetch_optional_string(database_exists_query(), &params)
        .await
    {
        Ok(found) => found,
        Err(e) => {
            error!(
                "[PHASE: provisioning] [STEP: backup] Existence check failed: {}",
                e
            );
            return CheckResult::fatal(BACKUP_LABEL, e.to_string());
        }
    };

    if existing.is_none() {
        info!(
            "[PHASE: provisioning] [STEP: backup] Database {} does not exist; no backup required",
            config.mysql_database
        );
        return CheckResult::ok(BACKUP_LABEL, "not required");
    }

    let Some(binary) = dump_tool.locate() else {
        error!("[PHASE: provisioning] [STEP: backup] Existing database found but no dump helper available");
        return CheckResult::fatal(BACKUP_LABEL, "mysqldump not found").with_description(
            "The existing database cannot be backed up. Install the MySQL client tools or remove the database manually.",
        );
    };

    let request = DumpRequest {
        host: config.mysql_host.clone(),
        database: config.mysql_database.clone(),
        user: config.mysql_root_user.clone(),
        password: config.mysql_root_pass.clone(),
        result_file: backup_file_name(backup_dir, &chrono::Local::now()),
    };
    info!(
        "[PHASE: provisioning] [STEP: backup] Dumping {} to {:?} with {:?}",
        request.database, request.result_file, binary
    );

    match dump_tool.dump(&binary, &request).await {
        Ok(output) if !dump_failed(&output) => {
            info!(
                "[PHASE: provisioning] [STEP: backup] Backup complete (duration_ms={})",
                output.duration_ms
            );
            CheckResult::ok(
                BACKUP_LABEL,
                format!("OK ({})", request.result_file.display()),
            )
        }
        Ok(output) => {
            warn!(
                "[PHASE: provisioning] [STEP: backup] Dump reported failure (exit_code={:?})",
                output.exit_code
            );
            let detail = output.combined();
            let row = CheckResult::fatal(BACKUP_LABEL, "backup failed");
            if detail.is_empty() {
                row
            } else {
                row.with_description(detail)
            }
        }
        Err(e) => {
            error!("[PHASE: provisioning] [STEP: backup] Dump did not complete: {:#}", e);
            CheckResult::fatal(BACKUP_LABEL, "backup failed").with_description(format!("{:#}", e))
        }
    }
}

/// Drop and recreate the database and the unprivileged role for every access host.
pub async fn create_database_and_role(
    session: &mut dyn SqlSession,
    config: &InstallationConfig,
    hosts: &AccessHostSet,
) -> CheckResult {
    let stmts = recreate_statements(
        &config.mysql_database,
        &config.mysql_unpriv_user,
        &config.mysql_unpriv_pass,
        hosts,
    );
    info!(
        "[PHASE: provisioning] [STEP: create] Recreating database {} for hosts [{}] ({} statements)",
        config.mysql_database,
        hosts.joined(),
        stmts.len()
    );

    for (i, stmt) in stmts.iter().enumerate() {
        if let Err(e) = session.execute(stmt).await {
            error!(
                "[PHASE: provisioning] [STEP: create] Statement {} of {} failed: {}",
                i + 1,
                stmts.len(),
                e
            );
            return CheckResult::fatal(CREATE_LABEL, e.to_string());
        }
    }

    CheckResult::ok(CREATE_LABEL, "OK")
}

#[derive(Debug, Clone)]
pub struct ProvisionOutcome {
    pub results: Vec<CheckResult>,
    pub access_hosts: AccessHostSet,
}

impl ProvisionOutcome {
    pub fn succeeded(&self) -> bool {
        !crate::models::responses::has_fatal(&self.results)
    }
}

/// Backup, then recreate. Stops after the first fatal row.
pub async fn provision(
    config: &InstallationConfig,
    session: &mut dyn SqlSession,
    dump_tool: &dyn DumpTool,
    backup_dir: &Path,
) -> ProvisionOutcome {
    let access_hosts =
        AccessHostSet::normalize(&config.mysql_access_host, &config.serverip.to_string());
    let mut results = Vec::new();

    let backup = backup_existing_database(session, config, dump_tool, backup_dir).await;
    let fatal = backup.is_fatal();
    results.push(backup);
    if fatal {
        return ProvisionOutcome {
            results,
            access_hosts,
        };
    }

    results.push(create_database_and_role(session, config, &access_hosts).await);
    ProvisionOutcome {
        results,
        access_hosts,
    }
}
