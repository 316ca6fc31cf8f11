// Install orchestration
//
// Drives one installer run through its phases:
// - requirements (host probe + checks)
// - config (install data collection and validation)
// - provisioning (root connection, backup, database and role)
// - schema import
// - seeding (settings, entries, admin user, credentials file)
//
// Every phase gates the next one. Progress goes to an `InstallObserver` as it happens.

use log::{error, info, warn};
use std::path::PathBuf;
use std::time::Instant;
use uuid::Uuid;

use crate::api::preflight::{check_requirements, HostEnvironment, RequirementPolicy};
use crate::api::setup::{collect_install_data, CollectedInstallData, FieldSource};
use crate::config::InstallerSettings;
use crate::database::connection::{DatabaseConnector, SqlSession};
use crate::database::migrations::{SchemaImporter, CONNECT_LABEL};
use crate::database::provisioning::{provision, AccessHostSet, DumpTool};
use crate::database::seeding::seed;
use crate::installation::files::{render_userdata, write_userdata, UserdataTemplate};
use crate::models::requests::InstallationConfig;
use crate::models::responses::{has_fatal, CheckResult, Severity};
use crate::models::state::InstallPhase;
use crate::utils::validation::quote_mysql_string;

pub const ROOT_CONNECT_LABEL: &str = "Testing MySQL root connection";

/// Receives progress of a run. All methods default to no-ops.
pub trait InstallObserver {
    fn phase_started(&mut self, _phase: InstallPhase) {}
    fn check_recorded(&mut self, _result: &CheckResult) {}
    fn config_collected(&mut self, _collected: &CollectedInstallData) {}
    fn phase_failed(&mut self, _phase: InstallPhase) {}
    fn finished(&mut self, _report: &InstallReport) {}
}

/// Observer that ignores everything.
pub struct NoopObserver;

impl InstallObserver for NoopObserver {}

#[derive(Debug, Clone)]
pub struct InstallReport {
    pub run_id: String,
    /// `Done` or `Failed`.
    pub phase: InstallPhase,
    /// Phase whose gate stopped the run.
    pub failed_in: Option<InstallPhase>,
    pub results: Vec<CheckResult>,
    pub duration_ms: u128,
}

impl InstallReport {
    pub fn succeeded(&self) -> bool {
        self.phase == InstallPhase::Done
    }
}

/// Per-run bookkeeping: current phase, collected rows, observer forwarding.
struct Run<'o> {
    run_id: String,
    phase: InstallPhase,
    failed_in: Option<InstallPhase>,
    results: Vec<CheckResult>,
    started: Instant,
    observer: &'o mut dyn InstallObserver,
}

impl<'o> Run<'o> {
    fn new(observer: &'o mut dyn InstallObserver) -> Self {
        Self {
            run_id: Uuid::new_v4().to_string(),
            phase: InstallPhase::CollectingRequirements,
            failed_in: None,
            results: Vec::new(),
            started: Instant::now(),
            observer,
        }
    }

    /// Announce the current phase.
    fn start(&mut self) {
        info!(
            "[PHASE: {}] [STEP: start] Phase started (run_id={})",
            self.phase.log_name(),
            self.run_id
        );
        self.observer.phase_started(self.phase);
    }

    /// Move to the phase after the current one; terminal phases are not announced.
    fn advance(&mut self) {
        self.phase = self.phase.next();
        if !self.phase.is_terminal() {
            self.start();
        }
    }

    fn record(&mut self, result: CheckResult) {
        match result.severity {
            Severity::Fatal => error!(
                "[PHASE: {}] [STEP: check] {}: {}",
                self.phase.log_name(),
                result.label,
                result.message
            ),
            Severity::Warning => warn!(
                "[PHASE: {}] [STEP: check] {}: {}",
                self.phase.log_name(),
                result.label,
                result.message
            ),
            Severity::Ok => info!(
                "[PHASE: {}] [STEP: check] {}: {}",
                self.phase.log_name(),
                result.label,
                result.message
            ),
        }
        self.observer.check_recorded(&result);
        self.results.push(result);
    }

    fn record_all(&mut self, results: Vec<CheckResult>) {
        for result in results {
            self.record(result);
        }
    }

    fn fail(mut self) -> InstallReport {
        let phase = self.phase;
        error!(
            "[PHASE: {}] [STEP: gate] Phase failed, stopping (run_id={})",
            phase.log_name(),
            self.run_id
        );
        self.observer.phase_failed(phase);
        self.failed_in = Some(phase);
        self.phase = InstallPhase::Failed;
        self.finish()
    }

    fn finish(self) -> InstallReport {
        let report = InstallReport {
            run_id: self.run_id,
            phase: self.phase,
            failed_in: self.failed_in,
            results: self.results,
            duration_ms: self.started.elapsed().as_millis(),
        };
        info!(
            "[PHASE: {}] [STEP: finish] Run finished (run_id={}, rows={}, duration_ms={})",
            report.phase.log_name(),
            report.run_id,
            report.results.len(),
            report.duration_ms
        );
        self.observer.finished(&report);
        report
    }
}

/// The installer with its collaborators. Borrowed so tests can hand in doubles.
pub struct Installer<'a> {
    pub host: &'a dyn HostEnvironment,
    pub connector: &'a dyn DatabaseConnector,
    pub dump_tool: &'a dyn DumpTool,
    pub fields: &'a dyn FieldSource,
    pub settings: &'a InstallerSettings,
    pub basepath: PathBuf,
}

impl<'a> Installer<'a> {
    /// Requirement gate only.
    pub async fn run_check(&self, observer: &mut dyn InstallObserver) -> InstallReport {
        let mut run = Run::new(observer);
        if !self.requirements(&mut run).await {
            return run.fail();
        }
        run.phase = InstallPhase::Done;
        run.finish()
    }

    /// Full install: every phase in order, stopping at the first failed gate.
    pub async fn run_setup(&self, observer: &mut dyn InstallObserver) -> InstallReport {
        let mut run = Run::new(observer);
        info!(
            "[PHASE: requirements] [STEP: setup] Setup run started (run_id={}, basepath={:?})",
            run.run_id, self.basepath
        );

        if !self.requirements(&mut run).await {
            return run.fail();
        }

        run.advance();
        let collected = collect_install_data(self.fields);
        run.observer.config_collected(&collected);
        let config = match collected.into_config() {
            Ok(config) => config,
            Err(errors) => {
                warn!(
                    "[PHASE: config] [STEP: gate] {} field error(s)",
                    errors.len()
                );
                return run.fail();
            }
        };

        run.advance();
        let access_hosts = match self.provisioning(&mut run, &config).await {
            Some(hosts) => hosts,
            None => return run.fail(),
        };

        run.advance();
        let importer = SchemaImporter::new(self.settings.schema_path(&self.basepath));
        let rows = importer.run(self.connector, &config).await;
        let ok = !has_fatal(&rows);
        run.record_all(rows);
        if !ok {
            return run.fail();
        }

        run.advance();
        if !self.seeding(&mut run, &config, &access_hosts).await {
            return run.fail();
        }

        run.advance();
        run.finish()
    }

    async fn requirements(&self, run: &mut Run<'_>) -> bool {
        run.start();
        let facts = self.host.probe().await;
        if let Some(err) = &facts.probe_error {
            warn!("[PHASE: requirements] [STEP: probe] {}", err);
        }
        let rows = check_requirements(&facts, &RequirementPolicy::from_settings(self.settings));
        let ok = !has_fatal(&rows);
        run.record_all(rows);
        ok
    }

    /// Root connection, backup, database and role. `None` when a fatal row was recorded.
    async fn provisioning(
        &self,
        run: &mut Run<'_>,
        config: &InstallationConfig,
    ) -> Option<AccessHostSet> {
        let (row, session) = self.connect_privileged(config).await;
        run.record(row);
        let mut session = session?;

        let outcome = provision(
            config,
            session.as_mut(),
            self.dump_tool,
            &self.settings.backup_dir,
        )
        .await;
        let ok = outcome.succeeded();
        run.record_all(outcome.results);
        ok.then_some(outcome.access_hosts)
    }

    /// Connect as the privileged account.
    ///
    /// A rejected password is retried without one; when that works the given password is set
    /// on the account so later runs (and the credentials file) use it.
    async fn connect_privileged(
        &self,
        config: &InstallationConfig,
    ) -> (CheckResult, Option<Box<dyn SqlSession>>) {
        let started = Instant::now();
        let first = self
            .connector
            .connect_privileged(
                &config.mysql_host,
                &config.mysql_root_user,
                &config.mysql_root_pass,
            )
            .await;

        let mut session = match first {
            Ok(session) => session,
            Err(e) if e.is_access_denied() && !config.mysql_root_pass.is_empty() => {
                warn!(
                    "[PHASE: provisioning] [STEP: root_connect] Password rejected, retrying without password"
                );
                match self
                    .connector
                    .connect_privileged(&config.mysql_host, &config.mysql_root_user, "")
                    .await
                {
                    Ok(mut session) => {
                        let stmt = format!(
                            "ALTER USER CURRENT_USER() IDENTIFIED BY {}",
                            quote_mysql_string(&config.mysql_root_pass)
                        );
                        if let Err(set_err) = session.execute(&stmt).await {
                            error!(
                                "[PHASE: provisioning] [STEP: root_connect] Setting root password failed: {}",
                                set_err
                            );
                            return (
                                CheckResult::fatal(ROOT_CONNECT_LABEL, set_err.to_string()),
                                None,
                            );
                        }
                        info!(
                            "[PHASE: provisioning] [STEP: root_connect] Root password set on passwordless account"
                        );
                        session
                    }
                    Err(_) => return (CheckResult::fatal(ROOT_CONNECT_LABEL, e.to_string()), None),
                }
            }
            Err(e) => return (CheckResult::fatal(ROOT_CONNECT_LABEL, e.to_string()), None),
        };

        let version = match session.server_version().await {
            Ok(v) => v,
            Err(e) => {
                warn!(
                    "[PHASE: provisioning] [STEP: root_connect] Server version unavailable: {}",
                    e
                );
                "OK".to_string()
            }
        };
        info!(
            "[PHASE: provisioning] [STEP: root_connect] Connected (server={}, duration_ms={})",
            version,
            started.elapsed().as_millis()
        );
        (CheckResult::ok(ROOT_CONNECT_LABEL, version), Some(session))
    }

    async fn seeding(
        &self,
        run: &mut Run<'_>,
        config: &InstallationConfig,
        access_hosts: &AccessHostSet,
    ) -> bool {
        let mut session = match self
            .connector
            .connect_unprivileged(
                &config.mysql_host,
                &config.mysql_unpriv_user,
                &config.mysql_unpriv_pass,
                &config.mysql_database,
            )
            .await
        {
            Ok(session) => session,
            Err(e) => {
                run.record(CheckResult::fatal(CONNECT_LABEL, e.to_string()));
                return false;
            }
        };

        let rows = seed(
            session.as_mut(),
            config,
            access_hosts,
            &self.basepath,
            &chrono::Local::now(),
        )
        .await;
        let ok = !has_fatal(&rows);
        run.record_all(rows);
        if !ok {
            return false;
        }

        run.record(self.write_credentials(config).await);
        true
    }

    async fn write_credentials(&self, config: &InstallationConfig) -> CheckResult {
        let content = render_userdata(&UserdataTemplate::from_config(config));
        let location = write_userdata(
            &content,
            &self.basepath,
            &self.settings.userdata_fallback_dir(),
        )
        .await;
        location.to_check_result(&content)
    }
}
