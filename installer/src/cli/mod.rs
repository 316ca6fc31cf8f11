// Command-line front end
//
// `froxlor-install --check` runs the requirement gate, `--setup` the whole install. All operator
// output goes to the writer handed in (stdout in production); logs go to files only.

use log::{error, info};
use std::io::Write;

use crate::api::installer::{InstallObserver, InstallReport, Installer};
use crate::api::setup::CollectedInstallData;
use crate::models::responses::{CheckResult, Severity};
use crate::models::state::InstallPhase;

const LABEL_WIDTH: usize = 45;
const DESCRIPTION_INDENT: &str = "           ";
const MASKED_VALUE: &str = "*****";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Check,
    Setup,
}

impl Mode {
    pub fn from_args(args: &[String]) -> Option<Self> {
        match args {
            [_, flag] if flag == "--check" => Some(Mode::Check),
            [_, flag] if flag == "--setup" => Some(Mode::Setup),
            _ => None,
        }
    }
}

pub fn usage(program: &str) -> String {
    format!("USAGE: {} --check|--setup", program)
}

fn prefix(severity: Severity) -> &'static str {
    match severity {
        Severity::Ok => " OK:      ",
        Severity::Warning => " WARNING: ",
        Severity::Fatal => " ERROR:   ",
    }
}

/// One status line: prefix, label padded to 45 columns, message.
pub fn status_line(severity: Severity, label: &str, message: &str) -> String {
    format!(
        "{}{:<width$} {}",
        prefix(severity),
        label,
        message,
        width = LABEL_WIDTH
    )
}

/// Status line plus the indented description lines, if any.
pub fn format_check_result(result: &CheckResult) -> String {
    let mut out = status_line(result.severity, &result.label, &result.message);
    if let Some(description) = result.description.as_deref() {
        for line in description.lines() {
            out.push('\n');
            out.push_str(DESCRIPTION_INDENT);
            out.push_str(line);
        }
    }
    out
}

/// Prints progress as the installer reports it.
struct CliPrinter<'w> {
    mode: Mode,
    out: &'w mut dyn Write,
}

impl<'w> CliPrinter<'w> {
    fn line(&mut self, text: &str) {
        if let Err(e) = writeln!(self.out, "{}", text) {
            error!("[PHASE: cli] [STEP: output] Write to terminal failed: {}", e);
        }
    }
}

impl<'w> InstallObserver for CliPrinter<'w> {
    fn phase_started(&mut self, phase: InstallPhase) {
        match phase {
            InstallPhase::CollectingRequirements => self.line("Checking system requirements ..."),
            InstallPhase::CollectingConfig => {
                self.line("");
                self.line("Getting setup information from environment variables ...");
            }
            InstallPhase::Provisioning => {
                self.line("");
                self.line("Starting setup ...");
            }
            _ => {}
        }
    }

    fn check_recorded(&mut self, result: &CheckResult) {
        let text = format_check_result(result);
        self.line(&text);
    }

    fn config_collected(&mut self, collected: &CollectedInstallData) {
        for (name, value) in collected.data.entries() {
            if collected.error_for(name).is_some() {
                continue;
            }
            let shown = if name.ends_with("_pass") {
                MASKED_VALUE
            } else {
                value.unwrap_or("")
            };
            let text = status_line(Severity::Ok, name, shown);
            self.line(&text);
        }
        for (field, message) in &collected.errors {
            let text = status_line(Severity::Fatal, field.name(), message);
            self.line(&text);
        }
    }

    fn phase_failed(&mut self, phase: InstallPhase) {
        match phase {
            InstallPhase::CollectingRequirements => {
                self.line("Please install the required system requirements to continue!")
            }
            InstallPhase::CollectingConfig => {
                self.line("Please provide all required environment variables to continue!")
            }
            _ => self.line("Setup failed. Please fix the errors to continue!"),
        }
    }

    fn finished(&mut self, report: &InstallReport) {
        if report.succeeded() && self.mode == Mode::Setup {
            self.line("");
            self.line("Done.");
        }
    }
}

/// Run the command line `args` (program name first). Returns the process exit code.
pub async fn run(args: &[String], installer: &Installer<'_>, out: &mut dyn Write) -> i32 {
    let program = args.first().map(String::as_str).unwrap_or("froxlor-install");
    let mode = match Mode::from_args(args) {
        Some(mode) => mode,
        None => {
            info!(
                "[PHASE: cli] [STEP: args] Invalid arguments ({} given), printing usage",
                args.len().saturating_sub(1)
            );
            if let Err(e) = writeln!(out, "{}", usage(program)) {
                error!("[PHASE: cli] [STEP: output] Write to terminal failed: {}", e);
            }
            return 1;
        }
    };

    info!("[PHASE: cli] [STEP: args] Mode selected: {:?}", mode);
    let mut printer = CliPrinter { mode, out };
    let report = match mode {
        Mode::Check => installer.run_check(&mut printer).await,
        Mode::Setup => installer.run_setup(&mut printer).await,
    };
    if let Err(e) = printer.out.flush() {
        error!("[PHASE: cli] [STEP: output] Flush failed: {}", e);
    }

    if report.succeeded() {
        0
    } else {
        1
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::preflight::tests::{healthy_facts, StaticHost};
    use crate::api::preflight::RuntimeFacts;
    use crate::api::setup::tests::complete_form;
    use crate::api::setup::FormFieldSource;
    use crate::config::InstallerSettings;
    use crate::database::connection::testing::StubConnector;
    use crate::database::provisioning::tests::StubDump;

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    async fn run_with(
        argv: &[&str],
        facts: RuntimeFacts,
        fields: FormFieldSource,
    ) -> (i32, String) {
        let dir = tempfile::tempdir().expect("tempdir");
        std::fs::create_dir_all(dir.path().join("install")).expect("install dir");
        std::fs::create_dir_all(dir.path().join("lib")).expect("lib dir");
        std::fs::write(
            dir.path().join("install/froxlor.sql"),
            "CREATE TABLE panel_settings (id int);\n",
        )
        .expect("schema");
        let settings = InstallerSettings {
            backup_dir: dir.path().to_path_buf(),
            userdata_fallback_dir: Some(dir.path().to_path_buf()),
            ..InstallerSettings::default()
        };
        let host = StaticHost(facts);
        let connector = StubConnector::new();
        let dump = StubDump::missing();
        let installer = Installer {
            host: &host,
            connector: &connector,
            dump_tool: &dump,
            fields: &fields,
            settings: &settings,
            basepath: dir.path().to_path_buf(),
        };

        let mut out: Vec<u8> = Vec::new();
        let code = run(&args(argv), &installer, &mut out).await;
        (code, String::from_utf8_lossy(&out).into_owned())
    }

    #[test]
    fn status_line_pads_label_to_45() {
        let line = status_line(Severity::Ok, "PHP session-extension", "installed");
        assert_eq!(
            line,
            format!(" OK:      {:<45} installed", "PHP session-extension")
        );
        assert_eq!(line.len(), 10 + 45 + 1 + "installed".len());
    }

    #[test]
    fn description_is_indented_eleven_spaces() {
        let row = CheckResult::warning("PHP open_basedir", "activated").with_description("Disable it.");
        let text = format_check_result(&row);
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].starts_with(" WARNING: PHP open_basedir"));
        assert_eq!(lines[1], "           Disable it.");
    }

    #[tokio::test]
    async fn no_arguments_prints_usage() {
        let (code, out) = run_with(&["froxlor-install"], healthy_facts(), complete_form()).await;
        assert_eq!(code, 1);
        assert_eq!(out, "USAGE: froxlor-install --check|--setup\n");
    }

    #[tokio::test]
    async fn unknown_flag_prints_usage() {
        let (code, out) =
            run_with(&["froxlor-install", "--install"], healthy_facts(), complete_form()).await;
        assert_eq!(code, 1);
        assert!(out.starts_with("USAGE: "));
    }

    #[tokio::test]
    async fn check_with_missing_pdo_exits_one() {
        let mut facts = healthy_facts();
        facts.extensions.remove("pdo");
        let (code, out) = run_with(&["froxlor-install", "--check"], facts, complete_form()).await;

        assert_eq!(code, 1);
        assert!(out.starts_with("Checking system requirements ...\n"));
        assert!(out.contains(" ERROR:   PHP PDO extension and PDO-MySQL driver"));
        assert!(out.ends_with("Please install the required system requirements to continue!\n"));
    }

    #[tokio::test]
    async fn check_with_healthy_host_exits_zero() {
        let (code, out) =
            run_with(&["froxlor-install", "--check"], healthy_facts(), complete_form()).await;
        assert_eq!(code, 0);
        assert!(!out.contains("Getting setup information"));
    }

    #[tokio::test]
    async fn setup_with_missing_fields_lists_errors() {
        let (code, out) = run_with(
            &["froxlor-install", "--setup"],
            healthy_facts(),
            FormFieldSource::from_pairs([("servername", "panel.example.com")]),
        )
        .await;

        assert_eq!(code, 1);
        assert!(out.contains(&status_line(Severity::Ok, "servername", "panel.example.com")));
        assert!(out.contains(&status_line(Severity::Fatal, "admin_pass", "missing")));
        assert!(out.ends_with("Please provide all required environment variables to continue!\n"));
    }

    #[tokio::test]
    async fn setup_all_passing_prints_done() {
        let (code, out) =
            run_with(&["froxlor-install", "--setup"], healthy_facts(), complete_form()).await;

        assert_eq!(code, 0, "{}", out);
        assert!(out.contains("\nStarting setup ...\n"));
        assert!(out.contains(&status_line(Severity::Ok, "mysql_root_pass", "*****")));
        assert!(!out.contains("root-pw"));
        assert!(out.ends_with("\nDone.\n"));
    }
}
