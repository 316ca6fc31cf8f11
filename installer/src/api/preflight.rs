// Requirement checks
// Probes the PHP runtime the panel will run on and the host tools the installer needs, and turns
// the facts into an ordered pass/warn/fail report. No probe raises: missing facts degrade to rows.

use async_trait::async_trait;
use log::{info, warn};
use regex::Regex;
use serde::Serialize;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::config::InstallerSettings;
use crate::installation::run_cmd_with_timeout;
use crate::models::responses::CheckResult;

const MANDATORY_EXTENSIONS: [(&str, &str); 9] = [
    ("session", "PHP session-extension"),
    ("ctype", "PHP ctype-extension"),
    ("simplexml", "PHP SimpleXML-extension"),
    ("xml", "PHP xml-extension"),
    ("filter", "PHP filter-extension"),
    ("posix", "PHP posix-extension"),
    ("mbstring", "PHP mbstring-extension"),
    ("curl", "PHP curl-extension"),
    ("json", "PHP json-extension"),
];

const OPTIONAL_EXTENSIONS: [(&str, &str, &str); 2] = [
    (
        "bcmath",
        "PHP bcmath-extension",
        "Traffic-related functions in Froxlor will not work correctly without bcmath.",
    ),
    (
        "zip",
        "PHP zip-extension",
        "The ZIP-based import of settings and the auto-updater need the zip extension.",
    ),
];

/// PHP one-liner printing one `key=value` line per fact. Avoids every optional extension so it
/// still runs on a runtime that is missing most of them.
pub(crate) const PHP_FACTS_SCRIPT: &str = concat!(
    "echo 'version=', PHP_VERSION, \"\\n\";",
    "echo 'extensions=', implode(',', get_loaded_extensions()), \"\\n\";",
    "echo 'pdo_drivers=', (class_exists('PDO') ? implode(',', PDO::getAvailableDrivers()) : ''), \"\\n\";",
    "echo 'open_basedir=', (string) ini_get('open_basedir'), \"\\n\";",
);

// =============================================================================
// Facts
// =============================================================================

/// Snapshot of the host as seen by the requirement checks.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RuntimeFacts {
    pub php_version: Option<String>,
    /// Lowercased extension names.
    pub extensions: BTreeSet<String>,
    pub pdo_drivers: BTreeSet<String>,
    pub open_basedir: Option<String>,
    pub dump_binary: Option<PathBuf>,
    /// Why the PHP runtime could not be probed, if it could not.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub probe_error: Option<String>,
}

impl RuntimeFacts {
    pub fn has_extension(&self, name: &str) -> bool {
        self.extensions.contains(&name.to_ascii_lowercase())
    }
}

fn split_list(value: &str) -> BTreeSet<String> {
    value
        .split(',')
        .map(|s| s.trim().to_ascii_lowercase())
        .filter(|s| !s.is_empty())
        .collect()
}

/// Parse the output of `PHP_FACTS_SCRIPT`. Unknown lines are ignored.
pub fn parse_php_facts(output: &str) -> RuntimeFacts {
    let mut facts = RuntimeFacts::default();
    for line in output.lines() {
        let Some((key, value)) = line.split_once('=') else {
            continue;
        };
        let value = value.trim();
        match key.trim() {
            "version" if !value.is_empty() => facts.php_version = Some(value.to_string()),
            "extensions" => facts.extensions = split_list(value),
            "pdo_drivers" => facts.pdo_drivers = split_list(value),
            "open_basedir" if !value.is_empty() => facts.open_basedir = Some(value.to_string()),
            _ => {}
        }
    }
    facts
}

/// Probes the machine the panel is installed on.
#[async_trait]
pub trait HostEnvironment: Send + Sync {
    async fn probe(&self) -> RuntimeFacts;
}

/// Real host: runs the PHP CLI once and looks for the dump helper on disk.
pub struct PhpHostEnvironment {
    php_binary: String,
    dump_candidates: Vec<PathBuf>,
    timeout: Duration,
}

impl PhpHostEnvironment {
    pub fn new(php_binary: String, dump_candidates: Vec<PathBuf>, timeout: Duration) -> Self {
        Self {
            php_binary,
            dump_candidates,
            timeout,
        }
    }

    pub fn from_settings(settings: &InstallerSettings) -> Self {
        Self::new(
            settings.php_binary.clone(),
            settings.dump_binaries.clone(),
            settings.probe_timeout(),
        )
    }

    fn resolve_php(&self) -> Result<PathBuf, String> {
        if self.php_binary.contains('/') {
            return Ok(PathBuf::from(&self.php_binary));
        }
        which::which(&self.php_binary)
            .map_err(|e| format!("'{}' not found on PATH: {}", self.php_binary, e))
    }
}

pub fn locate_first_existing(candidates: &[PathBuf]) -> Option<PathBuf> {
    candidates.iter().find(|p| Path::new(p).is_file()).cloned()
}

#[async_trait]
impl HostEnvironment for PhpHostEnvironment {
    async fn probe(&self) -> RuntimeFacts {
        let dump_binary = locate_first_existing(&self.dump_candidates);

        let php = match self.resolve_php() {
            Ok(p) => p,
            Err(e) => {
                warn!("[PHASE: requirements] [STEP: probe] {}", e);
                return RuntimeFacts {
                    dump_binary,
                    probe_error: Some(e),
                    ..RuntimeFacts::default()
                };
            }
        };

        let args = vec!["-r".to_string(), PHP_FACTS_SCRIPT.to_string()];
        let mut facts = match run_cmd_with_timeout(
            &php.to_string_lossy(),
            &args,
            self.timeout,
            "php_facts",
        )
        .await
        {
            Ok(out) if out.success() => parse_php_facts(&out.stdout),
            Ok(out) => {
                let err = format!(
                    "PHP exited with {:?}: {}",
                    out.exit_code,
                    out.combined()
                );
                warn!("[PHASE: requirements] [STEP: probe] {}", err);
                RuntimeFacts {
                    probe_error: Some(err),
                    ..RuntimeFacts::default()
                }
            }
            Err(e) => {
                warn!("[PHASE: requirements] [STEP: probe] PHP probe failed: {:#}", e);
                RuntimeFacts {
                    probe_error: Some(format!("{:#}", e)),
                    ..RuntimeFacts::default()
                }
            }
        };
        facts.dump_binary = dump_binary;

        info!(
            "[PHASE: requirements] [STEP: probe] Facts collected: {}",
            serde_json::to_string(&facts).unwrap_or_default()
        );
        facts
    }
}

// =============================================================================
// Version comparison
// =============================================================================

/// Numeric `(major, minor, patch)` from strings like `8.2.12-1+ubuntu22.04.1`.
pub fn parse_version(version: &str) -> Option<(u32, u32, u32)> {
    let re = match Regex::new(r"^\s*(\d+)(?:\.(\d+))?(?:\.(\d+))?") {
        Ok(re) => re,
        Err(e) => {
            warn!(
                "[PHASE: requirements] [STEP: version] Internal error compiling version regex: {}",
                e
            );
            return None;
        }
    };
    let caps = re.captures(version)?;
    let part = |i: usize| {
        caps.get(i)
            .and_then(|m| m.as_str().parse::<u32>().ok())
            .unwrap_or(0)
    };
    Some((part(1), part(2), part(3)))
}

/// `version <= floor`; unparsable versions count as too old.
pub fn version_at_most(version: &str, floor: &str) -> bool {
    match (parse_version(version), parse_version(floor)) {
        (Some(v), Some(f)) => v <= f,
        _ => true,
    }
}

// =============================================================================
// Checks
// =============================================================================

#[derive(Debug, Clone)]
pub struct RequirementPolicy {
    pub min_version: String,
    pub preferred_version: String,
}

impl RequirementPolicy {
    pub fn from_settings(settings: &InstallerSettings) -> Self {
        Self {
            min_version: settings.php_min_version.clone(),
            preferred_version: settings.php_preferred_version.clone(),
        }
    }
}

impl Default for RequirementPolicy {
    fn default() -> Self {
        Self::from_settings(&InstallerSettings::default())
    }
}

fn php_version_row(facts: &RuntimeFacts, policy: &RequirementPolicy) -> CheckResult {
    let label = format!("PHP version > {}", policy.min_version);
    let Some(version) = facts.php_version.as_deref() else {
        let row = CheckResult::fatal(label, "not found");
        return match &facts.probe_error {
            Some(e) => row.with_description(e.clone()),
            None => row,
        };
    };

    if version_at_most(version, &policy.min_version) {
        CheckResult::fatal(label, format!("not found ({})", version))
    } else if version_at_most(version, &policy.preferred_version) {
        CheckResult::warning(label, format!("newer version preferred ({})", version))
    } else {
        CheckResult::ok(label, version)
    }
}

fn extension_row(facts: &RuntimeFacts, ext: &str, label: &str) -> CheckResult {
    if facts.has_extension(ext) {
        CheckResult::ok(label, "installed")
    } else {
        CheckResult::fatal(label, "not installed")
    }
}

/// Ordered requirement report for `facts`.
pub fn check_requirements(facts: &RuntimeFacts, policy: &RequirementPolicy) -> Vec<CheckResult> {
    let mut results = vec![php_version_row(facts, policy)];

    let pdo_label = "PHP PDO extension and PDO-MySQL driver";
    if facts.has_extension("pdo") && facts.pdo_drivers.contains("mysql") {
        results.push(CheckResult::ok(pdo_label, "installed"));
    } else {
        results.push(CheckResult::fatal(pdo_label, "not installed"));
    }

    for (ext, label) in MANDATORY_EXTENSIONS {
        results.push(extension_row(facts, ext, label));
    }

    for (ext, label, description) in OPTIONAL_EXTENSIONS {
        if facts.has_extension(ext) {
            results.push(CheckResult::ok(label, "installed"));
        } else {
            results.push(CheckResult::warning(label, "not installed").with_description(description));
        }
    }

    match facts.open_basedir.as_deref() {
        Some(value) if !value.trim().is_empty() => results.push(
            CheckResult::warning("PHP open_basedir", "activated").with_description(
                "Froxlor needs access to files outside of open_basedir. Disable open_basedir for the panel.",
            ),
        ),
        _ => results.push(CheckResult::ok("PHP open_basedir", "off")),
    }

    match &facts.dump_binary {
        Some(path) => results.push(CheckResult::ok(
            "mysqldump",
            format!("installed ({})", path.display()),
        )),
        None => results.push(
            CheckResult::warning("mysqldump", "not installed").with_description(
                "An existing database cannot be backed up before it is replaced without mysqldump.",
            ),
        ),
    }

    results
}
