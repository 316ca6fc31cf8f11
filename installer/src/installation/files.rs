//! Generated credentials file (`userdata.inc.php`).
//!
//! Goals:
//! - Async I/O only (tokio), every write bounded by a timeout
//! - File is only readable by its owner right after writing
//! - Never fail silently: if no location is writable the content is handed back for display

use anyhow::{Context, Result};
use log::{debug, info, warn};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use std::time::Instant;
use tokio::io::AsyncWriteExt;
use tokio::time::{timeout, Duration};

use crate::models::requests::InstallationConfig;
use crate::models::responses::CheckResult;
use crate::utils::validation::escape_php_single_quoted;

pub const USERDATA_FILE_NAME: &str = "userdata.inc.php";
const STEP_LABEL: &str = "Creating configfile";

/// Values that end up in the credentials file.
#[derive(Debug, Clone)]
pub struct UserdataTemplate<'a> {
    pub host: &'a str,
    pub user: &'a str,
    pub password: &'a str,
    pub database: &'a str,
    pub root_user: &'a str,
    pub root_password: &'a str,
}

impl<'a> UserdataTemplate<'a> {
    pub fn from_config(config: &'a InstallationConfig) -> Self {
        Self {
            host: &config.mysql_host,
            user: &config.mysql_unpriv_user,
            password: &config.mysql_unpriv_pass,
            database: &config.mysql_database,
            root_user: &config.mysql_root_user,
            root_password: &config.mysql_root_pass,
        }
    }
}

/// Render the PHP settings file read by the panel at runtime.
pub fn render_userdata(t: &UserdataTemplate<'_>) -> String {
    let q = escape_php_single_quoted;
    let mut out = String::with_capacity(512);
    out.push_str("<?php\n");
    out.push_str("// automatically generated userdata.inc.php for Froxlor\n");
    out.push_str(&format!("$sql['host']='{}';\n", q(t.host)));
    out.push_str(&format!("$sql['user']='{}';\n", q(t.user)));
    out.push_str(&format!("$sql['password']='{}';\n", q(t.password)));
    out.push_str(&format!("$sql['db']='{}';\n", q(t.database)));
    out.push_str("$sql_root[0]['caption']='Default';\n");
    out.push_str(&format!("$sql_root[0]['host']='{}';\n", q(t.host)));
    out.push_str(&format!("$sql_root[0]['user']='{}';\n", q(t.root_user)));
    out.push_str(&format!("$sql_root[0]['password']='{}';\n", q(t.root_password)));
    out.push_str("// enable debugging to browser in case of SQL errors\n");
    out.push_str("$sql['debug'] = false;\n");
    out.push_str("?>");
    out
}

/// Where the credentials ended up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UserdataLocation {
    Primary(PathBuf),
    Fallback(PathBuf),
    /// Nothing was writable; the operator has to create the file by hand.
    Inline,
}

impl UserdataLocation {
    /// Status row for this outcome. `content` is only shown for `Inline`.
    pub fn to_check_result(&self, content: &str) -> CheckResult {
        match self {
            UserdataLocation::Primary(path) => {
                CheckResult::ok(STEP_LABEL, format!("{}", path.display()))
            }
            UserdataLocation::Fallback(path) => CheckResult::warning(
                STEP_LABEL,
                format!("written to {}", path.display()),
            )
            .with_description(format!(
                "Move {} to lib/{} of your Froxlor installation.",
                path.display(),
                USERDATA_FILE_NAME
            )),
            UserdataLocation::Inline => CheckResult::warning(
                STEP_LABEL,
                "could not write the config file",
            )
            .with_description(format!(
                "Create lib/{} with the following content:\n{}",
                USERDATA_FILE_NAME, content
            )),
        }
    }
}

async fn write_private_file_once(path: &Path, content: &str) -> Result<()> {
    let mut options = tokio::fs::OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    options.mode(0o600);

    let mut f = options
        .open(path)
        .await
        .with_context(|| format!("open failed: {:?}", path))?;
    f.write_all(content.as_bytes())
        .await
        .with_context(|| format!("write failed: {:?}", path))?;
    f.flush().await?;
    drop(f);

    // An already existing file keeps its old mode on open; tighten it explicitly.
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        tokio::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))
            .await
            .with_context(|| format!("chmod failed: {:?}", path))?;
    }

    Ok(())
}

/// Write `content` to `path` with owner-only permissions, bounded by a 60s timeout.
pub async fn write_private_file(path: &Path, content: &str) -> Result<()> {
    match timeout(Duration::from_secs(60), write_private_file_once(path, content)).await {
        Ok(res) => res,
        Err(_) => Err(anyhow::anyhow!("write timed out after 60s: {:?}", path)),
    }
}

/// Write the credentials file, first to `<basepath>/lib`, then to `fallback_dir`.
pub async fn write_userdata(
    content: &str,
    basepath: &Path,
    fallback_dir: &Path,
) -> UserdataLocation {
    let started = Instant::now();
    let digest = Sha256::digest(content.as_bytes());
    debug!(
        "[PHASE: seeding] [STEP: userdata] write_userdata entered (bytes={}, sha256={:x})",
        content.len(),
        digest
    );

    let primary = basepath.join("lib").join(USERDATA_FILE_NAME);
    match write_private_file(&primary, content).await {
        Ok(()) => {
            info!(
                "[PHASE: seeding] [STEP: userdata] Credentials written (path={:?}, duration_ms={})",
                primary,
                started.elapsed().as_millis()
            );
            return UserdataLocation::Primary(primary);
        }
        Err(e) => {
            warn!(
                "[PHASE: seeding] [STEP: userdata] Primary location not writable (path={:?}, err={:#})",
                primary, e
            );
        }
    }

    let fallback = fallback_dir.join(USERDATA_FILE_NAME);
    match write_private_file(&fallback, content).await {
        Ok(()) => {
            warn!(
                "[PHASE: seeding] [STEP: userdata] Credentials written to fallback location (path={:?})",
                fallback
            );
            UserdataLocation::Fallback(fallback)
        }
        Err(e) => {
            warn!(
                "[PHASE: seeding] [STEP: userdata] Fallback location not writable (path={:?}, err={:#}); content must be created manually",
                fallback, e
            );
            UserdataLocation::Inline
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn template() -> UserdataTemplate<'static> {
        UserdataTemplate {
            host: "127.0.0.1",
            user: "froxlor",
            password: "it's\\secret",
            database: "froxlor",
            root_user: "root",
            root_password: "rootpw",
        }
    }

    #[test]
    fn render_escapes_quotes_and_backslashes() {
        let out = render_userdata(&template());
        assert!(out.starts_with("<?php\n"));
        assert!(out.ends_with("?>"));
        assert!(out.contains("$sql['password']='it\\'s\\\\secret';\n"), "{}", out);
        assert!(out.contains("$sql_root[0]['caption']='Default';\n"));
        assert!(out.contains("$sql_root[0]['user']='root';\n"));
        assert!(out.contains("$sql['debug'] = false;\n"));
    }

    #[tokio::test]
    async fn writes_primary_location_with_private_mode() {
        let base = tempfile::tempdir().expect("tempdir");
        let fallback = tempfile::tempdir().expect("tempdir");
        std::fs::create_dir_all(base.path().join("lib")).expect("mkdir lib");

        let location = write_userdata("<?php ?>", base.path(), fallback.path()).await;
        let expected = base.path().join("lib").join(USERDATA_FILE_NAME);
        assert_eq!(location, UserdataLocation::Primary(expected.clone()));
        assert_eq!(std::fs::read_to_string(&expected).expect("read"), "<?php ?>");

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = std::fs::metadata(&expected).expect("meta").permissions().mode();
            assert_eq!(mode & 0o777, 0o600);
        }
        assert!(!fallback.path().join(USERDATA_FILE_NAME).exists());
    }

    #[tokio::test]
    async fn falls_back_when_lib_is_missing() {
        let base = tempfile::tempdir().expect("tempdir");
        let fallback = tempfile::tempdir().expect("tempdir");

        let location = write_userdata("content", base.path(), fallback.path()).await;
        let expected = fallback.path().join(USERDATA_FILE_NAME);
        assert_eq!(location, UserdataLocation::Fallback(expected.clone()));
        assert!(expected.exists());

        let row = location.to_check_result("content");
        assert_eq!(row.severity, crate::models::responses::Severity::Warning);
    }

    #[tokio::test]
    async fn inline_when_nothing_is_writable() {
        let base = tempfile::tempdir().expect("tempdir");
        let missing = base.path().join("does").join("not").join("exist");

        let location = write_userdata("content", &missing, &missing).await;
        assert_eq!(location, UserdataLocation::Inline);

        let row = location.to_check_result("$sql['db']='froxlor';");
        assert!(!row.is_fatal());
        assert!(row
            .description
            .as_deref()
            .is_some_and(|d| d.contains("$sql['db']='froxlor';")));
    }
}
