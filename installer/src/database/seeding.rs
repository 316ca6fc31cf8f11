// Initial panel data
//
// After the schema import the panel tables exist but hold generic defaults. This step writes the
// install-specific settings, the default IP/port, initial cron timestamps and the first admin.
// Everything runs inside one transaction on a fresh unprivileged connection.

use chrono::{DateTime, NaiveTime, TimeZone};
use log::{error, info};
use std::path::Path;

use crate::database::connection::{DbError, SqlSession, SqlValue};
use crate::database::provisioning::AccessHostSet;
use crate::models::requests::{InstallationConfig, WebServer};
use crate::models::responses::CheckResult;

pub const SETTINGS_LABEL: &str = "Changing settings";
pub const ENTRIES_LABEL: &str = "Creating entries";
pub const ADMIN_LABEL: &str = "Adding admin user";
pub const COMMIT_LABEL: &str = "Saving install data";

pub const DEFAULT_LANGUAGE: &str = "English";

const UPDATE_SETTING: &str =
    "UPDATE `panel_settings` SET `value` = ? WHERE `settinggroup` = ? AND `varname` = ?";
const UPDATE_CRON_LASTRUN: &str = "UPDATE `cronjobs_run` SET `lastrun` = ? WHERE `cronfile` = ?";
const INSERT_REBUILD_TASK: &str = "INSERT INTO `panel_tasks` SET `type` = ?";
const INSERT_DEFAULT_IP: &str = "INSERT INTO `panel_ipsandports` SET `ip` = ?, `port` = ?, \
     `namevirtualhost_statement` = 1, `vhostcontainer` = 1, `vhostcontainer_servername_statement` = 1";
const INSERT_ADMIN: &str = "INSERT INTO `panel_admins` SET \
     `loginname` = ?, `password` = ?, `name` = 'Froxlor-Administrator', `email` = ?, `def_language` = ?, \
     `customers` = -1, `customers_see_all` = 1, `caneditphpsettings` = 1, \
     `domains` = -1, `domains_see_all` = 1, `change_serversettings` = 1, \
     `diskspace` = -1024, `mysqls` = -1, `emails` = -1, `email_accounts` = -1, \
     `email_forwarders` = -1, `email_quota` = -1, `ftps` = -1, \
     `tickets` = -1, `tickets_see_all` = 1, `subdomains` = -1, `traffic` = -1048576";

/// Task type that makes the panel cron regenerate its cron.d file.
const TASK_REBUILD_CRON: i64 = 99;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SettingUpdate {
    pub group: &'static str,
    pub varname: &'static str,
    pub value: String,
}

impl SettingUpdate {
    fn new(group: &'static str, varname: &'static str, value: impl Into<String>) -> Self {
        Self {
            group,
            varname,
            value: value.into(),
        }
    }
}

/// Settings rows in the order they are written. Later rows win for the same key.
pub fn settings_updates(
    config: &InstallationConfig,
    access_hosts: &AccessHostSet,
    basepath: &Path,
    now_ts: i64,
) -> Vec<SettingUpdate> {
    let mut rows = vec![
        SettingUpdate::new("panel", "adminmail", config.admin_email()),
        SettingUpdate::new("system", "ipaddress", config.serverip.to_string()),
        SettingUpdate::new("system", "hostname", config.servername.clone()),
        SettingUpdate::new("panel", "standardlanguage", DEFAULT_LANGUAGE),
        SettingUpdate::new("system", "mysql_access_host", access_hosts.joined()),
        SettingUpdate::new("system", "webserver", config.webserver.as_str()),
        SettingUpdate::new("system", "httpuser", config.httpuser.clone()),
        SettingUpdate::new("system", "httpgroup", config.httpgroup.clone()),
    ];

    match config.webserver {
        WebServer::Apache2 => {}
        WebServer::Apache24 => {
            rows.push(SettingUpdate::new("system", "webserver", "apache2"));
            rows.push(SettingUpdate::new("system", "apache24", "1"));
        }
        WebServer::Lighttpd => {
            rows.push(SettingUpdate::new("system", "apacheconf_vhost", "/etc/lighttpd/conf-enabled/"));
            rows.push(SettingUpdate::new("system", "apacheconf_diroptions", "/etc/lighttpd/froxlor-diroptions/"));
            rows.push(SettingUpdate::new("system", "apacheconf_htpasswddir", "/etc/lighttpd/froxlor-htpasswd/"));
            rows.push(SettingUpdate::new("system", "apachereload_command", "/etc/init.d/lighttpd reload"));
            rows.push(SettingUpdate::new("system", "ssl_cert_file", "/etc/lighttpd/lighttpd.pem"));
            rows.push(SettingUpdate::new("phpfpm", "fastcgi_ipcdir", "/var/run/lighttpd/"));
        }
        WebServer::Nginx => {
            rows.push(SettingUpdate::new("system", "apacheconf_vhost", "/etc/nginx/sites-enabled/"));
            rows.push(SettingUpdate::new("system", "apacheconf_diroptions", "/etc/nginx/sites-enabled/"));
            rows.push(SettingUpdate::new("system", "apacheconf_htpasswddir", "/etc/nginx/froxlor-htpasswd/"));
            rows.push(SettingUpdate::new("system", "apachereload_command", "/etc/init.d/nginx reload"));
            rows.push(SettingUpdate::new("system", "ssl_cert_file", "/etc/nginx/nginx.pem"));
            rows.push(SettingUpdate::new("phpfpm", "fastcgi_ipcdir", "/var/run/"));
        }
    }

    rows.push(SettingUpdate::new(
        "admin",
        "show_news_feed",
        if config.activate_newsfeed { "1" } else { "0" },
    ));
    rows.push(SettingUpdate::new(
        "system",
        "letsencryptchallengepath",
        basepath.to_string_lossy().into_owned(),
    ));
    rows.push(SettingUpdate::new("system", "lastcronrun", now_ts.to_string()));
    rows
}

/// Unix timestamp of `hour`:00 local time on the day of `now`.
fn today_at<Tz: TimeZone>(now: &DateTime<Tz>, hour: u32) -> i64 {
    let time = NaiveTime::from_hms_opt(hour, 0, 0).unwrap_or_default();
    let naive = now.date_naive().and_time(time);
    match now.timezone().from_local_datetime(&naive).earliest() {
        Some(local) => local.timestamp(),
        // Nonexistent local time (DST gap): fall back to the UTC reading of the wall clock.
        None => naive.and_utc().timestamp(),
    }
}

/// Initial `lastrun` per cron script: traffic at midnight, ticket jobs at 01:00.
pub fn cron_lastruns<Tz: TimeZone>(now: &DateTime<Tz>) -> Vec<(&'static str, i64)> {
    let midnight = today_at(now, 0);
    let one_am = today_at(now, 1);
    vec![
        ("cron_traffic.php", midnight),
        ("cron_used_tickets_reset.php", one_am),
        ("cron_ticketarchive.php", one_am),
    ]
}

/// `$2y$` bcrypt hash as produced by PHP's password_hash.
pub fn hash_admin_password(password: &str) -> Result<String, bcrypt::BcryptError> {
    let parts = bcrypt::hash_with_result(password, bcrypt::DEFAULT_COST)?;
    Ok(parts.format_for_version(bcrypt::Version::TwoY))
}

async fn write_settings<Tz: TimeZone>(
    session: &mut dyn SqlSession,
    config: &InstallationConfig,
    access_hosts: &AccessHostSet,
    basepath: &Path,
    now: &DateTime<Tz>,
) -> Result<(), DbError> {
    for row in settings_updates(config, access_hosts, basepath, now.timestamp()) {
        let params = [
            SqlValue::from(row.value),
            SqlValue::from(row.group),
            SqlValue::from(row.varname),
        ];
        session.execute_with(UPDATE_SETTING, &params).await?;
    }

    for (cronfile, lastrun) in cron_lastruns(now) {
        let params = [SqlValue::Int(lastrun), SqlValue::from(cronfile)];
        session.execute_with(UPDATE_CRON_LASTRUN, &params).await?;
    }

    session
        .execute_with(INSERT_REBUILD_TASK, &[SqlValue::Int(TASK_REBUILD_CRON)])
        .await?;
    Ok(())
}

async fn write_default_ip(
    session: &mut dyn SqlSession,
    config: &InstallationConfig,
) -> Result<u64, DbError> {
    let params = [SqlValue::from(config.serverip.to_string()), SqlValue::Int(80)];
    let inserted = session.execute_with(INSERT_DEFAULT_IP, &params).await?;

    let params = [
        SqlValue::from(inserted.last_insert_id.to_string()),
        SqlValue::from("system"),
        SqlValue::from("defaultip"),
    ];
    session.execute_with(UPDATE_SETTING, &params).await?;
    Ok(inserted.last_insert_id)
}

async fn write_admin(
    session: &mut dyn SqlSession,
    config: &InstallationConfig,
) -> Result<(), String> {
    let hash = hash_admin_password(&config.admin_pass)
        .map_err(|e| format!("Failed to hash admin password: {}", e))?;
    let params = [
        SqlValue::from(config.admin_user.as_str()),
        SqlValue::from(hash),
        SqlValue::from(config.admin_email()),
        SqlValue::from(DEFAULT_LANGUAGE),
    ];
    session
        .execute_with(INSERT_ADMIN, &params)
        .await
        .map(|_| ())
        .map_err(|e| e.to_string())
}

async fn abort(session: &mut dyn SqlSession, results: &mut Vec<CheckResult>, row: CheckResult) {
    error!(
        "[PHASE: seeding] [STEP: {}] {}; rolling back",
        row.label, row.message
    );
    results.push(row);
    if let Err(e) = session.rollback().await {
        error!("[PHASE: seeding] [STEP: rollback] Rollback failed: {}", e);
    }
}

/// Write settings, entries and the admin user in one transaction. Stops at the first fatal row.
pub async fn seed<Tz: TimeZone>(
    session: &mut dyn SqlSession,
    config: &InstallationConfig,
    access_hosts: &AccessHostSet,
    basepath: &Path,
    now: &DateTime<Tz>,
) -> Vec<CheckResult> {
    let mut results = Vec::new();

    if let Err(e) = session.begin().await {
        results.push(CheckResult::fatal(SETTINGS_LABEL, e.to_string()));
        return results;
    }

    if let Err(e) = write_settings(session, config, access_hosts, basepath, now).await {
        abort(session, &mut results, CheckResult::fatal(SETTINGS_LABEL, e.to_string())).await;
        return results;
    }
    results.push(CheckResult::ok(SETTINGS_LABEL, "OK"));

    match write_default_ip(session, config).await {
        Ok(id) => {
            info!("[PHASE: seeding] [STEP: entries] Default IP/port row created (id={})", id);
            results.push(CheckResult::ok(ENTRIES_LABEL, "OK"));
        }
        Err(e) => {
            abort(session, &mut results, CheckResult::fatal(ENTRIES_LABEL, e.to_string())).await;
            return results;
        }
    }

    if let Err(message) = write_admin(session, config).await {
        abort(session, &mut results, CheckResult::fatal(ADMIN_LABEL, message)).await;
        return results;
    }
    results.push(CheckResult::ok(ADMIN_LABEL, "OK"));

    if let Err(e) = session.commit().await {
        abort(session, &mut results, CheckResult::fatal(COMMIT_LABEL, e.to_string())).await;
        return results;
    }

    info!(
        "[PHASE: seeding] [STEP: commit] Install data committed (admin={})",
        config.admin_user
    );
    results
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::connection::testing::{RecordingSession, SessionLog};
    use crate::database::provisioning::tests::sample_config;
    use chrono::{FixedOffset, Timelike};
    use std::sync::{Arc, Mutex};

    fn hosts() -> AccessHostSet {
        AccessHostSet::normalize("127.0.0.1", "10.0.0.5")
    }

    fn find<'a>(rows: &'a [SettingUpdate], group: &str, varname: &str) -> Vec<&'a str> {
        rows.iter()
            .filter(|r| r.group == group && r.varname == varname)
            .map(|r| r.value.as_str())
            .collect()
    }

    #[test]
    fn apache24_is_stored_as_apache2_with_flag() {
        let config = sample_config();
        let rows = settings_updates(&config, &hosts(), Path::new("/var/www/froxlor"), 1_700_000_000);

        assert_eq!(find(&rows, "system", "webserver"), vec!["apache24", "apache2"]);
        assert_eq!(find(&rows, "system", "apache24"), vec!["1"]);
        assert_eq!(
            find(&rows, "system", "mysql_access_host"),
            vec!["127.0.0.1,localhost,10.0.0.5"]
        );
        assert_eq!(find(&rows, "panel", "adminmail"), vec!["admin@panel.example.com"]);
        assert_eq!(find(&rows, "system", "letsencryptchallengepath"), vec!["/var/www/froxlor"]);
        assert_eq!(find(&rows, "system", "lastcronrun"), vec!["1700000000"]);
        assert_eq!(find(&rows, "admin", "show_news_feed"), vec!["1"]);
    }

    #[test]
    fn nginx_and_lighttpd_get_their_paths() {
        let mut config = sample_config();
        config.webserver = WebServer::Nginx;
        config.activate_newsfeed = false;
        let rows = settings_updates(&config, &hosts(), Path::new("/srv/froxlor"), 0);
        assert_eq!(find(&rows, "system", "apachereload_command"), vec!["/etc/init.d/nginx reload"]);
        assert_eq!(find(&rows, "phpfpm", "fastcgi_ipcdir"), vec!["/var/run/"]);
        assert_eq!(find(&rows, "admin", "show_news_feed"), vec!["0"]);
        assert!(find(&rows, "system", "apache24").is_empty());

        config.webserver = WebServer::Lighttpd;
        let rows = settings_updates(&config, &hosts(), Path::new("/srv/froxlor"), 0);
        assert_eq!(find(&rows, "system", "ssl_cert_file"), vec!["/etc/lighttpd/lighttpd.pem"]);
        assert_eq!(find(&rows, "system", "webserver"), vec!["lighttpd"]);
    }

    #[test]
    fn plain_apache2_has_no_extra_rows() {
        let mut config = sample_config();
        config.webserver = WebServer::Apache2;
        let rows = settings_updates(&config, &hosts(), Path::new("/srv/froxlor"), 0);
        assert_eq!(rows.len(), 8 + 3);
    }

    #[test]
    fn cron_times_are_local_midnight_and_one_am() {
        let tz = FixedOffset::east_opt(2 * 3600).expect("offset");
        let now = tz
            .with_ymd_and_hms(2026, 5, 14, 15, 42, 7)
            .single()
            .expect("valid");
        let runs = cron_lastruns(&now);

        let midnight = tz.timestamp_opt(runs[0].1, 0).single().expect("ts");
        assert_eq!(runs[0].0, "cron_traffic.php");
        assert_eq!((midnight.hour(), midnight.minute()), (0, 0));
        assert_eq!(midnight.date_naive(), now.date_naive());

        assert_eq!(runs[1].1 - runs[0].1, 3600);
        assert_eq!(runs[1].1, runs[2].1);
    }

    #[test]
    fn admin_hash_is_php_compatible_bcrypt() {
        let hash = hash_admin_password("admin-pw").expect("hash");
        assert!(hash.starts_with("$2y$"), "{}", hash);
        assert!(bcrypt::verify("admin-pw", &hash).expect("verify"));
    }

    #[tokio::test]
    async fn seed_runs_in_one_transaction() {
        let log = Arc::new(Mutex::new(SessionLog::default()));
        let mut session = RecordingSession::new(Arc::clone(&log));
        let now = chrono::Utc::now();

        let rows = seed(&mut session, &sample_config(), &hosts(), Path::new("/srv/froxlor"), &now).await;
        assert_eq!(
            rows,
            vec![
                CheckResult::ok(SETTINGS_LABEL, "OK"),
                CheckResult::ok(ENTRIES_LABEL, "OK"),
                CheckResult::ok(ADMIN_LABEL, "OK"),
            ]
        );

        let log = log.lock().expect("lock");
        assert_eq!(log.statements.first().map(String::as_str), Some("START TRANSACTION"));
        assert_eq!(log.statements.last().map(String::as_str), Some("COMMIT"));
        assert!(log.statements.iter().any(|s| s == INSERT_REBUILD_TASK));

        // defaultip points at the inserted panel_ipsandports row
        let ip_idx = log
            .statements
            .iter()
            .position(|s| s == INSERT_DEFAULT_IP)
            .expect("ip insert");
        assert_eq!(
            log.params[ip_idx + 1],
            vec![
                SqlValue::from(format!("{}", ip_idx)),
                SqlValue::from("system"),
                SqlValue::from("defaultip")
            ]
        );
    }

    #[tokio::test]
    async fn admin_failure_rolls_back() {
        let log = Arc::new(Mutex::new(SessionLog::default()));
        let mut session = RecordingSession::new(Arc::clone(&log))
            .failing_on("panel_admins", "Duplicate entry 'admin' for key 'loginname'");
        let now = chrono::Utc::now();

        let rows = seed(&mut session, &sample_config(), &hosts(), Path::new("/srv/froxlor"), &now).await;
        assert_eq!(rows.len(), 3);
        assert!(rows[2].is_fatal());
        assert_eq!(rows[2].label, ADMIN_LABEL);

        let log = log.lock().expect("lock");
        assert_eq!(log.statements.last().map(String::as_str), Some("ROLLBACK"));
        assert!(!log.statements.iter().any(|s| s == "COMMIT"));
    }
}
