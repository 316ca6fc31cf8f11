// Install data collection
//
// Reads every install field from a FieldSource (process environment for the CLI, form body for a
// web front end), applies defaults and cross-field validation. Collection always completes; the
// caller decides what to do with the errors.

use log::{debug, info, warn};
use std::collections::{BTreeMap, HashMap};

use crate::models::requests::{InstallField, InstallationConfig, WebServer};
use crate::utils::validation::{is_ip_literal, parse_ip_literal};

pub const ACCESS_HOST_NAME: &str = "mysql_access_host";

pub const ERR_MISSING: &str = "missing";
pub const ERR_SERVERNAME_IS_IP: &str = "must be a FQDN, not an IP address";
pub const ERR_SERVERIP_INVALID: &str = "must be a valid IP address";
pub const ERR_UNPRIV_IS_ROOT: &str = "must not be the root user";
pub const ERR_WEBSERVER_UNKNOWN: &str = "must be one of apache2, apache24, lighttpd, nginx";

// =============================================================================
// Field sources
// =============================================================================

/// Where raw field values come from. Field names are the `InstallField` names.
pub trait FieldSource {
    fn get_field(&self, name: &str) -> Option<String>;
}

/// Reads fields from the process environment (`mysql_host=... froxlor-install --setup`).
#[derive(Debug, Clone, Default)]
pub struct EnvFieldSource {
    prefix: String,
}

impl EnvFieldSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Look fields up as `<prefix><name>`.
    pub fn with_prefix(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }
}

impl FieldSource for EnvFieldSource {
    fn get_field(&self, name: &str) -> Option<String> {
        std::env::var(format!("{}{}", self.prefix, name)).ok()
    }
}

/// Reads fields from an `application/x-www-form-urlencoded` body. Later duplicates win.
#[derive(Debug, Clone, Default)]
pub struct FormFieldSource {
    values: HashMap<String, String>,
}

impl FormFieldSource {
    pub fn from_body(body: &str) -> Self {
        let values = url::form_urlencoded::parse(body.as_bytes())
            .into_owned()
            .collect();
        Self { values }
    }

    pub fn from_pairs<'a>(pairs: impl IntoIterator<Item = (&'a str, &'a str)>) -> Self {
        let values = pairs
            .into_iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Self { values }
    }
}

impl FieldSource for FormFieldSource {
    fn get_field(&self, name: &str) -> Option<String> {
        self.values.get(name).cloned()
    }
}

// =============================================================================
// Collected data
// =============================================================================

/// Field values after defaults, plus the derived access host.
#[derive(Debug, Clone, Default)]
pub struct InstallData {
    values: BTreeMap<InstallField, Option<String>>,
    access_host: Option<String>,
}

impl InstallData {
    pub fn get(&self, field: InstallField) -> Option<&str> {
        self.values.get(&field).and_then(|v| v.as_deref())
    }

    pub fn access_host(&self) -> Option<&str> {
        self.access_host.as_deref()
    }

    /// `(name, value)` in collection order, access host last.
    pub fn entries(&self) -> Vec<(&'static str, Option<&str>)> {
        let mut out: Vec<(&'static str, Option<&str>)> = InstallField::ALL
            .iter()
            .map(|f| (f.name(), self.get(*f)))
            .collect();
        out.push((ACCESS_HOST_NAME, self.access_host()));
        out
    }
}

pub type FieldErrors = BTreeMap<InstallField, String>;

#[derive(Debug, Clone, Default)]
pub struct CollectedInstallData {
    pub data: InstallData,
    pub errors: FieldErrors,
}

impl CollectedInstallData {
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    /// Error text for the field called `name`, if any.
    pub fn error_for(&self, name: &str) -> Option<&str> {
        self.errors
            .iter()
            .find(|(f, _)| f.name() == name)
            .map(|(_, e)| e.as_str())
    }

    /// Typed configuration; only available when collection produced no errors.
    pub fn into_config(self) -> Result<InstallationConfig, FieldErrors> {
        if !self.errors.is_empty() {
            return Err(self.errors);
        }

        let mut errors = FieldErrors::new();
        let mut take = |field: InstallField| -> String {
            match self.data.get(field) {
                Some(v) => v.to_string(),
                None => {
                    errors.insert(field, ERR_MISSING.to_string());
                    String::new()
                }
            }
        };

        let mysql_host = take(InstallField::MysqlHost);
        let mysql_database = take(InstallField::MysqlDatabase);
        let mysql_unpriv_user = take(InstallField::MysqlUnprivUser);
        let mysql_unpriv_pass = take(InstallField::MysqlUnprivPass);
        let mysql_root_user = take(InstallField::MysqlRootUser);
        let mysql_root_pass = take(InstallField::MysqlRootPass);
        let admin_user = take(InstallField::AdminUser);
        let admin_pass = take(InstallField::AdminPass);
        let activate_newsfeed = take(InstallField::ActivateNewsfeed);
        let httpuser = take(InstallField::Httpuser);
        let httpgroup = take(InstallField::Httpgroup);
        let servername = take(InstallField::Servername);
        let serverip = take(InstallField::Serverip);
        let webserver = take(InstallField::Webserver);

        let serverip = parse_ip_literal(&serverip);
        if serverip.is_none() {
            errors.insert(InstallField::Serverip, ERR_SERVERIP_INVALID.to_string());
        }
        let webserver = WebServer::parse(&webserver);
        if webserver.is_none() {
            errors.insert(InstallField::Webserver, ERR_WEBSERVER_UNKNOWN.to_string());
        }

        match (serverip, webserver, errors.is_empty()) {
            (Some(serverip), Some(webserver), true) => Ok(InstallationConfig {
                mysql_access_host: self
                    .data
                    .access_host()
                    .map(str::to_string)
                    .unwrap_or_else(|| serverip.to_string()),
                mysql_host,
                mysql_database,
                mysql_unpriv_user,
                mysql_unpriv_pass,
                mysql_root_user,
                mysql_root_pass,
                admin_user,
                admin_pass,
                activate_newsfeed: activate_newsfeed.trim() != "0",
                httpuser,
                httpgroup,
                servername,
                serverip,
                webserver,
            }),
            _ => Err(errors),
        }
    }
}

// =============================================================================
// Collection
// =============================================================================

/// Raw value, untouched; blank counts as absent.
fn present(source: &dyn FieldSource, name: &str) -> Option<String> {
    source.get_field(name).filter(|v| !v.trim().is_empty())
}

/// Read, default and validate every install field.
pub fn collect_install_data(source: &dyn FieldSource) -> CollectedInstallData {
    let mut collected = CollectedInstallData::default();

    for field in InstallField::ALL {
        let value = match present(source, field.name()) {
            Some(v) => Some(v),
            None => match field.default_value() {
                Some(default) => Some(default.to_string()),
                None => {
                    collected.errors.insert(field, ERR_MISSING.to_string());
                    None
                }
            },
        };
        debug!(
            "[PHASE: config] [STEP: collect] {} = {}",
            field,
            match (&value, field.is_secret()) {
                (None, _) => "<missing>",
                (Some(_), true) => "*****",
                (Some(v), false) => v.as_str(),
            }
        );
        collected.data.values.insert(field, value);
    }

    let access_host = match collected.data.get(InstallField::MysqlHost) {
        Some(host @ ("localhost" | "127.0.0.1")) => Some(host.to_string()),
        _ => collected.data.get(InstallField::Serverip).map(str::to_string),
    };
    collected.data.access_host = access_host;

    if let Some(servername) = collected.data.get(InstallField::Servername) {
        if is_ip_literal(servername) {
            collected
                .errors
                .insert(InstallField::Servername, ERR_SERVERNAME_IS_IP.to_string());
        }
    }

    if let Some(serverip) = collected.data.get(InstallField::Serverip) {
        if !is_ip_literal(serverip) {
            collected
                .errors
                .insert(InstallField::Serverip, ERR_SERVERIP_INVALID.to_string());
        }
    }

    if let (Some(unpriv), Some(root)) = (
        collected.data.get(InstallField::MysqlUnprivUser),
        collected.data.get(InstallField::MysqlRootUser),
    ) {
        if unpriv == root {
            collected
                .errors
                .insert(InstallField::MysqlUnprivUser, ERR_UNPRIV_IS_ROOT.to_string());
        }
    }

    if let Some(webserver) = collected.data.get(InstallField::Webserver) {
        if WebServer::parse(webserver).is_none() {
            collected
                .errors
                .insert(InstallField::Webserver, ERR_WEBSERVER_UNKNOWN.to_string());
        }
    }

    if collected.errors.is_empty() {
        info!("[PHASE: config] [STEP: validate] Install data complete");
    } else {
        warn!(
            "[PHASE: config] [STEP: validate] Install data has {} error(s): {}",
            collected.errors.len(),
            collected
                .errors
                .iter()
                .map(|(f, e)| format!("{}={}", f, e))
                .collect::<Vec<_>>()
                .join(", ")
        );
    }

    collected
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub fn complete_form() -> FormFieldSource {
        FormFieldSource::from_pairs([
            ("mysql_unpriv_pass", "unpriv-pw"),
            ("mysql_root_pass", "root-pw"),
            ("admin_pass", "admin-pw"),
            ("httpuser", "www-data"),
            ("httpgroup", "www-data"),
            ("servername", "panel.example.com"),
            ("serverip", "10.0.0.5"),
        ])
    }

    fn with(extra: &[(&'static str, &'static str)]) -> FormFieldSource {
        let mut form = complete_form();
        for (k, v) in extra {
            form.values.insert(k.to_string(), v.to_string());
        }
        form
    }

    #[test]
    fn complete_input_yields_config_with_defaults() {
        let collected = collect_install_data(&complete_form());
        assert!(collected.is_valid(), "{:?}", collected.errors);
        assert_eq!(collected.data.access_host(), Some("127.0.0.1"));

        let config = collected.into_config().expect("valid config");
        assert_eq!(config.mysql_host, "127.0.0.1");
        assert_eq!(config.mysql_database, "froxlor");
        assert_eq!(config.mysql_root_user, "root");
        assert_eq!(config.admin_user, "admin");
        assert!(config.activate_newsfeed);
        assert_eq!(config.webserver, WebServer::Apache2);
        assert_eq!(config.mysql_access_host, "127.0.0.1");
        assert_eq!(config.serverip.to_string(), "10.0.0.5");
    }

    #[test]
    fn blank_values_count_as_missing() {
        let collected = collect_install_data(&with(&[("admin_pass", "   "), ("mysql_host", "")]));
        assert_eq!(collected.error_for("admin_pass"), Some(ERR_MISSING));
        // blank with a default falls back to the default
        assert_eq!(collected.data.get(InstallField::MysqlHost), Some("127.0.0.1"));
        assert!(collected.into_config().is_err());
    }

    #[test]
    fn present_values_are_kept_verbatim() {
        let collected = collect_install_data(&with(&[("mysql_unpriv_pass", " pw with spaces ")]));
        assert_eq!(
            collected.data.get(InstallField::MysqlUnprivPass),
            Some(" pw with spaces ")
        );
        let config = collected.into_config().expect("valid");
        assert_eq!(config.mysql_unpriv_pass, " pw with spaces ");
    }

    #[test]
    fn zero_is_a_value_not_a_blank() {
        let collected = collect_install_data(&with(&[("activate_newsfeed", "0")]));
        let config = collected.into_config().expect("valid");
        assert!(!config.activate_newsfeed);
    }

    #[test]
    fn every_required_field_without_default_is_reported() {
        let collected = collect_install_data(&FormFieldSource::default());
        let missing: Vec<&str> = collected
            .errors
            .iter()
            .filter(|(_, e)| e.as_str() == ERR_MISSING)
            .map(|(f, _)| f.name())
            .collect();
        assert_eq!(
            missing,
            vec![
                "mysql_unpriv_pass",
                "mysql_root_pass",
                "admin_pass",
                "httpuser",
                "httpgroup",
                "servername",
                "serverip"
            ]
        );
    }

    #[test]
    fn servername_must_not_be_an_ip() {
        let collected = collect_install_data(&with(&[("servername", "10.0.0.9")]));
        assert_eq!(collected.error_for("servername"), Some(ERR_SERVERNAME_IS_IP));
    }

    #[test]
    fn serverip_must_be_an_ip() {
        let collected = collect_install_data(&with(&[("serverip", "not-an-ip")]));
        assert_eq!(collected.error_for("serverip"), Some(ERR_SERVERIP_INVALID));
    }

    #[test]
    fn unprivileged_user_must_differ_from_root() {
        let collected = collect_install_data(&with(&[("mysql_unpriv_user", "root")]));
        assert_eq!(collected.error_for("mysql_unpriv_user"), Some(ERR_UNPRIV_IS_ROOT));
        assert_eq!(collected.error_for("serverip"), None);
    }

    #[test]
    fn unknown_webserver_is_rejected() {
        let collected = collect_install_data(&with(&[("webserver", "caddy")]));
        assert_eq!(collected.error_for("webserver"), Some(ERR_WEBSERVER_UNKNOWN));
    }

    #[test]
    fn remote_database_uses_server_ip_as_access_host() {
        let collected = collect_install_data(&with(&[("mysql_host", "db.internal")]));
        assert_eq!(collected.data.access_host(), Some("10.0.0.5"));

        let collected = collect_install_data(&with(&[("mysql_host", "localhost")]));
        assert_eq!(collected.data.access_host(), Some("localhost"));
    }

    #[test]
    fn entries_list_access_host_last() {
        let collected = collect_install_data(&complete_form());
        let entries = collected.data.entries();
        assert_eq!(entries.len(), InstallField::ALL.len() + 1);
        assert_eq!(entries[0], ("mysql_host", Some("127.0.0.1")));
        assert_eq!(entries.last(), Some(&(ACCESS_HOST_NAME, Some("127.0.0.1"))));
    }

    #[test]
    fn form_body_is_url_decoded() {
        let form = FormFieldSource::from_body("servername=panel.example.com&admin_pass=p%40ss+word&serverip=10.0.0.5");
        assert_eq!(form.get_field("admin_pass").as_deref(), Some("p@ss word"));
        assert_eq!(form.get_field("httpuser"), None);
    }

    #[test]
    fn env_source_reads_prefixed_variables() {
        std::env::set_var("FROXLOR_SETUP_TEST_servername", "env.example.com");
        let source = EnvFieldSource::with_prefix("FROXLOR_SETUP_TEST_");
        assert_eq!(source.get_field("servername").as_deref(), Some("env.example.com"));
        assert_eq!(source.get_field("httpgroup"), None);
        std::env::remove_var("FROXLOR_SETUP_TEST_servername");
    }
}
