// Install data models
// Field names double as environment variable names (CLI) and form parameter names (UI).

use serde::{Deserialize, Serialize};
use std::net::IpAddr;

// =========================
// Fields
// =========================

/// Every recognized install field, in collection order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstallField {
    MysqlHost,
    MysqlDatabase,
    MysqlUnprivUser,
    MysqlUnprivPass,
    MysqlRootUser,
    MysqlRootPass,
    AdminUser,
    AdminPass,
    ActivateNewsfeed,
    Httpuser,
    Httpgroup,
    Servername,
    Serverip,
    Webserver,
}

impl InstallField {
    pub const ALL: [InstallField; 14] = [
        InstallField::MysqlHost,
        InstallField::MysqlDatabase,
        InstallField::MysqlUnprivUser,
        InstallField::MysqlUnprivPass,
        InstallField::MysqlRootUser,
        InstallField::MysqlRootPass,
        InstallField::AdminUser,
        InstallField::AdminPass,
        InstallField::ActivateNewsfeed,
        InstallField::Httpuser,
        InstallField::Httpgroup,
        InstallField::Servername,
        InstallField::Serverip,
        InstallField::Webserver,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            InstallField::MysqlHost => "mysql_host",
            InstallField::MysqlDatabase => "mysql_database",
            InstallField::MysqlUnprivUser => "mysql_unpriv_user",
            InstallField::MysqlUnprivPass => "mysql_unpriv_pass",
            InstallField::MysqlRootUser => "mysql_root_user",
            InstallField::MysqlRootPass => "mysql_root_pass",
            InstallField::AdminUser => "admin_user",
            InstallField::AdminPass => "admin_pass",
            InstallField::ActivateNewsfeed => "activate_newsfeed",
            InstallField::Httpuser => "httpuser",
            InstallField::Httpgroup => "httpgroup",
            InstallField::Servername => "servername",
            InstallField::Serverip => "serverip",
            InstallField::Webserver => "webserver",
        }
    }

    pub fn default_value(&self) -> Option<&'static str> {
        match self {
            InstallField::MysqlHost => Some("127.0.0.1"),
            InstallField::MysqlDatabase => Some("froxlor"),
            InstallField::MysqlUnprivUser => Some("froxlor"),
            InstallField::MysqlRootUser => Some("root"),
            InstallField::AdminUser => Some("admin"),
            InstallField::ActivateNewsfeed => Some("1"),
            InstallField::Webserver => Some("apache2"),
            _ => None,
        }
    }

    /// Secret fields are never echoed back to the operator.
    pub fn is_secret(&self) -> bool {
        self.name().ends_with("_pass")
    }
}

impl std::fmt::Display for InstallField {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

// =========================
// Web server kind
// =========================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WebServer {
    Apache2,
    Apache24,
    Lighttpd,
    Nginx,
}

impl WebServer {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "apache2" => Some(WebServer::Apache2),
            "apache24" => Some(WebServer::Apache24),
            "lighttpd" => Some(WebServer::Lighttpd),
            "nginx" => Some(WebServer::Nginx),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            WebServer::Apache2 => "apache2",
            WebServer::Apache24 => "apache24",
            WebServer::Lighttpd => "lighttpd",
            WebServer::Nginx => "nginx",
        }
    }
}

// =========================
// Validated configuration
// =========================

/// Install configuration after every field passed validation. Immutable for the rest of the run.
#[derive(Debug, Clone)]
pub struct InstallationConfig {
    pub mysql_host: String,
    pub mysql_database: String,
    pub mysql_unpriv_user: String,
    pub mysql_unpriv_pass: String,
    pub mysql_root_user: String,
    pub mysql_root_pass: String,
    /// Host pattern the unprivileged role connects from, before normalization.
    pub mysql_access_host: String,
    pub admin_user: String,
    pub admin_pass: String,
    pub activate_newsfeed: bool,
    pub httpuser: String,
    pub httpgroup: String,
    pub servername: String,
    pub serverip: IpAddr,
    pub webserver: WebServer,
}

impl InstallationConfig {
    pub fn admin_email(&self) -> String {
        format!("admin@{}", self.servername)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn secret_fields_are_the_passwords() {
        let secrets: Vec<&str> = InstallField::ALL
            .iter()
            .filter(|f| f.is_secret())
            .map(|f| f.name())
            .collect();
        assert_eq!(
            secrets,
            vec!["mysql_unpriv_pass", "mysql_root_pass", "admin_pass"]
        );
    }

    #[test]
    fn web_server_parse_is_case_insensitive() {
        assert_eq!(WebServer::parse(" Nginx "), Some(WebServer::Nginx));
        assert_eq!(WebServer::parse("apache24"), Some(WebServer::Apache24));
        assert_eq!(WebServer::parse("caddy"), None);
    }
}
