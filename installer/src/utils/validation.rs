// Input validation and SQL quoting utilities

use std::net::IpAddr;

/// Parse an IPv4 or IPv6 literal (no brackets, no port).
pub fn parse_ip_literal(value: &str) -> Option<IpAddr> {
    value.trim().parse::<IpAddr>().ok()
}

pub fn is_ip_literal(value: &str) -> bool {
    parse_ip_literal(value).is_some()
}

/// Backtick-quote a MySQL identifier, doubling embedded backticks.
///
/// The quoted identifier names exactly `name`, the same value the existence check, the dump
/// helper and the credentials file receive.
pub fn quote_mysql_identifier(name: &str) -> String {
    format!("`{}`", name.replace('`', "``"))
}

/// Quote a value as a MySQL string literal (backslash and quote escaped).
///
/// Used for account names and passwords in account-management statements, which the server
/// does not accept as prepared-statement parameters.
pub fn quote_mysql_string(value: &str) -> String {
    let mut quoted = String::with_capacity(value.len() + 2);
    quoted.push('\'');
    for c in value.chars() {
        match c {
            '\\' => quoted.push_str("\\\\"),
            '\'' => quoted.push_str("\\'"),
            '\0' => quoted.push_str("\\0"),
            '\n' => quoted.push_str("\\n"),
            '\r' => quoted.push_str("\\r"),
            _ => quoted.push(c),
        }
    }
    quoted.push('\'');
    quoted
}

/// `'user'@'host'` account specifier.
pub fn mysql_account(user: &str, host: &str) -> String {
    format!("{}@{}", quote_mysql_string(user), quote_mysql_string(host))
}

/// Escape a value for a single-quoted PHP string literal (`'` and `\`).
pub fn escape_php_single_quoted(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for c in value.chars() {
        if c == '\'' || c == '\\' {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}
