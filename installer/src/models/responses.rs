// Step result models
// Every probe and install step reports exactly one `CheckResult`; the CLI (and any UI layer)
// renders them, the orchestrator only looks at the severity.

use serde::{Deserialize, Serialize};

// =========================
// Severity
// =========================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Ok,
    Warning,
    Fatal,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Ok => "ok",
            Severity::Warning => "warning",
            Severity::Fatal => "fatal",
        }
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// =========================
// CheckResult
// =========================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckResult {
    pub label: String,
    pub severity: Severity,
    pub message: String,
    /// Remediation hint shown below the status line.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl CheckResult {
    pub fn new(label: impl Into<String>, severity: Severity, message: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            severity,
            message: message.into(),
            description: None,
        }
    }

    pub fn ok(label: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(label, Severity::Ok, message)
    }

    pub fn warning(label: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(label, Severity::Warning, message)
    }

    pub fn fatal(label: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(label, Severity::Fatal, message)
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn is_fatal(&self) -> bool {
        self.severity == Severity::Fatal
    }
}

/// True when any row would halt the pipeline.
pub fn has_fatal(results: &[CheckResult]) -> bool {
    results.iter().any(CheckResult::is_fatal)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn has_fatal_ignores_warnings() {
        let rows = vec![
            CheckResult::ok("a", "fine"),
            CheckResult::warning("b", "meh").with_description("install it"),
        ];
        assert!(!has_fatal(&rows));

        let mut rows = rows;
        rows.push(CheckResult::fatal("c", "broken"));
        assert!(has_fatal(&rows));
    }

    #[test]
    fn check_result_serializes_lowercase_severity() {
        let row = CheckResult::warning("open_basedir", "activated");
        let json = serde_json::to_string(&row).expect("serialize");
        assert!(json.contains("\"severity\":\"warning\""), "{}", json);
        assert!(!json.contains("description"), "{}", json);
    }
}
