// Schema import
// Executes the panel's schema dump statement by statement on the unprivileged connection.
// Fail-fast: the first failing statement stops the import, nothing after it is executed.

use anyhow::{Context, Result};
use log::{error, info};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use std::time::Instant;
use tokio::fs;

use crate::database::connection::{DatabaseConnector, SqlSession};
use crate::database::sql_script::{remove_remarks, split_sql_file};
use crate::models::requests::InstallationConfig;
use crate::models::responses::CheckResult;

pub const CONNECT_LABEL: &str = "Testing connection to new database";
pub const IMPORT_LABEL: &str = "Importing data";

/// Longest statement excerpt shown to the operator when a statement fails.
const EXCERPT_CHARS: usize = 200;

fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    let digest = hasher.finalize();
    digest.iter().map(|b| format!("{:02x}", b)).collect()
}

/// Non-blank statements of a raw dump, in file order.
pub fn prepare_statements(raw: &str) -> Vec<String> {
    split_sql_file(&remove_remarks(raw), ";")
        .into_iter()
        .filter(|s| !s.trim().is_empty())
        .collect()
}

fn excerpt(statement: &str) -> String {
    let trimmed = statement.trim();
    if trimmed.chars().count() <= EXCERPT_CHARS {
        return trimmed.to_string();
    }
    let head: String = trimmed.chars().take(EXCERPT_CHARS).collect();
    format!("{}...", head)
}

/// Execute `statements` in order on `session`, stopping at the first failure.
pub async fn import_statements(session: &mut dyn SqlSession, statements: &[String]) -> CheckResult {
    let started = Instant::now();
    let total = statements.len();

    for (i, statement) in statements.iter().enumerate() {
        if let Err(e) = session.execute(statement).await {
            error!(
                "[PHASE: schema_import] [STEP: execute] Statement {} of {} failed: {}",
                i + 1,
                total,
                e
            );
            return CheckResult::fatal(IMPORT_LABEL, e.to_string()).with_description(format!(
                "Failed at statement {} of {}:\n{}",
                i + 1,
                total,
                excerpt(statement)
            ));
        }
    }

    info!(
        "[PHASE: schema_import] [STEP: execute] Imported {} statements (duration_ms={})",
        total,
        started.elapsed().as_millis()
    );
    CheckResult::ok(IMPORT_LABEL, format!("OK ({} statements)", total))
}

pub struct SchemaImporter {
    schema_path: PathBuf,
}

impl SchemaImporter {
    pub fn new(schema_path: PathBuf) -> Self {
        Self { schema_path }
    }

    pub fn schema_path(&self) -> &Path {
        &self.schema_path
    }

    /// Read and split the schema dump.
    pub async fn load(&self) -> Result<Vec<String>> {
        let raw = fs::read(&self.schema_path)
            .await
            .with_context(|| format!("Failed to read schema file {:?}", self.schema_path))?;
        info!(
            "[PHASE: schema_import] [STEP: load] Schema loaded (path={:?}, bytes={}, sha256={})",
            self.schema_path,
            raw.len(),
            sha256_hex(&raw)
        );
        let text = String::from_utf8_lossy(&raw);
        Ok(prepare_statements(&text))
    }

    /// Connect to the new database as the unprivileged role and import the schema.
    ///
    /// Rows: connection test, then the import itself (only if the connection worked).
    pub async fn run(
        &self,
        connector: &dyn DatabaseConnector,
        config: &InstallationConfig,
    ) -> Vec<CheckResult> {
        let mut results = Vec::new();

        let mut session = match connector
            .connect_unprivileged(
                &config.mysql_host,
                &config.mysql_unpriv_user,
                &config.mysql_unpriv_pass,
                &config.mysql_database,
            )
            .await
        {
            Ok(session) => {
                results.push(CheckResult::ok(CONNECT_LABEL, "OK"));
                session
            }
            Err(e) => {
                error!(
                    "[PHASE: schema_import] [STEP: connect] Unprivileged connection failed: {}",
                    e
                );
                results.push(CheckResult::fatal(CONNECT_LABEL, e.to_string()));
                return results;
            }
        };

        let statements = match self.load().await {
            Ok(statements) => statements,
            Err(e) => {
                error!("[PHASE: schema_import] [STEP: load] {:#}", e);
                results.push(CheckResult::fatal(IMPORT_LABEL, format!("{:#}", e)));
                return results;
            }
        };

        results.push(import_statements(session.as_mut(), &statements).await);
        results
    }
}
