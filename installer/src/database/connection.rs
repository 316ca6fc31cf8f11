// Database connection management
//
// DatabaseConnector / SqlSession traits separate the install steps from the MySQL driver so every
// step can be tested deterministically without a server.

use async_trait::async_trait;
use log::{debug, info, warn};
use sqlx::mysql::{MySqlConnectOptions, MySqlConnection};
use sqlx::ConnectOptions;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::time::timeout;

/// SQLSTATE reported by MySQL/MariaDB for rejected credentials (error 1045).
const SQLSTATE_ACCESS_DENIED: &str = "28000";

/// Session settings applied right after connecting. Lenient mode, engine substitution rejected.
const SESSION_SQL_MODE: &str = "SET SESSION sql_mode = 'NO_ENGINE_SUBSTITUTION'";

const LOCAL_SOCKETS: [&str; 3] = [
    "/var/run/mysqld/mysqld.sock",
    "/run/mysqld/mysqld.sock",
    "/tmp/mysql.sock",
];

// =============================================================================
// Errors
// =============================================================================

/// Error surfaced by the database seam. `Display` is the verbatim driver message.
#[derive(Debug, Clone, Error)]
pub enum DbError {
    #[error("{message}")]
    Connect {
        message: String,
        access_denied: bool,
    },
    #[error("Connection timed out after {}s", .0.as_secs())]
    Timeout(Duration),
    #[error("{0}")]
    Query(String),
}

impl DbError {
    pub fn is_access_denied(&self) -> bool {
        matches!(
            self,
            DbError::Connect {
                access_denied: true,
                ..
            }
        )
    }

    fn connect(e: sqlx::Error) -> Self {
        let access_denied = match &e {
            sqlx::Error::Database(db) => db.code().as_deref() == Some(SQLSTATE_ACCESS_DENIED),
            _ => false,
        };
        DbError::Connect {
            message: driver_message(&e),
            access_denied,
        }
    }

    fn query(e: sqlx::Error) -> Self {
        DbError::Query(driver_message(&e))
    }
}

/// Message as the server reported it, without sqlx's "error returned from database:" prefix.
fn driver_message(e: &sqlx::Error) -> String {
    match e {
        sqlx::Error::Database(db) => db.message().to_string(),
        other => other.to_string(),
    }
}

// =============================================================================
// Session / connector traits
// =============================================================================

/// Positional parameter for prepared statements.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SqlValue {
    Text(String),
    Int(i64),
}

impl From<&str> for SqlValue {
    fn from(v: &str) -> Self {
        SqlValue::Text(v.to_string())
    }
}

impl From<String> for SqlValue {
    fn from(v: String) -> Self {
        SqlValue::Text(v)
    }
}

impl From<i64> for SqlValue {
    fn from(v: i64) -> Self {
        SqlValue::Int(v)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExecOutcome {
    pub rows_affected: u64,
    pub last_insert_id: u64,
}

/// One open database connection.
#[async_trait]
pub trait SqlSession: Send {
    /// Execute a statement verbatim (no parameters, no prepare).
    async fn execute(&mut self, sql: &str) -> Result<(), DbError>;

    /// Execute a prepared statement with positional `?` parameters.
    async fn execute_with(&mut self, sql: &str, params: &[SqlValue])
        -> Result<ExecOutcome, DbError>;

    /// First column of the first row, if any.
    async fn fetch_optional_string(
        &mut self,
        sql: &str,
        params: &[SqlValue],
    ) -> Result<Option<String>, DbError>;

    async fn server_version(&mut self) -> Result<String, DbError> {
        Ok(self
            .fetch_optional_string("SELECT VERSION()", &[])
            .await?
            .unwrap_or_default())
    }

    async fn begin(&mut self) -> Result<(), DbError> {
        self.execute("START TRANSACTION").await
    }

    async fn commit(&mut self) -> Result<(), DbError> {
        self.execute("COMMIT").await
    }

    async fn rollback(&mut self) -> Result<(), DbError> {
        self.execute("ROLLBACK").await
    }
}

/// Opens sessions. Production code uses `MySqlConnector`; tests use in-memory stubs.
#[async_trait]
pub trait DatabaseConnector: Send + Sync {
    /// Server-level connection (no default database).
    async fn connect_privileged(
        &self,
        host: &str,
        user: &str,
        password: &str,
    ) -> Result<Box<dyn SqlSession>, DbError>;

    /// Connection bound to `database`.
    async fn connect_unprivileged(
        &self,
        host: &str,
        user: &str,
        password: &str,
        database: &str,
    ) -> Result<Box<dyn SqlSession>, DbError>;
}

// =============================================================================
// MySQL implementation (sqlx)
// =============================================================================

pub struct MySqlSession {
    conn: MySqlConnection,
}

fn bind_all<'q>(
    mut query: sqlx::query::Query<'q, sqlx::MySql, sqlx::mysql::MySqlArguments>,
    params: &'q [SqlValue],
) -> sqlx::query::Query<'q, sqlx::MySql, sqlx::mysql::MySqlArguments> {
    for p in params {
        query = match p {
            SqlValue::Text(s) => query.bind(s.as_str()),
            SqlValue::Int(i) => query.bind(*i),
        };
    }
    query
}

#[async_trait]
impl SqlSession for MySqlSession {
    async fn execute(&mut self, sql: &str) -> Result<(), DbError> {
        let conn: &mut MySqlConnection = &mut self.conn;
        sqlx::Executor::execute(conn, sqlx::raw_sql(sql))
            .await
            .map(|_| ())
            .map_err(DbError::query)
    }

    async fn execute_with(
        &mut self,
        sql: &str,
        params: &[SqlValue],
    ) -> Result<ExecOutcome, DbError> {
        let res = bind_all(sqlx::query(sql), params)
            .execute(&mut self.conn)
            .await
            .map_err(DbError::query)?;
        Ok(ExecOutcome {
            rows_affected: res.rows_affected(),
            last_insert_id: res.last_insert_id(),
        })
    }

    async fn fetch_optional_string(
        &mut self,
        sql: &str,
        params: &[SqlValue],
    ) -> Result<Option<String>, DbError> {
        use sqlx::Row;

        let row = bind_all(sqlx::query(sql), params)
            .fetch_optional(&mut self.conn)
            .await
            .map_err(DbError::query)?;
        match row {
            Some(row) => row.try_get::<String, _>(0).map(Some).map_err(DbError::query),
            None => Ok(None),
        }
    }
}

/// Where a connection goes: the local socket or a TCP host with an optional port.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectTarget {
    Socket(PathBuf),
    Tcp { host: String, port: Option<u16> },
}

fn local_socket() -> Option<&'static Path> {
    LOCAL_SOCKETS.iter().map(Path::new).find(|p| p.exists())
}

/// Resolve `host` (`name`, `name:port`, IPv6 literal). `localhost` means the local socket
/// when one exists.
pub fn connect_target(host: &str, socket: Option<&Path>) -> ConnectTarget {
    if host.eq_ignore_ascii_case("localhost") {
        if let Some(socket) = socket {
            return ConnectTarget::Socket(socket.to_path_buf());
        }
    }

    match host.rsplit_once(':') {
        Some((h, port)) if !h.contains(':') => match port.parse::<u16>() {
            Ok(port) => ConnectTarget::Tcp {
                host: h.to_string(),
                port: Some(port),
            },
            Err(_) => ConnectTarget::Tcp {
                host: host.to_string(),
                port: None,
            },
        },
        _ => ConnectTarget::Tcp {
            host: host.to_string(),
            port: None,
        },
    }
}

/// Await a connect future for at most `limit`.
async fn bounded_connect<T, F>(limit: Duration, connect: F) -> Result<T, DbError>
where
    F: std::future::Future<Output = Result<T, sqlx::Error>>,
{
    match timeout(limit, connect).await {
        Ok(Ok(conn)) => Ok(conn),
        Ok(Err(e)) => Err(DbError::connect(e)),
        Err(_) => Err(DbError::Timeout(limit)),
    }
}

/// Production connector: one plain connection per call, bounded by `connect_timeout`.
pub struct MySqlConnector {
    connect_timeout: Duration,
}

impl MySqlConnector {
    pub fn new(connect_timeout: Duration) -> Self {
        Self { connect_timeout }
    }

    fn options(host: &str, user: &str, password: &str) -> MySqlConnectOptions {
        let opts = MySqlConnectOptions::new()
            .username(user)
            .password(password)
            .charset("utf8")
            .pipes_as_concat(false);

        match connect_target(host, local_socket()) {
            ConnectTarget::Socket(socket) => opts.socket(socket),
            ConnectTarget::Tcp {
                host,
                port: Some(port),
            } => opts.host(&host).port(port),
            ConnectTarget::Tcp { host, port: None } => opts.host(&host),
        }
    }

    async fn open(&self, opts: MySqlConnectOptions, label: &str) -> Result<MySqlSession, DbError> {
        let started = Instant::now();
        debug!(
            "[PHASE: provisioning] [STEP: connect] Opening {} connection (timeout_ms={})",
            label,
            self.connect_timeout.as_millis()
        );

        let conn = match bounded_connect(self.connect_timeout, opts.connect()).await {
            Ok(conn) => conn,
            Err(err) => {
                warn!(
                    "[PHASE: provisioning] [STEP: connect] {} connection failed (access_denied={}, err={})",
                    label,
                    err.is_access_denied(),
                    err
                );
                return Err(err);
            }
        };

        let mut session = MySqlSession { conn };
        session.execute(SESSION_SQL_MODE).await?;

        info!(
            "[PHASE: provisioning] [STEP: connect] {} connection established (duration_ms={})",
            label,
            started.elapsed().as_millis()
        );
        Ok(session)
    }
}

#[async_trait]
impl DatabaseConnector for MySqlConnector {
    async fn connect_privileged(
        &self,
        host: &str,
        user: &str,
        password: &str,
    ) -> Result<Box<dyn SqlSession>, DbError> {
        let session = self
            .open(Self::options(host, user, password), "privileged")
            .await?;
        Ok(Box::new(session))
    }

    async fn connect_unprivileged(
        &self,
        host: &str,
        user: &str,
        password: &str,
        database: &str,
    ) -> Result<Box<dyn SqlSession>, DbError> {
        let opts = Self::options(host, user, password).database(database);
        let session = self.open(opts, "unprivileged").await?;
        Ok(Box::new(session))
    }
}

// =============================================================================
// In-memory doubles shared by the step tests
// =============================================================================

#[cfg(test)]
pub mod testing {
    use super::*;
    use std::collections::HashMap;
    use std::sync::{Arc, Mutex};

    /// Everything a `RecordingSession` was asked to run, in order.
    #[derive(Debug, Default)]
    pub struct SessionLog {
        pub statements: Vec<String>,
        pub params: Vec<Vec<SqlValue>>,
    }

    /// Session that records statements and fails the ones matching `fail_on`.
    pub struct RecordingSession {
        pub log: Arc<Mutex<SessionLog>>,
        /// Substring → driver message.
        pub fail_on: Vec<(String, String)>,
        /// Substring → first-column answer for `fetch_optional_string`.
        pub answers: HashMap<String, String>,
        next_insert_id: u64,
    }

    impl RecordingSession {
        pub fn new(log: Arc<Mutex<SessionLog>>) -> Self {
            Self {
                log,
                fail_on: Vec::new(),
                answers: HashMap::new(),
                next_insert_id: 1,
            }
        }

        pub fn failing_on(mut self, needle: &str, message: &str) -> Self {
            self.fail_on.push((needle.to_string(), message.to_string()));
            self
        }

        pub fn answering(mut self, needle: &str, answer: &str) -> Self {
            self.answers.insert(needle.to_string(), answer.to_string());
            self
        }

        fn record(&mut self, sql: &str, params: &[SqlValue]) -> Result<(), DbError> {
            let mut log = self.log.lock().expect("session log poisoned");
            log.statements.push(sql.to_string());
            log.params.push(params.to_vec());
            drop(log);
            for (needle, message) in &self.fail_on {
                if sql.contains(needle.as_str()) {
                    return Err(DbError::Query(message.clone()));
                }
            }
            Ok(())
        }
    }

    #[async_trait]
    impl SqlSession for RecordingSession {
        async fn execute(&mut self, sql: &str) -> Result<(), DbError> {
            self.record(sql, &[])
        }

        async fn execute_with(
            &mut self,
            sql: &str,
            params: &[SqlValue],
        ) -> Result<ExecOutcome, DbError> {
            self.record(sql, params)?;
            let id = self.next_insert_id;
            self.next_insert_id += 1;
            Ok(ExecOutcome {
                rows_affected: 1,
                last_insert_id: id,
            })
        }

        async fn fetch_optional_string(
            &mut self,
            sql: &str,
            params: &[SqlValue],
        ) -> Result<Option<String>, DbError> {
            self.record(sql, params)?;
            Ok(self
                .answers
                .iter()
                .find(|(needle, _)| sql.contains(needle.as_str()))
                .map(|(_, answer)| answer.clone()))
        }
    }

    type SessionFactory = Box<dyn Fn() -> RecordingSession + Send + Sync>;

    /// Connector handing out `RecordingSession`s that share one log.
    pub struct StubConnector {
        pub log: Arc<Mutex<SessionLog>>,
        /// Passwords the privileged account accepts; empty = any.
        pub root_passwords: Vec<String>,
        pub unprivileged_error: Option<DbError>,
        pub attempts: Arc<Mutex<Vec<String>>>,
        factory: SessionFactory,
    }

    impl StubConnector {
        pub fn new() -> Self {
            let log = Arc::new(Mutex::new(SessionLog::default()));
            let shared = Arc::clone(&log);
            Self {
                log,
                root_passwords: Vec::new(),
                unprivileged_error: None,
                attempts: Arc::new(Mutex::new(Vec::new())),
                factory: Box::new(move || RecordingSession::new(Arc::clone(&shared))),
            }
        }

        /// Customize every session handed out (failure injection, canned answers).
        pub fn with_sessions<F>(mut self, configure: F) -> Self
        where
            F: Fn(RecordingSession) -> RecordingSession + Send + Sync + 'static,
        {
            let shared = Arc::clone(&self.log);
            self.factory = Box::new(move || configure(RecordingSession::new(Arc::clone(&shared))));
            self
        }

        pub fn statements(&self) -> Vec<String> {
            self.log.lock().expect("session log poisoned").statements.clone()
        }
    }

    #[async_trait]
    impl DatabaseConnector for StubConnector {
        async fn connect_privileged(
            &self,
            _host: &str,
            user: &str,
            password: &str,
        ) -> Result<Box<dyn SqlSession>, DbError> {
            self.attempts
                .lock()
                .expect("attempts poisoned")
                .push(format!("privileged:{}:{}", user, password));
            if !self.root_passwords.is_empty() && !self.root_passwords.iter().any(|p| p == password)
            {
                return Err(DbError::Connect {
                    message: format!(
                        "Access denied for user '{}'@'localhost' (using password: {})",
                        user,
                        if password.is_empty() { "NO" } else { "YES" }
                    ),
                    access_denied: true,
                });
            }
            Ok(Box::new((self.factory)()))
        }

        async fn connect_unprivileged(
            &self,
            _host: &str,
            user: &str,
            _password: &str,
            database: &str,
        ) -> Result<Box<dyn SqlSession>, DbError> {
            self.attempts
                .lock()
                .expect("attempts poisoned")
                .push(format!("unprivileged:{}:{}", user, database));
            if let Some(err) = &self.unprivileged_error {
                return Err(err.clone());
            }
            Ok(Box::new((self.factory)()))
        }
    }
}
