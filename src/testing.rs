//! Test doubles shared by the unit tests

use crate::build::BuildGraph;
use crate::connection::{Connection, Connector, TextRow};
use crate::error::{DbError, ExternalProcessError};
use crate::object::{DatabaseObject, ObjectType, TypedDatabaseObject};
use crate::repository::ProcessRunner;
use crate::script::{ParseError, ParsedScript, ScriptAction, ScriptFile, SqlParser};
use crate::walker::ScriptDependencyWalker;
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// An object on the `srv`.`db` test database
pub fn typed(schema: &str, name: &str, object_type: ObjectType) -> TypedDatabaseObject {
    TypedDatabaseObject::new("srv", "db", schema, name, object_type)
}

/// Graph of `(text, script)` pairs on `srv.db`, with `existing` already in the database
pub fn graph_of(scripts: Vec<(&str, FakeScript)>, existing: &[TypedDatabaseObject]) -> BuildGraph {
    let mut parser = FakeParser::default();
    let mut objects = Vec::new();
    for (text, script) in scripts {
        objects.push((text, typed(&script.schema, &script.name, script.object_type)));
        parser.add(text, script);
    }
    let files = objects
        .into_iter()
        .map(|(text, object)| ScriptFile::parse(object, text, &parser))
        .collect();
    let existing: HashSet<DatabaseObject> = existing.iter().map(|o| o.object.clone()).collect();
    BuildGraph::from_scripts(ScriptDependencyWalker::walk(files), &existing)
}

pub fn row(columns: &[&str]) -> TextRow {
    columns.iter().map(|c| c.to_string()).collect()
}

#[derive(Debug, Clone)]
pub struct FakeScript {
    text: String,
    schema: String,
    name: String,
    object_type: ObjectType,
    action: ScriptAction,
    dependencies: HashSet<DatabaseObject>,
}

impl FakeScript {
    fn new(schema: &str, name: &str, object_type: ObjectType, action: ScriptAction) -> Self {
        Self {
            text: String::new(),
            schema: schema.to_string(),
            name: name.to_string(),
            object_type,
            action,
            dependencies: HashSet::new(),
        }
    }

    pub fn create(schema: &str, name: &str, object_type: ObjectType) -> Self {
        Self::new(schema, name, object_type, ScriptAction::Create)
    }

    pub fn alter(schema: &str, name: &str, object_type: ObjectType) -> Self {
        Self::new(schema, name, object_type, ScriptAction::Alter)
    }

    pub fn drop(schema: &str, name: &str, object_type: ObjectType) -> Self {
        Self::new(schema, name, object_type, ScriptAction::Drop)
    }

    /// Reference an object without server or database
    pub fn depends_on(self, schema: &str, name: &str) -> Self {
        self.depends_on_object(DatabaseObject::new("", "", schema, name))
    }

    pub fn depends_on_object(mut self, object: DatabaseObject) -> Self {
        self.dependencies.insert(object);
        self
    }

    fn qualified(&self) -> String {
        format!("{}.{}", self.schema, self.name)
    }
}

impl ParsedScript for FakeScript {
    fn original_text(&self) -> &str {
        &self.text
    }

    fn schema_name(&self) -> &str {
        &self.schema
    }

    fn object_name(&self) -> &str {
        &self.name
    }

    fn object_type(&self) -> ObjectType {
        self.object_type
    }

    fn script_action(&self) -> ScriptAction {
        self.action
    }

    fn dependencies(&self) -> &HashSet<DatabaseObject> {
        &self.dependencies
    }

    fn create_script(&self) -> Result<String, ParseError> {
        match self.action {
            ScriptAction::Drop => Err(ParseError::NotSupported {
                message: "drop script has no create form".to_string(),
            }),
            _ => Ok(format!("CREATE {} {}", self.object_type.keyword(), self.qualified())),
        }
    }

    fn alter_script(&self) -> Result<String, ParseError> {
        match self.action {
            ScriptAction::Drop => Err(ParseError::NotSupported {
                message: "drop script has no alter form".to_string(),
            }),
            _ => Ok(format!("ALTER {} {}", self.object_type.keyword(), self.qualified())),
        }
    }
}

/// Parser that recognises registered texts only
#[derive(Debug, Default)]
pub struct FakeParser {
    scripts: HashMap<String, FakeScript>,
}

impl FakeParser {
    pub fn add(&mut self, text: &str, script: FakeScript) -> &mut Self {
        self.scripts.insert(text.to_string(), script);
        self
    }
}

impl SqlParser for FakeParser {
    fn parse_sql_script(&self, sql: &str) -> Result<Box<dyn ParsedScript>, ParseError> {
        if sql.trim().is_empty() {
            return Err(ParseError::EmptyText);
        }
        match self.scripts.get(sql) {
            Some(script) => {
                let mut script = script.clone();
                script.text = sql.to_string();
                Ok(Box::new(script))
            }
            None => Err(ParseError::SqlParse {
                message: format!("Incorrect syntax near '{}'.", sql),
            }),
        }
    }
}

/// Scripted connection that records everything sent to it
#[derive(Debug, Default)]
pub struct FakeConnection {
    rows: HashMap<String, Vec<TextRow>>,
    failing: HashSet<String>,
    commit_fails: bool,
    log: Mutex<Vec<String>>,
    timeouts: Mutex<Vec<Option<Duration>>>,
}

impl FakeConnection {
    pub fn with_rows(mut self, sql: &str, rows: Vec<TextRow>) -> Self {
        self.rows.insert(sql.to_string(), rows);
        self
    }

    /// Reject this exact statement or query
    pub fn fail_on(mut self, sql: &str) -> Self {
        self.failing.insert(sql.to_string());
        self
    }

    pub fn fail_commit(mut self) -> Self {
        self.commit_fails = true;
        self
    }

    /// Executed statements and transaction commands, in order
    pub fn log(&self) -> Vec<String> {
        self.log.lock().unwrap().clone()
    }

    pub fn query_timeouts(&self) -> Vec<Option<Duration>> {
        self.timeouts.lock().unwrap().clone()
    }

    fn record(&self, entry: &str) {
        self.log.lock().unwrap().push(entry.to_string());
    }
}

#[async_trait]
impl Connection for FakeConnection {
    async fn query(&self, sql: &str, timeout: Option<Duration>) -> Result<Vec<TextRow>, DbError> {
        self.timeouts.lock().unwrap().push(timeout);
        if self.failing.contains(sql) {
            return Err(DbError::UnexpectedValue("query failed".to_string()));
        }
        Ok(self.rows.get(sql).cloned().unwrap_or_default())
    }

    async fn execute(&self, sql: &str) -> Result<(), DbError> {
        self.record(sql);
        if self.failing.contains(sql) {
            return Err(DbError::UnexpectedValue(format!("statement rejected: {}", sql)));
        }
        Ok(())
    }

    async fn begin(&self) -> Result<(), DbError> {
        self.record("BEGIN");
        Ok(())
    }

    async fn commit(&self) -> Result<(), DbError> {
        self.record("COMMIT");
        if self.commit_fails {
            return Err(DbError::UnexpectedValue("commit failed".to_string()));
        }
        Ok(())
    }

    async fn rollback(&self) -> Result<(), DbError> {
        self.record("ROLLBACK");
        Ok(())
    }
}

#[async_trait]
impl Connection for Arc<FakeConnection> {
    async fn query(&self, sql: &str, timeout: Option<Duration>) -> Result<Vec<TextRow>, DbError> {
        self.as_ref().query(sql, timeout).await
    }

    async fn execute(&self, sql: &str) -> Result<(), DbError> {
        self.as_ref().execute(sql).await
    }

    async fn begin(&self) -> Result<(), DbError> {
        self.as_ref().begin().await
    }

    async fn commit(&self) -> Result<(), DbError> {
        self.as_ref().commit().await
    }

    async fn rollback(&self) -> Result<(), DbError> {
        self.as_ref().rollback().await
    }
}

/// Hands out the same shared [`FakeConnection`] on every connect
pub struct FakeConnector {
    pub connection: Arc<FakeConnection>,
}

impl FakeConnector {
    pub fn new(connection: FakeConnection) -> Self {
        Self {
            connection: Arc::new(connection),
        }
    }
}

#[async_trait]
impl Connector for FakeConnector {
    async fn connect(&self) -> Result<Box<dyn Connection>, DbError> {
        Ok(Box::new(self.connection.clone()))
    }
}

/// Process runner answering by first argument
#[derive(Default)]
pub struct FakeProcess {
    responses: HashMap<String, String>,
    calls: Arc<Mutex<Vec<String>>>,
}

impl FakeProcess {
    pub fn respond(mut self, command: &str, output: &str) -> Self {
        self.responses.insert(command.to_string(), output.to_string());
        self
    }

    /// Command lines seen so far, arguments joined by spaces
    pub fn calls(&self) -> Arc<Mutex<Vec<String>>> {
        self.calls.clone()
    }
}

#[async_trait]
impl ProcessRunner for FakeProcess {
    async fn run(&self, args: &[String], _working_directory: &Path) -> Result<String, ExternalProcessError> {
        self.calls.lock().unwrap().push(args.join(" "));
        args.first()
            .and_then(|command| self.responses.get(command))
            .cloned()
            .ok_or_else(|| ExternalProcessError::Failed {
                executable: PathBuf::from("fake"),
                exit_code: 1,
                stdout: String::new(),
                stderr: format!("unknown command: {}", args.join(" ")),
            })
    }
}

#[derive(Clone)]
struct SharedBuffer(Arc<Mutex<Vec<u8>>>);

impl Write for SharedBuffer {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

/// Run `f` with a subscriber that writes plain-text log lines into a buffer
pub fn capture_logs<R>(f: impl FnOnce() -> R) -> (R, String) {
    let buffer = SharedBuffer(Arc::new(Mutex::new(Vec::new())));
    let writer = buffer.clone();
    let subscriber = tracing_subscriber::fmt()
        .with_writer(move || writer.clone())
        .with_ansi(false)
        .with_max_level(tracing::Level::DEBUG)
        .finish();

    let result = tracing::subscriber::with_default(subscriber, f);
    let output = String::from_utf8_lossy(&buffer.0.lock().unwrap()).into_owned();
    (result, output)
}
