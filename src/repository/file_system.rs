//! File-system script repository
//!
//! Scripts are laid out as `<root>/<schema>/<ObjectType>/<ObjectName>.sql`.
//! Change tracking is optional and comes from an injected [`DiffProvider`].

use super::diff::{DiffProvider, GitDiffProvider, HgDiffProvider, RevisionIdentifier};
use super::process::ExternalProcess;
use super::ScriptRepository;
use crate::build::BuildError;
use crate::config::{RepositoryConfig, VcsKind};
use crate::error::RepositoryError;
use crate::object::{trim_object_name, DatabaseObject, ObjectType, TypedDatabaseObject};
use crate::script::{ScriptFile, SqlParser};
use async_trait::async_trait;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

struct ChangeSource {
    provider: Box<dyn DiffProvider>,
    revision: Option<RevisionIdentifier>,
}

pub struct FileSystemScriptRepository {
    root: PathBuf,
    server_name: String,
    database_name: String,
    parser: Arc<dyn SqlParser>,
    ignore_unsupported_subdirectories: bool,
    change_source: Option<ChangeSource>,
}

impl FileSystemScriptRepository {
    pub fn new(
        root: impl Into<PathBuf>,
        server_name: &str,
        database_name: &str,
        parser: Arc<dyn SqlParser>,
        ignore_unsupported_subdirectories: bool,
    ) -> Self {
        Self {
            root: root.into(),
            server_name: trim_object_name(server_name),
            database_name: trim_object_name(database_name),
            parser,
            ignore_unsupported_subdirectories,
            change_source: None,
        }
    }

    /// Track changes with `provider`; without a revision every script counts as changed
    pub fn with_diff_provider(
        mut self,
        provider: impl DiffProvider + 'static,
        revision: Option<RevisionIdentifier>,
    ) -> Self {
        self.change_source = Some(ChangeSource {
            provider: Box::new(provider),
            revision,
        });
        self
    }

    /// Repository described by configuration, with a git or hg diff provider when configured
    pub fn from_config(
        config: &RepositoryConfig,
        server_name: &str,
        database_name: &str,
        parser: Arc<dyn SqlParser>,
    ) -> Self {
        let repo = Self::new(
            config.script_directory.clone(),
            server_name,
            database_name,
            parser,
            config.ignore_unsupported_subdirectories,
        );
        let executable = |default: &str| {
            ExternalProcess::new(
                config
                    .vcs_executable
                    .clone()
                    .unwrap_or_else(|| PathBuf::from(default)),
            )
        };

        match config.vcs {
            VcsKind::None => repo,
            VcsKind::Git => repo.with_diff_provider(
                GitDiffProvider::new(executable("git")),
                config.source_revision.clone(),
            ),
            VcsKind::Hg => repo.with_diff_provider(
                HgDiffProvider::new(executable("hg")),
                config.source_revision.clone(),
            ),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Location of the script for `object`
    pub fn script_path(&self, object: &TypedDatabaseObject) -> Result<PathBuf, RepositoryError> {
        if !object.is_in_database(&self.server_name, &self.database_name) {
            return Err(RepositoryError::ForeignObject(object.to_string()));
        }
        Ok(self
            .root
            .join(object.schema_name())
            .join(object.object_type.as_str())
            .join(format!("{}.sql", object.object_name())))
    }

    fn is_in_supported_directory(path: &Path) -> bool {
        path.parent()
            .and_then(Path::file_name)
            .and_then(|name| name.to_str())
            .and_then(ObjectType::from_name)
            .is_some()
    }

    fn is_sql_file(path: &Path) -> bool {
        path.extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| ext.eq_ignore_ascii_case("sql"))
    }

    /// Drop files outside the type folders when configured to ignore them
    fn filter_supported(&self, files: Vec<PathBuf>) -> Vec<PathBuf> {
        if !self.ignore_unsupported_subdirectories {
            return files;
        }
        files
            .into_iter()
            .filter(|path| {
                let supported = Self::is_in_supported_directory(path);
                if !supported {
                    warn!(
                        "Filtering out file because its in an unsupported subdirectory: {}",
                        path.display()
                    );
                }
                supported
            })
            .collect()
    }

    async fn find_script_files(&self) -> Result<Vec<PathBuf>, RepositoryError> {
        let root = self.root.clone();
        tokio::task::spawn_blocking(move || {
            let mut files = Vec::new();
            for entry in WalkDir::new(&root).sort_by_file_name() {
                let entry = entry.map_err(|e| RepositoryError::Walk(e.to_string()))?;
                if entry.file_type().is_file() && Self::is_sql_file(entry.path()) {
                    files.push(entry.into_path());
                }
            }
            Ok::<_, RepositoryError>(files)
        })
        .await
        .map_err(|e| RepositoryError::Walk(e.to_string()))?
    }

    async fn load_scripts(&self, files: Vec<PathBuf>) -> Result<Vec<ScriptFile>, RepositoryError> {
        let mut scripts = Vec::with_capacity(files.len());
        for path in files {
            scripts.push(self.load_script(&path).await?);
        }
        Ok(scripts)
    }

    /// Read and parse one script; its identity comes from the path
    async fn load_script(&self, path: &Path) -> Result<ScriptFile, RepositoryError> {
        let dir_name = |p: Option<&Path>| {
            p.and_then(Path::file_name)
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default()
        };
        let type_dir = path.parent();
        let type_name = dir_name(type_dir);
        let schema_name = trim_object_name(&dir_name(type_dir.and_then(Path::parent)));
        let object_name = trim_object_name(
            &path
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_default(),
        );
        let object = DatabaseObject::new(
            self.server_name.as_str(),
            self.database_name.as_str(),
            schema_name,
            object_name,
        );

        let Some(object_type) = ObjectType::from_name(&type_name) else {
            // No type to go by; the item only exists to carry the error
            return Ok(ScriptFile::with_error(
                object.with_type(ObjectType::Type),
                BuildError::UnexpectedObjectType { type_name },
            ));
        };
        let object = object.with_type(object_type);

        match tokio::fs::read_to_string(path).await {
            Ok(content) => Ok(ScriptFile::parse(object, content, self.parser.as_ref())),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!("Script {} is gone, treating {} as dropped", path.display(), object);
                let drop_script = object.drop_statement();
                Ok(ScriptFile::parse(object, drop_script, self.parser.as_ref()))
            }
            Err(source) => Err(RepositoryError::Io {
                path: path.to_path_buf(),
                source,
            }),
        }
    }
}

#[async_trait]
impl ScriptRepository for FileSystemScriptRepository {
    fn repository_description(&self) -> String {
        self.root.display().to_string()
    }

    fn change_source_description(&self) -> Result<String, RepositoryError> {
        match &self.change_source {
            None => Err(RepositoryError::NotSupported(
                "repository does not track changes".to_string(),
            )),
            Some(ChangeSource { revision: None, .. }) => Ok("Full Rebuild".to_string()),
            Some(ChangeSource {
                revision: Some(revision),
                ..
            }) => Ok(revision.to_string()),
        }
    }

    async fn get_all_scripts(&self) -> Result<Vec<ScriptFile>, RepositoryError> {
        let files = self.filter_supported(self.find_script_files().await?);
        let scripts = self.load_scripts(files).await?;
        info!("Loaded {} scripts from {}", scripts.len(), self.root.display());
        Ok(scripts)
    }

    async fn get_changed_scripts(&self) -> Result<Vec<ScriptFile>, RepositoryError> {
        let source = self.change_source.as_ref().ok_or_else(|| {
            RepositoryError::NotSupported("repository does not track changes".to_string())
        })?;
        let Some(revision) = &source.revision else {
            return self.get_all_scripts().await;
        };

        let changed = source.provider.changed_files(&self.root, revision).await?;
        debug!(
            "{} reports {} changed files since {}",
            source.provider.name(),
            changed.len(),
            revision
        );
        let files = changed
            .into_iter()
            .filter(|path| Self::is_sql_file(path))
            .collect();
        let scripts = self.load_scripts(self.filter_supported(files)).await?;
        info!("Loaded {} changed scripts since {}", scripts.len(), revision);
        Ok(scripts)
    }

    async fn get_script(&self, object: &TypedDatabaseObject) -> Result<ScriptFile, RepositoryError> {
        match self.script_path(object) {
            Ok(path) => self.load_script(&path).await,
            Err(RepositoryError::ForeignObject(_)) => Ok(ScriptFile::with_error(
                object.clone(),
                BuildError::MissingScriptFile {
                    object: object.clone(),
                },
            )),
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::script::ScriptAction;
    use crate::testing::{capture_logs, typed, FakeParser, FakeProcess, FakeScript};
    use pretty_assertions::assert_eq;
    use std::fs;
    use tempfile::TempDir;

    const PROC_TEXT: &str = "alter procedure validprocedure_prc() as select 1";

    fn write(root: &Path, relative: &str, content: &str) {
        let path = root.join(relative);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
    }

    fn parser() -> Arc<dyn SqlParser> {
        let mut parser = FakeParser::default();
        parser.add(
            PROC_TEXT,
            FakeScript::alter("dbo", "validprocedure_prc", ObjectType::Procedure),
        );
        parser.add(
            "create view dbo.v as select 1",
            FakeScript::create("dbo", "v", ObjectType::View),
        );
        parser.add(
            "DROP VIEW \"dbo\".\"gone\"",
            FakeScript::drop("dbo", "gone", ObjectType::View),
        );
        Arc::new(parser)
    }

    fn repository(root: &Path, ignore: bool) -> FileSystemScriptRepository {
        FileSystemScriptRepository::new(root, "srv", "[db]", parser(), ignore)
    }

    #[test]
    fn test_loads_scripts_by_folder_convention() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "dbo/Procedure/validprocedure_prc.sql", PROC_TEXT);
        write(dir.path(), "dbo/view/v.SQL", "create view dbo.v as select 1");
        write(dir.path(), "dbo/View/notes.txt", "ignored");

        let repo = repository(dir.path(), true);
        let scripts = tokio_test::block_on(repo.get_all_scripts()).unwrap();

        assert_eq!(scripts.len(), 2);
        let proc = &scripts[0];
        assert_eq!(proc.object(), &typed("dbo", "validprocedure_prc", ObjectType::Procedure));
        assert!(proc.error().is_none());
        assert_eq!(proc.script_action(), Some(ScriptAction::Alter));
        assert_eq!(scripts[1].object().object_type, ObjectType::View);
    }

    #[test]
    fn test_unsupported_subdirectory_is_filtered_with_warning() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "dbo/Procedure/validprocedure_prc.sql", PROC_TEXT);
        write(dir.path(), "dbo/Table/orders.sql", "create table orders (id int)");

        let repo = repository(dir.path(), true);
        let (scripts, logs) = capture_logs(|| tokio_test::block_on(repo.get_all_scripts()));
        let scripts = scripts.unwrap();

        assert_eq!(scripts.len(), 1);
        assert_eq!(scripts[0].object().object_name(), "validprocedure_prc");
        let skipped = dir.path().join("dbo/Table/orders.sql");
        assert!(logs.contains("WARN"));
        assert!(logs.contains(&format!(
            "Filtering out file because its in an unsupported subdirectory: {}",
            skipped.display()
        )));
    }

    #[test]
    fn test_unsupported_subdirectory_kept_as_error_when_not_ignored() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "dbo/Table/orders.sql", "create table orders (id int)");

        let repo = repository(dir.path(), false);
        let scripts = tokio_test::block_on(repo.get_all_scripts()).unwrap();

        assert_eq!(scripts.len(), 1);
        assert_eq!(
            scripts[0].error(),
            Some(&BuildError::UnexpectedObjectType {
                type_name: "Table".to_string()
            })
        );
    }

    #[test]
    fn test_get_script_for_missing_file_is_drop_script() {
        let dir = TempDir::new().unwrap();
        let repo = repository(dir.path(), true);

        let gone = typed("dbo", "gone", ObjectType::View);
        assert_eq!(
            repo.script_path(&gone).unwrap(),
            dir.path().join("dbo").join("View").join("gone.sql")
        );

        let script = tokio_test::block_on(repo.get_script(&gone)).unwrap();
        assert!(script.error().is_none());
        assert_eq!(script.script_action(), Some(ScriptAction::Drop));
        assert_eq!(script.content(), Some("DROP VIEW \"dbo\".\"gone\""));
    }

    #[test]
    fn test_get_script_for_foreign_object_is_missing_script() {
        let dir = TempDir::new().unwrap();
        let repo = repository(dir.path(), true);
        let foreign = TypedDatabaseObject::new("other", "db", "dbo", "v", ObjectType::View);

        let script = tokio_test::block_on(repo.get_script(&foreign)).unwrap();
        assert_eq!(script.error().map(|e| e.error_type()), Some("Missing Script File"));
        assert!(matches!(
            repo.script_path(&foreign),
            Err(RepositoryError::ForeignObject(_))
        ));
    }

    #[test]
    fn test_change_tracking_requires_provider() {
        let dir = TempDir::new().unwrap();
        let repo = repository(dir.path(), true);

        assert!(matches!(
            repo.change_source_description(),
            Err(RepositoryError::NotSupported(_))
        ));
        assert!(matches!(
            tokio_test::block_on(repo.get_changed_scripts()),
            Err(RepositoryError::NotSupported(_))
        ));
    }

    #[test]
    fn test_from_config_picks_diff_provider() {
        let dir = TempDir::new().unwrap();
        let mut config = RepositoryConfig {
            script_directory: dir.path().to_path_buf(),
            ..RepositoryConfig::default()
        };

        let plain = FileSystemScriptRepository::from_config(&config, "srv", "db", parser());
        assert_eq!(plain.root(), dir.path());
        assert!(matches!(
            plain.change_source_description(),
            Err(RepositoryError::NotSupported(_))
        ));

        config.vcs = VcsKind::Git;
        config.source_revision = Some(RevisionIdentifier::Tag("release-1.2".into()));
        let git = FileSystemScriptRepository::from_config(&config, "srv", "db", parser());
        assert_eq!(git.change_source_description().unwrap(), "release-1.2");

        config.vcs = VcsKind::Hg;
        config.source_revision = None;
        let hg = FileSystemScriptRepository::from_config(&config, "srv", "db", parser());
        assert_eq!(hg.change_source_description().unwrap(), "Full Rebuild");
    }

    #[test]
    fn test_changed_scripts_come_from_diff_provider() {
        let dir = TempDir::new().unwrap();
        let top = dir.path().display().to_string();
        write(dir.path(), "db/dbo/View/v.sql", "create view dbo.v as select 1");
        write(dir.path(), "db/dbo/Procedure/validprocedure_prc.sql", PROC_TEXT);

        let git = FakeProcess::default()
            .respond("rev-parse", &format!("{}\n", top))
            .respond(
                "diff",
                "db/dbo/View/v.sql\ndb/dbo/View/gone.sql\ndb/README.md\ndb/dbo/Table/t.sql\n",
            );
        let repo = repository(&dir.path().join("db"), true)
            .with_diff_provider(GitDiffProvider::new(git), Some(RevisionIdentifier::Tag("v1".into())));

        assert_eq!(repo.change_source_description().unwrap(), "v1");
        let scripts = tokio_test::block_on(repo.get_changed_scripts()).unwrap();
        let names: Vec<_> = scripts
            .iter()
            .map(|s| (s.object().object_name().to_string(), s.script_action()))
            .collect();
        assert_eq!(
            names,
            vec![
                ("v".to_string(), Some(ScriptAction::Create)),
                ("gone".to_string(), Some(ScriptAction::Drop)),
            ]
        );
    }

    #[test]
    fn test_without_revision_everything_changed() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "dbo/View/v.sql", "create view dbo.v as select 1");

        let repo = repository(dir.path(), true).with_diff_provider(
            GitDiffProvider::new(FakeProcess::default()),
            None,
        );

        assert_eq!(repo.change_source_description().unwrap(), "Full Rebuild");
        let scripts = tokio_test::block_on(repo.get_changed_scripts()).unwrap();
        assert_eq!(scripts.len(), 1);
    }
}
