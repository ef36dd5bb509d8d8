use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use stepwise_common::{Error, ExecutionRecord, Result, StateStore, StoreError};
use stepwise_core::{
    Candidate, FnLoader, MigrateOptions, MigrationEvent, MigrationSource, Migration, Migrator,
    Procedure, ScriptLoader, create_migration,
};
use stepwise_db::{Database, SqliteStateStore};
use tempfile::TempDir;

/// A scratch project: a migrations directory plus an on-disk database.
struct Project {
    root: TempDir,
    migrations: std::path::PathBuf,
    store: SqliteStateStore,
}

impl Project {
    fn new() -> Self {
        let root = TempDir::new().unwrap();
        let migrations = root.path().join("migrations");
        fs::create_dir(&migrations).unwrap();
        let db = Database::open(&root.path().join("app.db")).unwrap();
        let store = SqliteStateStore::new(db).unwrap();
        Self {
            root,
            migrations,
            store,
        }
    }

    /// Write a migration creating and dropping table `t<num>`.
    fn table_migration(&self, file_name: &str, num: u64) {
        fs::write(
            self.migrations.join(file_name),
            format!("-- Up\nCREATE TABLE t{num} (x);\n-- Down\nDROP TABLE t{num};\n"),
        )
        .unwrap();
    }

    fn migrator(&self) -> Migrator<'_, Database, SqliteStateStore> {
        let source = MigrationSource::new(&self.migrations, "sql").unwrap();
        Migrator::new(source, self.store.database(), &self.store, &ScriptLoader)
    }

    fn table_exists(&self, name: &str) -> bool {
        self.store
            .database()
            .with_connection(|conn| {
                conn.query_row(
                    "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?1",
                    [name],
                    |row| row.get::<_, i64>(0),
                )
            })
            .unwrap()
            > 0
    }

    async fn applied(&self) -> Vec<u64> {
        self.store
            .list_applied_numbers()
            .await
            .unwrap()
            .into_iter()
            .collect()
    }
}

fn seed(project: &Project, nums: &[u64]) {
    for &num in nums {
        project.table_migration(&format!("{num:04}-t{num}.sql"), num);
    }
}

#[tokio::test]
async fn forward_run_applies_all_in_ascending_order() {
    let project = Project::new();
    seed(&project, &[10, 1, 5, 15]);

    let report = project.migrator().run(MigrateOptions::up()).await.unwrap();

    assert_eq!(report.processed, vec![1, 5, 10, 15]);
    assert_eq!(project.applied().await, vec![1, 5, 10, 15]);
    assert!(project.table_exists("t15"));

    let names: Vec<String> = project
        .store
        .records()
        .unwrap()
        .into_iter()
        .map(|r| r.name)
        .collect();
    assert_eq!(names, vec!["0001-t1", "0005-t5", "0010-t10", "0015-t15"]);
}

#[tokio::test]
async fn backward_run_reverts_everything_in_descending_order() {
    let project = Project::new();
    seed(&project, &[1, 5, 10]);
    project.migrator().run(MigrateOptions::up()).await.unwrap();

    let report = project.migrator().run(MigrateOptions::down()).await.unwrap();

    assert_eq!(report.processed, vec![10, 5, 1]);
    assert!(project.applied().await.is_empty());
    assert!(!project.table_exists("t1"));
}

#[tokio::test]
async fn duplicate_numbers_abort_before_any_write() {
    let project = Project::new();
    project.table_migration("005-a.sql", 5);
    project.table_migration("005-b.sql", 6);
    project.table_migration("010-c.sql", 10);

    let err = project
        .migrator()
        .run(MigrateOptions::up())
        .await
        .unwrap_err();

    assert!(err.to_string().starts_with("duplicate file numbers"));
    assert!(matches!(err, Error::DuplicateSequenceNumber { count: 2, .. }));
    assert!(project.applied().await.is_empty());
    assert!(!project.table_exists("t10"));
}

#[tokio::test]
async fn unapplied_lower_number_is_reported_missed() {
    let project = Project::new();
    seed(&project, &[1, 5, 10]);
    // 5 was recorded by another deployment that never ran 1.
    project
        .store
        .insert_execution_record(&ExecutionRecord::new(5, "0005-t5"))
        .await
        .unwrap();

    let err = project
        .migrator()
        .run(MigrateOptions::up())
        .await
        .unwrap_err();

    assert!(matches!(&err, Error::MissedMigrations(nums) if nums == &vec![1]));
    assert!(err.to_string().contains("missed migrations numbers : 1"));
    assert!(!project.table_exists("t10"));
}

#[tokio::test]
async fn existing_lock_stops_forward_run_at_that_number() {
    let project = Project::new();
    seed(&project, &[1, 5, 10, 15, 20]);
    project.store.ensure_unique_index_on_number().await.unwrap();
    // Another process holds number 10.
    let other = Database::open(&project.root.path().join("app.db")).unwrap();
    other
        .execute_batch("INSERT INTO migration_lock (num, locked_at) VALUES (10, '2024-01-01 00:00:00')")
        .unwrap();

    let err = project
        .migrator()
        .run(MigrateOptions::up())
        .await
        .unwrap_err();

    assert!(matches!(err, Error::MigrationLocked { num: 10, .. }));
    assert_eq!(project.applied().await, vec![1, 5]);
    assert!(!project.table_exists("t15"));
}

#[tokio::test]
async fn rerunning_up_is_a_noop() {
    let project = Project::new();
    seed(&project, &[1, 5]);
    project.migrator().run(MigrateOptions::up()).await.unwrap();

    let report = project.migrator().run(MigrateOptions::up()).await.unwrap();

    assert!(report.processed.is_empty());
    assert_eq!(project.applied().await, vec![1, 5]);
}

#[tokio::test]
async fn down_with_nothing_applied_reports_every_number_missed() {
    let project = Project::new();
    seed(&project, &[1, 5]);

    let err = project
        .migrator()
        .run(MigrateOptions::down())
        .await
        .unwrap_err();

    assert!(matches!(&err, Error::MissedMigrations(nums) if nums == &vec![1, 5]));
    assert!(project.applied().await.is_empty());

    let report = project
        .migrator()
        .run(MigrateOptions::down().with_policy(stepwise_core::MissedPolicy::IgnorePending))
        .await
        .unwrap();
    assert!(report.processed.is_empty());
}

#[tokio::test]
async fn lock_claimed_before_index_exists_stops_forward_run() {
    let project = Project::new();
    seed(&project, &[1, 5, 10, 15]);
    // Claimed by another process before this store ever created the index.
    let other = Database::open(&project.root.path().join("app.db")).unwrap();
    other
        .execute_batch("INSERT INTO migration_lock (num, locked_at) VALUES (10, '2024-01-01 00:00:00')")
        .unwrap();

    let err = project
        .migrator()
        .run(MigrateOptions::up())
        .await
        .unwrap_err();

    assert!(matches!(err, Error::MigrationLocked { num: 10, .. }));
    assert_eq!(project.applied().await, vec![1, 5]);
    assert!(!project.table_exists("t15"));
}

#[tokio::test]
async fn concurrent_stores_record_a_number_only_once() {
    let project = Project::new();
    let path = project.root.path().join("app.db");
    let first = SqliteStateStore::new(Database::open(&path).unwrap()).unwrap();
    let second = SqliteStateStore::new(Database::open(&path).unwrap()).unwrap();
    first.ensure_unique_index_on_number().await.unwrap();
    second.ensure_unique_index_on_number().await.unwrap();

    let record = ExecutionRecord::new(5, "0005-t5");
    let (a, b) = tokio::join!(
        first.insert_execution_record(&record),
        second.insert_execution_record(&record)
    );

    let results = [a, b];
    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
    assert!(
        results
            .iter()
            .any(|r| matches!(r, Err(StoreError::UniqueViolation(5))))
    );
    assert_eq!(project.store.records().unwrap().len(), 1);
}

#[tokio::test]
async fn progress_events_name_each_migration() {
    let project = Project::new();
    seed(&project, &[1, 5]);
    let lines = Arc::new(std::sync::Mutex::new(Vec::new()));
    let sink = Arc::clone(&lines);

    project
        .migrator()
        .with_hook(Arc::new(move |event: &MigrationEvent| {
            let line = match event {
                MigrationEvent::Starting {
                    direction, title, ..
                } => format!("{direction} : {title}"),
                MigrationEvent::Saved => "migration : complete".to_string(),
                _ => return,
            };
            sink.lock().unwrap().push(line);
        }))
        .run(MigrateOptions::up())
        .await
        .unwrap();

    let lines = lines.lock().unwrap();
    assert_eq!(lines.len(), 3);
    assert!(lines[0].starts_with("up : ") && lines[0].ends_with("0001-t1.sql"));
    assert_eq!(lines[2], "migration : complete");
}

#[tokio::test]
async fn created_migrations_run_in_creation_order() {
    let project = Project::new();
    let first = create_migration(&project.migrations, &["first".into()], "sql").unwrap();
    let second = create_migration(&project.migrations, &["second".into()], "sql").unwrap();
    fs::write(&first, "-- Up\nCREATE TABLE first (x);\n-- Down\nDROP TABLE first;\n").unwrap();
    fs::write(&second, "-- Up\nCREATE TABLE second (x);\n-- Down\nDROP TABLE second;\n").unwrap();

    let report = project.migrator().run(MigrateOptions::up()).await.unwrap();
    assert_eq!(report.processed, vec![5, 10]);
    assert!(project.table_exists("second"));
}

/// Fails to apply and counts how often it is reverted.
struct FailingApply {
    reverts: Arc<AtomicUsize>,
}

#[async_trait]
impl Procedure<Database> for FailingApply {
    async fn apply(&self, target: &Database) -> Result<()> {
        target.execute_batch("CREATE TABLE half (x);")?;
        Err(Error::Other("constraint failed".into()))
    }

    async fn revert(&self, target: &Database) -> Result<()> {
        self.reverts.fetch_add(1, Ordering::SeqCst);
        target.execute_batch("DROP TABLE half;")
    }
}

#[tokio::test]
async fn failed_apply_is_reverted_exactly_once() {
    let project = Project::new();
    seed(&project, &[1, 5, 10]);
    let reverts = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&reverts);

    let loader = FnLoader(move |candidate: &Candidate| -> Result<Migration<Database>> {
        if candidate.num == 5 {
            return Ok(Migration::new(
                candidate.num,
                candidate.title(),
                Arc::new(FailingApply {
                    reverts: Arc::clone(&counter),
                }),
            ));
        }
        stepwise_core::MigrationLoader::load(&ScriptLoader, candidate)
    });
    let source = MigrationSource::new(&project.migrations, "sql").unwrap();
    let migrator = Migrator::new(source, project.store.database(), &project.store, &loader);

    let err = migrator.run(MigrateOptions::up()).await.unwrap_err();

    assert!(matches!(err, Error::MigrationProcedure { .. }));
    assert!(!err.is_corrupted_state());
    assert_eq!(reverts.load(Ordering::SeqCst), 1);
    assert_eq!(project.applied().await, vec![1]);
    assert!(!project.table_exists("half"));
    assert!(!project.table_exists("t10"));
}

#[tokio::test]
async fn ignored_files_do_not_affect_the_run() {
    let project = Project::new();
    seed(&project, &[1]);
    fs::write(project.migrations.join("notes.sql"), "-- Up\nbroken\n").unwrap();
    fs::write(project.migrations.join("0002-readme.md"), "").unwrap();

    let report = project.migrator().run(MigrateOptions::up()).await.unwrap();
    assert_eq!(report.processed, vec![1]);
    assert!(Path::new(&project.migrations).join("notes.sql").exists());
}
