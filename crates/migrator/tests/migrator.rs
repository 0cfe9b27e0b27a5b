use database::Scope;
use migrator::{Dialect, MigrationError, MigrationOutcome, Migrator, MigratorConfig};
use sqlx::AnyConnection;
use sqlx::Connection;
use std::fs;
use std::path::Path;
use tempfile::TempDir;

async fn sqlite() -> AnyConnection {
    sqlx::any::install_default_drivers();
    AnyConnection::connect("sqlite::memory:")
        .await
        .expect("failed to open in-memory database")
}

async fn table_exists(conn: &mut AnyConnection, name: &str) -> bool {
    let count: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?",
    )
    .bind(name.to_owned())
    .fetch_one(&mut *conn)
    .await
    .expect("failed to inspect sqlite_master");
    count == 1
}

fn write(dir: &Path, file: &str, sql: &str) {
    fs::write(dir.join(file), sql).expect("failed to write migration file");
}

/// A directory with V1: create table `widgets` (reversible).
fn widgets_migrations() -> TempDir {
    let dir = tempfile::tempdir().expect("failed to create temp dir");
    write(
        dir.path(),
        "1_create_widgets.up.sql",
        "CREATE TABLE widgets (id INTEGER PRIMARY KEY, name TEXT NOT NULL);",
    );
    write(dir.path(), "1_create_widgets.down.sql", "DROP TABLE widgets;");
    dir
}

fn sqlite_migrator(dir: &Path) -> Migrator {
    Migrator::new(MigratorConfig {
        dialect: Dialect::Sqlite,
        path: dir.to_path_buf(),
    })
}

#[tokio::test]
async fn apply_and_revert_are_idempotent_round_trips() {
    let dir = widgets_migrations();
    let migrator = sqlite_migrator(dir.path());
    let scope = Scope::new();
    let mut conn = sqlite().await;

    let outcome = migrator.up(&scope, &mut conn).await.unwrap();
    assert_eq!(outcome.versions(), &[1]);
    assert!(table_exists(&mut conn, "widgets").await);

    let outcome = migrator.up(&scope, &mut conn).await.unwrap();
    assert_eq!(outcome, MigrationOutcome::Completed { versions: vec![] });
    assert!(table_exists(&mut conn, "widgets").await);

    let outcome = migrator.reset(&scope, &mut conn).await.unwrap();
    assert_eq!(outcome.versions(), &[1]);
    assert!(!table_exists(&mut conn, "widgets").await);

    let outcome = migrator.reset(&scope, &mut conn).await.unwrap();
    assert!(outcome.is_noop());
    assert!(!table_exists(&mut conn, "widgets").await);
}

#[tokio::test]
async fn versions_are_applied_ascending_and_reverted_descending() {
    let dir = widgets_migrations();
    write(
        dir.path(),
        "2_create_gadgets.up.sql",
        "CREATE TABLE gadgets (id INTEGER PRIMARY KEY);",
    );
    write(dir.path(), "2_create_gadgets.down.sql", "DROP TABLE gadgets;");
    let migrator = sqlite_migrator(dir.path());
    let scope = Scope::new();
    let mut conn = sqlite().await;

    let applied = migrator.up(&scope, &mut conn).await.unwrap();
    assert_eq!(applied.versions(), &[1, 2]);

    let reverted = migrator.reset(&scope, &mut conn).await.unwrap();
    assert_eq!(reverted.versions(), &[2, 1]);
    assert!(!table_exists(&mut conn, "gadgets").await);
}

#[tokio::test]
async fn an_empty_directory_is_nothing_to_do() {
    let dir = tempfile::tempdir().unwrap();
    let migrator = sqlite_migrator(dir.path());
    let scope = Scope::new();
    let mut conn = sqlite().await;

    assert_eq!(
        migrator.up(&scope, &mut conn).await.unwrap(),
        MigrationOutcome::NothingDefined
    );
    assert_eq!(
        migrator.reset(&scope, &mut conn).await.unwrap(),
        MigrationOutcome::NothingDefined
    );
}

#[tokio::test]
async fn revert_on_an_unmigrated_database_succeeds() {
    let dir = widgets_migrations();
    let migrator = sqlite_migrator(dir.path());
    let mut conn = sqlite().await;

    let outcome = migrator.reset(&Scope::new(), &mut conn).await.unwrap();
    assert_eq!(outcome, MigrationOutcome::Completed { versions: vec![] });
}

#[tokio::test]
async fn irreversible_migrations_stay_applied_on_reset() {
    let dir = tempfile::tempdir().unwrap();
    write(
        dir.path(),
        "1_create_widgets.sql",
        "CREATE TABLE widgets (id INTEGER PRIMARY KEY);",
    );
    let migrator = sqlite_migrator(dir.path());
    let scope = Scope::new();
    let mut conn = sqlite().await;

    migrator.up(&scope, &mut conn).await.unwrap();
    let outcome = migrator.reset(&scope, &mut conn).await.unwrap();
    assert!(outcome.is_noop());
    assert!(table_exists(&mut conn, "widgets").await);
}

#[tokio::test]
async fn a_missing_directory_is_an_error() {
    let dir = tempfile::tempdir().unwrap();
    let migrator = sqlite_migrator(&dir.path().join("does-not-exist"));
    let mut conn = sqlite().await;

    let err = migrator.up(&Scope::new(), &mut conn).await.unwrap_err();
    assert!(matches!(err, MigrationError::Source { .. }), "{err}");
}

#[tokio::test]
async fn failing_migrations_propagate() {
    let dir = tempfile::tempdir().unwrap();
    write(dir.path(), "1_broken.up.sql", "CREATE TABLE (;");
    write(dir.path(), "1_broken.down.sql", "SELECT 1;");
    let migrator = sqlite_migrator(dir.path());
    let mut conn = sqlite().await;

    let err = migrator.up(&Scope::new(), &mut conn).await.unwrap_err();
    assert!(matches!(err, MigrationError::Migrate { phase: "apply", .. }), "{err}");
    assert!(!err.is_config());
}

#[tokio::test]
async fn dialect_mismatch_fails_before_touching_the_database() {
    let dir = widgets_migrations();
    let migrator = Migrator::new(MigratorConfig {
        dialect: Dialect::Postgres,
        path: dir.path().to_path_buf(),
    });
    let mut conn = sqlite().await;

    let err = migrator.up(&Scope::new(), &mut conn).await.unwrap_err();
    assert!(err.is_config(), "{err}");
    assert!(!table_exists(&mut conn, "_sqlx_migrations").await);
    assert!(!table_exists(&mut conn, "widgets").await);
}

#[tokio::test]
async fn cancelled_scopes_do_not_migrate() {
    let dir = widgets_migrations();
    let migrator = sqlite_migrator(dir.path());
    let mut conn = sqlite().await;
    let scope = Scope::new();
    scope.cancel();

    let err = migrator.up(&scope, &mut conn).await.unwrap_err();
    assert!(matches!(err, MigrationError::Interrupted(_)));
    assert!(!table_exists(&mut conn, "widgets").await);
}

#[test]
fn defaults_target_postgres_in_the_current_directory() {
    let config = MigratorConfig::default();
    assert_eq!(config.dialect, Dialect::Postgres);
    assert_eq!(config.path, Path::new("."));
}

/// The widgets scenario against the primary engine.
///
/// Run with `DATABASE_URL=postgres://... cargo test -- --ignored`.
#[tokio::test]
#[ignore = "requires DATABASE_URL pointing at a disposable PostgreSQL database"]
async fn postgres_widgets_scenario() {
    sqlx::any::install_default_drivers();
    let url = std::env::var("DATABASE_URL").expect("DATABASE_URL must be set");
    let mut conn = AnyConnection::connect(&url).await.unwrap();
    let dir = widgets_migrations();
    let migrator = Migrator::new(MigratorConfig {
        dialect: Dialect::Postgres,
        path: dir.path().to_path_buf(),
    });
    let scope = Scope::new();

    async fn widgets_exist(conn: &mut AnyConnection) -> bool {
        sqlx::query_scalar::<_, bool>("SELECT to_regclass('public.widgets') IS NOT NULL")
            .fetch_one(&mut *conn)
            .await
            .unwrap()
    }

    migrator.up(&scope, &mut conn).await.unwrap();
    assert!(widgets_exist(&mut conn).await);
    assert!(migrator.up(&scope, &mut conn).await.unwrap().is_noop());
    assert!(widgets_exist(&mut conn).await);
    migrator.reset(&scope, &mut conn).await.unwrap();
    assert!(!widgets_exist(&mut conn).await);
    assert!(migrator.reset(&scope, &mut conn).await.unwrap().is_noop());
}
