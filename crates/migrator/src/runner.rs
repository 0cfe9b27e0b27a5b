use crate::dialect::Dialect;
use crate::error::MigrationError;
use database::Scope;
use serde::Deserialize;
use sqlx::AnyConnection;
use sqlx::migrate::{Migrate, Migrator as Engine};
use std::collections::HashSet;
use std::path::{Path, PathBuf};

/// Reverting "to" this version reverts everything; it is below any valid version.
const REVERT_ALL: i64 = -1;

#[derive(Debug, Clone, Deserialize)]
pub struct MigratorConfig {
    /// Which engine the migration files are written for.
    #[serde(default)]
    pub dialect: Dialect,
    /// Directory holding `<version>_<name>.sql` or `.up.sql`/`.down.sql` files.
    #[serde(default = "default_path")]
    pub path: PathBuf,
}

fn default_path() -> PathBuf {
    PathBuf::from(".")
}

impl Default for MigratorConfig {
    fn default() -> Self {
        Self {
            dialect: Dialect::default(),
            path: default_path(),
        }
    }
}

/// What a successful run did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MigrationOutcome {
    /// The migration directory holds no migrations; nothing was touched.
    NothingDefined,
    /// The run finished. `versions` lists what was applied (ascending) or
    /// reverted (descending), and is empty when there was nothing to do.
    Completed { versions: Vec<i64> },
}

impl MigrationOutcome {
    pub fn versions(&self) -> &[i64] {
        match self {
            MigrationOutcome::NothingDefined => &[],
            MigrationOutcome::Completed { versions } => versions,
        }
    }

    /// True when the run changed nothing.
    pub fn is_noop(&self) -> bool {
        self.versions().is_empty()
    }
}

/// Applies or reverts the migration set found at [`MigratorConfig::path`].
#[derive(Debug, Clone, Default)]
pub struct Migrator {
    config: MigratorConfig,
}

impl Migrator {
    pub fn new(config: MigratorConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &MigratorConfig {
        &self.config
    }

    /// Applies every pending migration in ascending version order.
    pub async fn up(
        &self,
        scope: &Scope,
        conn: &mut AnyConnection,
    ) -> Result<MigrationOutcome, MigrationError> {
        scope.guard(self.apply(conn)).await
    }

    /// Reverts every applied migration in descending version order.
    pub async fn reset(
        &self,
        scope: &Scope,
        conn: &mut AnyConnection,
    ) -> Result<MigrationOutcome, MigrationError> {
        scope.guard(self.revert(conn)).await
    }

    async fn apply(&self, conn: &mut AnyConnection) -> Result<MigrationOutcome, MigrationError> {
        self.select_dialect(conn)?;
        let Some(engine) = self.load().await? else {
            return Ok(MigrationOutcome::NothingDefined);
        };

        let applied = applied_versions(conn).await?;
        let mut pending: Vec<i64> = engine
            .iter()
            .filter(|m| !m.migration_type.is_down_migration())
            .map(|m| m.version)
            .filter(|v| !applied.contains(v))
            .collect();
        pending.sort_unstable();

        if pending.is_empty() {
            tracing::info!("Database schema is already up to date.");
        } else {
            tracing::info!(count = pending.len(), ?pending, "Applying migrations.");
        }
        engine
            .run(&mut *conn)
            .await
            .map_err(MigrationError::migrate("apply"))?;

        Ok(MigrationOutcome::Completed { versions: pending })
    }

    async fn revert(&self, conn: &mut AnyConnection) -> Result<MigrationOutcome, MigrationError> {
        self.select_dialect(conn)?;
        let Some(engine) = self.load().await? else {
            return Ok(MigrationOutcome::NothingDefined);
        };

        let applied = applied_versions(conn).await?;
        let reversible: HashSet<i64> = engine
            .iter()
            .filter(|m| m.migration_type.is_down_migration())
            .map(|m| m.version)
            .collect();

        let mut reverted: Vec<i64> = applied
            .iter()
            .copied()
            .filter(|v| reversible.contains(v))
            .collect();
        reverted.sort_unstable_by(|a, b| b.cmp(a));

        for version in applied.iter().filter(|v| !reversible.contains(v)) {
            tracing::warn!(version, "Migration has no down script; leaving it applied.");
        }

        if reverted.is_empty() {
            tracing::info!("No reversible migrations are applied.");
        } else {
            tracing::info!(count = reverted.len(), ?reverted, "Reverting migrations.");
        }
        engine
            .undo(&mut *conn, REVERT_ALL)
            .await
            .map_err(MigrationError::migrate("revert"))?;

        Ok(MigrationOutcome::Completed { versions: reverted })
    }

    /// Fails before anything is touched if the connection speaks another dialect.
    fn select_dialect(&self, conn: &AnyConnection) -> Result<(), MigrationError> {
        let backend = conn.backend_name();
        if !self.config.dialect.matches_backend(backend) {
            return Err(MigrationError::DialectMismatch {
                expected: self.config.dialect,
                actual: backend.to_owned(),
            });
        }
        tracing::info!(
            dialect = %self.config.dialect,
            path = %self.config.path.display(),
            "Migration dialect selected."
        );
        Ok(())
    }

    /// Resolves the migration set, or `None` when the directory defines none.
    async fn load(&self) -> Result<Option<Engine>, MigrationError> {
        let path: &Path = &self.config.path;
        let engine = Engine::new(path)
            .await
            .map_err(|source| MigrationError::Source {
                path: path.to_path_buf(),
                source,
            })?;
        if engine.iter().next().is_none() {
            tracing::info!(path = %path.display(), "No migration files found; nothing to do.");
            return Ok(None);
        }
        Ok(Some(engine))
    }
}

async fn applied_versions(conn: &mut AnyConnection) -> Result<HashSet<i64>, MigrationError> {
    conn.ensure_migrations_table()
        .await
        .map_err(MigrationError::migrate("prepare"))?;
    let applied = conn
        .list_applied_migrations()
        .await
        .map_err(MigrationError::migrate("inspect"))?;
    Ok(applied.into_iter().map(|m| m.version).collect())
}
