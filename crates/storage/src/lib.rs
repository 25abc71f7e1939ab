use std::{
    collections::BTreeSet,
    fs,
    path::{Path, PathBuf},
    str::FromStr,
    time::Duration,
};

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{
    sqlite::{SqliteConnectOptions, SqlitePoolOptions},
    Pool, Row, Sqlite,
};

use shared::domain::{ActorId, ActorKind, GroupId, TenantId};
use workflow::{ActorRecord, ActorStore, CreateActorError, GroupDirectory, ValidatedActor};

#[derive(Clone)]
pub struct Storage {
    pool: Pool<Sqlite>,
}

#[derive(Debug, Clone)]
pub struct StoredTenant {
    pub tenant_id: TenantId,
    pub name: String,
    pub service_account_limit: i64,
}

#[derive(Debug, Clone)]
pub struct StoredGroup {
    pub group_id: GroupId,
    pub tenant_id: TenantId,
    pub name: String,
}

impl Storage {
    pub async fn new(database_url: &str) -> Result<Self> {
        ensure_sqlite_parent_dir_exists(database_url)?;

        let connect_options = SqliteConnectOptions::from_str(database_url)?
            .create_if_missing(true)
            .foreign_keys(true)
            .busy_timeout(Duration::from_secs(5));
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(connect_options)
            .await?;
        sqlx::migrate!("./migrations").run(&pool).await?;
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &Pool<Sqlite> {
        &self.pool
    }

    pub async fn health_check(&self) -> Result<()> {
        let _: i64 = sqlx::query_scalar("SELECT 1")
            .fetch_one(&self.pool)
            .await
            .context("sqlite ping failed")?;
        Ok(())
    }

    pub async fn create_tenant(&self, name: &str, service_account_limit: i64) -> Result<TenantId> {
        let rec = sqlx::query(
            "INSERT INTO tenants (name, service_account_limit) VALUES (?, ?) RETURNING id",
        )
        .bind(name)
        .bind(service_account_limit)
        .fetch_one(&self.pool)
        .await?;
        Ok(TenantId(rec.get::<i64, _>(0)))
    }

    pub async fn load_tenant(&self, tenant_id: TenantId) -> Result<Option<StoredTenant>> {
        let row = sqlx::query("SELECT id, name, service_account_limit FROM tenants WHERE id = ?")
            .bind(tenant_id.0)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|r| StoredTenant {
            tenant_id: TenantId(r.get::<i64, _>(0)),
            name: r.get::<String, _>(1),
            service_account_limit: r.get::<i64, _>(2),
        }))
    }

    /// Plan changes apply to the next submission; the limit is re-read inside
    /// every creation transaction.
    pub async fn set_service_account_limit(
        &self,
        tenant_id: TenantId,
        service_account_limit: i64,
    ) -> Result<bool> {
        let updated = sqlx::query("UPDATE tenants SET service_account_limit = ? WHERE id = ?")
            .bind(service_account_limit)
            .bind(tenant_id.0)
            .execute(&self.pool)
            .await?
            .rows_affected();
        Ok(updated > 0)
    }

    pub async fn create_group(&self, tenant_id: TenantId, name: &str) -> Result<GroupId> {
        let rec = sqlx::query(
            "INSERT INTO tenant_groups (tenant_id, name) VALUES (?, ?) RETURNING id",
        )
        .bind(tenant_id.0)
        .bind(name)
        .fetch_one(&self.pool)
        .await?;
        Ok(GroupId(rec.get::<i64, _>(0)))
    }

    pub async fn list_groups_for_tenant(&self, tenant_id: TenantId) -> Result<Vec<StoredGroup>> {
        let rows = sqlx::query(
            "SELECT id, tenant_id, name FROM tenant_groups WHERE tenant_id = ? ORDER BY id ASC",
        )
        .bind(tenant_id.0)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .into_iter()
            .map(|r| StoredGroup {
                group_id: GroupId(r.get::<i64, _>(0)),
                tenant_id: TenantId(r.get::<i64, _>(1)),
                name: r.get::<String, _>(2),
            })
            .collect())
    }

    pub async fn load_actor(&self, actor_id: ActorId) -> Result<Option<ActorRecord>> {
        let row = sqlx::query(
            "SELECT id, tenant_id, kind, name, created_at FROM actors WHERE id = ?",
        )
        .bind(actor_id.0)
        .fetch_optional(&self.pool)
        .await?;
        let Some(row) = row else {
            return Ok(None);
        };
        let memberships = self.memberships_for_actor(actor_id).await?;
        Ok(Some(actor_record_from_row(&row, memberships)))
    }

    pub async fn list_actors_for_tenant(
        &self,
        tenant_id: TenantId,
        kind: ActorKind,
    ) -> Result<Vec<ActorRecord>> {
        let rows = sqlx::query(
            "SELECT id, tenant_id, kind, name, created_at
             FROM actors
             WHERE tenant_id = ? AND kind = ?
             ORDER BY id ASC",
        )
        .bind(tenant_id.0)
        .bind(kind_str(kind))
        .fetch_all(&self.pool)
        .await?;

        let mut actors = Vec::with_capacity(rows.len());
        for row in rows {
            let memberships = self
                .memberships_for_actor(ActorId(row.get::<i64, _>(0)))
                .await?;
            actors.push(actor_record_from_row(&row, memberships));
        }
        Ok(actors)
    }

    pub async fn count_actors(&self, tenant_id: TenantId, kind: ActorKind) -> Result<i64> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM actors WHERE tenant_id = ? AND kind = ?")
                .bind(tenant_id.0)
                .bind(kind_str(kind))
                .fetch_one(&self.pool)
                .await?;
        Ok(count)
    }

    async fn memberships_for_actor(&self, actor_id: ActorId) -> Result<BTreeSet<GroupId>> {
        let rows = sqlx::query_scalar::<_, i64>(
            "SELECT group_id FROM actor_memberships WHERE actor_id = ? ORDER BY group_id ASC",
        )
        .bind(actor_id.0)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(GroupId).collect())
    }
}

#[async_trait]
impl GroupDirectory for Storage {
    async fn existing_groups(
        &self,
        tenant_id: TenantId,
        ids: &BTreeSet<GroupId>,
    ) -> Result<BTreeSet<GroupId>> {
        if ids.is_empty() {
            return Ok(BTreeSet::new());
        }

        // SQLite has no array binds; the id set becomes a placeholder list.
        let placeholders = vec!["?"; ids.len()].join(", ");
        let sql = format!(
            "SELECT id FROM tenant_groups WHERE tenant_id = ? AND id IN ({placeholders})"
        );
        let mut query = sqlx::query_scalar::<_, i64>(&sql).bind(tenant_id.0);
        for id in ids {
            query = query.bind(id.0);
        }
        let rows = query.fetch_all(&self.pool).await?;
        Ok(rows.into_iter().map(GroupId).collect())
    }
}

#[async_trait]
impl ActorStore for Storage {
    async fn create_actor(
        &self,
        tenant_id: TenantId,
        actor: &ValidatedActor,
    ) -> Result<ActorRecord, CreateActorError> {
        let mut tx = self.pool.begin().await.map_err(storage_err)?;

        // Slot check and insert in one guarded statement: the count-vs-limit
        // comparison and the row write are a single atomic step, so two
        // racing submissions cannot both observe a free slot.
        let inserted = sqlx::query(
            "INSERT INTO actors (tenant_id, kind, name)
             SELECT ?1, ?2, ?3
             WHERE (SELECT COUNT(*) FROM actors WHERE tenant_id = ?1 AND kind = ?2)
                 < (SELECT service_account_limit FROM tenants WHERE id = ?1)
             RETURNING id, created_at",
        )
        .bind(tenant_id.0)
        .bind(kind_str(actor.kind))
        .bind(&actor.name)
        .fetch_optional(&mut *tx)
        .await
        .map_err(classify_actor_insert_error)?;

        let Some(row) = inserted else {
            // Nothing written: the tenant is missing or the slot count is at
            // the limit. Re-read the limit for the error payload.
            let limit: Option<i64> =
                sqlx::query_scalar("SELECT service_account_limit FROM tenants WHERE id = ?")
                    .bind(tenant_id.0)
                    .fetch_optional(&mut *tx)
                    .await
                    .map_err(storage_err)?;
            return match limit {
                Some(limit) => Err(CreateActorError::QuotaExceeded { limit }),
                None => Err(CreateActorError::TenantNotFound),
            };
        };

        let id = ActorId(row.get::<i64, _>(0));
        let created_at = row.get::<DateTime<Utc>, _>(1);

        for group_id in &actor.memberships {
            // Guarded against cross-tenant references so commit-time
            // membership integrity matches what validation promised.
            let linked = sqlx::query(
                "INSERT INTO actor_memberships (actor_id, group_id)
                 SELECT ?1, g.id FROM tenant_groups g WHERE g.id = ?2 AND g.tenant_id = ?3",
            )
            .bind(id.0)
            .bind(group_id.0)
            .bind(tenant_id.0)
            .execute(&mut *tx)
            .await
            .map_err(storage_err)?
            .rows_affected();
            if linked == 0 {
                return Err(CreateActorError::MissingGroup);
            }
        }

        tx.commit().await.map_err(storage_err)?;

        Ok(ActorRecord {
            id,
            tenant_id,
            kind: actor.kind,
            name: actor.name.clone(),
            memberships: actor.memberships.clone(),
            created_at,
        })
    }
}

fn actor_record_from_row(row: &sqlx::sqlite::SqliteRow, memberships: BTreeSet<GroupId>) -> ActorRecord {
    ActorRecord {
        id: ActorId(row.get::<i64, _>(0)),
        tenant_id: TenantId(row.get::<i64, _>(1)),
        kind: kind_from_str(&row.get::<String, _>(2)),
        name: row.get::<String, _>(3),
        memberships,
        created_at: row.get::<DateTime<Utc>, _>(4),
    }
}

fn kind_str(kind: ActorKind) -> &'static str {
    match kind {
        ActorKind::ServiceAccount => "service_account",
    }
}

fn kind_from_str(_raw: &str) -> ActorKind {
    // Only service accounts flow through this store today.
    ActorKind::ServiceAccount
}

fn classify_actor_insert_error(err: sqlx::Error) -> CreateActorError {
    if let Some(db_err) = err.as_database_error() {
        if db_err.is_unique_violation() {
            return CreateActorError::NameTaken;
        }
    }
    storage_err(err)
}

fn storage_err(err: sqlx::Error) -> CreateActorError {
    CreateActorError::Storage(err.into())
}

fn ensure_sqlite_parent_dir_exists(database_url: &str) -> Result<()> {
    let Some(path) = sqlite_path(database_url) else {
        return Ok(());
    };

    let Some(parent) = path.parent() else {
        return Ok(());
    };

    fs::create_dir_all(parent).with_context(|| {
        format!(
            "failed to create parent directory '{}' for database url '{database_url}'",
            parent.display()
        )
    })?;

    Ok(())
}

fn sqlite_path(database_url: &str) -> Option<PathBuf> {
    if database_url == "sqlite::memory:" || !database_url.starts_with("sqlite:") {
        return None;
    }

    let path = database_url
        .trim_start_matches("sqlite://")
        .trim_start_matches("sqlite:")
        .split('?')
        .next()
        .unwrap_or_default();

    if path.is_empty() {
        return None;
    }

    Some(Path::new(path).to_path_buf())
}

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
