//! Postgres-backed identity store.
//!
//! ## Schema
//!
//! | table | columns |
//! |---|---|
//! | `groups` | `name` PK, `level` BIGINT >= 0, `manager` nullable FK to `groups(name)` |
//! | `users` | `username` PK, `password_hash` |
//! | `memberships` | (`username`, `group_name`) PK, both FK with `ON DELETE CASCADE` |
//!
//! ## Error Mapping
//!
//! | PostgreSQL Error Code | IdentityStoreError |
//! |---|---|
//! | `23505` (unique violation) | `Duplicate` |
//! | `23503` (foreign key violation) | `UnknownGroup` |
//! | anything else | `Backend` |
//!
//! ## Runtime
//!
//! The [`IdentityStore`] trait is synchronous. The trait impl bridges into the
//! async pool with `tokio::task::block_in_place`, which requires a
//! multi-thread tokio runtime.

use std::future::Future;
use std::sync::Arc;

use sqlx::{PgPool, Row};
use tracing::instrument;

use tessera_auth::{Group, GroupSource, GroupSourceError, Membership};
use tessera_core::{GroupName, Level, Username};

use super::r#trait::{IdentityStore, IdentityStoreError, User};

const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS groups (
        name     TEXT PRIMARY KEY,
        level    BIGINT NOT NULL CHECK (level >= 0),
        manager  TEXT NULL REFERENCES groups(name) ON DELETE RESTRICT
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS users (
        username       TEXT PRIMARY KEY,
        password_hash  TEXT NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS memberships (
        username    TEXT NOT NULL REFERENCES users(username) ON DELETE CASCADE,
        group_name  TEXT NOT NULL REFERENCES groups(name) ON DELETE CASCADE,
        PRIMARY KEY (username, group_name)
    )
    "#,
];

#[derive(Debug, Clone)]
pub struct PostgresIdentityStore {
    pool: Arc<PgPool>,
}

impl PostgresIdentityStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }

    /// Create the tables if they do not exist (idempotent).
    pub async fn ensure_schema(&self) -> Result<(), IdentityStoreError> {
        for statement in SCHEMA {
            sqlx::query(statement)
                .execute(&*self.pool)
                .await
                .map_err(|e| map_sqlx_error("ensure_schema", e))?;
        }
        Ok(())
    }

    #[instrument(skip(self), fields(group = %name), err)]
    pub async fn fetch_group(&self, name: &GroupName) -> Result<Option<Group>, IdentityStoreError> {
        let row = sqlx::query("SELECT name, level, manager FROM groups WHERE name = $1")
            .bind(name.as_str())
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("fetch_group", e))?;

        row.map(|row| -> Result<Group, IdentityStoreError> {
            let level: i64 = row.try_get("level").map_err(|e| map_sqlx_error("fetch_group", e))?;
            let manager: Option<String> =
                row.try_get("manager").map_err(|e| map_sqlx_error("fetch_group", e))?;
            Ok(Group::from_parts(
                name.clone(),
                to_level(level)?,
                manager.map(parse_group_name).transpose()?,
            ))
        })
        .transpose()
    }

    #[instrument(skip_all, fields(username = %username), err)]
    pub async fn fetch_user(&self, username: &Username) -> Result<Option<User>, IdentityStoreError> {
        let row = sqlx::query("SELECT password_hash FROM users WHERE username = $1")
            .bind(username.as_str())
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("fetch_user", e))?;

        row.map(|row| -> Result<User, IdentityStoreError> {
            let hash: String = row
                .try_get("password_hash")
                .map_err(|e| map_sqlx_error("fetch_user", e))?;
            Ok(User::new(username.clone(), hash))
        })
        .transpose()
    }

    #[instrument(skip_all, fields(username = %username), err)]
    pub async fn fetch_memberships(
        &self,
        username: &Username,
    ) -> Result<Vec<Membership>, IdentityStoreError> {
        let rows = sqlx::query(
            r#"
            SELECT g.name, g.level
            FROM memberships m
            JOIN groups g ON g.name = m.group_name
            WHERE m.username = $1
            ORDER BY g.name ASC
            "#,
        )
        .bind(username.as_str())
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("fetch_memberships", e))?;

        rows.into_iter()
            .map(|row| -> Result<Membership, IdentityStoreError> {
                let name: String = row.try_get("name").map_err(|e| map_sqlx_error("fetch_memberships", e))?;
                let level: i64 = row.try_get("level").map_err(|e| map_sqlx_error("fetch_memberships", e))?;
                Ok(Membership::new(parse_group_name(name)?, to_level(level)?))
            })
            .collect()
    }

    #[instrument(skip(self, group), fields(group = %group.name()), err)]
    pub async fn store_group(&self, group: &Group) -> Result<(), IdentityStoreError> {
        sqlx::query("INSERT INTO groups (name, level, manager) VALUES ($1, $2, $3)")
            .bind(group.name().as_str())
            .bind(i64::from(group.level()))
            .bind(group.manager().map(GroupName::as_str))
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("store_group", e))?;
        Ok(())
    }

    #[instrument(skip(self), fields(group = %name), err)]
    pub async fn delete_group(&self, name: &GroupName) -> Result<bool, IdentityStoreError> {
        let result = sqlx::query("DELETE FROM groups WHERE name = $1")
            .bind(name.as_str())
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("delete_group", e))?;
        Ok(result.rows_affected() > 0)
    }

    #[instrument(skip_all, fields(manager = %manager), err)]
    pub async fn fetch_managed_groups(
        &self,
        manager: &GroupName,
    ) -> Result<Vec<GroupName>, IdentityStoreError> {
        let rows = sqlx::query("SELECT name FROM groups WHERE manager = $1 ORDER BY name ASC")
            .bind(manager.as_str())
            .fetch_all(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("fetch_managed_groups", e))?;

        rows.into_iter()
            .map(|row| -> Result<GroupName, IdentityStoreError> {
                let name: String = row
                    .try_get("name")
                    .map_err(|e| map_sqlx_error("fetch_managed_groups", e))?;
                parse_group_name(name)
            })
            .collect()
    }

    /// Insert the user and their memberships in one transaction.
    #[instrument(skip_all, fields(username = %user.username, groups = groups.len()), err)]
    pub async fn store_user(&self, user: &User, groups: &[GroupName]) -> Result<(), IdentityStoreError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("store_user", e))?;

        sqlx::query("INSERT INTO users (username, password_hash) VALUES ($1, $2)")
            .bind(user.username.as_str())
            .bind(&user.password_hash)
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("store_user", e))?;

        for group in groups {
            sqlx::query("INSERT INTO memberships (username, group_name) VALUES ($1, $2)")
                .bind(user.username.as_str())
                .bind(group.as_str())
                .execute(&mut *tx)
                .await
                .map_err(|e| match map_sqlx_error("store_user", e) {
                    IdentityStoreError::UnknownGroup(_) => {
                        IdentityStoreError::UnknownGroup(group.to_string())
                    }
                    other => other,
                })?;
        }

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("store_user", e))?;
        Ok(())
    }

    #[instrument(skip_all, fields(username = %username), err)]
    pub async fn delete_user(&self, username: &Username) -> Result<bool, IdentityStoreError> {
        let result = sqlx::query("DELETE FROM users WHERE username = $1")
            .bind(username.as_str())
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("delete_user", e))?;
        Ok(result.rows_affected() > 0)
    }

    fn block_on<F>(&self, fut: F) -> Result<F::Output, IdentityStoreError>
    where
        F: Future,
    {
        let handle = tokio::runtime::Handle::try_current().map_err(|_| {
            IdentityStoreError::Backend(
                "PostgresIdentityStore requires a multi-thread tokio runtime".to_string(),
            )
        })?;
        Ok(tokio::task::block_in_place(|| handle.block_on(fut)))
    }
}

fn to_level(raw: i64) -> Result<Level, IdentityStoreError> {
    Level::try_from(raw).map_err(|_| IdentityStoreError::Backend(format!("invalid group level {raw}")))
}

fn parse_group_name(raw: String) -> Result<GroupName, IdentityStoreError> {
    GroupName::parse(raw).map_err(|e| IdentityStoreError::Backend(e.to_string()))
}

fn map_sqlx_error(operation: &str, err: sqlx::Error) -> IdentityStoreError {
    match err {
        sqlx::Error::Database(db_err) => {
            let msg = format!("database error in {}: {}", operation, db_err.message());
            match db_err.code().as_deref() {
                Some("23505") => IdentityStoreError::Duplicate(msg),
                Some("23503") => IdentityStoreError::UnknownGroup(msg),
                _ => IdentityStoreError::Backend(msg),
            }
        }
        other => IdentityStoreError::Backend(format!("{operation}: {other}")),
    }
}

impl GroupSource for PostgresIdentityStore {
    fn group(&self, name: &GroupName) -> Result<Option<Group>, GroupSourceError> {
        Ok(self.block_on(self.fetch_group(name))??)
    }
}

impl IdentityStore for PostgresIdentityStore {
    fn user(&self, username: &Username) -> Result<Option<User>, IdentityStoreError> {
        self.block_on(self.fetch_user(username))?
    }

    fn memberships(&self, username: &Username) -> Result<Vec<Membership>, IdentityStoreError> {
        self.block_on(self.fetch_memberships(username))?
    }

    fn insert_group(&self, group: Group) -> Result<(), IdentityStoreError> {
        self.block_on(self.store_group(&group))?
    }

    fn remove_group(&self, name: &GroupName) -> Result<bool, IdentityStoreError> {
        self.block_on(self.delete_group(name))?
    }

    fn managed_groups(&self, manager: &GroupName) -> Result<Vec<GroupName>, IdentityStoreError> {
        self.block_on(self.fetch_managed_groups(manager))?
    }

    fn insert_user(&self, user: User, groups: &[GroupName]) -> Result<(), IdentityStoreError> {
        self.block_on(self.store_user(&user, groups))?
    }

    fn remove_user(&self, username: &Username) -> Result<bool, IdentityStoreError> {
        self.block_on(self.delete_user(username))?
    }
}
