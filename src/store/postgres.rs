use anyhow::{Context, Result};
use log::info;
use sqlx::{postgres::PgPoolOptions, PgPool, Row};

use crate::model::{Person, PersonRole};
use crate::store::traits::PersonStore;

/// Person store backed by the project-management database
#[derive(Debug, Clone)]
pub struct PostgresPersonStore {
    pool: PgPool,
}

impl PostgresPersonStore {
    pub async fn new(database_url: &str, max_connections: u32) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await
            .context("Failed to create PostgreSQL connection pool")?;
        info!("Connected person store");
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait::async_trait]
impl PersonStore for PostgresPersonStore {
    async fn list_people(&self) -> Result<Vec<Person>> {
        let rows = sqlx::query(
            "SELECT id, first_name, family_name, email FROM persons ORDER BY family_name, first_name",
        )
        .fetch_all(&self.pool)
        .await
        .context("Failed to list persons")?;

        Ok(rows
            .into_iter()
            .map(|row| {
                let first: String = row.get("first_name");
                let family: String = row.get("family_name");
                Person {
                    id: row.get("id"),
                    name: format!("{} {}", first, family).trim().to_string(),
                    email: row.get("email"),
                }
            })
            .collect())
    }

    async fn register_project(&self, identifier: &str, name: &str) -> Result<i32> {
        let existing = sqlx::query("SELECT id FROM projects WHERE openbis_project_identifier = $1")
            .bind(identifier)
            .fetch_optional(&self.pool)
            .await
            .context("Failed to look up project")?;
        if let Some(row) = existing {
            return Ok(row.get("id"));
        }

        let row = sqlx::query(
            "INSERT INTO projects (openbis_project_identifier, short_title) VALUES ($1, $2) RETURNING id",
        )
        .bind(identifier)
        .bind(name)
        .fetch_one(&self.pool)
        .await
        .context("Failed to insert project")?;
        Ok(row.get("id"))
    }

    async fn project_name(&self, identifier: &str) -> Result<Option<String>> {
        let row = sqlx::query("SELECT short_title FROM projects WHERE openbis_project_identifier = $1")
            .bind(identifier)
            .fetch_optional(&self.pool)
            .await
            .context("Failed to fetch project name")?;
        Ok(row
            .and_then(|r| r.get::<Option<String>, _>("short_title"))
            .filter(|name| !name.is_empty()))
    }

    async fn add_person_to_project(&self, project_id: i32, person_id: i32, role: PersonRole) -> Result<()> {
        sqlx::query(
            "INSERT INTO projects_persons (project_id, person_id, project_role) VALUES ($1, $2, $3) \
             ON CONFLICT DO NOTHING",
        )
        .bind(project_id)
        .bind(person_id)
        .bind(role.label())
        .execute(&self.pool)
        .await
        .context("Failed to add person to project")?;
        Ok(())
    }

    async fn register_experiment(&self, identifier: &str) -> Result<i32> {
        let row = sqlx::query(
            "INSERT INTO experiments (openbis_experiment_identifier) VALUES ($1) \
             ON CONFLICT (openbis_experiment_identifier) DO UPDATE SET openbis_experiment_identifier = EXCLUDED.openbis_experiment_identifier \
             RETURNING id",
        )
        .bind(identifier)
        .fetch_one(&self.pool)
        .await
        .context("Failed to insert experiment")?;
        Ok(row.get("id"))
    }

    async fn add_person_to_experiment(&self, experiment_id: i32, person_id: i32) -> Result<()> {
        sqlx::query(
            "INSERT INTO experiments_persons (experiment_id, person_id, experiment_role) VALUES ($1, $2, $3) \
             ON CONFLICT DO NOTHING",
        )
        .bind(experiment_id)
        .bind(person_id)
        .bind(PersonRole::Contact.label())
        .execute(&self.pool)
        .await
        .context("Failed to add person to experiment")?;
        Ok(())
    }
}
