//! People

use crate::loader::sql::{push_uuid_list, ts_col, uuid_col};
use crate::loader::BatchLoader;
use anet_common::{time, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{QueryBuilder, Row, Sqlite, SqlitePool};
use uuid::Uuid;

/// Person record
#[derive(Debug, Clone, PartialEq)]
pub struct Person {
    pub uuid: Uuid,
    pub name: String,
    pub email_address: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Person {
    pub fn new(name: impl Into<String>, email_address: Option<String>) -> Self {
        let now = time::now();
        Self {
            uuid: Uuid::new_v4(),
            name: name.into(),
            email_address,
            created_at: now,
            updated_at: now,
        }
    }
}

fn person_from_row(row: &SqliteRow) -> Result<Person> {
    Ok(Person {
        uuid: uuid_col(row, "uuid")?,
        name: row.try_get("name")?,
        email_address: row.try_get("email_address")?,
        created_at: ts_col(row, "created_at")?,
        updated_at: ts_col(row, "updated_at")?,
    })
}

/// Save person to database
pub async fn insert_person(pool: &SqlitePool, person: &Person) -> Result<()> {
    sqlx::query(
        "INSERT INTO people (uuid, name, email_address, created_at, updated_at) VALUES (?, ?, ?, ?, ?)",
    )
    .bind(person.uuid.to_string())
    .bind(&person.name)
    .bind(&person.email_address)
    .bind(time::to_db(&person.created_at))
    .bind(time::to_db(&person.updated_at))
    .execute(pool)
    .await?;

    Ok(())
}

/// People by uuid
#[derive(Debug, Clone, Copy, Default)]
pub struct PersonById;

#[async_trait]
impl BatchLoader for PersonById {
    type Key = Uuid;
    type Value = Person;
    const NAME: &'static str = "people.by_id";

    async fn load(&self, pool: &SqlitePool, keys: &[Uuid]) -> Result<Vec<(Uuid, Person)>> {
        let mut builder = QueryBuilder::<Sqlite>::new("SELECT * FROM people WHERE uuid IN ");
        push_uuid_list(&mut builder, keys);
        let rows = builder.build().fetch_all(pool).await?;
        rows.iter()
            .map(|row| person_from_row(row).map(|p| (p.uuid, p)))
            .collect()
    }
}
