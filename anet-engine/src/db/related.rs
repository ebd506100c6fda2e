//! Polymorphic related-object link tables
//!
//! Notes, assessments, attachments and authorization groups link to arbitrary
//! entities through `(related_object_type, related_object_uuid)` rows. Each
//! link table is a marker type so its loaders batch independently.

use crate::loader::sql::{push_uuid_list, uuid_col};
use crate::loader::BatchLoader;
use anet_common::entity::{EntityKind, EntityRef};
use anet_common::Result;
use async_trait::async_trait;
use sqlx::sqlite::SqliteRow;
use sqlx::{QueryBuilder, Row, Sqlite, SqliteConnection, SqlitePool};
use std::marker::PhantomData;
use uuid::Uuid;

/// A link table owned by one entity kind
pub trait RelatedTable: Send + Sync + 'static {
    const TABLE: &'static str;
    const OWNER_COLUMN: &'static str;
    const OWNER_KIND: EntityKind;
    const LINKS_LOADER: &'static str;
    const OWNERS_LOADER: &'static str;
}

/// `note_related_objects`
pub struct NoteLinks;

impl RelatedTable for NoteLinks {
    const TABLE: &'static str = "note_related_objects";
    const OWNER_COLUMN: &'static str = "note_uuid";
    const OWNER_KIND: EntityKind = EntityKind::Note;
    const LINKS_LOADER: &'static str = "notes.related_objects";
    const OWNERS_LOADER: &'static str = "notes.for_related_object";
}

/// `assessment_related_objects`
pub struct AssessmentLinks;

impl RelatedTable for AssessmentLinks {
    const TABLE: &'static str = "assessment_related_objects";
    const OWNER_COLUMN: &'static str = "assessment_uuid";
    const OWNER_KIND: EntityKind = EntityKind::Assessment;
    const LINKS_LOADER: &'static str = "assessments.related_objects";
    const OWNERS_LOADER: &'static str = "assessments.for_related_object";
}

/// `attachment_related_objects`
pub struct AttachmentLinks;

impl RelatedTable for AttachmentLinks {
    const TABLE: &'static str = "attachment_related_objects";
    const OWNER_COLUMN: &'static str = "attachment_uuid";
    const OWNER_KIND: EntityKind = EntityKind::Attachment;
    const LINKS_LOADER: &'static str = "attachments.related_objects";
    const OWNERS_LOADER: &'static str = "attachments.for_related_object";
}

/// `authorization_group_related_objects` (group members)
pub struct GroupMembers;

impl RelatedTable for GroupMembers {
    const TABLE: &'static str = "authorization_group_related_objects";
    const OWNER_COLUMN: &'static str = "authorization_group_uuid";
    const OWNER_KIND: EntityKind = EntityKind::AuthorizationGroup;
    const LINKS_LOADER: &'static str = "authorization_groups.members";
    const OWNERS_LOADER: &'static str = "authorization_groups.for_member";
}

fn link_from_row(row: &SqliteRow) -> Result<EntityRef> {
    let tag: String = row.try_get("related_object_type")?;
    let uuid: String = row.try_get("related_object_uuid")?;
    EntityRef::from_parts(&tag, &uuid)
}

/// Links of each owner
pub struct RelatedObjectsOf<T>(PhantomData<fn() -> T>);

impl<T> Default for RelatedObjectsOf<T> {
    fn default() -> Self {
        Self(PhantomData)
    }
}

#[async_trait]
impl<T: RelatedTable> BatchLoader for RelatedObjectsOf<T> {
    type Key = Uuid;
    type Value = EntityRef;
    const NAME: &'static str = T::LINKS_LOADER;

    async fn load(&self, pool: &SqlitePool, keys: &[Uuid]) -> Result<Vec<(Uuid, EntityRef)>> {
        let mut builder = QueryBuilder::<Sqlite>::new(format!(
            "SELECT {owner} AS owner_uuid, related_object_type, related_object_uuid FROM {table} WHERE {owner} IN ",
            owner = T::OWNER_COLUMN,
            table = T::TABLE,
        ));
        push_uuid_list(&mut builder, keys);
        builder.push(" ORDER BY related_object_type, related_object_uuid");
        let rows = builder.build().fetch_all(pool).await?;
        rows.iter()
            .map(|row| Ok((uuid_col(row, "owner_uuid")?, link_from_row(row)?)))
            .collect()
    }
}

/// Owners linked to each related object uuid
pub struct OwnersOf<T>(PhantomData<fn() -> T>);

impl<T> Default for OwnersOf<T> {
    fn default() -> Self {
        Self(PhantomData)
    }
}

#[async_trait]
impl<T: RelatedTable> BatchLoader for OwnersOf<T> {
    type Key = Uuid;
    type Value = Uuid;
    const NAME: &'static str = T::OWNERS_LOADER;

    async fn load(&self, pool: &SqlitePool, keys: &[Uuid]) -> Result<Vec<(Uuid, Uuid)>> {
        let mut builder = QueryBuilder::<Sqlite>::new(format!(
            "SELECT DISTINCT related_object_uuid, {owner} AS owner_uuid FROM {table} WHERE related_object_uuid IN ",
            owner = T::OWNER_COLUMN,
            table = T::TABLE,
        ));
        push_uuid_list(&mut builder, keys);
        builder.push(" ORDER BY owner_uuid");
        let rows = builder.build().fetch_all(pool).await?;
        rows.iter()
            .map(|row| Ok((uuid_col(row, "related_object_uuid")?, uuid_col(row, "owner_uuid")?)))
            .collect()
    }
}

/// Write links for an owner
pub async fn insert_links<T: RelatedTable>(
    conn: &mut SqliteConnection,
    owner_uuid: Uuid,
    links: &[EntityRef],
) -> Result<()> {
    let sql = format!(
        "INSERT OR IGNORE INTO {table} ({owner}, related_object_type, related_object_uuid) VALUES (?, ?, ?)",
        table = T::TABLE,
        owner = T::OWNER_COLUMN,
    );
    for link in links {
        sqlx::query(&sql)
            .bind(owner_uuid.to_string())
            .bind(link.kind().tag())
            .bind(link.uuid().to_string())
            .execute(&mut *conn)
            .await?;
    }
    Ok(())
}

/// Current links of an owner, read inside a transaction
pub async fn links_in<T: RelatedTable>(conn: &mut SqliteConnection, owner_uuid: Uuid) -> Result<Vec<EntityRef>> {
    let sql = format!(
        "SELECT related_object_type, related_object_uuid FROM {table} WHERE {owner} = ? \
         ORDER BY related_object_type, related_object_uuid",
        table = T::TABLE,
        owner = T::OWNER_COLUMN,
    );
    let rows = sqlx::query(&sql)
        .bind(owner_uuid.to_string())
        .fetch_all(conn)
        .await?;
    rows.iter().map(link_from_row).collect()
}

/// Remove every link of an owner
pub async fn delete_links<T: RelatedTable>(conn: &mut SqliteConnection, owner_uuid: Uuid) -> Result<u64> {
    let sql = format!(
        "DELETE FROM {table} WHERE {owner} = ?",
        table = T::TABLE,
        owner = T::OWNER_COLUMN,
    );
    let result = sqlx::query(&sql)
        .bind(owner_uuid.to_string())
        .execute(conn)
        .await?;
    Ok(result.rows_affected())
}
