//! Notes, assessments and attachments
//!
//! Every mutation is authorized first (a denial is `Forbidden`), then written
//! in one transaction together with the stale-marking of subscriptions on
//! the item and everything it links to. Deletes propagate from the links the
//! item had before deletion.

use crate::audit;
use crate::authz::assessment::{authorize_assessment, authorize_assessments};
use crate::authz::note::authorize_note;
use crate::authz::{Actor, Operation};
use crate::db::assessments::{self, Assessment, AssessmentById, AssessmentRowsById};
use crate::db::attachments::{self, Attachment, AttachmentById};
use crate::db::notes::{self, Note, NoteById};
use crate::db::related::{AssessmentLinks, AttachmentLinks, NoteLinks, OwnersOf, RelatedObjectsOf};
use crate::loader::BatchResolver;
use crate::propagation;
use crate::EngineContext;
use anet_common::entity::EntityRef;
use anet_common::events::AnetEvent;
use anet_common::{time, Error, Result};
use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::{Sqlite, Transaction};
use tracing::debug;
use uuid::Uuid;

/// Item operations for one request
pub struct ItemService<'a> {
    ctx: &'a EngineContext,
    resolver: BatchResolver,
}

impl<'a> ItemService<'a> {
    pub fn new(ctx: &'a EngineContext) -> Self {
        Self {
            ctx,
            resolver: ctx.resolver(),
        }
    }

    pub fn resolver(&self) -> &BatchResolver {
        &self.resolver
    }

    // ---- notes ----

    pub async fn create_note(&self, actor: &Actor, text: &str, links: &[EntityRef]) -> Result<Note> {
        let text = checked_text(text)?;
        checked_links(links)?;
        let note = Note::new(actor.person_uuid, text);
        authorize_note(actor, &note, Operation::Create)
            .require(|| "Not allowed to create notes".to_string())?;

        let mut tx = self.ctx.pool.begin().await?;
        notes::insert_note(&mut *tx, &note, links).await?;
        self.finish(tx, EntityRef::Note(note.uuid), links, note.updated_at, false)
            .await?;

        audit!("Note {} created by {}", note.uuid, actor.person_uuid);
        Ok(note)
    }

    pub async fn update_note(&self, actor: &Actor, note_uuid: Uuid, text: &str) -> Result<Note> {
        let text = checked_text(text)?;
        let (mut note, links) = self.load_note(note_uuid).await?;
        authorize_note(actor, &note, Operation::Update)
            .require(|| format!("Only the author may update note {}", note_uuid))?;

        note.text = text;
        note.updated_at = time::now();
        let mut tx = self.ctx.pool.begin().await?;
        if notes::update_note(&mut *tx, &note).await? == 0 {
            return Err(Error::NotFound(format!("Note {} not found", note_uuid)));
        }
        self.finish(tx, EntityRef::Note(note.uuid), &links, note.updated_at, false)
            .await?;

        audit!("Note {} updated by {}", note.uuid, actor.person_uuid);
        Ok(note)
    }

    pub async fn delete_note(&self, actor: &Actor, note_uuid: Uuid) -> Result<()> {
        let (note, links) = self.load_note(note_uuid).await?;
        authorize_note(actor, &note, Operation::Delete)
            .require(|| format!("Only the author may delete note {}", note_uuid))?;

        let mut tx = self.ctx.pool.begin().await?;
        if notes::delete_note(&mut *tx, note_uuid).await? == 0 {
            return Err(Error::NotFound(format!("Note {} not found", note_uuid)));
        }
        self.finish(tx, EntityRef::Note(note_uuid), &links, time::now(), true)
            .await?;

        audit!("Note {} deleted by {}", note_uuid, actor.person_uuid);
        Ok(())
    }

    /// Notes linked to an entity, most recently updated first
    pub async fn notes_for(&self, actor: &Actor, related_uuid: Uuid) -> Result<Vec<Note>> {
        let owners = self
            .resolver
            .load(OwnersOf::<NoteLinks>::default(), related_uuid)
            .await?;
        let mut notes: Vec<Note> = self
            .resolver
            .load_many(NoteById, owners)
            .await?
            .into_iter()
            .flatten()
            .filter(|note| authorize_note(actor, note, Operation::Read).is_allowed())
            .collect();
        notes.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(notes)
    }

    async fn load_note(&self, note_uuid: Uuid) -> Result<(Note, Vec<EntityRef>)> {
        let plan = self.resolver.plan();
        let note = plan.load(NoteById, note_uuid);
        let links = plan.load(RelatedObjectsOf::<NoteLinks>::default(), note_uuid);
        let resolved = self.resolver.execute(plan).await;
        let note = resolved
            .first(&note)?
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("Note {} not found", note_uuid)))?;
        Ok((note, resolved.get(&links)?.to_vec()))
    }

    // ---- assessments ----

    pub async fn create_assessment(
        &self,
        actor: &Actor,
        assessment_key: &str,
        values: Value,
        links: &[EntityRef],
    ) -> Result<Assessment> {
        let assessment = Assessment::new(actor.person_uuid, assessment_key, values);
        authorize_assessment(&self.resolver, &self.ctx.dictionary, actor, &assessment, links, Operation::Create)
            .await?
            .require(|| format!("Not allowed to create assessment '{}'", assessment_key))?;

        let mut tx = self.ctx.pool.begin().await?;
        assessments::insert_assessment(&mut *tx, &assessment, links).await?;
        self.finish(tx, EntityRef::Assessment(assessment.uuid), links, assessment.updated_at, false)
            .await?;

        audit!(
            "Assessment {} ({}) created by {}",
            assessment.uuid,
            assessment.assessment_key,
            actor.person_uuid
        );
        Ok(assessment)
    }

    /// Replace an assessment's payload; the new payload is what gets checked
    pub async fn update_assessment(&self, actor: &Actor, assessment_uuid: Uuid, values: Value) -> Result<Assessment> {
        let (mut assessment, links) = self.load_assessment(assessment_uuid).await?;
        assessment.values = values;
        assessment.updated_at = time::now();
        authorize_assessment(&self.resolver, &self.ctx.dictionary, actor, &assessment, &links, Operation::Update)
            .await?
            .require(|| format!("Not allowed to update assessment {}", assessment_uuid))?;

        let mut tx = self.ctx.pool.begin().await?;
        if assessments::update_assessment(&mut *tx, &assessment).await? == 0 {
            return Err(Error::NotFound(format!("Assessment {} not found", assessment_uuid)));
        }
        self.finish(tx, EntityRef::Assessment(assessment.uuid), &links, assessment.updated_at, false)
            .await?;

        audit!("Assessment {} updated by {}", assessment.uuid, actor.person_uuid);
        Ok(assessment)
    }

    pub async fn delete_assessment(&self, actor: &Actor, assessment_uuid: Uuid) -> Result<()> {
        let (assessment, links) = self.load_assessment(assessment_uuid).await?;
        authorize_assessment(&self.resolver, &self.ctx.dictionary, actor, &assessment, &links, Operation::Delete)
            .await?
            .require(|| format!("Not allowed to delete assessment {}", assessment_uuid))?;

        let mut tx = self.ctx.pool.begin().await?;
        if assessments::delete_assessment(&mut *tx, assessment_uuid).await? == 0 {
            return Err(Error::NotFound(format!("Assessment {} not found", assessment_uuid)));
        }
        self.finish(tx, EntityRef::Assessment(assessment_uuid), &links, time::now(), true)
            .await?;

        audit!("Assessment {} deleted by {}", assessment_uuid, actor.person_uuid);
        Ok(())
    }

    /// Assessments of an entity the actor may read, most recently updated
    /// first
    ///
    /// Rows that fail to decode or to validate are left out rather than
    /// failing the listing.
    pub async fn assessments_for(&self, actor: &Actor, related_uuid: Uuid) -> Result<Vec<Assessment>> {
        let owners = self
            .resolver
            .load(OwnersOf::<AssessmentLinks>::default(), related_uuid)
            .await?;

        let plan = self.resolver.plan();
        let rows = plan.load_all(AssessmentRowsById, owners.iter().copied());
        let links = plan.load_all(RelatedObjectsOf::<AssessmentLinks>::default(), owners.iter().copied());
        let resolved = self.resolver.execute(plan).await;

        let mut candidates: Vec<(&Assessment, &[EntityRef])> = Vec::with_capacity(rows.len());
        for (row, links) in rows.iter().zip(&links) {
            let Some(Ok(assessment)) = resolved.first(row)? else {
                debug!("Skipping undecodable assessment linked to {}", related_uuid);
                continue;
            };
            candidates.push((assessment, resolved.get(links)?));
        }

        let decisions = authorize_assessments(
            &self.resolver,
            &self.ctx.dictionary,
            actor,
            &candidates,
            Operation::Read,
        )
        .await?;
        let mut readable = Vec::new();
        for ((assessment, _), decision) in candidates.iter().zip(decisions) {
            match decision {
                Ok(decision) if decision.is_allowed() => readable.push((*assessment).clone()),
                Ok(_) => {}
                Err(e) => debug!("Skipping assessment {}: {}", assessment.uuid, e),
            }
        }
        readable.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(readable)
    }

    async fn load_assessment(&self, assessment_uuid: Uuid) -> Result<(Assessment, Vec<EntityRef>)> {
        let plan = self.resolver.plan();
        let assessment = plan.load(AssessmentById, assessment_uuid);
        let links = plan.load(RelatedObjectsOf::<AssessmentLinks>::default(), assessment_uuid);
        let resolved = self.resolver.execute(plan).await;
        let assessment = resolved
            .first(&assessment)?
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("Assessment {} not found", assessment_uuid)))?;
        Ok((assessment, resolved.get(&links)?.to_vec()))
    }

    // ---- attachments ----

    pub async fn create_attachment(
        &self,
        actor: &Actor,
        file_name: &str,
        mime_type: &str,
        content_length: i64,
        links: &[EntityRef],
    ) -> Result<Attachment> {
        if file_name.trim().is_empty() {
            return Err(Error::InvalidInput("Attachment file name must not be empty".to_string()));
        }
        if content_length < 0 {
            return Err(Error::InvalidInput("Attachment length must not be negative".to_string()));
        }
        let attachment = Attachment::new(actor.person_uuid, file_name.trim(), mime_type, content_length);

        let mut tx = self.ctx.pool.begin().await?;
        attachments::insert_attachment(&mut *tx, &attachment, links).await?;
        self.finish(tx, EntityRef::Attachment(attachment.uuid), links, attachment.updated_at, false)
            .await?;

        audit!("Attachment {} created by {}", attachment.uuid, actor.person_uuid);
        Ok(attachment)
    }

    /// Only the uploader or an administrator may delete an attachment
    pub async fn delete_attachment(&self, actor: &Actor, attachment_uuid: Uuid) -> Result<()> {
        let plan = self.resolver.plan();
        let attachment = plan.load(AttachmentById, attachment_uuid);
        let links = plan.load(RelatedObjectsOf::<AttachmentLinks>::default(), attachment_uuid);
        let resolved = self.resolver.execute(plan).await;
        let attachment = resolved
            .first(&attachment)?
            .ok_or_else(|| Error::NotFound(format!("Attachment {} not found", attachment_uuid)))?;
        if !actor.is_privileged() && attachment.author_uuid != actor.person_uuid {
            return Err(Error::Forbidden(format!(
                "Only the uploader may delete attachment {}",
                attachment_uuid
            )));
        }
        let links = resolved.get(&links)?.to_vec();

        let mut tx = self.ctx.pool.begin().await?;
        if attachments::delete_attachment(&mut *tx, attachment_uuid).await? == 0 {
            return Err(Error::NotFound(format!("Attachment {} not found", attachment_uuid)));
        }
        self.finish(tx, EntityRef::Attachment(attachment_uuid), &links, time::now(), true)
            .await?;

        audit!("Attachment {} deleted by {}", attachment_uuid, actor.person_uuid);
        Ok(())
    }

    /// Propagate, commit, then announce
    async fn finish(
        &self,
        mut tx: Transaction<'static, Sqlite>,
        item: EntityRef,
        links: &[EntityRef],
        at: DateTime<Utc>,
        deleted: bool,
    ) -> Result<u64> {
        let statements = propagation::statements_for_item(item, links);
        let marked = propagation::mark_stale(&mut *tx, &statements, at).await?;
        tx.commit().await?;

        self.ctx.events.emit_lossy(AnetEvent::ItemChanged {
            item,
            deleted,
            timestamp: at,
        });
        if marked > 0 {
            self.ctx.events.emit_lossy(AnetEvent::SubscriptionsMarkedStale {
                source: item,
                count: marked,
                timestamp: at,
            });
        }
        Ok(marked)
    }
}

fn checked_text(text: &str) -> Result<String> {
    let text = text.trim();
    if text.is_empty() {
        return Err(Error::InvalidInput("Note text must not be empty".to_string()));
    }
    Ok(text.to_string())
}

fn checked_links(links: &[EntityRef]) -> Result<()> {
    if links.is_empty() {
        return Err(Error::InvalidInput("Note must link to at least one object".to_string()));
    }
    Ok(())
}
