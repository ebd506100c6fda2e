//! Shared fixtures for engine integration tests

#![allow(dead_code)]

use anet_common::db::init_database;
use anet_common::enums::{PositionType, TaskStatus};
use anet_common::events::EventBus;
use anet_common::{time, Dictionary};
use anet_engine::authz::Actor;
use anet_engine::db::approval_steps::{self, ApprovalStep, NewStep};
use anet_engine::db::organizations::{self, Organization};
use anet_engine::db::people::{self, Person};
use anet_engine::db::positions::{self, Position};
use anet_engine::db::reports::{self, Report, ReportPerson};
use anet_engine::db::tasks::{self, Task};
use anet_engine::notify::{EmailQueue, OutboundEmail};
use anet_engine::EngineContext;
use anet_common::enums::ApprovalStepType;
use chrono::{Duration, Utc};
use sqlx::pool::PoolConnection;
use sqlx::{Sqlite, SqlitePool};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;
use tokio::sync::mpsc::UnboundedReceiver;
use uuid::Uuid;

/// A fresh on-disk database with an engine context around it
pub struct TestWorld {
    pub _dir: TempDir,
    pub ctx: EngineContext,
    pub outbox: Mutex<UnboundedReceiver<OutboundEmail>>,
}

impl TestWorld {
    pub async fn new() -> Self {
        Self::with_dictionary(Dictionary::default()).await
    }

    pub async fn with_dictionary(dictionary: Dictionary) -> Self {
        let dir = TempDir::new().unwrap();
        let pool = init_database(&dir.path().join("anet.db")).await.unwrap();
        let (mailer, outbox) = EmailQueue::new();
        let ctx = EngineContext::new(pool, dictionary, Arc::new(EventBus::new(64)), Arc::new(mailer));
        Self {
            _dir: dir,
            ctx,
            outbox: Mutex::new(outbox),
        }
    }

    /// Swap the dictionary, keeping the database
    pub fn set_dictionary(&mut self, dictionary: Dictionary) {
        self.ctx = EngineContext::new(
            self.ctx.pool.clone(),
            dictionary,
            self.ctx.events.clone(),
            self.ctx.mailer.clone(),
        );
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.ctx.pool
    }

    /// A pooled connection, for writes that take one
    pub async fn conn(&self) -> PoolConnection<Sqlite> {
        self.pool().acquire().await.unwrap()
    }

    /// Emails queued so far
    pub fn drain_outbox(&self) -> Vec<OutboundEmail> {
        let mut outbox = self.outbox.lock().unwrap();
        let mut emails = Vec::new();
        while let Ok(email) = outbox.try_recv() {
            emails.push(email);
        }
        emails
    }

    pub async fn organization(&self, name: &str, parent: Option<Uuid>) -> Uuid {
        let org = Organization::new(name, parent);
        organizations::insert_organization(self.pool(), &org).await.unwrap();
        org.uuid
    }

    /// A person holding a new position in `org`; returns (person, position)
    pub async fn member(&self, name: &str, org: Option<Uuid>, position_type: PositionType) -> (Uuid, Uuid) {
        let person = Person::new(name, Some(format!("{}@example.org", name.to_lowercase())));
        people::insert_person(self.pool(), &person).await.unwrap();
        let position = Position::new(format!("{} position", name), position_type, org).held_by(person.uuid);
        positions::insert_position(self.pool(), &position).await.unwrap();
        (person.uuid, position.uuid)
    }

    pub async fn actor(&self, person_uuid: Uuid) -> Actor {
        Actor::load(&self.ctx.resolver(), person_uuid).await.unwrap()
    }

    pub async fn task(&self, name: &str) -> Uuid {
        let task = Task::new(name, TaskStatus::Active);
        tasks::insert_task(self.pool(), &task).await.unwrap();
        task.uuid
    }

    pub async fn location(&self, name: &str) -> Uuid {
        let uuid = Uuid::new_v4();
        let now = time::to_db(&time::now());
        sqlx::query("INSERT INTO locations (uuid, name, created_at, updated_at) VALUES (?, ?, ?, ?)")
            .bind(uuid.to_string())
            .bind(name)
            .bind(&now)
            .bind(&now)
            .execute(self.pool())
            .await
            .unwrap();
        uuid
    }

    pub async fn event(&self, name: &str) -> Uuid {
        let uuid = Uuid::new_v4();
        let now = time::to_db(&time::now());
        sqlx::query("INSERT INTO events (uuid, name, created_at, updated_at) VALUES (?, ?, ?, ?)")
            .bind(uuid.to_string())
            .bind(name)
            .bind(&now)
            .bind(&now)
            .execute(self.pool())
            .await
            .unwrap();
        uuid
    }

    /// Report chain of `related` with one step per approver position
    pub async fn chain(&self, related: Uuid, step_type: ApprovalStepType, approvers: &[Uuid]) -> Vec<ApprovalStep> {
        let steps: Vec<NewStep> = approvers
            .iter()
            .enumerate()
            .map(|(i, approver)| NewStep::new(format!("Step {}", i + 1), vec![*approver]))
            .collect();
        approval_steps::replace_chain(self.pool(), related, step_type, &steps)
            .await
            .unwrap()
    }

    /// Draft report by `author` with the engagement `days` from now
    pub async fn report(&self, author: Uuid, days: i64, advisor_org: Option<Uuid>) -> Report {
        let mut report = Report::draft("Discuss training", Some(Utc::now() + Duration::days(days)));
        report.advisor_organization_uuid = advisor_org;
        reports::insert_report(self.pool(), &report).await.unwrap();
        reports::set_report_people(&mut *self.conn().await, report.uuid, &[ReportPerson::primary_author(author)])
            .await
            .unwrap();
        report
    }

    pub async fn reload(&self, report_uuid: Uuid) -> Report {
        self.ctx
            .resolver()
            .load(reports::ReportById, report_uuid)
            .await
            .unwrap()
            .into_iter()
            .next()
            .expect("report exists")
    }

    pub async fn count(&self, sql: &str, uuid: Uuid) -> i64 {
        sqlx::query_scalar(sql)
            .bind(uuid.to_string())
            .fetch_one(self.pool())
            .await
            .unwrap()
    }
}
