//! Batched resolver integration tests

mod common;

use anet_common::enums::{PositionType, TaskStatus};
use anet_common::{Error, Result};
use anet_engine::db::people::PersonById;
use anet_engine::db::tasks::{self, ResponsibleTasks, Task, TaskSearchQuery};
use anet_engine::loader::{BatchLoader, BatchResolver, SearchLoader};
use async_trait::async_trait;
use common::TestWorld;
use sqlx::SqlitePool;
use uuid::Uuid;

/// Loader whose statement always fails
#[derive(Debug, Clone, Copy, Default)]
struct MissingTable;

#[async_trait]
impl BatchLoader for MissingTable {
    type Key = Uuid;
    type Value = String;
    const NAME: &'static str = "test.missing_table";

    async fn load(&self, pool: &SqlitePool, _keys: &[Uuid]) -> Result<Vec<(Uuid, String)>> {
        sqlx::query("SELECT uuid FROM no_such_table").fetch_all(pool).await?;
        Ok(Vec::new())
    }
}

#[tokio::test]
async fn test_many_keys_one_bulk_query() {
    let world = TestWorld::new().await;
    let (alice, _) = world.member("Alice", None, PositionType::Regular).await;
    let (bob, _) = world.member("Bob", None, PositionType::Regular).await;
    let missing = Uuid::new_v4();

    let resolver = BatchResolver::new(world.pool().clone());
    let plan = resolver.plan();
    let tickets = plan.load_all(PersonById, [bob, alice, missing, bob]);
    assert_eq!(plan.loader_count(), 1);
    let resolved = resolver.execute(plan).await;

    let names: Vec<Option<&str>> = tickets
        .iter()
        .map(|t| resolved.first(t).unwrap().map(|p| p.name.as_str()))
        .collect();
    assert_eq!(names, vec![Some("Bob"), Some("Alice"), None, Some("Bob")]);

    let stats = resolved.stats().loader(PersonById::NAME);
    assert_eq!(stats.bulk_queries, 1);
    assert_eq!(stats.keys, 3, "duplicates are sent once");
    assert_eq!(stats.failures, 0);

    let in_order = resolved.in_order::<PersonById>().unwrap();
    assert_eq!(in_order.len(), 4);
    assert!(in_order[2].is_empty());
}

#[tokio::test]
async fn test_empty_registration_still_executes() {
    let world = TestWorld::new().await;
    let resolver = BatchResolver::new(world.pool().clone());
    let plan = resolver.plan();
    let tickets = plan.load_all(PersonById, Vec::<Uuid>::new());
    assert!(tickets.is_empty());
    assert!(!plan.is_empty());

    let resolved = resolver.execute(plan).await;
    let stats = resolved.stats().loader(PersonById::NAME);
    assert_eq!(stats.bulk_queries, 1);
    assert_eq!(stats.keys, 0);
    assert!(resolved.in_order::<PersonById>().unwrap().is_empty());
}

#[tokio::test]
async fn test_search_partitions_by_query() {
    let world = TestWorld::new().await;
    let (_, first) = world.member("First", None, PositionType::Regular).await;
    let (_, second) = world.member("Second", None, PositionType::Regular).await;
    let active = world.task("7.1 Training").await;
    let inactive = Task::new("7.2 Training", TaskStatus::Inactive);
    tasks::insert_task(world.pool(), &inactive).await.unwrap();
    for task in [active, inactive.uuid] {
        tasks::add_responsible_position(world.pool(), task, first).await.unwrap();
    }
    tasks::add_responsible_position(world.pool(), active, second).await.unwrap();

    let resolver = BatchResolver::new(world.pool().clone());
    let plan = resolver.plan();
    let first_active = plan.search(ResponsibleTasks, first, TaskSearchQuery::active());
    let second_active = plan.search(ResponsibleTasks, second, TaskSearchQuery::active());
    let first_any = plan.search(
        ResponsibleTasks,
        first,
        TaskSearchQuery {
            status: None,
            text: Some("Training".to_string()),
        },
    );
    let resolved = resolver.execute(plan).await;

    let uuids = |tasks: &[Task]| tasks.iter().map(|t| t.uuid).collect::<Vec<_>>();
    assert_eq!(uuids(resolved.search(&first_active).unwrap()), vec![active]);
    assert_eq!(uuids(resolved.search(&second_active).unwrap()), vec![active]);
    assert_eq!(uuids(resolved.search(&first_any).unwrap()), vec![active, inactive.uuid]);

    let stats = resolved.stats().loader(ResponsibleTasks::NAME);
    assert_eq!(stats.bulk_queries, 2, "one statement per distinct query value");
}

#[tokio::test]
async fn test_failed_loader_fails_only_its_tickets() {
    let world = TestWorld::new().await;
    let (alice, _) = world.member("Alice", None, PositionType::Regular).await;

    let resolver = BatchResolver::new(world.pool().clone());
    let plan = resolver.plan();
    let person = plan.load(PersonById, alice);
    let broken = plan.load(MissingTable, alice);
    let resolved = resolver.execute(plan).await;

    assert_eq!(resolved.first(&person).unwrap().map(|p| p.uuid), Some(alice));
    match resolved.get(&broken) {
        Err(Error::BatchLoad { loader, .. }) => assert_eq!(loader, MissingTable::NAME),
        other => panic!("expected a batch load error, got {:?}", other.map(|v| v.len())),
    }
    assert_eq!(resolved.stats().loader(MissingTable::NAME).failures, 1);

    let err = resolver.load(MissingTable, alice).await.unwrap_err();
    assert!(matches!(err, Error::BatchLoad { .. }));
    assert_eq!(resolver.stats().loader(MissingTable::NAME).failures, 2);
}

#[tokio::test]
async fn test_rounds_accumulate_stats() {
    let world = TestWorld::new().await;
    let (alice, _) = world.member("Alice", None, PositionType::Regular).await;
    let (bob, _) = world.member("Bob", None, PositionType::Regular).await;

    let resolver = BatchResolver::new(world.pool().clone());
    let people = resolver.load_many(PersonById, vec![alice, bob]).await.unwrap();
    assert_eq!(people.iter().map(Vec::len).collect::<Vec<_>>(), vec![1, 1]);
    resolver.load(PersonById, alice).await.unwrap();

    let stats = resolver.stats();
    assert_eq!(stats.loader(PersonById::NAME).bulk_queries, 2);
    assert_eq!(stats.bulk_queries(), 2);
}
