use std::sync::Arc;

use chrono::Utc;
use tidewater_config::{ActivityKind, ProcessDefBuilder};
use tidewater_migration::{Migration, RegisteredProcess, RequestManagerMigration};
use tidewater_runtime::{
  InstanceProgram, InstanceSoup, LiteralEvaluator, OutstandingRequest, OutstandingRequests,
  RequestState,
};
use tidewater_store::{InstanceRecord, InstanceStatus, InstanceStore, MemoryStore};
use tidewater_vpu::{ChannelId, RemapTable, codec};
use uuid::Uuid;

const PROCESS: &str = "purchase";

fn program() -> InstanceProgram {
  let mut builder = ProcessDefBuilder::new(PROCESS, "Purchase");
  let root = builder.activity("root", ActivityKind::Empty);
  InstanceProgram::new(
    Arc::new(builder.build(root).unwrap()),
    Arc::new(LiteralEvaluator),
  )
}

fn request(operation: &str, channel: u64) -> OutstandingRequest {
  OutstandingRequest {
    partner_link: "buyer".to_string(),
    operation: operation.to_string(),
    correlation_key: Some(format!("order-{channel}")),
    channel: ChannelId(channel),
    message_exchange: None,
  }
}

fn obsolete_soup(requests: Vec<OutstandingRequest>) -> InstanceSoup {
  let mut soup = program().new_soup();
  soup.global_mut().requests = RequestState::OutstandingRequests(OutstandingRequests { requests });
  soup
}

async fn insert(store: &MemoryStore, soup: &InstanceSoup) -> Uuid {
  insert_bytes(store, codec::write(soup).unwrap()).await
}

async fn insert_bytes(store: &MemoryStore, bytes: Vec<u8>) -> Uuid {
  let record = InstanceRecord::new(PROCESS, bytes);
  store.create_instance(&record).await.unwrap();
  record.instance_id
}

async fn load(store: &MemoryStore, id: Uuid) -> InstanceSoup {
  let bytes = store.execution_state(id).await.unwrap().unwrap();
  codec::read::<InstanceProgram>(&bytes, &RemapTable::new()).unwrap()
}

fn processes() -> Vec<RegisteredProcess> {
  vec![RegisteredProcess::new(PROCESS)]
}

#[tokio::test]
async fn test_only_obsolete_instances_are_transformed() {
  let store = MemoryStore::new();
  let mut obsolete = Vec::new();
  for i in 0..3 {
    let soup = obsolete_soup(vec![request("approve", 10 + i), request("cancel", 20 + i)]);
    obsolete.push(insert(&store, &soup).await);
  }
  let mut current = Vec::new();
  for _ in 0..2 {
    let id = insert(&store, &program().new_soup()).await;
    let bytes = store.execution_state(id).await.unwrap().unwrap();
    current.push((id, bytes));
  }

  let migration = RequestManagerMigration::default();
  assert!(migration.migrate(&processes(), &store).await);

  for id in obsolete {
    match &load(&store, id).await.global().requests {
      RequestState::RequestManager(manager) => assert_eq!(manager.len(), 2),
      other => panic!("instance {id} not migrated: {other:?}"),
    }
  }
  for (id, before) in current {
    let after = store.execution_state(id).await.unwrap().unwrap();
    assert_eq!(after, before, "current instances are left untouched");
  }
}

#[tokio::test]
async fn test_corrupt_blob_fails_batch_but_others_migrate() {
  let store = MemoryStore::new();
  let first = insert(&store, &obsolete_soup(vec![request("approve", 1)])).await;
  insert_bytes(&store, b"TWSOUP\x00\x01{\"global\":".to_vec()).await;
  let last = insert(&store, &obsolete_soup(vec![request("approve", 2)])).await;

  let migration = RequestManagerMigration::default();
  assert!(!migration.migrate(&processes(), &store).await);

  for id in [first, last] {
    assert!(load(&store, id).await.global().requests.is_current());
  }
}

#[tokio::test]
async fn test_conflicting_requests_leave_instance_untouched() {
  let store = MemoryStore::new();
  let soup = obsolete_soup(vec![request("approve", 7), request("approve", 7)]);
  let id = insert(&store, &soup).await;
  let before = store.execution_state(id).await.unwrap().unwrap();

  let migration = RequestManagerMigration::default();
  assert!(!migration.migrate(&processes(), &store).await);
  assert_eq!(store.execution_state(id).await.unwrap().unwrap(), before);
}

#[tokio::test]
async fn test_distinct_conversations_with_similar_names_migrate() {
  let store = MemoryStore::new();
  let mut uncorrelated = request("approve", 1);
  uncorrelated.correlation_key = None;
  let mut empty = request("approve", 2);
  empty.correlation_key = Some(String::new());
  let mut nested_partner = request("c", 3);
  nested_partner.partner_link = "a/b".to_string();
  nested_partner.correlation_key = None;
  let mut nested_operation = request("b/c", 4);
  nested_operation.partner_link = "a".to_string();
  nested_operation.correlation_key = None;
  let soup = obsolete_soup(vec![uncorrelated, empty, nested_partner, nested_operation]);
  let id = insert(&store, &soup).await;

  let migration = RequestManagerMigration::default();
  assert!(migration.migrate(&processes(), &store).await);

  let soup = load(&store, id).await;
  let RequestState::RequestManager(manager) = &soup.global().requests else {
    panic!("instance {id} not migrated");
  };
  assert_eq!(manager.len(), 4);
  assert_eq!(manager.find("buyer", "approve", None).unwrap().channel, ChannelId(1));
  assert_eq!(manager.find("buyer", "approve", Some("")).unwrap().channel, ChannelId(2));
  assert_eq!(manager.find("a/b", "c", None).unwrap().channel, ChannelId(3));
  assert_eq!(manager.find("a", "b/c", None).unwrap().channel, ChannelId(4));
}

#[tokio::test]
async fn test_migration_is_idempotent() {
  let store = MemoryStore::new();
  let id = insert(&store, &obsolete_soup(vec![request("approve", 1)])).await;
  let migration = RequestManagerMigration::default();

  assert!(migration.migrate(&processes(), &store).await);
  let once = store.execution_state(id).await.unwrap().unwrap();
  assert!(migration.migrate(&processes(), &store).await);
  let twice = store.execution_state(id).await.unwrap().unwrap();
  assert_eq!(once, twice);
}

#[tokio::test]
async fn test_completed_instances_are_skipped() {
  let store = MemoryStore::new();
  let id = insert(&store, &obsolete_soup(vec![request("approve", 1)])).await;
  store
    .complete_instance(id, InstanceStatus::Completed, None, Utc::now())
    .await
    .unwrap();

  let migration = RequestManagerMigration::default();
  assert!(migration.migrate(&processes(), &store).await);
  assert_eq!(store.execution_state(id).await.unwrap(), None);
}

#[tokio::test]
async fn test_blobs_are_read_with_the_process_remap_table() {
  let store = MemoryStore::new();
  let bytes = codec::write(&obsolete_soup(vec![request("approve", 1)])).unwrap();
  let (header, body) = bytes.split_at(codec::HEADER_LEN);
  let body = String::from_utf8(body.to_vec())
    .unwrap()
    .replace("outstanding-requests/v1", "outstanding-requests");
  let id = insert_bytes(&store, [header, body.as_bytes()].concat()).await;

  let migration = RequestManagerMigration::default();
  assert!(!migration.migrate(&processes(), &store).await);

  let remap = RemapTable::new().with("outstanding-requests", "outstanding-requests/v1");
  let processes = vec![RegisteredProcess::new(PROCESS).with_remap(remap)];
  assert!(migration.migrate(&processes, &store).await);
  assert!(load(&store, id).await.global().requests.is_current());
}
