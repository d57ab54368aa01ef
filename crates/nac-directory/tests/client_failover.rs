//! Failover behavior of the directory client against the in-memory directory

use nac_directory::{
    AddressPool, DirectoryClient, DirectoryEntry, DirectoryError, EndpointConfig, EndpointRole,
    MemoryDirectory, Query,
};
use std::sync::Arc;
use std::time::Duration;

const MASTER: &str = "mem://master";
const REPLICA_A: &str = "mem://replica-a";
const REPLICA_B: &str = "mem://replica-b";
const PEOPLE: &str = "ou=people,dc=example,dc=org";

fn directory() -> MemoryDirectory {
    let directory = MemoryDirectory::new()
        .with_node(MASTER, false)
        .with_node(REPLICA_A, true)
        .with_node(REPLICA_B, true);
    directory.insert(
        DirectoryEntry::new(format!("uid=alice,{}", PEOPLE))
            .with("uid", "alice")
            .with("roomNumber", "12"),
    );
    directory
}

fn client(directory: &MemoryDirectory, endpoints: Vec<EndpointConfig>) -> DirectoryClient {
    let pool = AddressPool::new(endpoints, Duration::from_secs(300)).unwrap();
    DirectoryClient::new(pool, Arc::new(directory.clone()))
}

fn full_topology() -> Vec<EndpointConfig> {
    vec![
        EndpointConfig::read_write(MASTER),
        EndpointConfig::read_only(REPLICA_A),
        EndpointConfig::read_only(REPLICA_B),
    ]
}

fn alice() -> Query {
    Query::new(PEOPLE, "uid", "alice")
}

#[tokio::test]
async fn test_reads_prefer_master() {
    let directory = directory();
    let client = client(&directory, full_topology());

    let entry = client.find(&alice(), &["uid"]).await.unwrap();
    assert_eq!(entry.unwrap().first("uid"), Some("alice"));
    assert_eq!(directory.connect_count(MASTER), 1);
    assert_eq!(directory.total_connects(), 1);

    // The connection is reused
    client.find(&alice(), &["uid"]).await.unwrap();
    assert_eq!(directory.total_connects(), 1);
}

#[tokio::test]
async fn test_read_fails_over_to_replica() {
    let directory = directory();
    directory.set_reachable(MASTER, false);
    let client = client(&directory, full_topology());

    let entry = client.find(&alice(), &["uid", "roomNumber"]).await.unwrap().unwrap();
    assert_eq!(entry.first("roomNumber"), Some("12"));

    let status = client.pool_status();
    let master = status.iter().find(|m| m.address == MASTER).unwrap();
    assert!(!master.up);
    assert!(master.seconds_since_crash.is_some());
    assert!(status.iter().any(|m| m.current && m.role == EndpointRole::ReadOnly));
}

#[tokio::test]
async fn test_transport_failure_mid_session_reroutes() {
    let directory = directory();
    let client = client(&directory, full_topology());

    client.find(&alice(), &["uid"]).await.unwrap();
    directory.set_reachable(MASTER, false);

    let entry = client.find(&alice(), &["uid"]).await.unwrap();
    assert!(entry.is_some());
    assert_eq!(directory.connect_count(MASTER), 1);
    assert_eq!(
        directory.connect_count(REPLICA_A) + directory.connect_count(REPLICA_B),
        1
    );
}

#[tokio::test]
async fn test_exhausted_pool_is_unavailable_and_bounded() {
    let directory = directory();
    for node in [MASTER, REPLICA_A, REPLICA_B] {
        directory.set_reachable(node, false);
    }
    let client = client(&directory, full_topology());

    let result = client.find(&alice(), &["uid"]).await;
    assert_eq!(result, Err(DirectoryError::Unavailable));
    assert_eq!(directory.total_connects(), 3, "one attempt per member");

    // Exhaustion resets the pool so the next call starts over
    assert!(client.pool_status().iter().all(|m| m.up));
    assert!(client.is_available());

    directory.set_reachable(REPLICA_B, false);
    directory.set_reachable(MASTER, true);
    assert!(client.find(&alice(), &["uid"]).await.unwrap().is_some());
}

#[tokio::test]
async fn test_zero_cooldown_does_not_cycle_forever() {
    let directory = directory();
    directory.set_reachable(MASTER, false);
    directory.set_reachable(REPLICA_A, false);
    let pool = AddressPool::new(
        vec![
            EndpointConfig::read_write(MASTER),
            EndpointConfig::read_only(REPLICA_A),
        ],
        Duration::ZERO,
    )
    .unwrap();
    let client = DirectoryClient::new(pool, Arc::new(directory.clone()));

    let result = tokio::time::timeout(Duration::from_secs(5), client.find(&alice(), &["uid"]))
        .await
        .expect("find must give up on its own");
    assert_eq!(result, Err(DirectoryError::Unavailable));
    assert!(
        directory.total_connects() <= 2,
        "at most one attempt per member, got {}",
        directory.total_connects()
    );

    // The next call gets a fresh budget
    directory.set_reachable(MASTER, true);
    assert!(client.find(&alice(), &["uid"]).await.unwrap().is_some());
}

#[tokio::test]
async fn test_write_losing_master_is_not_retried_on_replicas() {
    let directory = directory();
    let client = client(&directory, full_topology());
    let dn = format!("uid=alice,{}", PEOPLE);

    client.modify(&dn, "roomNumber", "13").await.unwrap();
    assert_eq!(directory.connect_count(MASTER), 1);

    directory.set_reachable(MASTER, false);
    let result = client.modify(&dn, "roomNumber", "14").await;
    assert_eq!(result, Err(DirectoryError::ReadOnly));
    assert_eq!(directory.connect_count(REPLICA_A), 0);
    assert_eq!(directory.connect_count(REPLICA_B), 0);
    assert_eq!(directory.get(&dn).unwrap().first("roomNumber"), Some("13"));

    // Reads still fail over to a replica
    assert!(client.find(&alice(), &["uid"]).await.unwrap().is_some());
}

#[tokio::test]
async fn test_write_without_writable_fails_fast() {
    let directory = directory();
    let client = client(
        &directory,
        vec![
            EndpointConfig::read_only(REPLICA_A),
            EndpointConfig::read_only(REPLICA_B),
        ],
    );
    assert!(!client.has_writable());

    let result = client
        .modify(&format!("uid=alice,{}", PEOPLE), "roomNumber", "13")
        .await;
    assert_eq!(result, Err(DirectoryError::ReadOnly));
    assert_eq!(directory.total_connects(), 0);
    assert_eq!(directory.modify_count(), 0);
}

#[tokio::test]
async fn test_read_only_master_surfaces_error_without_redirect() {
    let directory = directory();
    directory.set_read_only(MASTER, true);
    let client = client(&directory, full_topology());

    let dn = format!("uid=alice,{}", PEOPLE);
    let result = client.modify(&dn, "roomNumber", "13").await;
    assert_eq!(result, Err(DirectoryError::ReadOnly));
    assert_eq!(directory.connect_count(REPLICA_A), 0);
    assert_eq!(directory.connect_count(REPLICA_B), 0);

    // The master is known read-only now: no new attempt
    assert!(!client.has_writable());
    let connects = directory.total_connects();
    assert_eq!(client.modify(&dn, "roomNumber", "13").await, Err(DirectoryError::ReadOnly));
    assert_eq!(directory.total_connects(), connects);

    // Reads keep working
    assert!(client.find(&alice(), &["uid"]).await.unwrap().is_some());
}

#[tokio::test]
async fn test_writes_reach_master() {
    let directory = directory();
    let client = client(&directory, full_topology());

    let entry = DirectoryEntry::new(format!("uid=bob,{}", PEOPLE)).with("uid", "bob");
    client.add(&entry).await.unwrap();
    client
        .modify(&entry.dn, "roomNumber", "7")
        .await
        .unwrap();

    let stored = directory.get(&entry.dn).unwrap();
    assert_eq!(stored.first("roomNumber"), Some("7"));
    assert_eq!(directory.add_count(), 1);
    assert_eq!(directory.modify_count(), 1);
}

#[tokio::test]
async fn test_rejection_is_not_failover() {
    let directory = directory();
    let client = client(&directory, full_topology());

    let entry = DirectoryEntry::new(format!("uid=alice,{}", PEOPLE)).with("uid", "alice");
    let result = client.add(&entry).await;
    assert!(matches!(result, Err(DirectoryError::Rejected { code: 68, .. })));
    assert_eq!(directory.total_connects(), 1);
    assert!(client.pool_status().iter().all(|m| m.up));
}

#[tokio::test]
async fn test_concurrent_callers_share_one_connection() {
    let directory = directory();
    let client = Arc::new(client(&directory, full_topology()));

    let mut handles = Vec::new();
    for _ in 0..20 {
        let client = Arc::clone(&client);
        handles.push(tokio::spawn(async move {
            client.find(&alice(), &["uid"]).await
        }));
    }
    for handle in handles {
        assert!(handle.await.unwrap().unwrap().is_some());
    }

    assert_eq!(directory.total_connects(), 1);
    assert_eq!(directory.search_count(), 20);
}

#[tokio::test]
async fn test_disconnect_releases_without_crash() {
    let directory = directory();
    let client = client(&directory, full_topology());

    client.find(&alice(), &["uid"]).await.unwrap();
    client.disconnect().await;
    assert!(client.pool_status().iter().all(|m| m.up && !m.current));

    client.find(&alice(), &["uid"]).await.unwrap();
    assert_eq!(directory.connect_count(MASTER), 2);
}
