mod fixtures;

use std::net::Ipv4Addr;
use std::sync::Arc;

use fixtures::{SPACE_1, SPACE_2};
use multinic::allocator::Allocator;
use multinic::error::AllocError;
use multinic::inventory::SnapshotProvider;
use multinic::types::{AddressLeaseRequest, PodIdentity, PodKey};

fn allocator(pools: &[multinic::config::PoolConfig]) -> Result<Allocator, AllocError> {
    let inventory = Arc::new(SnapshotProvider::new(fixtures::snapshot()));
    Allocator::new(pools, inventory)
}

fn lease_request(pod: &PodIdentity, interfaces: &[&str]) -> AddressLeaseRequest {
    AddressLeaseRequest {
        pod: pod.clone(),
        interfaces: interfaces.iter().map(|s| s.to_string()).collect(),
    }
}

#[tokio::test]
async fn test_one_lease_per_interface() -> Result<(), Box<dyn std::error::Error>> {
    let allocator = allocator(&fixtures::pools())?;
    let pod = fixtures::pod("pod-a");

    let leases = allocator.allocate(&lease_request(&pod, &["eth1", "eth2"])).await?;
    assert_eq!(leases.len(), 2);
    assert_eq!(leases["eth1"].address, Ipv4Addr::new(192, 168, 0, 1));
    assert_eq!(leases["eth1"].cidr(), "192.168.0.1/16");
    assert_eq!(leases["eth2"].address, Ipv4Addr::new(192, 169, 0, 1));
    assert_eq!(leases["eth2"].interface, "eth2");

    Ok(())
}

#[tokio::test]
async fn test_allocate_is_idempotent() -> Result<(), Box<dyn std::error::Error>> {
    let allocator = allocator(&fixtures::pools())?;
    let pod = fixtures::pod("pod-a");
    let req = lease_request(&pod, &["eth1"]);

    let first = allocator.allocate(&req).await?;
    let second = allocator.allocate(&req).await?;
    assert_eq!(first, second);
    assert_eq!(allocator.leases(SPACE_1).await?.len(), 1);

    Ok(())
}

#[tokio::test]
async fn test_pods_get_distinct_addresses() -> Result<(), Box<dyn std::error::Error>> {
    let allocator = allocator(&fixtures::pools())?;

    let a = allocator.allocate(&lease_request(&fixtures::pod("pod-a"), &["eth1"])).await?;
    let b = allocator.allocate(&lease_request(&fixtures::pod("pod-b"), &["eth1"])).await?;
    assert_ne!(a["eth1"].address, b["eth1"].address);

    let leases = allocator.leases(SPACE_1).await?;
    let owners: Vec<PodKey> = leases.into_iter().map(|(pod, _)| pod).collect();
    assert_eq!(
        owners,
        vec![PodKey::new("default", "pod-a"), PodKey::new("default", "pod-b")]
    );

    Ok(())
}

#[tokio::test]
async fn test_deallocate_releases_and_tolerates_missing() -> Result<(), Box<dyn std::error::Error>> {
    let allocator = allocator(&fixtures::pools())?;
    let pod = fixtures::pod("pod-a");
    let req = lease_request(&pod, &["eth1", "eth2"]);

    let leased = allocator.allocate(&req).await?;
    let released = allocator.deallocate(&req).await;
    assert_eq!(released, leased);
    assert!(allocator.leases(SPACE_1).await?.is_empty());
    assert!(allocator.lease(&pod, "eth1").await.is_none());

    // Second release is a no-op
    let released = allocator.deallocate(&req).await;
    assert!(released.is_empty());

    // Interfaces the inventory does not know are skipped
    let released = allocator.deallocate(&lease_request(&pod, &["eth9"])).await;
    assert!(released.is_empty());

    Ok(())
}

#[tokio::test]
async fn test_release_pod_clears_every_pool() -> Result<(), Box<dyn std::error::Error>> {
    let allocator = allocator(&fixtures::pools())?;
    let a = fixtures::pod("pod-a");
    let b = fixtures::pod("pod-b");

    allocator.allocate(&lease_request(&a, &["eth1", "eth2"])).await?;
    allocator.allocate(&lease_request(&b, &["eth1"])).await?;

    let released = allocator.release_pod(&a.key()).await;
    assert_eq!(released.len(), 2);
    assert!(released.contains_key("eth1") && released.contains_key("eth2"));
    assert!(allocator.leases(SPACE_2).await?.is_empty());
    assert!(allocator.lease(&b, "eth1").await.is_some());

    // Nothing left to release
    assert!(allocator.release_pod(&a.key()).await.is_empty());

    Ok(())
}

#[tokio::test]
async fn test_released_address_is_reused() -> Result<(), Box<dyn std::error::Error>> {
    let allocator = allocator(&fixtures::pools())?;
    let a = fixtures::pod("pod-a");

    let first = allocator.allocate(&lease_request(&a, &["eth1"])).await?;
    allocator.deallocate(&lease_request(&a, &["eth1"])).await;
    let b = allocator.allocate(&lease_request(&fixtures::pod("pod-b"), &["eth1"])).await?;
    assert_eq!(first["eth1"].address, b["eth1"].address);

    Ok(())
}

#[tokio::test]
async fn test_exhaustion_rolls_back_new_leases() -> Result<(), Box<dyn std::error::Error>> {
    let pools = vec![fixtures::pools().remove(0), fixtures::tiny_pool(SPACE_2)];
    let allocator = allocator(&pools)?;

    // The tiny pool's block holds two addresses
    for name in ["filler-1", "filler-2"] {
        allocator.allocate(&lease_request(&fixtures::pod(name), &["eth2"])).await?;
    }

    let pod = fixtures::pod("pod-a");
    let err = allocator
        .allocate(&lease_request(&pod, &["eth1", "eth2"]))
        .await
        .unwrap_err();
    assert!(matches!(err, AllocError::Exhausted { .. }));

    assert!(allocator.lease(&pod, "eth1").await.is_none());
    assert!(allocator.leases(SPACE_1).await?.is_empty());
    assert_eq!(allocator.leases(SPACE_2).await?.len(), 2);

    Ok(())
}

#[tokio::test]
async fn test_rollback_keeps_existing_leases() -> Result<(), Box<dyn std::error::Error>> {
    let pools = vec![fixtures::pools().remove(0), fixtures::tiny_pool(SPACE_2)];
    let allocator = allocator(&pools)?;
    let pod = fixtures::pod("pod-a");

    let existing = allocator.allocate(&lease_request(&pod, &["eth1"])).await?;
    for name in ["filler-1", "filler-2"] {
        allocator.allocate(&lease_request(&fixtures::pod(name), &["eth2"])).await?;
    }

    assert!(allocator.allocate(&lease_request(&pod, &["eth1", "eth2"])).await.is_err());
    assert_eq!(allocator.lease(&pod, "eth1").await, Some(existing["eth1"].clone()));

    Ok(())
}

#[tokio::test]
async fn test_excluded_addresses_are_skipped() -> Result<(), Box<dyn std::error::Error>> {
    let mut pool = fixtures::pool(SPACE_1, "192.168.0.0/16", 8, 2);
    pool.excludes = vec!["192.168.0.0/30".to_string()];
    let allocator = allocator(&[pool])?;

    let leases = allocator.allocate(&lease_request(&fixtures::pod("pod-a"), &["eth1"])).await?;
    assert_eq!(leases["eth1"].address, Ipv4Addr::new(192, 168, 0, 4));

    Ok(())
}

#[tokio::test]
async fn test_unknown_interface_and_space() -> Result<(), Box<dyn std::error::Error>> {
    let allocator = allocator(&[fixtures::pools().remove(0)])?;
    let pod = fixtures::pod("pod-a");

    let err = allocator.allocate(&lease_request(&pod, &["eth9"])).await.unwrap_err();
    assert!(matches!(err, AllocError::UnknownInterface { .. }));

    // eth2 is in the inventory but its space has no pool
    let err = allocator.allocate(&lease_request(&pod, &["eth1", "eth2"])).await.unwrap_err();
    assert!(matches!(err, AllocError::UnknownAddressSpace(space) if space == SPACE_2));
    assert!(allocator.lease(&pod, "eth1").await.is_none());

    assert!(allocator.leases("10.9.9.0/24").await.is_err());

    Ok(())
}

#[test]
fn test_invalid_pool_is_rejected() {
    let err = allocator(&[fixtures::pool(SPACE_1, "10.0.0.0/24", 6, 2)]).err();
    assert!(matches!(err, Some(AllocError::InvalidPool { .. })));

    let err = allocator(&[fixtures::pool(SPACE_1, "not-a-cidr", 1, 1)]).err();
    assert!(matches!(err, Some(AllocError::InvalidPool { .. })));
}
