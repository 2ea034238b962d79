use crate::common::test_broker;
use std::collections::HashMap;
use tunnel_broker::models::Info;

fn tags(pairs: &[(&str, &str)]) -> HashMap<String, String> {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

#[tokio::test]
async fn create_is_idempotent_across_the_cluster_path() {
    let broker = test_broker();
    let address = broker.addresses.generate_address();
    let info = Info::new("r".to_string(), "debug".to_string(), address.clone());

    let first = broker.cluster.create_local_room(info.clone()).await.unwrap();
    let second = broker.cluster.create_local_room(info).await.unwrap();
    assert_eq!(first.address, second.address);
    assert_eq!(broker.local_rooms.get_rooms().len(), 1);
}

#[tokio::test]
async fn list_rooms_sorts_newest_first_and_filters_by_tags() {
    let broker = test_broker();

    let mut older = Info::new(
        "older".to_string(),
        "debug".to_string(),
        broker.addresses.generate_address(),
    );
    older.tags = tags(&[("os", "ios")]);
    broker.cluster.create_local_room(older).await.unwrap();

    tokio::time::sleep(tokio::time::Duration::from_millis(10)).await;

    let mut newer = Info::new(
        "newer".to_string(),
        "debug".to_string(),
        broker.addresses.generate_address(),
    );
    newer.tags = tags(&[("os", "android")]);
    broker.cluster.create_local_room(newer).await.unwrap();

    let rooms = broker.cluster.list_rooms(HashMap::new()).await.unwrap();
    assert_eq!(rooms.len(), 2);
    assert_eq!(rooms[0].name, "newer");
    assert_eq!(rooms[1].name, "older");

    let rooms = broker
        .cluster
        .list_rooms(tags(&[("os", "ios")]))
        .await
        .unwrap();
    assert_eq!(rooms.len(), 1);
    assert_eq!(rooms[0].name, "older");
}

#[tokio::test]
async fn join_of_a_missing_room_fails_and_leaves_no_proxy() {
    let broker = test_broker();
    let ghost = Info::new(
        "ghost".to_string(),
        "debug".to_string(),
        broker.addresses.generate_address(),
    );
    let connection = broker.cluster.create_connection();

    let err = broker
        .cluster
        .join_room(connection, &ghost)
        .await
        .unwrap_err();
    assert_eq!(err.code, tunnel_broker::errors::ErrorCode::RoomNotFoundError);
    assert_eq!(broker.cluster.proxy_count(), 0);
}

#[tokio::test]
async fn force_join_creates_the_room_when_absent() {
    let broker = test_broker();
    let address = broker.addresses.generate_address();
    let join_opt = Info::join_options(
        address.clone(),
        String::new(),
        false,
        "debug".to_string(),
    );
    let create_opt = Info::new("forced".to_string(), "debug".to_string(), address);
    let connection = broker.cluster.create_connection();

    let proxy = broker
        .cluster
        .force_join_room(connection, &join_opt, create_opt)
        .await
        .unwrap();
    assert_eq!(proxy.room_info().name, "forced");
    assert_eq!(broker.cluster.proxy_count(), 1);

    let users = broker.cluster.get_room_users(&join_opt).await.unwrap();
    assert_eq!(users.len(), 1);
}

#[tokio::test]
async fn leave_removes_the_proxy_and_the_membership() {
    let broker = test_broker();
    let address = broker.addresses.generate_address();
    let info = Info::new("r".to_string(), "debug".to_string(), address);
    let room = broker.cluster.create_local_room(info).await.unwrap();

    let connection = broker.cluster.create_connection();
    let proxy = broker
        .cluster
        .join_room(connection.clone(), &room)
        .await
        .unwrap();
    assert_eq!(broker.cluster.proxy_count(), 1);

    broker
        .cluster
        .leave_room(&room, &connection)
        .await
        .unwrap();
    assert_eq!(broker.cluster.proxy_count(), 0);
    assert!(proxy.is_closed());

    // Leaving again is still a success.
    broker
        .cluster
        .leave_room(&room, &connection)
        .await
        .unwrap();
}

#[tokio::test]
async fn connections_are_minted_locally_and_unique() {
    let broker = test_broker();
    let a = broker.cluster.create_connection();
    let b = broker.cluster.create_connection();
    assert_ne!(a.address, b.address);
    assert_eq!(a.address.machine_id, "local");
}
