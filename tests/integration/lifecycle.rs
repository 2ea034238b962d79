use crate::common::test_broker;
use std::collections::HashMap;
use tunnel_broker::models::Info;

#[tokio::test]
async fn removed_rooms_disappear_from_listings() {
    let broker = test_broker();
    let info = Info::new(
        "short-lived".to_string(),
        "debug".to_string(),
        broker.addresses.generate_address(),
    );
    let room = broker.cluster.create_local_room(info).await.unwrap();
    assert_eq!(
        broker.cluster.list_rooms(HashMap::new()).await.unwrap().len(),
        1
    );

    broker.cluster.remove_room(&room).await.unwrap();
    assert!(
        broker
            .cluster
            .list_rooms(HashMap::new())
            .await
            .unwrap()
            .is_empty()
    );

    let connection = broker.cluster.create_connection();
    let err = broker
        .cluster
        .join_room(connection, &room)
        .await
        .unwrap_err();
    assert_eq!(err.code, tunnel_broker::errors::ErrorCode::RoomNotFoundError);
}

#[tokio::test]
async fn recreating_after_removal_yields_a_fresh_room() {
    let broker = test_broker();
    let info = Info::new(
        "phoenix".to_string(),
        "debug".to_string(),
        broker.addresses.generate_address(),
    );
    let room = broker.cluster.create_local_room(info.clone()).await.unwrap();
    broker.cluster.remove_room(&room).await.unwrap();

    let reborn = broker.cluster.create_local_room(info).await.unwrap();
    assert_eq!(reborn.address, room.address);
    assert!(reborn.connections.is_empty());
    assert_eq!(broker.local_rooms.get_rooms().len(), 1);
}
