use crate::common::{assert_not_queued, recv_type, test_broker};
use std::sync::Arc;
use tokio::sync::mpsc;
use tunnel_broker::Broker;
use tunnel_broker::models::{
    BroadcastContent, Connection, Info, Message, MessageContent, UnicastContent,
};
use tunnel_broker::room::RemoteRoom;

struct Member {
    connection: Connection,
    proxy: Arc<RemoteRoom>,
    inbox: mpsc::Receiver<Message>,
}

async fn create_room(broker: &Arc<Broker>, name: &str) -> Info {
    let address = broker.addresses.generate_address();
    let info = Info::new(name.to_string(), "debug".to_string(), address);
    broker.cluster.create_local_room(info).await.unwrap()
}

async fn join(broker: &Arc<Broker>, room: &Info, name: &str) -> Member {
    let mut connection = broker.cluster.create_connection();
    connection.name = name.to_string();
    let opt = Info::join_options(
        room.address.clone(),
        room.secret.clone(),
        room.use_secret,
        room.group.clone(),
    );
    let proxy = broker
        .cluster
        .join_room(connection.clone(), &opt)
        .await
        .unwrap();
    let inbox = proxy.take_inbox().unwrap();
    Member {
        connection,
        proxy,
        inbox,
    }
}

fn broadcast(data: &str, include_self: bool) -> Message {
    Message::new(MessageContent::Broadcast(BroadcastContent {
        data: serde_json::json!(data),
        from: None,
        include_self,
    }))
}

#[tokio::test]
async fn broadcast_round_trip_between_two_clients() {
    let broker = test_broker();
    let room = create_room(&broker, "r1").await;
    let mut a = join(&broker, &room, "a").await;
    let mut b = join(&broker, &room, "b").await;

    a.proxy.send_message(broadcast("x", true)).await.unwrap();

    let a_address = a.connection.address.clone();
    for member in [&mut a, &mut b] {
        let msg = recv_type(&mut member.inbox, "broadcast").await;
        let MessageContent::Broadcast(content) = msg.content else {
            panic!("expected broadcast content");
        };
        assert_eq!(content.data, serde_json::json!("x"));
        assert_eq!(content.from.unwrap().address, a_address);
    }
}

#[tokio::test]
async fn broadcast_without_include_self_skips_the_sender() {
    let broker = test_broker();
    let room = create_room(&broker, "r1b").await;
    let mut a = join(&broker, &room, "a").await;
    let mut b = join(&broker, &room, "b").await;

    a.proxy.send_message(broadcast("quiet", false)).await.unwrap();

    recv_type(&mut b.inbox, "broadcast").await;
    assert_not_queued(&mut a.inbox, "broadcast");
}

#[tokio::test]
async fn unicast_reaches_exactly_one_member() {
    let broker = test_broker();
    let room = create_room(&broker, "r3").await;
    let mut a = join(&broker, &room, "a").await;
    let mut b = join(&broker, &room, "b").await;
    let mut c = join(&broker, &room, "c").await;

    let msg = Message::new(MessageContent::Unicast(UnicastContent {
        data: serde_json::json!("hi"),
        from: None,
        to: Some(c.connection.clone()),
    }));
    a.proxy.send_message(msg).await.unwrap();

    let got = recv_type(&mut c.inbox, "message").await;
    let MessageContent::Unicast(content) = got.content else {
        panic!("expected unicast content");
    };
    assert_eq!(content.data, serde_json::json!("hi"));
    assert_eq!(content.from.unwrap().address, a.connection.address);

    assert_not_queued(&mut a.inbox, "message");
    assert_not_queued(&mut b.inbox, "message");
}

#[tokio::test]
async fn secret_gating_rejects_wrong_secret_without_mutation() {
    let broker = test_broker();
    let address = broker.addresses.generate_address();
    let mut info = Info::new("r2".to_string(), "debug".to_string(), address);
    info.use_secret = true;
    info.secret = "s".to_string();
    let room = broker.cluster.create_local_room(info).await.unwrap();

    // Right secret joins.
    let good = join(&broker, &room, "good").await;
    assert_eq!(
        broker.cluster.get_room_users(&room).await.unwrap().len(),
        1
    );

    // Wrong secret is refused and the membership stays put.
    let connection = broker.cluster.create_connection();
    let bad_opt = Info::join_options(
        room.address.clone(),
        "wrong".to_string(),
        true,
        room.group.clone(),
    );
    let err = broker
        .cluster
        .join_room(connection, &bad_opt)
        .await
        .unwrap_err();
    assert_eq!(err.code, tunnel_broker::errors::ErrorCode::ClientError);
    let users = broker.cluster.get_room_users(&room).await.unwrap();
    assert_eq!(users.len(), 1);
    assert_eq!(users[0].address, good.connection.address);
}

#[tokio::test]
async fn ping_is_silent_and_refreshes_the_room() {
    let broker = test_broker();
    let room = create_room(&broker, "r-ping").await;
    let mut a = join(&broker, &room, "a").await;

    let before = broker.cluster.get_room(&room).await.unwrap().active_at;
    tokio::time::sleep(tokio::time::Duration::from_millis(10)).await;

    a.proxy
        .send_message(Message::new_ping(a.connection.address.clone()))
        .await
        .unwrap();
    tokio::time::sleep(tokio::time::Duration::from_millis(50)).await;

    let after = broker.cluster.get_room(&room).await.unwrap().active_at;
    assert!(after > before);
    assert_not_queued(&mut a.inbox, "ping");
    assert_not_queued(&mut a.inbox, "pong");
}

#[tokio::test]
async fn join_and_leave_are_announced_to_the_remaining_members() {
    let broker = test_broker();
    let room = create_room(&broker, "r-members").await;
    let mut a = join(&broker, &room, "a").await;
    let b = join(&broker, &room, "b").await;

    let msg = recv_type(&mut a.inbox, "join").await;
    // a's own join is announced too, so wait for b's.
    let joined = match msg.content {
        MessageContent::Join(content) if content.connection.address == b.connection.address => {
            content
        }
        _ => {
            let msg = recv_type(&mut a.inbox, "join").await;
            match msg.content {
                MessageContent::Join(content) => content,
                _ => unreachable!(),
            }
        }
    };
    assert_eq!(joined.connection.name, "b");

    broker
        .cluster
        .leave_room(&room, &b.connection)
        .await
        .unwrap();
    let msg = recv_type(&mut a.inbox, "leave").await;
    let MessageContent::Leave(content) = msg.content else {
        panic!("expected leave content");
    };
    assert_eq!(content.connection.address, b.connection.address);

    let users = broker.cluster.get_room_users(&room).await.unwrap();
    assert_eq!(users.len(), 1);
}

#[tokio::test]
async fn update_room_info_fans_out_to_members() {
    let broker = test_broker();
    let room = create_room(&broker, "old-name").await;
    let mut a = join(&broker, &room, "a").await;

    let mut patch = room.clone();
    patch.name = "new-name".to_string();
    let updated = broker.cluster.update_room_info(&patch).await.unwrap();
    assert_eq!(updated.name, "new-name");

    let msg = recv_type(&mut a.inbox, "updateRoomInfo").await;
    let MessageContent::UpdateRoomInfo(content) = msg.content else {
        panic!("expected updateRoomInfo content");
    };
    assert_eq!(content.info.name, "new-name");
}

#[tokio::test]
async fn room_close_is_relayed_and_tears_proxies_down() {
    let broker = test_broker();
    let room = create_room(&broker, "r-close").await;
    let mut a = join(&broker, &room, "a").await;

    broker.cluster.remove_room(&room).await.unwrap();

    let msg = recv_type(&mut a.inbox, "close").await;
    let MessageContent::Close(content) = msg.content else {
        panic!("expected close content");
    };
    assert_eq!(content.room_address, room.address);
    assert!(a.proxy.is_closed());

    // Removing again stays a success; terminal paths are idempotent.
    broker.cluster.remove_room(&room).await.unwrap();
}
