use crate::common::{recv_type, test_broker};
use rocket::http::ContentType;
use rocket::local::asynchronous::Client;
use tunnel_broker::models::Info;
use tunnel_broker::rpc_rocket;

async fn rpc_call(client: &Client, method: &str, param: serde_json::Value) -> serde_json::Value {
    let body = serde_json::json!({
        "method": method,
        "params": [param],
        "id": 1
    });
    let res = client
        .post("/rpc")
        .header(ContentType::JSON)
        .body(body.to_string())
        .dispatch()
        .await;
    res.into_json().await.unwrap()
}

#[tokio::test]
async fn rpc_endpoint_serves_the_room_manager() {
    let broker = test_broker();
    let info = Info::new(
        "visible".to_string(),
        "debug".to_string(),
        broker.addresses.generate_address(),
    );
    broker.cluster.create_local_room(info).await.unwrap();

    let client = Client::tracked(rpc_rocket(&broker)).await.unwrap();
    let reply = rpc_call(
        &client,
        "LocalRpcRoomManager.GetRooms",
        serde_json::json!({}),
    )
    .await;

    assert!(reply["error"].is_null());
    assert_eq!(reply["id"], 1);
    let rooms = reply["result"]["rooms"].as_array().unwrap();
    assert_eq!(rooms.len(), 1);
    assert_eq!(rooms[0]["name"], "visible");
}

#[tokio::test]
async fn rpc_endpoint_rejects_unknown_methods() {
    let broker = test_broker();
    let client = Client::tracked(rpc_rocket(&broker)).await.unwrap();
    let reply = rpc_call(&client, "Nope.Nothing", serde_json::json!({})).await;
    assert!(
        reply["error"]
            .as_str()
            .unwrap()
            .contains("not found")
    );
}

#[tokio::test]
async fn business_errors_ride_inside_the_result_envelope() {
    let broker = test_broker();
    let client = Client::tracked(rpc_rocket(&broker)).await.unwrap();
    let missing = serde_json::json!({
        "info": {
            "address": "00000000-0000-0000-0000-000000000000.local",
            "createdAt": "2026-01-01T00:00:00Z",
            "activeAt": "2026-01-01T00:00:00Z"
        }
    });
    let reply = rpc_call(&client, "LocalRpcRoomManager.GetRoom", missing).await;
    assert!(reply["error"].is_null());
    assert_eq!(reply["result"]["error"]["code"], "RoomNotFoundError");
}

#[tokio::test]
async fn peers_can_emit_into_this_instance() {
    let broker = test_broker();

    // A member whose proxy listens on its connection address.
    let info = Info::new(
        "r".to_string(),
        "debug".to_string(),
        broker.addresses.generate_address(),
    );
    let room = broker.cluster.create_local_room(info).await.unwrap();
    let connection = broker.cluster.create_connection();
    let proxy = broker
        .cluster
        .join_room(connection.clone(), &room)
        .await
        .unwrap();
    let mut inbox = proxy.take_inbox().unwrap();

    // What a remote peer would POST to /rpc to reach that member.
    let client = Client::tracked(rpc_rocket(&broker)).await.unwrap();
    let emit = serde_json::json!({
        "address": connection.address.id,
        "package": {
            "from": room.address.id,
            "createdAt": 0,
            "requestId": "emit-1",
            "routingKey": "broadcast",
            "content": {"data": "from-peer", "includeSelf": true}
        }
    });
    let reply = rpc_call(&client, "RpcEventEmitter.Emit", emit).await;
    assert!(reply["error"].is_null());
    assert!(reply["result"]["error"].is_null());

    let msg = recv_type(&mut inbox, "broadcast").await;
    assert_eq!(msg.request_id, "emit-1");
}

#[tokio::test]
async fn emit_to_an_unknown_address_reports_no_listeners() {
    let broker = test_broker();
    let client = Client::tracked(rpc_rocket(&broker)).await.unwrap();
    let ghost = broker.addresses.generate_address();
    let emit = serde_json::json!({
        "address": ghost.id,
        "package": {
            "from": ghost.id,
            "createdAt": 0,
            "requestId": "",
            "routingKey": "broadcast",
            "content": {}
        }
    });
    let reply = rpc_call(&client, "RpcEventEmitter.Emit", emit).await;
    assert!(reply["error"].is_null());
    assert!(
        reply["result"]["error"]["message"]
            .as_str()
            .unwrap()
            .contains("no listeners")
    );
}
