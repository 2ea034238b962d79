use crate::common::test_client;
use rocket::http::{ContentType, Status};

// --- Room HTTP endpoints ---

#[test]
fn test_health() {
    let client = test_client();
    let res = client.get("/api/v1/health").dispatch();
    assert_eq!(res.status(), Status::Ok);
    let body: serde_json::Value = res.into_json().unwrap();
    assert_eq!(body["status"], "ok");
    assert_eq!(body["machineId"], "local");
}

#[test]
fn test_create_room() {
    let client = test_client();
    let res = client
        .post("/api/v1/room/create?name=console&group=debug&os=ios")
        .header(ContentType::JSON)
        .body(r#"{"secret": "s3", "useSecret": true}"#)
        .dispatch();
    assert_eq!(res.status(), Status::Ok);

    let body: serde_json::Value = res.into_json().unwrap();
    assert_eq!(body["code"], "success");
    assert_eq!(body["success"], true);
    let data = &body["data"];
    assert_eq!(data["name"], "console");
    assert_eq!(data["group"], "debug");
    assert_eq!(data["tags"]["os"], "ios");
    assert_eq!(data["useSecret"], true);
    let address = data["address"].as_str().unwrap();
    assert!(address.ends_with(".local"));
}

#[test]
fn test_create_room_requires_name_and_group() {
    let client = test_client();
    let res = client.post("/api/v1/room/create?name=only-name").dispatch();
    assert_eq!(res.status(), Status::BadRequest);
    let body: serde_json::Value = res.into_json().unwrap();
    assert_eq!(body["code"], "error");
    assert_eq!(body["success"], false);
}

#[test]
fn test_create_room_without_body() {
    let client = test_client();
    let res = client
        .post("/api/v1/room/create?name=plain&group=debug")
        .dispatch();
    assert_eq!(res.status(), Status::Ok);
    let body: serde_json::Value = res.into_json().unwrap();
    assert_eq!(body["data"]["useSecret"], false);
}

#[test]
fn test_reserved_query_keys_never_become_tags() {
    let client = test_client();
    let res = client
        .post("/api/v1/room/create?name=r&group=g&useSecret=false&env=prod")
        .dispatch();
    let body: serde_json::Value = res.into_json().unwrap();
    let tags = body["data"]["tags"].as_object().unwrap();
    assert!(tags.contains_key("env"));
    assert!(!tags.contains_key("name"));
    assert!(!tags.contains_key("useSecret"));
}

#[test]
fn test_list_rooms_with_tag_filter() {
    let client = test_client();
    client
        .post("/api/v1/room/create?name=a&group=debug&os=ios")
        .dispatch();
    std::thread::sleep(std::time::Duration::from_millis(10));
    client
        .post("/api/v1/room/create?name=b&group=debug&os=android")
        .dispatch();

    let res = client.get("/api/v1/room/list").dispatch();
    assert_eq!(res.status(), Status::Ok);
    let body: serde_json::Value = res.into_json().unwrap();
    let rooms = body["data"].as_array().unwrap();
    assert_eq!(rooms.len(), 2);
    // Newest first.
    assert_eq!(rooms[0]["name"], "b");
    assert_eq!(rooms[1]["name"], "a");

    let res = client.get("/api/v1/room/list?os=android").dispatch();
    let body: serde_json::Value = res.into_json().unwrap();
    let rooms = body["data"].as_array().unwrap();
    assert_eq!(rooms.len(), 1);
    assert_eq!(rooms[0]["name"], "b");
}

#[test]
fn test_check_room_secret() {
    let client = test_client();
    let res = client
        .post("/api/v1/room/create?name=gated&group=debug")
        .header(ContentType::JSON)
        .body(r#"{"secret": "tok", "useSecret": true}"#)
        .dispatch();
    let body: serde_json::Value = res.into_json().unwrap();
    let address = body["data"]["address"].as_str().unwrap().to_string();

    let res = client
        .get(format!("/api/v1/room/check?address={address}&secret=tok"))
        .dispatch();
    assert_eq!(res.status(), Status::Ok);

    let res = client
        .get(format!("/api/v1/room/check?address={address}&secret=nope"))
        .dispatch();
    assert_eq!(res.status(), Status::BadRequest);

    let res = client
        .get(format!("/api/v1/room/check?address={address}"))
        .dispatch();
    assert_eq!(res.status(), Status::BadRequest);
}

#[test]
fn test_check_room_rejects_malformed_address() {
    let client = test_client();
    let res = client
        .get("/api/v1/room/check?address=not-an-address")
        .dispatch();
    assert_eq!(res.status(), Status::BadRequest);
}

#[test]
fn test_check_room_unknown_address() {
    let client = test_client();
    let res = client
        .get("/api/v1/room/check?address=00000000-0000-0000-0000-000000000000.local")
        .dispatch();
    assert_eq!(res.status(), Status::BadRequest);
    let body: serde_json::Value = res.into_json().unwrap();
    assert!(body["message"].as_str().unwrap().contains("RoomNotFoundError"));
}
