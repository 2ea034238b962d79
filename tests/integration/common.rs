use rocket::local::blocking::Client;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::time::{Duration, timeout};
use tunnel_broker::config::Config;
use tunnel_broker::models::Message;
use tunnel_broker::{Broker, public_rocket};

/// A single-instance broker (machine id `local`); cluster calls short-circuit
/// through the in-process service registry, so no server needs to listen.
pub fn test_broker() -> Arc<Broker> {
    Broker::build(Config::default()).expect("broker wiring")
}

pub fn test_client() -> Client {
    Client::tracked(public_rocket(test_broker())).expect("valid rocket instance")
}

/// Await the next message of the wanted type, skipping lifecycle chatter
/// (join/leave frames arrive interleaved with the payload under test).
pub async fn recv_type(inbox: &mut mpsc::Receiver<Message>, type_name: &str) -> Message {
    timeout(Duration::from_secs(2), async {
        loop {
            let msg = inbox.recv().await.expect("inbox closed while waiting");
            if msg.type_name() == type_name {
                return msg;
            }
        }
    })
    .await
    .unwrap_or_else(|_| panic!("timed out waiting for a {type_name} message"))
}

/// Assert no message of the given type is already queued.
pub fn assert_not_queued(inbox: &mut mpsc::Receiver<Message>, type_name: &str) {
    while let Ok(msg) = inbox.try_recv() {
        assert_ne!(
            msg.type_name(),
            type_name,
            "unexpected {type_name} message in inbox"
        );
    }
}
