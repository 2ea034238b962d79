use crate::Broker;
use crate::address::Address;
use crate::errors::RoomError;
use crate::metric;
use crate::models::{Info, Message, MessageContent, RawMessage};
use crate::room::RemoteRoom;
use crate::room::wait_true;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use rocket::{State, get};
use rocket_ws as ws;
use std::sync::Arc;
use tokio::sync::{Mutex, watch};
use ws::stream::DuplexStream;

type SocketSink = Arc<Mutex<SplitSink<DuplexStream, ws::Message>>>;

#[derive(Debug, rocket::FromForm)]
pub struct JoinParams {
    pub address: Option<String>,
    pub name: Option<String>,
    #[field(name = "userId")]
    pub user_id: Option<String>,
    pub group: Option<String>,
    pub secret: Option<String>,
    #[field(name = "useSecret")]
    pub use_secret: Option<bool>,
    #[field(name = "forceCreate")]
    pub force_create: Option<bool>,
}

#[get("/api/v1/ws/room/join?<params..>")]
pub fn join_room(
    ws: ws::WebSocket,
    broker: &State<Arc<Broker>>,
    params: JoinParams,
) -> ws::Channel<'static> {
    let broker = Arc::clone(broker);
    ws.channel(move |stream| Box::pin(serve(broker, params, stream)))
}

/// Serialize + write under the per-socket lock; the frame writer is not
/// safe for concurrent writers.
async fn write_message(sink: &SocketSink, msg: &Message) -> bool {
    let text = match serde_json::to_string(msg) {
        Ok(text) => text,
        Err(e) => {
            eprintln!("socket marshal message error: {e}");
            return true;
        }
    };
    sink.lock().await.send(ws::Message::Text(text)).await.is_ok()
}

async fn write_error(sink: &SocketSink, err: &RoomError) {
    let _ = write_message(sink, &Message::new_error(err)).await;
}

async fn write_close_frame(sink: &SocketSink, reason: String) {
    let frame = ws::frame::CloseFrame {
        code: ws::frame::CloseCode::Normal,
        reason: reason.into(),
    };
    let _ = sink.lock().await.send(ws::Message::Close(Some(frame))).await;
}

/// The per-connection serve pair: this function runs the reader loop, a
/// spawned task runs the writer; both witness the shared cancel signal and
/// the proxy's done signal.
async fn serve(
    broker: Arc<Broker>,
    params: JoinParams,
    stream: DuplexStream,
) -> ws::result::Result<()> {
    let (sink, mut reader) = stream.split();
    let sink: SocketSink = Arc::new(Mutex::new(sink));

    let address = match params.address.as_deref().map(Address::parse) {
        Some(Ok(address)) => address,
        _ => {
            write_error(
                &sink,
                &RoomError::room_not_found("address parameter is missing or malformed"),
            )
            .await;
            return Ok(());
        }
    };

    let mut connection = broker.cluster.create_connection();
    connection.name = params.name.clone().unwrap_or_default();
    connection.user_id = params.user_id.clone().unwrap_or_default();

    let group = params.group.clone().unwrap_or_default();
    let secret = params.secret.clone().unwrap_or_default();
    let use_secret = params.use_secret.unwrap_or(false);
    let join_opt = Info::join_options(address.clone(), secret.clone(), use_secret, group.clone());

    let joined = if params.force_create.unwrap_or(false) {
        let mut create_opt = Info::new(
            params.name.clone().unwrap_or_default(),
            group.clone(),
            address.clone(),
        );
        create_opt.secret = secret;
        create_opt.use_secret = use_secret;
        broker
            .cluster
            .force_join_room(connection.clone(), &join_opt, create_opt)
            .await
    } else {
        broker.cluster.join_room(connection.clone(), &join_opt).await
    };

    let proxy = match joined {
        Ok(proxy) => proxy,
        Err(err) => {
            write_error(&sink, &err).await;
            return Ok(());
        }
    };

    // The connect handshake carries the membership as the owner sees it.
    let users = match broker.cluster.get_room_users(&join_opt).await {
        Ok(users) => users,
        Err(err) => {
            write_error(&sink, &err).await;
            let _ = broker.cluster.leave_room(&join_opt, &connection).await;
            return Ok(());
        }
    };
    let _ = write_message(&sink, &Message::new_connect(connection.clone(), users)).await;

    metric::count("tunnel_room", &[("action", "join"), ("code", "success")], 1.0);

    let (cancel_tx, cancel_rx) = watch::channel(false);
    let cancel_tx = Arc::new(cancel_tx);
    let writer = tokio::spawn(run_writer(
        Arc::clone(&sink),
        Arc::clone(&proxy),
        Arc::clone(&cancel_tx),
        cancel_rx.clone(),
    ));

    let ret_code = run_reader(&broker, &sink, &proxy, &mut reader, cancel_rx).await;

    // Terminal path: cancel the pair, leave the room, account the exit.
    let _ = cancel_tx.send(true);
    if let Err(e) = broker.cluster.leave_room(&join_opt, &connection).await {
        eprintln!(
            "serve room {} leave error ({ret_code}): {e}",
            join_opt.address.id
        );
    }
    metric::count("tunnel_room", &[("action", "close"), ("code", ret_code)], 1.0);
    let _ = writer.await;
    let _ = sink.lock().await.close().await;
    Ok(())
}

/// Relay room packages to the socket until the room closes, the pair is
/// cancelled, or a write fails. Any exit cancels the reader too.
async fn run_writer(
    sink: SocketSink,
    proxy: Arc<RemoteRoom>,
    cancel_tx: Arc<watch::Sender<bool>>,
    mut cancel: watch::Receiver<bool>,
) {
    let Some(mut inbox) = proxy.take_inbox() else {
        return;
    };
    let mut done = proxy.done();
    let mut close_reason = String::new();
    let mut write_code = "success";

    loop {
        tokio::select! {
            maybe = inbox.recv() => match maybe {
                Some(msg) => {
                    if let MessageContent::Close(content) = &msg.content {
                        close_reason = content.reason.clone();
                    }
                    if !write_message(&sink, &msg).await {
                        write_code = "write_message_close";
                        break;
                    }
                }
                None => break,
            },
            _ = wait_true(&mut done) => {
                // Drain what the listener already queued, then say goodbye
                // with the room's close reason.
                while let Ok(msg) = inbox.try_recv() {
                    if let MessageContent::Close(content) = &msg.content {
                        close_reason = content.reason.clone();
                    }
                    if !write_message(&sink, &msg).await {
                        break;
                    }
                }
                write_close_frame(&sink, close_reason.clone()).await;
                write_code = "room_close";
                break;
            }
            _ = wait_true(&mut cancel) => break,
        }
    }

    let _ = cancel_tx.send(true);
    metric::count("tunnel_room", &[("action", "write_close"), ("code", write_code)], 1.0);
}

/// Reader loop: malformed frames are answered with an `error` message and
/// the session continues; only transport failures and room closure end it.
async fn run_reader(
    broker: &Arc<Broker>,
    sink: &SocketSink,
    proxy: &Arc<RemoteRoom>,
    reader: &mut SplitStream<DuplexStream>,
    mut cancel: watch::Receiver<bool>,
) -> &'static str {
    let mut done = proxy.done();

    loop {
        tokio::select! {
            _ = wait_true(&mut done) => return "room_close",
            _ = wait_true(&mut cancel) => return "cancel_close",
            frame = reader.next() => match frame {
                None => return "remote_close",
                Some(Err(_)) => return "read_message_close",
                Some(Ok(ws::Message::Close(_))) => return "remote_close",
                Some(Ok(ws::Message::Text(text))) => {
                    handle_client_frame(broker, sink, proxy, &text).await;
                }
                Some(Ok(_)) => {} // binary/ping/pong frames carry no room traffic
            },
        }
    }
}

async fn handle_client_frame(
    broker: &Arc<Broker>,
    sink: &SocketSink,
    proxy: &Arc<RemoteRoom>,
    text: &str,
) {
    let raw: RawMessage = match serde_json::from_str(text) {
        Ok(raw) => raw,
        Err(e) => {
            write_error(
                sink,
                &RoomError::message_content(format!("decode message error: {e}")),
            )
            .await;
            return;
        }
    };

    if !MessageContent::is_client_sendable(&raw.type_name) {
        write_error(
            sink,
            &RoomError::client(format!(
                "message type {} cannot be sent by a client",
                raw.type_name
            )),
        )
        .await;
        return;
    }

    let msg = match raw.into_message() {
        Ok(msg) => msg,
        Err(err) => {
            write_error(sink, &err).await;
            return;
        }
    };

    match &msg.content {
        // Pong directly on the socket; the forwarded ping only refreshes the
        // room's activity clock and never fans out.
        MessageContent::Ping(_) => {
            let pong = msg.pong();
            let _ = write_message(sink, &pong).await;
            if let Err(e) = proxy.send_message(msg).await {
                eprintln!("forward ping error: {e}");
            }
        }
        MessageContent::UpdateRoomInfo(content) => {
            let mut patch = content.info.clone();
            patch.address = proxy.room_address();
            if let Err(err) = broker.cluster.update_room_info(&patch).await {
                write_error(sink, &err).await;
            }
            // The refreshed info reaches every member through the room's own
            // fan-out, this sender included.
        }
        _ => {
            if let Err(err) = proxy.send_message(msg).await {
                write_error(sink, &err).await;
            }
        }
    }
}
