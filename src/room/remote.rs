use crate::address::Address;
use crate::errors::{RoomError, RoomResult};
use crate::events::{EventEmitter, Listener, Package};
use crate::metric;
use crate::models::{
    CLOSE_TYPE, Connection, Info, Message, MessageContent, PingContent, message_to_package,
    package_to_message,
};
use crate::room::basic::{BasicRoom, ManagerRoom};
use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use std::sync::{Arc, Mutex, Weak};
use tokio::sync::{mpsc, watch};
use tokio::time::{Duration, timeout};

pub const PROXY_MAILBOX_SIZE: usize = 20;
const LISTEN_TIMEOUT_SECS: u64 = 5;
const STALE_AFTER_SECS: i64 = 20;

/// Per-client view of a joined room, living on the instance the client is
/// connected to. It listens on the client's own address and forwards the
/// client's intents to the owning room through the emitter; it never holds
/// the room itself, only its address and an info snapshot.
pub struct RemoteRoom {
    basic: BasicRoom,
    self_ref: Weak<RemoteRoom>,
    connection: Connection,
    room_info: Info,
    emitter: Arc<EventEmitter>,
    mailbox: mpsc::Sender<Message>,
    inbox: Mutex<Option<mpsc::Receiver<Message>>>,
    created_at: DateTime<Utc>,
    active_at: Mutex<DateTime<Utc>>,
}

impl std::fmt::Debug for RemoteRoom {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteRoom")
            .field("connection", &self.connection)
            .field("room_info", &self.room_info)
            .field("created_at", &self.created_at)
            .finish()
    }
}

impl RemoteRoom {
    pub fn new(
        connection: Connection,
        room_info: Info,
        emitter: Arc<EventEmitter>,
    ) -> Arc<RemoteRoom> {
        let (mailbox, inbox) = mpsc::channel(PROXY_MAILBOX_SIZE);
        Arc::new_cyclic(|self_ref| RemoteRoom {
            basic: BasicRoom::new(),
            self_ref: self_ref.clone(),
            connection,
            room_info,
            emitter,
            mailbox,
            inbox: Mutex::new(Some(inbox)),
            created_at: Utc::now(),
            active_at: Mutex::new(Utc::now()),
        })
    }

    pub fn connection(&self) -> &Connection {
        &self.connection
    }

    pub fn room_address(&self) -> Address {
        self.room_info.address.clone()
    }

    pub fn room_info(&self) -> &Info {
        &self.room_info
    }

    pub fn is_closed(&self) -> bool {
        self.basic.is_closed()
    }

    /// Close signal for the socket writer; resolves even when subscribed
    /// after the close already happened.
    pub fn done(&self) -> watch::Receiver<bool> {
        self.basic.done()
    }

    /// The socket writer takes the inbox; there is exactly one consumer.
    pub fn take_inbox(&self) -> Option<mpsc::Receiver<Message>> {
        self.inbox.lock().unwrap_or_else(|e| e.into_inner()).take()
    }

    fn touch(&self) {
        *self.active_at.lock().unwrap_or_else(|e| e.into_inner()) = Utc::now();
    }

    pub fn start(self: &Arc<Self>) {
        metric::count(
            "tunnel_remote_room",
            &[("action", "start"), ("code", "success")],
            1.0,
        );
        self.emitter
            .listen(&self.connection.address, Arc::clone(self) as Arc<dyn Listener>);
    }

    /// Client → room. The proxy stamps itself as the sender; only the public
    /// send set is accepted here.
    pub async fn send_message(&self, msg: Message) -> RoomResult<()> {
        self.touch();

        let Message {
            content,
            created_at,
            request_id,
        } = msg;

        let (target, content) = match content {
            MessageContent::Broadcast(mut c) => {
                c.from = Some(self.connection.clone());
                (self.room_address(), MessageContent::Broadcast(c))
            }
            MessageContent::Unicast(mut c) => {
                let to = c.to.clone().ok_or_else(|| {
                    RoomError::message_content("unicast message `to` field is empty")
                })?;
                c.from = Some(self.connection.clone());
                (to.address, MessageContent::Unicast(c))
            }
            MessageContent::Ping(_) => (
                self.room_address(),
                MessageContent::Ping(PingContent {
                    from: self.connection.address.clone(),
                }),
            ),
            other => {
                return Err(RoomError::client(format!(
                    "message type {} cannot be sent by a client",
                    other.type_name()
                )));
            }
        };

        let msg = Message {
            content,
            created_at,
            request_id,
        };
        let pkg = message_to_package(&msg, self.connection.address.clone())?;
        self.emitter.emit(&target, pkg).await
    }

    /// Aggressive staleness: the socket's own ping traffic keeps the proxy
    /// alive; 20 s of silence means the client is gone.
    fn should_remove_at(&self, now: DateTime<Utc>) -> bool {
        if self.is_closed() {
            return true;
        }
        let active_at = *self.active_at.lock().unwrap_or_else(|e| e.into_inner());
        now.signed_duration_since(self.created_at) > ChronoDuration::hours(1)
            || now.signed_duration_since(active_at) > ChronoDuration::seconds(STALE_AFTER_SECS)
    }

    /// Idempotent: fires `done` once and unregisters from the emitter.
    pub fn close(&self) {
        if !self.basic.close() {
            return;
        }
        metric::count(
            "tunnel_remote_room",
            &[("action", "close"), ("code", "close")],
            1.0,
        );
        if let Some(me) = self.self_ref.upgrade() {
            self.emitter
                .remove_listener(&self.connection.address, &(me as Arc<dyn Listener>));
        }
    }

    #[cfg(test)]
    pub(crate) fn stage_active_at(&self, active_at: DateTime<Utc>) {
        *self.active_at.lock().unwrap() = active_at;
    }
}

#[async_trait]
impl Listener for RemoteRoom {
    /// Room → client mailbox. A `close` package also tears the proxy down
    /// after it is relayed, so the writer still ships the final frame.
    async fn listen(&self, pkg: Package) {
        let msg = match package_to_message(&pkg) {
            Ok(msg) => msg,
            Err(e) => {
                eprintln!(
                    "proxy {} decode package error: {e}",
                    self.connection.address.id
                );
                return;
            }
        };
        let is_close = msg.type_name() == CLOSE_TYPE;

        match timeout(
            Duration::from_secs(LISTEN_TIMEOUT_SECS),
            self.mailbox.send(msg),
        )
        .await
        {
            Ok(Ok(())) => {
                if is_close {
                    self.close();
                }
            }
            _ => {
                metric::count(
                    "tunnel_remote_room",
                    &[("action", "drop"), ("code", "mailbox_full")],
                    1.0,
                );
                eprintln!(
                    "proxy {} mailbox full, message dropped",
                    self.connection.address.id
                );
            }
        }
    }

    fn is_closed(&self) -> bool {
        self.basic.is_closed()
    }
}

#[async_trait]
impl ManagerRoom for RemoteRoom {
    fn key_address(&self) -> Address {
        self.connection.address.clone()
    }

    fn info(&self) -> Info {
        self.room_info.clone()
    }

    fn should_remove(&self) -> bool {
        self.should_remove_at(Utc::now())
    }

    fn is_closed(&self) -> bool {
        self.basic.is_closed()
    }

    async fn close(self: Arc<Self>) {
        RemoteRoom::close(&self);
    }
}
