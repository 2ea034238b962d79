use crate::address::Address;
use crate::errors::{RoomError, RoomResult};
use crate::events::{EventEmitter, Listener, Package};
use crate::metric;
use crate::models::{
    Connection, Info, Message, MessageContent, message_to_package, package_to_message,
};
use crate::room::basic::{BasicRoom, ManagerRoom, wait_true};
use crate::state::Status;
use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use std::sync::{Arc, Mutex, RwLock};
use tokio::sync::mpsc;
use tokio::time::{Duration, timeout};

pub const ROOM_MAILBOX_SIZE: usize = 1000;
const SEND_TIMEOUT_SECS: u64 = 5;
const CLOSE_CODE_UNKNOWN: &str = "unknown";

/// Authoritative room object, exclusively hosted by the instance owning its
/// address. Inbound packages land in a bounded mailbox; a single dispatcher
/// task drains it and performs fan-out serially, which gives per-room FIFO
/// order of observed messages.
pub struct LocalRoom {
    basic: BasicRoom,
    info: RwLock<Info>,
    close_code: Mutex<String>,
    close_reason: Mutex<String>,
    emitter: Arc<EventEmitter>,
    mailbox: mpsc::Sender<Message>,
    inbox: Mutex<Option<mpsc::Receiver<Message>>>,
}

impl std::fmt::Debug for LocalRoom {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalRoom")
            .field("info", &self.read_info())
            .finish()
    }
}

impl LocalRoom {
    pub fn new(mut info: Info, emitter: Arc<EventEmitter>) -> RoomResult<Arc<LocalRoom>> {
        if info.use_secret && info.secret.is_empty() {
            return Err(RoomError::client(
                "room requires a secret but none was provided",
            ));
        }

        info.connections = Vec::new();
        info.created_at = Utc::now();
        info.active_at = Utc::now();

        let (mailbox, inbox) = mpsc::channel(ROOM_MAILBOX_SIZE);
        Ok(Arc::new(LocalRoom {
            basic: BasicRoom::new(),
            info: RwLock::new(info),
            close_code: Mutex::new(CLOSE_CODE_UNKNOWN.to_string()),
            close_reason: Mutex::new(CLOSE_CODE_UNKNOWN.to_string()),
            emitter,
            mailbox,
            inbox: Mutex::new(Some(inbox)),
        }))
    }

    pub fn address(&self) -> Address {
        self.read_info().address.clone()
    }

    pub fn info(&self) -> Info {
        self.read_info().clone()
    }

    pub fn connections(&self) -> Vec<Connection> {
        self.read_info().connections.clone()
    }

    pub fn close_code(&self) -> String {
        self.close_code
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn is_closed(&self) -> bool {
        self.basic.is_closed()
    }

    fn read_info(&self) -> std::sync::RwLockReadGuard<'_, Info> {
        self.info.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write_info(&self) -> std::sync::RwLockWriteGuard<'_, Info> {
        self.info.write().unwrap_or_else(|e| e.into_inner())
    }

    fn touch(&self) {
        self.write_info().active_at = Utc::now();
    }

    /// Register on the emitter, launch the dispatcher, announce `start`.
    pub async fn start(self: &Arc<Self>) {
        let inbox = self
            .inbox
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        let Some(mut inbox) = inbox else {
            return; // already started
        };

        metric::count(
            "tunnel_local_room",
            &[("action", "start"), ("code", "success")],
            1.0,
        );

        self.emitter
            .listen(&self.address(), Arc::clone(self) as Arc<dyn Listener>);

        let room = Arc::clone(self);
        tokio::spawn(async move {
            let mut done = room.basic.done();
            loop {
                tokio::select! {
                    maybe = inbox.recv() => match maybe {
                        Some(msg) => {
                            if let Err(e) = room.send_message(msg).await {
                                eprintln!("room {} dispatch error: {e}", room.address().id);
                            }
                        }
                        None => return,
                    },
                    _ = wait_true(&mut done) => return,
                }
            }
        });

        // Fan-out to the still-empty connection set is a no-op.
        self.send_with_timeout(Message::new_start(self.address()))
            .await;
    }

    /// Admission: the join options must name this room's address and, when
    /// the room is gated, carry the matching secret. A failed join leaves
    /// the connection set untouched.
    pub async fn join(&self, connection: Connection, opt: &Info) -> RoomResult<()> {
        if self.is_closed() {
            return Err(RoomError::room_close(format!(
                "room {} is already closed",
                opt.address.id
            )));
        }

        {
            let mut info = self.write_info();
            if info.address != opt.address {
                return Err(RoomError::client(format!(
                    "connection {} joined with wrong room address {}",
                    connection.address.id, opt.address.id
                )));
            }
            if info.use_secret && info.secret != opt.secret {
                return Err(RoomError::client(format!(
                    "join room {} secret mismatch",
                    opt.address.id
                )));
            }
            info.connections.push(connection.clone());
        }

        self.basic.set_running();
        self.send_with_timeout(Message::new_join(connection)).await;
        Ok(())
    }

    pub async fn leave(&self, connection: &Connection, opt: &Info) -> RoomResult<()> {
        {
            let mut info = self.write_info();
            if info.address != opt.address {
                return Err(RoomError::client(format!(
                    "connection {} left with wrong room address {}",
                    connection.address.id, opt.address.id
                )));
            }
            info.connections
                .retain(|c| c.address != connection.address);
        }

        self.send_with_timeout(Message::new_leave(connection.clone()))
            .await;
        Ok(())
    }

    /// Apply a descriptor patch and fan the refreshed info out to every
    /// member, so all local views converge on the same descriptor.
    pub async fn update_info(&self, patch: &Info) -> Info {
        let updated = {
            let mut info = self.write_info();
            info.update(patch);
            info.clone()
        };

        self.send_with_timeout(Message::new_update_room_info(updated.clone()))
            .await;
        updated
    }

    /// Per-type routing policy. Every successful dispatch refreshes
    /// `active_at`.
    pub async fn send_message(&self, msg: Message) -> RoomResult<()> {
        match &msg.content {
            MessageContent::Ping(_) => {
                self.touch();
                Ok(())
            }
            MessageContent::Broadcast(content) => {
                let skip = if content.include_self {
                    None
                } else {
                    content.from.as_ref().map(|c| c.address.clone())
                };
                self.fan_out(&msg, skip.as_ref()).await
            }
            MessageContent::Unicast(content) => {
                let to = content.to.clone().ok_or_else(|| {
                    RoomError::message_content("unicast message `to` field is empty")
                })?;
                let pkg = message_to_package(&msg, self.address())?;
                self.emitter.emit(&to.address, pkg).await?;
                self.touch();
                Ok(())
            }
            MessageContent::UpdateRoomInfo(_)
            | MessageContent::Start(_)
            | MessageContent::Close(_)
            | MessageContent::Join(_)
            | MessageContent::Leave(_)
            | MessageContent::Connect(_)
            | MessageContent::Error(_) => self.fan_out(&msg, None).await,
            MessageContent::Pong(_) => Err(RoomError::message_content(
                "message type pong cannot be routed through a room",
            )),
        }
    }

    /// Serialize once, emit per recipient. Delivery is best-effort and
    /// non-atomic: failures are logged and the last one is returned.
    async fn fan_out(&self, msg: &Message, skip: Option<&Address>) -> RoomResult<()> {
        let (connections, room_address) = {
            let info = self.read_info();
            (info.connections.clone(), info.address.clone())
        };
        let pkg = message_to_package(msg, room_address)?;
        self.touch();

        let mut last_err = None;
        for connection in connections {
            if skip == Some(&connection.address) {
                continue;
            }
            if let Err(e) = self.emitter.emit(&connection.address, pkg.clone()).await {
                eprintln!(
                    "emit {} message to connection {} error: {e}",
                    pkg.routing_key, connection.address.id
                );
                last_err = Some(e);
            }
        }

        match last_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    async fn send_with_timeout(&self, msg: Message) {
        match timeout(
            Duration::from_secs(SEND_TIMEOUT_SECS),
            self.send_message(msg),
        )
        .await
        {
            Ok(Ok(())) => {}
            Ok(Err(e)) => eprintln!("room {} send message error: {e}", self.address().id),
            Err(_) => eprintln!("room {} send message timed out", self.address().id),
        }
    }

    /// First matching predicate wins and fixes the close code and reason.
    fn should_remove_at(&self, now: DateTime<Utc>) -> bool {
        if self.is_closed() {
            return true;
        }

        let status = self.basic.status();
        let (created_at, active_at, empty) = {
            let info = self.read_info();
            (info.created_at, info.active_at, info.connections.is_empty())
        };
        let since_created = now.signed_duration_since(created_at);
        let since_active = now.signed_duration_since(active_at);

        let no_use_init_room =
            status == Status::Init && empty && since_created > ChronoDuration::minutes(1);
        let no_user_room =
            status == Status::Running && empty && since_active > ChronoDuration::minutes(1);
        let no_use_room = status == Status::Running && since_active > ChronoDuration::minutes(5);
        let max_time_room = since_created > ChronoDuration::hours(1);

        if no_use_init_room {
            self.set_close_state(
                "noUseInitRoom",
                "no client connected within 1 minute of room creation",
            );
        } else if no_user_room {
            self.set_close_state(
                "noUserRoom",
                "all clients left and none reconnected within 1 minute",
            );
        } else if no_use_room {
            self.set_close_state("noUseRoom", "no activity in the room for 5 minutes");
        } else if max_time_room {
            self.set_close_state("maxTimeRoom", "room exceeded the maximum lifetime of 1 hour");
        }

        no_use_init_room || no_user_room || no_use_room || max_time_room
    }

    fn set_close_state(&self, code: &str, reason: &str) {
        let mut close_code = self.close_code.lock().unwrap_or_else(|e| e.into_inner());
        if *close_code != CLOSE_CODE_UNKNOWN {
            return;
        }
        *close_code = code.to_string();
        *self.close_reason.lock().unwrap_or_else(|e| e.into_inner()) = reason.to_string();
    }

    /// Idempotent close: the losing caller returns immediately; the winner
    /// announces `close` to the members best-effort and unregisters from the
    /// emitter.
    pub async fn close_with_code(self: &Arc<Self>, code: &str) {
        self.set_close_state(code, code);
        if !self.basic.close() {
            return;
        }

        let close_code = self.close_code();
        metric::count(
            "tunnel_local_room",
            &[("action", "close"), ("code", close_code.as_str())],
            1.0,
        );

        let reason = self
            .close_reason
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone();
        eprintln!("room {} closed: {reason}", self.address().id);
        self.send_with_timeout(Message::new_close(self.address(), reason))
            .await;

        self.emitter
            .remove_listener(&self.address(), &(Arc::clone(self) as Arc<dyn Listener>));
    }

    #[cfg(test)]
    pub(crate) fn stage_timestamps(&self, created_at: DateTime<Utc>, active_at: DateTime<Utc>) {
        let mut info = self.write_info();
        info.created_at = created_at;
        info.active_at = active_at;
    }
}

#[async_trait]
impl Listener for LocalRoom {
    /// Mailbox push with a bounded wait; overflow is dropped and measured.
    async fn listen(&self, pkg: Package) {
        let msg = match package_to_message(&pkg) {
            Ok(msg) => msg,
            Err(e) => {
                eprintln!("room {} decode package error: {e}", self.address().id);
                return;
            }
        };

        match timeout(
            Duration::from_secs(SEND_TIMEOUT_SECS),
            self.mailbox.send(msg),
        )
        .await
        {
            Ok(Ok(())) => {}
            _ => {
                metric::count(
                    "tunnel_local_room",
                    &[("action", "drop"), ("code", "mailbox_full")],
                    1.0,
                );
                eprintln!("room {} mailbox full, message dropped", self.address().id);
            }
        }
    }

    fn is_closed(&self) -> bool {
        self.basic.is_closed()
    }
}

#[async_trait]
impl ManagerRoom for LocalRoom {
    fn key_address(&self) -> Address {
        self.address()
    }

    fn info(&self) -> Info {
        LocalRoom::info(self)
    }

    fn should_remove(&self) -> bool {
        self.should_remove_at(Utc::now())
    }

    fn is_closed(&self) -> bool {
        self.basic.is_closed()
    }

    async fn close(self: Arc<Self>) {
        let code = self.close_code();
        self.close_with_code(&code).await;
    }
}
