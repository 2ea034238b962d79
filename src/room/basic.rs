use crate::address::Address;
use crate::metric;
use crate::models::Info;
use crate::state::{Status, StatusMachine};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use tokio::sync::watch;
use tokio::time::{Duration, interval};

const REAPER_TICK_SECS: u64 = 10;

/// What the reaping substrate needs from a room-like object. Local rooms key
/// by their room address; remote proxies key by their connection address so
/// two clients of one instance in the same room stay distinct.
#[async_trait]
pub trait ManagerRoom: Send + Sync + 'static {
    fn key_address(&self) -> Address;
    fn info(&self) -> Info;
    fn should_remove(&self) -> bool;
    fn is_closed(&self) -> bool;
    async fn close(self: Arc<Self>);
}

/// Shared lifecycle core: status machine plus the `done` signal that wakes
/// dispatchers and socket writers exactly once.
#[derive(Debug)]
pub struct BasicRoom {
    status: StatusMachine,
    done_tx: watch::Sender<bool>,
    done_rx: watch::Receiver<bool>,
}

impl Default for BasicRoom {
    fn default() -> Self {
        Self::new()
    }
}

impl BasicRoom {
    pub fn new() -> Self {
        let (done_tx, done_rx) = watch::channel(false);
        BasicRoom {
            status: StatusMachine::new(),
            done_tx,
            done_rx,
        }
    }

    pub fn status(&self) -> Status {
        self.status.status()
    }

    pub fn set_running(&self) {
        self.status.transition(Status::Init, Status::Running);
    }

    pub fn is_closed(&self) -> bool {
        self.status.is_status(Status::Closed)
    }

    /// Subscribe to the close signal. Waiters must use
    /// `wait_true` so a subscription taken after the close still resolves.
    pub fn done(&self) -> watch::Receiver<bool> {
        self.done_rx.clone()
    }

    /// Transition to `Closed` and fire `done`. Returns true only for the
    /// call that actually performed the transition.
    pub fn close(&self) -> bool {
        let closed = self.status.transition(Status::Init, Status::Closed)
            || self.status.transition(Status::Running, Status::Closed)
            || self.status.transition(Status::Error, Status::Closed);
        if closed {
            let _ = self.done_tx.send(true);
        }
        closed
    }
}

/// Resolve once `rx` carries `true`, including when it was already `true`
/// at subscription time. Unlike `wait_for`, this never leaves a `Ref` guard
/// held across an await point, so it stays usable inside `tokio::select!`
/// alongside other futures that must be `Send`.
pub async fn wait_true(rx: &mut watch::Receiver<bool>) {
    loop {
        if *rx.borrow() {
            return;
        }
        if rx.changed().await.is_err() {
            return;
        }
    }
}

/// Generic room container shared by the owner-side manager and the cluster
/// manager's proxy table, with the periodic reaper attached.
pub struct BasicManager<R: ManagerRoom> {
    rooms: RwLock<HashMap<String, Arc<R>>>,
    status: StatusMachine,
}

impl<R: ManagerRoom> Default for BasicManager<R> {
    fn default() -> Self {
        Self::new()
    }
}

impl<R: ManagerRoom> BasicManager<R> {
    pub fn new() -> Self {
        BasicManager {
            rooms: RwLock::new(HashMap::new()),
            status: StatusMachine::new(),
        }
    }

    pub fn add(&self, room: Arc<R>) {
        let mut rooms = self.rooms.write().unwrap_or_else(|e| e.into_inner());
        rooms.insert(room.key_address().id, room);
    }

    pub fn remove(&self, address: &Address) -> Option<Arc<R>> {
        let mut rooms = self.rooms.write().unwrap_or_else(|e| e.into_inner());
        rooms.remove(&address.id)
    }

    pub fn get(&self, address: &Address) -> Option<Arc<R>> {
        let rooms = self.rooms.read().unwrap_or_else(|e| e.into_inner());
        rooms.get(&address.id).cloned()
    }

    pub fn list(&self) -> Vec<Arc<R>> {
        let rooms = self.rooms.read().unwrap_or_else(|e| e.into_inner());
        rooms.values().cloned().collect()
    }

    pub fn list_by_tags(&self, tags: &HashMap<String, String>) -> Vec<Arc<R>> {
        if tags.is_empty() {
            return self.list();
        }
        self.list()
            .into_iter()
            .filter(|r| r.info().matches_tags(tags))
            .collect()
    }

    pub fn len(&self) -> usize {
        let rooms = self.rooms.read().unwrap_or_else(|e| e.into_inner());
        rooms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// One reaper tick: snapshot, ask every room, close the expired ones.
    pub async fn sweep(&self, name: &str) {
        let rooms = self.list();
        metric::summary("tunnel_room_manager", &[("manager", name)], rooms.len() as f64);

        for room in rooms {
            if room.should_remove() {
                let address = room.key_address();
                self.remove(&address);
                room.close().await;
            }
        }
    }

    /// Launch the 10 s reaper task. Idempotent per manager.
    pub fn start_reaper(self: &Arc<Self>, name: &'static str) {
        if !self.status.transition(Status::Init, Status::Running) {
            return;
        }

        let manager = Arc::clone(self);
        tokio::spawn(async move {
            let mut tick = interval(Duration::from_secs(REAPER_TICK_SECS));
            tick.tick().await; // the first tick fires immediately
            loop {
                tick.tick().await;
                manager.sweep(name).await;
            }
        });
    }
}
