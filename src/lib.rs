pub mod address;
pub mod config;
pub mod errors;
pub mod events;
pub mod metric;
pub mod models;
pub mod room;
pub mod routes;
pub mod rpc;
pub mod state;

use address::AddressManager;
use config::Config;
use events::{EventEmitter, register_rpc_event_emitter};
use rocket_cors::CorsOptions;
use room::rpc_service::register_local_rpc_room_manager;
use room::{ClusterRoomManager, LocalRoomManager};
use rpc::RpcManager;
use std::sync::Arc;

/// The wired component graph of one broker instance: address registry, RPC
/// mesh with its registered services, emitter, owner-side room manager and
/// the cluster orchestrator.
pub struct Broker {
    pub config: Config,
    pub addresses: Arc<AddressManager>,
    pub rpc: Arc<RpcManager>,
    pub emitter: Arc<EventEmitter>,
    pub local_rooms: Arc<LocalRoomManager>,
    pub cluster: Arc<ClusterRoomManager>,
}

impl Broker {
    pub fn build(config: Config) -> Result<Arc<Broker>, String> {
        let addresses = Arc::new(AddressManager::new(&config)?);
        let rpc = Arc::new(RpcManager::new(Arc::clone(&addresses)));
        let emitter = EventEmitter::new(Arc::clone(&addresses), Arc::clone(&rpc));
        register_rpc_event_emitter(&emitter, &rpc);

        let local_rooms = LocalRoomManager::new(
            Arc::clone(&emitter),
            Arc::clone(&addresses),
            config.max_rooms,
        );
        register_local_rpc_room_manager(&local_rooms, &rpc);

        let cluster = ClusterRoomManager::new(
            Arc::clone(&addresses),
            Arc::clone(&rpc),
            Arc::clone(&emitter),
        );

        Ok(Arc::new(Broker {
            config,
            addresses,
            rpc,
            emitter,
            local_rooms,
            cluster,
        }))
    }

    /// Launch the per-manager reapers. Idempotent; needs a live runtime.
    pub fn start_background_tasks(&self) {
        self.local_rooms.start();
        self.cluster.start();
    }
}

/// Public API server: room endpoints and the WebSocket upgrade.
pub fn public_rocket(broker: Arc<Broker>) -> rocket::Rocket<rocket::Build> {
    let figment = rocket::Config::figment()
        .merge(("port", broker.config.port))
        .merge(("address", "0.0.0.0"));

    let cors = CorsOptions::default()
        .to_cors()
        .expect("Failed to create CORS");

    let reaper_broker = Arc::clone(&broker);
    rocket::custom(figment)
        .manage(broker)
        .attach(cors)
        .register("/", rocket::catchers![routes::not_found])
        .mount(
            "/",
            rocket::routes![
                routes::health,
                routes::create_room,
                routes::list_rooms,
                routes::check_room,
                routes::socket::join_room,
            ],
        )
        .attach(rocket::fairing::AdHoc::on_liftoff(
            "Room Reapers",
            move |_rocket| {
                Box::pin(async move {
                    reaper_broker.start_background_tasks();
                    println!("🧹 room reapers started");
                })
            },
        ))
}

/// Internal RPC server; binds the peer endpoint from the cluster list (or
/// the random free port picked in single-instance mode).
pub fn rpc_rocket(broker: &Arc<Broker>) -> rocket::Rocket<rocket::Build> {
    let endpoint = broker.addresses.self_endpoint();
    let figment = rocket::Config::figment()
        .merge(("port", endpoint.port))
        .merge(("address", "0.0.0.0"));

    rocket::custom(figment)
        .manage(broker.rpc.registry())
        .mount("/", rocket::routes![rpc::rpc_endpoint])
}
