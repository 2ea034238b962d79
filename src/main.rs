use std::process;
use std::sync::Arc;
use tunnel_broker::config::Config;
use tunnel_broker::{Broker, public_rocket, rpc_rocket};

#[rocket::main]
async fn main() {
    let config = match Config::load() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("⚠️  load config error: {e}");
            process::exit(1);
        }
    };

    let broker = match Broker::build(config) {
        Ok(broker) => broker,
        Err(e) => {
            eprintln!("⚠️  build broker error: {e}");
            process::exit(1);
        }
    };

    println!(
        "🚇 tunnel-broker starting as machine {} (rpc {})",
        broker.addresses.machine_id(),
        broker.addresses.self_endpoint().endpoint()
    );

    let internal = rpc_rocket(&broker);
    let rpc_server = rocket::tokio::spawn(async move {
        if let Err(e) = internal.launch().await {
            eprintln!("⚠️  rpc server error: {e}");
        }
    });

    if let Err(e) = public_rocket(broker).launch().await {
        eprintln!("⚠️  public server error: {e}");
    }
    rpc_server.abort();
}
