use std::env;
use std::path::PathBuf;

fn main() {
    let data_dir = env::args().nth(1).map(PathBuf::from).unwrap_or_else(|| PathBuf::from("./data"));
    std::fs::create_dir_all(&data_dir).expect("failed to create data directory");

    let server = submerge::new_server(&data_dir, &["users", "events"]).expect("failed to open tables");
    match server.state() {
        submerge::ServerState::Running => tracing::info!(tables = 2, "server up"),
        submerge::ServerState::Idle => tracing::info!("server idle"),
    }
}
