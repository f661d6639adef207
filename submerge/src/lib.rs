// A server collects together all resources necessary to function as a replica
// of realm's tables and to support all necesary functions of the realm.
//
// A server may support one or more clients, or it may be configured strictly as
// an unloaded replica for redundancy.
//
// A server may be an active or passive replica. Active replicas participate in
// the replicated commit protocol, and therefore wait for one another (or at
// least a quorum of one another). Passive replicas can lag behind active
// replicas, can store and flood low-consistency data, but cannot initiate
// high-consistency write transactions.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use submerge_rowdb::{Store, StoreConfig};

pub enum ServerState {
    Idle,
    Running,
}

pub trait ServerTrait {
    fn state(&self) -> ServerState;
    fn table(&self, name: &str) -> Option<Arc<Store>>;
}

struct ServerImpl {
    tables: HashMap<String, Arc<Store>>,
}

impl ServerImpl {
    fn open_table(&mut self, name: &str, dir: &Path, config: StoreConfig) -> submerge_rowdb::Result<()> {
        let store = Store::create(dir.join(format!("{name}.redb")), config)?;
        self.tables.insert(name.to_string(), Arc::new(store));
        Ok(())
    }
}

impl ServerTrait for ServerImpl {
    fn state(&self) -> ServerState {
        if self.tables.is_empty() {
            ServerState::Idle
        } else {
            ServerState::Running
        }
    }

    fn table(&self, name: &str) -> Option<Arc<Store>> {
        self.tables.get(name).cloned()
    }
}

pub type Server = Box<dyn ServerTrait>;

pub fn new_server(data_dir: &Path, table_names: &[&str]) -> submerge_rowdb::Result<Server> {
    let mut server = ServerImpl { tables: HashMap::new() };
    for name in table_names {
        server.open_table(name, data_dir, StoreConfig::default())?;
    }
    Ok(Box::new(server))
}
