use std::net::SocketAddr;

/// Default port the broker listens on.
pub const DEFAULT_PORT: u16 = 50000;

/// Default listen backlog for the accepting socket.
pub const DEFAULT_BACKLOG: u32 = 1024;

#[derive(Debug, Clone)]
pub struct BrokerConfig {
    pub listen_addr: SocketAddr,
    pub backlog: u32,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            listen_addr: SocketAddr::from(([0, 0, 0, 0], DEFAULT_PORT)),
            backlog: DEFAULT_BACKLOG,
        }
    }
}

impl BrokerConfig {
    pub fn new(listen_addr: SocketAddr) -> Self {
        Self {
            listen_addr,
            ..Default::default()
        }
    }
}
