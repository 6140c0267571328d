mod port;

pub use port::{find_available_port, find_available_ports, is_port_available};
