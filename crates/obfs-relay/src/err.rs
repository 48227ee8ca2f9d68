//! Declare an error type for obfs_relay

use crate::ids::ConnId;

use std::net::SocketAddr;
use std::sync::Arc;
use thiserror::Error;

/// An error from the connection manager or the socket driver.
#[derive(Error, Debug, Clone)]
#[non_exhaustive]
pub enum Error {
    /// We couldn't bind a listener.
    #[error("Can't listen on {addr}")]
    Bind {
        /// The address we tried to listen on.
        addr: SocketAddr,
        /// What went wrong.
        #[source]
        source: Arc<std::io::Error>,
    },

    /// A configuration gave us no addresses to listen on.
    #[error("No listen addresses for {0} configuration")]
    NoListenAddrs(&'static str),

    /// Some other I/O error happened on a listener or on the reactor.
    #[error("I/O error")]
    Io(#[source] Arc<std::io::Error>),

    /// A connection we were asked about isn't registered.
    #[error("No such connection: {0}")]
    NoSuchConn(ConnId),

    /// Tried to pair two connections from different configurations.
    #[error("Connections {0} and {1} come from different listeners")]
    ConfigMismatch(ConnId, ConnId),

    /// Tried to put a connection into a second circuit.
    #[error("{0} already belongs to a circuit")]
    AlreadyInCircuit(ConnId),

    /// We're shutting down, and won't take new connections.
    #[error("Shutting down")]
    ShuttingDown,

    /// A protocol refused to create its state.
    #[error("Protocol error")]
    Proto(#[from] obfs_proto::Error),

    /// Something went wrong with the programming of this crate.
    #[error("Internal programming error: {0}")]
    Internal(&'static str),
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Io(Arc::new(e))
    }
}
