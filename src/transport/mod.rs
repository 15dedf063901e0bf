//! Transport collaborator: one network attempt per call, over reqwest.

pub mod http;
pub mod probe;

pub use http::{HttpTransport, PreparedRequest, TransportError, REQUEST_ID_HEADER};
pub use probe::{ConnectivityCheck, HttpProbe, StaticConnectivity};
