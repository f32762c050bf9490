mod http_transport;
mod prepared_upstream;
mod response;

pub use http_transport::HttpTransport;
pub use prepared_upstream::PreparedUpstream;
pub use response::{UpstreamBody, UpstreamResponse};
