pub mod connection;
pub mod dispatcher;

pub use connection::{GatewayContext, handle_connection};
pub use dispatcher::{ConnId, Dispatcher};
