mod connection;
mod error;
mod query;
mod schema;
mod store;

pub use connection::*;
pub use error::*;
pub use query::*;
pub use schema::*;
pub use store::*;
