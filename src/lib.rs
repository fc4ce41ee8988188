//! # iproto-client
//!
//! Async client for the Tarantool binary protocol (IPROTO).
//!
//! Many concurrent requests share one TCP connection. Each request carries
//! a correlation id (`sync`); a single reader task matches response frames
//! back to the waiting callers, and a single writer task coalesces
//! outgoing requests into one buffered write.
//!
//! ## Architecture
//!
//! - **Writer**: shared outbound buffer drained by a dedicated task
//! - **Reader**: greeting, then length-prefixed frames dispatched by sync
//! - **Schema**: space/index names resolved lazily and cached
//!
//! ## Example
//!
//! ```ignore
//! use iproto_client::{Connection, SelectOptions};
//!
//! #[tokio::main]
//! async fn main() {
//!     let conn = Connection::builder("127.0.0.1", 3301)
//!         .connect()
//!         .await
//!         .unwrap();
//!
//!     let response = conn
//!         .select("users", &(1u32,), SelectOptions::default())
//!         .await
//!         .unwrap();
//!     println!("{} rows", response.row_count().unwrap());
//! }
//! ```

pub mod codec;
pub mod error;
pub mod protocol;
pub mod transport;

mod connection;
mod schema;
mod waiters;
mod writer;

pub use connection::{
    Connection, ConnectionBuilder, ConnectionConfig, ConnectionState, SelectOptions,
    DEFAULT_BUFFER_SIZE, DEFAULT_MAX_RETRY_ATTEMPTS,
};
pub use error::{IprotoError, SchemaError};
pub use protocol::{Greeting, IteratorType, Response};
pub use schema::{Identifier, SchemaIndex, SchemaSpace};
