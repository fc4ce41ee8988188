//! Select - insert a few tuples and read them back.
//!
//! This example demonstrates:
//! - Creating a connection with the builder pattern
//! - Addressing a space by name (resolved once, then cached)
//! - Running many requests concurrently over one socket
//!
//! # Running against a local server
//!
//! ```lua
//! box.cfg{listen = 3301}
//! box.schema.space.create('users', {if_not_exists = true})
//! box.space.users:create_index('primary', {if_not_exists = true})
//! box.schema.user.grant('guest', 'read,write', 'space', 'users', {if_not_exists = true})
//! ```
//!
//! ```text
//! RUST_LOG=iproto_client=debug cargo run --example select
//! ```

use iproto_client::{Connection, IteratorType, SelectOptions};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "iproto_client=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let conn = Connection::builder("127.0.0.1", 3301).connect().await?;
    if let Some(greeting) = conn.greeting() {
        tracing::info!("Connected: {}", greeting.version);
    }

    let mut tasks = Vec::new();
    for id in 1..=10u32 {
        let conn = conn.clone();
        tasks.push(tokio::spawn(async move {
            conn.replace("users", &(id, format!("user_{}", id))).await
        }));
    }
    for task in tasks {
        task.await??;
    }

    let options = SelectOptions::default().iterator(IteratorType::All).limit(5);
    let response = conn.select("users", &[0u32; 0], options).await?;
    let rows: Vec<(u32, String)> = response.rows()?;
    for (id, name) in rows {
        tracing::info!("{} => {}", id, name);
    }

    conn.close().await;
    Ok(())
}
