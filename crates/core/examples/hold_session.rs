// Hold-session example - Keep a session alive until Ctrl-C
//
// This example demonstrates:
// - Loading a SessionConfig from a JSON file
// - Opening a session against the configured members
// - Watching status changes the manager makes on its own
// - Closing the session cleanly
//
// Usage: cargo run --example hold_session -- session.json

use std::sync::Arc;

use skiff::{ClusterConnection, SessionConfig, SessionManager, WebSocketConnector};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
	tracing_subscriber::fmt::init();

	let path = std::env::args().nth(1).ok_or("usage: hold_session <config.json>")?;
	let config = SessionConfig::load(&path)?;

	let selector = Arc::new(config.selector());
	let connection = ClusterConnection::new(WebSocketConnector::new(), Arc::clone(&selector));
	let manager = SessionManager::new(connection, selector, config);

	manager.open().await?;
	println!("Session {} open", manager.session_id().unwrap_or_default());

	let mut status = manager.watch();
	loop {
		tokio::select! {
			changed = status.changed() => {
				if changed.is_err() {
					break;
				}
				let current = *status.borrow_and_update();
				println!("Status: {current:?}");
				if current.is_some_and(|status| status.is_terminal()) {
					return Ok(());
				}
			}
			_ = tokio::signal::ctrl_c() => break,
		}
	}

	manager.close().await?;
	println!("Session closed");
	Ok(())
}
