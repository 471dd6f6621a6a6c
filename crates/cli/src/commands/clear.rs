//! `threadsage clear` — Delete a thread and its messages.

use std::sync::Arc;

use threadsage_channels::ConsoleAdapter;

use super::{CmdResult, build_engine, load_config, open_store};

pub async fn run(thread_id: &str, requestor: &str) -> CmdResult {
    let config = load_config()?;
    let store = open_store(&config).await?;
    let engine = build_engine(&config, store, Arc::new(ConsoleAdapter::new(requestor)));

    match engine.clear_thread(thread_id, requestor).await {
        Ok(()) => {
            println!("✅ Thread {thread_id} cleared");
            Ok(())
        }
        Err(e) => {
            println!("{}", e.user_message());
            Err(e.into())
        }
    }
}
