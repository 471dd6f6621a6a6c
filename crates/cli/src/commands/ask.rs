//! `threadsage ask` — Run one turn from the terminal.
//!
//! Output goes to stdout through the console adapter; the style prompt is
//! answered by typing `simple`/`detailed` (or 1/2) before the wait ends.

use std::sync::Arc;
use std::time::Duration;

use threadsage_channels::ConsoleAdapter;
use threadsage_core::event::GatewayEvent;
use threadsage_engine::StyleNegotiator;

use super::{CmdResult, build_engine, load_config, open_store};

/// Console channel id; threads opened from the terminal hang off it.
const CONSOLE_CHANNEL: &str = "console";

pub struct AskArgs {
    pub text: String,
    pub thread: Option<String>,
    pub renew: bool,
    pub language: Option<String>,
    pub wait: Option<u64>,
    pub user: String,
}

pub async fn run(args: AskArgs) -> CmdResult {
    let config = load_config()?;
    let store = open_store(&config).await?;
    let adapter = Arc::new(ConsoleAdapter::new(&args.user));

    let mut engine = build_engine(&config, store, adapter);
    if let Some(secs) = args.wait {
        engine = engine.with_negotiator(StyleNegotiator::new(
            Duration::from_secs(secs),
            config.style.default_on_timeout,
        ));
    }

    let mut event = match &args.thread {
        Some(thread_id) => {
            GatewayEvent::reply(&args.user, &args.user, CONSOLE_CHANNEL, thread_id, &args.text)
        }
        None => GatewayEvent::ask(&args.user, &args.user, CONSOLE_CHANNEL, &args.text),
    };
    if args.renew {
        event = event.renewing();
    }
    if let Some(language) = args.language {
        event = event.with_language(language);
    }

    // Failures were already shown in the console by the engine.
    let report = engine.handle(&event).await?;

    println!();
    println!("  Thread:    {}", report.thread_id);
    println!(
        "  Style:     {}{}",
        report.style,
        if report.timed_out { " (default)" } else { "" }
    );
    println!("  Provider:  {}", report.provider);
    println!("  Points:    +{}", report.points_awarded);
    println!("\n  Follow up: threadsage ask --thread {} \"...\"", report.thread_id);

    Ok(())
}
