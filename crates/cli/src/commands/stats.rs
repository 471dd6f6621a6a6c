//! `threadsage stats` and `threadsage ranking` — Points and leaderboard.

use std::sync::Arc;

use threadsage_channels::ConsoleAdapter;

use super::{CmdResult, build_engine, load_config, open_store};

pub async fn run(user_id: &str) -> CmdResult {
    let config = load_config()?;
    let store = open_store(&config).await?;
    let engine = build_engine(&config, store, Arc::new(ConsoleAdapter::new(user_id)));

    let Some(stats) = engine.get_stats(user_id).await else {
        println!("  No data for user '{user_id}'");
        return Ok(());
    };

    println!("📊 {} ({})", stats.display_name, stats.user_id);
    println!("  Total points:    {}", stats.total_points);
    println!("  Monthly points:  {}", stats.monthly_points);
    println!("  Threads opened:  {}", stats.total_threads);
    match stats.rank {
        Some((position, total)) => println!("  Rank:            #{position} of {total}"),
        None => println!("  Rank:            -"),
    }

    Ok(())
}

pub async fn ranking(limit: usize) -> CmdResult {
    let config = load_config()?;
    let store = open_store(&config).await?;
    let engine = build_engine(&config, store, Arc::new(ConsoleAdapter::new("local")));

    let entries = engine.ranking(limit).await;
    if entries.is_empty() {
        println!("  No data");
        return Ok(());
    }

    println!("🏆 Monthly ranking");
    for (i, entry) in entries.iter().enumerate() {
        println!(
            "  {:>3}. {:<24} {:>6}",
            i + 1,
            entry.display_name,
            entry.monthly_points
        );
    }

    Ok(())
}
