//! `threadsage onboard` — First-time setup.

use threadsage_config::AppConfig;

use super::CmdResult;

pub async fn run() -> CmdResult {
    let config_dir = AppConfig::config_dir();
    let config_path = config_dir.join("config.toml");

    println!("💬 threadsage — First-Time Setup");
    println!("================================\n");

    if !config_dir.exists() {
        std::fs::create_dir_all(&config_dir)?;
        println!("✅ Created config directory: {}", config_dir.display());
    } else {
        println!("  Config directory exists: {}", config_dir.display());
    }

    if config_path.exists() {
        println!("\n⚠️  Config already exists at: {}", config_path.display());
        println!("   Edit it manually or delete and re-run onboard.\n");
        return Ok(());
    }

    std::fs::write(&config_path, AppConfig::default_toml())?;
    println!("✅ Created config.toml at: {}", config_path.display());
    println!("\n📝 Next steps:");
    println!("   1. Set THREADSAGE_PRIMARY_API_KEY (Gemini) and THREADSAGE_SECONDARY_API_KEY");
    println!("   2. Optionally set THREADSAGE_ADMIN_ID to your user id");
    println!("   3. Run: threadsage ask \"What is 2+2?\"\n");

    Ok(())
}
