use pagemark_core::{Config, Paths};

/// Show the current configuration as pretty-printed JSON.
pub async fn show() -> anyhow::Result<()> {
    let paths = Paths::new();
    let config = Config::load_or_default(&paths)?;
    let json = serde_json::to_value(&config)?;

    println!();
    println!("Current configuration");
    println!("  File: {}", paths.config_file().display());
    if !paths.config_file().exists() {
        println!("  (not written yet, showing defaults; run `pagemark config init`)");
    }
    println!();
    println!("{}", serde_json::to_string_pretty(&json)?);
    Ok(())
}

/// Write the default configuration file.
pub async fn init(force: bool) -> anyhow::Result<()> {
    let paths = Paths::new();
    let config_path = paths.config_file();

    if config_path.exists() && !force {
        anyhow::bail!(
            "Config already exists at {}. Use --force to overwrite.",
            config_path.display()
        );
    }

    Config::default().save(&config_path)?;
    std::fs::create_dir_all(paths.fixtures_dir())?;
    println!("Wrote {}", config_path.display());
    Ok(())
}
