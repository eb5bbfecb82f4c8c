use pagemark_core::{Config, Paths};

use super::page::{fail, open_session, FilterArgs, SourceArgs};

/// Take one snapshot and print it.
pub async fn run(source: &SourceArgs, filter: &FilterArgs, json: bool) -> anyhow::Result<()> {
    let paths = Paths::new();
    let config = Config::load_or_default(&paths)?;
    let mut session = open_session(source, &paths, &config).await?;

    let options = filter.apply(session.default_options());
    let result = session.snapshot(&options).await.map_err(|e| fail(e, json))?;

    if json {
        println!("{}", serde_json::to_string_pretty(&result)?);
        return Ok(());
    }

    print!("{}", result.tree);
    println!();
    println!("{} refs (version {})", result.refs.len(), result.version);
    Ok(())
}
