use pagemark_core::{Config, Paths};
use serde_json::json;

use super::page::{fail, open_session, FilterArgs, SourceArgs};

/// Snapshot the page, then resolve `ref_token` against that snapshot.
pub async fn run(
    ref_token: &str,
    source: &SourceArgs,
    filter: &FilterArgs,
    json: bool,
) -> anyhow::Result<()> {
    let paths = Paths::new();
    let config = Config::load_or_default(&paths)?;
    let mut session = open_session(source, &paths, &config).await?;

    let options = filter.apply(session.default_options());
    session.snapshot(&options).await.map_err(|e| fail(e, json))?;

    let element = session.resolve(ref_token).await.map_err(|e| fail(e, json))?;
    let descriptor = session.lookup(ref_token).map_err(|e| fail(e, json))?;

    if json {
        let out = json!({
            "ref": ref_token,
            "element": element,
            "descriptor": descriptor,
        });
        println!("{}", serde_json::to_string_pretty(&out)?);
        return Ok(());
    }

    let name = element.name.as_deref().unwrap_or("");
    println!("{} -> {} \"{}\" (node {})", ref_token, element.role, name, element.node);
    match (descriptor.selector(), descriptor.nth()) {
        (Some(selector), _) => println!("  located by selector: {}", selector),
        (None, Some(nth)) => println!("  located by role+name, match #{}", nth),
        (None, None) => println!("  located by role+name"),
    }
    Ok(())
}
