//! Whitelist command handlers.

use std::collections::BTreeSet;
use std::path::Path;

use crate::auth::UserWhitelist;
use crate::error::Result;

/// Handle `ghgate whitelist check <identity>...`.
pub fn handle_whitelist_check(config_path: &Path, identities: &[String]) -> Result<()> {
    let whitelist = UserWhitelist::with_source(config_path)?;
    let results = whitelist.validate_many(identities);

    if results.is_empty() {
        println!("No identities to check.");
        return Ok(());
    }

    let width = results.keys().map(String::len).max().unwrap_or(0);
    for (identity, allowed) in &results {
        let verdict = if *allowed { "allowed" } else { "denied" };
        println!("  {identity:<width$}  {verdict}");
    }
    Ok(())
}

/// Handle `ghgate whitelist show`.
pub fn handle_whitelist_show(config_path: &Path) -> Result<()> {
    let policy = UserWhitelist::with_source(config_path)?.snapshot();

    println!("Mode:           {}", policy.mode());
    println!("Case sensitive: {}", policy.case_sensitive());
    print_list("Allowed", policy.allowed());
    print_list("Blocked", policy.blocked());
    Ok(())
}

fn print_list(label: &str, entries: &BTreeSet<String>) {
    if entries.is_empty() {
        println!("{label}:        (none)");
        return;
    }
    println!("{label}:");
    for entry in entries {
        println!("  - {entry}");
    }
}
