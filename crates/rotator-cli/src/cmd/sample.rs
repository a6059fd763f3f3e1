use std::path::Path;

use anyhow::Context;
use rotator_core::registry;

pub fn run(path: &Path) -> anyhow::Result<()> {
    let json = serde_json::to_string_pretty(&registry::sample())?;
    std::fs::write(path, json)
        .with_context(|| format!("failed to write {}", path.display()))?;
    println!("wrote sample registry to {}", path.display());
    Ok(())
}
