use anyhow::Context;
use adw_core::{config::Config, io, paths};
use std::path::Path;

pub fn run(root: &Path) -> anyhow::Result<()> {
    println!("Initializing ADW in: {}", root.display());

    for dir in [
        paths::adw_dir(root),
        paths::runs_dir(root),
        paths::ports_dir(root),
        paths::templates_dir(root),
    ] {
        io::ensure_dir(&dir).with_context(|| format!("failed to create {}", dir.display()))?;
    }

    let config_path = paths::config_path(root);
    if config_path.exists() {
        // Still surface problems in a hand-edited file.
        let config = Config::load(root).context("failed to load config.yaml")?;
        for warning in config.validate() {
            eprintln!("  {:?}: {}", warning.level, warning.message);
        }
        println!("  exists:  .adw/config.yaml");
    } else {
        Config::default()
            .save(root)
            .context("failed to write config.yaml")?;
        println!("  created: .adw/config.yaml");
    }

    println!("\nOverride a phase prompt by writing .adw/templates/<phase>.md");
    Ok(())
}
