//! Project initialization command.

use anyhow::Result;
use console::style;

pub fn cmd_init(project_dir: &std::path::Path) -> Result<()> {
    use shopfloor::init::init_project;

    let result = init_project(project_dir)?;

    if result.created {
        println!(
            "{} shopfloor project at {}",
            style("Initialized").green().bold(),
            result.config_dir.display()
        );
        println!();
        println!("Created directory structure:");
        println!("  .shopfloor/");
        println!("  ├── shopfloor.toml   # Configuration (see `shopfloor config show`)");
        println!("  └── shopfloor.db     # Work orders, inventory, roadmaps");
        println!();
        println!("Next steps:");
        println!("  1. Run `shopfloor serve` to start the server");
        println!("  2. Run `shopfloor watch` in another terminal to follow changes");
    } else {
        println!(
            "Shopfloor project already initialized at {}",
            result.config_dir.display()
        );
        println!("Database verified at {}", result.db_path.display());
    }

    Ok(())
}
