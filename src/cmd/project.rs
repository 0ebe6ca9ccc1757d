//! Project initialization: `stepchain init`.

use anyhow::Result;

pub fn cmd_init(project_dir: &std::path::Path) -> Result<()> {
    use stepchain::init::{init_project, is_initialized};
    use stepchain::ui::icons::SPARKLE;

    let was_initialized = is_initialized(project_dir);
    let result = init_project(project_dir)?;

    if result.created {
        println!(
            "{}Initialized stepchain project at {}",
            SPARKLE,
            result.stepchain_dir.display()
        );
        println!();
        println!("Created directory structure:");
        println!("  .stepchain/");
        println!("  ├── stepchain.toml   # Configuration (see `stepchain config show`)");
        println!("  ├── chains.json      # Chain state (written on first submit)");
        println!("  └── logs/            # Daily log files");
        println!();
        println!("Next steps:");
        println!("  1. Write a chain definition (JSON or TOML)");
        println!("  2. Run `stepchain submit <file>` to run it");
    } else if was_initialized {
        println!(
            "Stepchain project already initialized at {}",
            result.stepchain_dir.display()
        );
        println!("Directory structure verified.");
    }

    Ok(())
}
