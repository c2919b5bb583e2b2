//! Show command - displays information.

use anyhow::Result;

use userd::config::Config;
use userd::distro::CommandSet;

/// Show target for the show command.
pub enum ShowTarget {
    /// Show configuration
    Config,
    /// Show the detected OS and the commands used for it
    Os,
}

/// Execute the show command.
pub fn cmd_show(target: ShowTarget, config: &Config) -> Result<()> {
    match target {
        ShowTarget::Config => config.print(),
        ShowTarget::Os => {
            let os_id = config.os_id()?;
            let commands = CommandSet::for_os(&os_id)?;
            println!("Operating system:");
            println!("  ID: {}", os_id);
            println!("  Matched: {}", commands.os_id());
            println!("  Family: {}", commands.family());
            println!("  Commands: {}", commands.required_programs().join(", "));
        }
    }
    Ok(())
}
