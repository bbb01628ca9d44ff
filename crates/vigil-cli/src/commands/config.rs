//! Config command - print the effective configuration

use anyhow::Result;
use vigil_config::Config;

/// Print every resolved setting as TOML, or JSON with `json`
pub fn run(config: &Config, json: bool) -> Result<()> {
    let effective = config.effective();
    if json {
        println!("{}", serde_json::to_string_pretty(&effective)?);
    } else {
        if !config.is_project() {
            println!("# no vigil.toml found; showing defaults and global settings");
        }
        print!("{}", effective.to_toml());
    }
    Ok(())
}
