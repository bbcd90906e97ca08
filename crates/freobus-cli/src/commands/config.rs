//! `freobus config`

use crate::app::LoadedConfig;
use anyhow::Result;
use clap::Args;

#[derive(Args, Debug)]
pub struct ConfigArgs {
    /// Also print which file the configuration came from
    #[arg(long)]
    pub show_source: bool,
}

pub fn run(args: ConfigArgs, loaded: &LoadedConfig) -> Result<()> {
    if args.show_source {
        match &loaded.source {
            Some(path) => println!("# source: {}", path.display()),
            None => println!("# source: built-in defaults"),
        }
    }
    print!("{}", loaded.config.to_toml_string()?);
    Ok(())
}
