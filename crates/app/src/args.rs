use std::path::PathBuf;

pub use clap::Parser;

#[derive(Parser, Debug)]
#[command(name = "syncscope")]
#[command(about = "Watch what a file-sync daemon is doing")]
pub struct Args {
    /// App directory (default: ~/.syncscope)
    #[arg(long, global = true)]
    pub app_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: crate::Command,
}
