mod args;
mod op;
mod ops;
mod state;

use args::Args;
use clap::{Parser, Subcommand};
use op::{Op, OpContext};
use ops::{Ignores, Init, Ls, Status, Upload, Version, Watch};
use service::control_plane::requests::SubscribeRequest;

command_enum! {
    (Init, Init),
    (Status, Status),
    (Ls, Ls),
    (Watch, Watch),
    (Subscribe, SubscribeRequest),
    (Upload, Upload),
    (Ignores, Ignores),
    (Version, Version),
}

#[tokio::main]
async fn main() {
    let args = Args::parse();
    let ctx = OpContext::new(args.app_dir.clone());

    match args.command.execute(&ctx).await {
        Ok(output) => {
            println!("{}", output);
            std::process::exit(0);
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    }
}
