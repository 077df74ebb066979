#![deny(warnings)]

use {anyhow::Result, images_cli::Options, structopt::StructOpt};

#[tokio::main]
async fn main() -> Result<()> {
    pretty_env_logger::init_timed();

    images_cli::run(Options::from_args()).await
}
