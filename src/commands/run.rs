use anyhow::Result;

use cinetrack::config::Config;
use cinetrack::dispatch::Service;

pub async fn run(config: Config) -> Result<()> {
    println!("Starting cinetrack scheduler");
    println!("============================");
    println!("  Movie list: {}", config.storage.movie_list_file().display());
    println!("  Schedule:   {}", config.storage.schedule_file().display());
    println!("Press Ctrl-C to stop.");

    let service = Service::start(config).await?;
    service.run_until_ctrl_c().await
}
