pub mod crawl;
pub mod plan;
pub mod preprocess;
pub mod run;

use anyhow::{Context, Result};

use cinetrack::config::Config;
use cinetrack::movies::MovieList;
use cinetrack::scheduler::ScheduleStore;

// Re-export command functions for convenience
pub use crawl::crawl_comments;
pub use plan::plan;
pub use preprocess::preprocess;
pub use run::run;

fn load_movies(config: &Config) -> Result<MovieList> {
    MovieList::load(
        config.storage.movie_list_file(),
        config.storage.movie_list_update_file(),
    )
    .context("Failed to read movie list")
}

fn load_schedule(config: &Config) -> Result<ScheduleStore> {
    ScheduleStore::load(config.storage.schedule_file()).context("Failed to read schedule file")
}
