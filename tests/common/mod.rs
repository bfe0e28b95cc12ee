//! Common test utilities

use std::path::Path;

use cinetrack::config::{Config, StorageConfig};
use cinetrack::movies::{MovieList, MovieRecord};

/// Configuration rooted in `root` with no pauses between pages
#[allow(dead_code)]
pub fn test_config(root: &Path) -> Config {
    let mut config = Config::default();
    config.storage = StorageConfig::rooted_at(root);
    config.crawler.page_pause_secs = 0;
    config.crawler.rate_limit = 100.0;
    config.scheduler.jitter_secs = 0;
    config
}

/// Write the movie list file with one record per `(movie_id, last count)`
#[allow(dead_code)]
pub fn write_movie_list(config: &Config, movies: &[(u64, u64)]) -> MovieList {
    let records = movies
        .iter()
        .map(|&(movie_id, count)| {
            let mut record = MovieRecord::new(movie_id);
            record.last_crawl_total_comment_count = count;
            record
        })
        .collect();
    let list = MovieList::new(
        config.storage.movie_list_file(),
        config.storage.movie_list_update_file(),
    )
    .with_records(records);
    list.save().unwrap();
    list
}

/// Comment page markup; `total` adds the title carrying the comment count
#[allow(dead_code)]
pub fn comment_page_html(total: Option<u64>, users: &[&str]) -> String {
    let title = total
        .map(|t| format!(r#"<h1 class="title">短评 ({t})</h1>"#))
        .unwrap_or_default();
    let items: String = users
        .iter()
        .map(|user| {
            format!(
                r#"<li><div class="desc"><a href="/people/{user}/"><span class="user-name">{user}</span></a>
                   <span class="rating-stars" data-rating="5"></span><span class="date">2024-05-01</span></div>
                   <div class="comment-content"><p>comment by {user}</p></div>
                   <div class="btn-info"><span class="text">3</span></div></li>"#
            )
        })
        .collect();
    format!(r#"<html><body>{title}<div id="comment-list"><ul>{items}</ul></div></body></html>"#)
}

/// Movie page markup with the given rating count
#[allow(dead_code)]
pub fn movie_page_html(rating_count: u64) -> String {
    format!(
        r#"<html><head><script type="application/ld+json">
        {{"name": "Mock Movie", "@type": "Movie",
          "director": [{{"name": "Someone", "url": "/celebrity/9/"}}],
          "aggregateRating": {{"ratingCount": "{rating_count}", "ratingValue": "7.5"}}}}
        </script></head><body><span class="year">(2023)</span></body></html>"#
    )
}
