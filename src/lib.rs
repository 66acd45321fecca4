/// photofeed: tiered image caching and asynchronous loading for a scrolling
/// photo feed
///
/// The crate minimizes redundant network and decode work under a moving
/// viewport. Images resolve through three tiers — memory, disk, network — on
/// a pausable worker pool; concurrent requests for the same URL collapse into
/// one load, and results for recycled display slots are discarded instead of
/// delivered to the wrong row.
///
/// ```no_run
/// use photofeed::{DisplaySlot, FileCache, ImageLoader, LoaderConfig, Photo, PhotoIndex};
/// use photofeed::net::HttpFetcher;
/// use std::sync::Arc;
///
/// let loader = ImageLoader::new(
///     LoaderConfig::default(),
///     FileCache::open_default().unwrap(),
///     PhotoIndex::open_default().unwrap(),
///     Arc::new(HttpFetcher::default()),
/// );
/// let photo = Photo::new("author", 5616, 3744, "https://picsum.photos/id/0/5616/3744");
/// let slot = DisplaySlot::new();
/// loader.request(&photo, &slot, |result| {
///     if let Ok(image) = result {
///         println!("decoded {}x{}", image.width(), image.height());
///     }
/// });
/// ```

pub mod cache;
pub mod db;
pub mod error;
pub mod load;
pub mod net;
pub mod photo;

pub use cache::{FileCache, MemoryCache};
pub use db::{PhotoIndex, PhotoRecord};
pub use error::LoadError;
pub use load::{DisplaySlot, ImageLoader, LoaderConfig, WorkerPool};
pub use photo::Photo;
