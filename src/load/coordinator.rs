/// The load coordinator: memory -> disk -> network resolution with
/// per-key request dedup and staleness checks for recycled display slots.
///
/// All decode and network work runs on the pausable worker pool; the calling
/// (UI) thread only ever touches the memory cache and the in-flight set.
use crate::cache::disk::FileCache;
use crate::cache::memory::MemoryCache;
use crate::db::PhotoIndex;
use crate::error::LoadError;
use crate::load::pool::{default_pool_size, WorkerPool};
use crate::net::{self, ImageFetcher};
use crate::photo::Photo;
use image::RgbaImage;
use log::{debug, warn};
use std::collections::HashSet;
use std::sync::{Arc, Mutex};

/// Sizing and target parameters for an [`ImageLoader`], passed explicitly at
/// construction. There is no lazy global instance; consumers receive the one
/// loader by injection.
#[derive(Debug, Clone)]
pub struct LoaderConfig {
    /// Memory-cache budget in bytes of decoded pixels
    pub memory_budget_bytes: usize,
    /// Worker pool size; all decode and network work runs here
    pub worker_threads: usize,
    /// Display target the network pipeline downsamples towards
    pub target_width: u32,
    pub target_height: u32,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        LoaderConfig {
            memory_budget_bytes: 32 * 1024 * 1024,
            worker_threads: default_pool_size(),
            target_width: 512,
            target_height: 512,
        }
    }
}

/// Interest token for one display slot of a virtualized list.
///
/// A slot is reused as rows recycle: it may be reassigned to a different URL
/// while an earlier load is still in flight. Workers read the slot right
/// before expensive work and right before delivery, and silently discard
/// results the slot no longer wants. The UI side is the only writer.
#[derive(Clone, Default)]
pub struct DisplaySlot {
    want: Arc<Mutex<Option<String>>>,
}

impl DisplaySlot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Point this slot at a URL. Called by the consumer on rebind and by
    /// [`ImageLoader::request`] itself.
    pub fn bind(&self, url: &str) {
        *self.want.lock().unwrap() = Some(url.to_string());
    }

    /// Detach the slot from any URL
    pub fn clear(&self) {
        *self.want.lock().unwrap() = None;
    }

    /// Whether the slot still wants `url` displayed
    pub fn wants(&self, url: &str) -> bool {
        self.want.lock().unwrap().as_deref() == Some(url)
    }
}

/// Result sink for one request
pub type DeliverFn = Box<dyn FnOnce(Result<Arc<RgbaImage>, LoadError>) + Send>;

/// The image loader. One instance per process, created with explicit parts
/// and torn down with [`ImageLoader::release`].
pub struct ImageLoader {
    memory: Arc<MemoryCache>,
    disk: Arc<FileCache>,
    index: Arc<PhotoIndex>,
    fetcher: Arc<dyn ImageFetcher>,
    pool: WorkerPool,
    /// Keys with a task queued or running. Key-unique: at most one task per
    /// URL exists at any time.
    in_flight: Arc<Mutex<HashSet<String>>>,
    target_width: u32,
    target_height: u32,
}

impl ImageLoader {
    pub fn new(
        config: LoaderConfig,
        disk: FileCache,
        index: PhotoIndex,
        fetcher: Arc<dyn ImageFetcher>,
    ) -> Self {
        ImageLoader {
            memory: Arc::new(MemoryCache::new(config.memory_budget_bytes)),
            disk: Arc::new(disk),
            index: Arc::new(index),
            fetcher,
            pool: WorkerPool::new(config.worker_threads),
            in_flight: Arc::new(Mutex::new(HashSet::new())),
            target_width: config.target_width,
            target_height: config.target_height,
        }
    }

    /// Request the image for `photo`, on behalf of `slot`.
    ///
    /// On a memory hit the image is delivered immediately and returned. On a
    /// miss `None` comes back and a background load is scheduled — unless one
    /// is already in flight for the same URL, in which case nothing further
    /// happens: the running task's completion covers every slot whose
    /// interest still matches.
    pub fn request(
        &self,
        photo: &Photo,
        slot: &DisplaySlot,
        deliver: impl FnOnce(Result<Arc<RgbaImage>, LoadError>) + Send + 'static,
    ) -> Option<Arc<RgbaImage>> {
        slot.bind(&photo.url);

        // An underivable URL is a programming error on the caller's side;
        // signal it immediately instead of queueing doomed work.
        if let Err(err) = FileCache::file_name(&photo.url) {
            deliver(Err(err));
            return None;
        }

        if let Some(image) = self.memory.get(&photo.url) {
            deliver(Ok(Arc::clone(&image)));
            return Some(image);
        }

        {
            let mut in_flight = self.in_flight.lock().unwrap();
            if !in_flight.insert(photo.url.clone()) {
                debug!("request: load of {} already in flight", photo.url);
                return None;
            }
            debug!(
                "request: task queued for {}, {} in flight",
                photo.url,
                in_flight.len()
            );
        }

        let task = LoadTask {
            photo: photo.clone(),
            slot: slot.clone(),
            deliver: Box::new(deliver),
            memory: Arc::clone(&self.memory),
            disk: Arc::clone(&self.disk),
            index: Arc::clone(&self.index),
            fetcher: Arc::clone(&self.fetcher),
            in_flight: Arc::clone(&self.in_flight),
            target: (self.target_width, self.target_height),
        };
        // A rejected job (pool already shut down) never runs, so it can
        // never clean up after itself; roll the dedup key back here.
        if !self.pool.submit(move || task.run()) {
            self.in_flight.lock().unwrap().remove(&photo.url);
        }
        None
    }

    /// Offline rehydration: load a previously indexed photo straight from the
    /// disk cache, with no network fallback. The path recorded in the index
    /// is preferred; the derived path covers rows written before the index.
    pub fn load_cached(
        &self,
        url: &str,
        slot: &DisplaySlot,
        deliver: impl FnOnce(Result<Arc<RgbaImage>, LoadError>) + Send + 'static,
    ) -> Option<Arc<RgbaImage>> {
        slot.bind(url);

        if let Some(image) = self.memory.get(url) {
            deliver(Ok(Arc::clone(&image)));
            return Some(image);
        }

        {
            let mut in_flight = self.in_flight.lock().unwrap();
            if !in_flight.insert(url.to_string()) {
                return None;
            }
        }

        let url = url.to_string();
        let rollback_key = url.clone();
        let slot = slot.clone();
        let deliver: DeliverFn = Box::new(deliver);
        let memory = Arc::clone(&self.memory);
        let disk = Arc::clone(&self.disk);
        let index = Arc::clone(&self.index);
        let in_flight = Arc::clone(&self.in_flight);

        let accepted = self.pool.submit(move || {
            let outcome = (|| {
                let path = match index.cache_path(&url) {
                    Ok(Some(recorded)) => std::path::PathBuf::from(recorded),
                    _ => disk.path_for(&url)?,
                };
                disk.decode(&path, &memory).map(Arc::new)
            })();

            match outcome {
                Ok(image) => {
                    memory.put(&url, Arc::clone(&image));
                    if slot.wants(&url) {
                        deliver(Ok(image));
                    } else {
                        debug!("load_cached: slot moved on, {} discarded", url);
                    }
                }
                Err(err) => {
                    if slot.wants(&url) {
                        deliver(Err(err));
                    }
                }
            }
            in_flight.lock().unwrap().remove(&url);
        });
        if !accepted {
            self.in_flight.lock().unwrap().remove(&rollback_key);
        }
        None
    }

    /// Defer queued loads while the feed is scrolling
    pub fn pause(&self) {
        self.pool.pause();
    }

    /// Resume loading after the scroll settles
    pub fn resume(&self) {
        self.pool.resume();
    }

    /// Tear down: clear the memory cache and stop the pool
    pub fn release(&self) {
        self.memory.clear();
        self.pool.shutdown();
    }

    pub fn memory(&self) -> &MemoryCache {
        &self.memory
    }

    pub fn disk(&self) -> &FileCache {
        &self.disk
    }

    pub fn index(&self) -> &PhotoIndex {
        &self.index
    }

    #[cfg(test)]
    pub(crate) fn in_flight_len(&self) -> usize {
        self.in_flight.lock().unwrap().len()
    }
}

/// One queued load. `Queued -> Running -> {Delivered | Discarded | Failed}`;
/// every terminal path removes the key from the in-flight set so a later
/// request for the same URL can try again.
struct LoadTask {
    photo: Photo,
    slot: DisplaySlot,
    deliver: DeliverFn,
    memory: Arc<MemoryCache>,
    disk: Arc<FileCache>,
    index: Arc<PhotoIndex>,
    fetcher: Arc<dyn ImageFetcher>,
    in_flight: Arc<Mutex<HashSet<String>>>,
    target: (u32, u32),
}

impl LoadTask {
    fn run(self) {
        let LoadTask {
            photo,
            slot,
            deliver,
            memory,
            disk,
            index,
            fetcher,
            in_flight,
            target,
        } = self;
        let url = photo.url.clone();

        // The slot may have been rebound while this task sat in the queue;
        // skip the disk and network work entirely in that case.
        if !slot.wants(&url) {
            debug!("LoadTask: slot moved on before load of {}", url);
            in_flight.lock().unwrap().remove(&url);
            return;
        }

        match resolve(&photo, target, &memory, &disk, &index, fetcher.as_ref()) {
            Ok(image) => {
                // First writer wins; a duplicate populated by another path is
                // discarded by the cache without error.
                memory.put(&url, Arc::clone(&image));
                if slot.wants(&url) {
                    deliver(Ok(image));
                } else {
                    debug!("LoadTask: slot moved on, result for {} discarded", url);
                }
            }
            Err(err) => {
                warn!("LoadTask: load of {} failed: {}", url, err);
                if slot.wants(&url) {
                    deliver(Err(err));
                }
            }
        }

        in_flight.lock().unwrap().remove(&url);
    }
}

/// Disk-then-network resolution for one photo. Persistence of the fetched
/// bytes is best-effort: a failed file or index write is logged and the
/// decoded image is still returned for in-memory delivery.
fn resolve(
    photo: &Photo,
    target: (u32, u32),
    memory: &MemoryCache,
    disk: &FileCache,
    index: &PhotoIndex,
    fetcher: &dyn ImageFetcher,
) -> Result<Arc<RgbaImage>, LoadError> {
    let path = disk.path_for(&photo.url)?;

    if path.exists() {
        match disk.decode(&path, memory) {
            Ok(image) => {
                debug!("resolve: disk hit for {}", photo.url);
                return Ok(Arc::new(image));
            }
            // Corrupt cache file: treat as a miss and re-fetch
            Err(err) => warn!("resolve: cached file unusable for {}: {}", photo.url, err),
        }
    }

    let bytes = fetcher.fetch(&photo.url)?;
    let image = net::resample(&bytes, target.0, target.1)?;
    let encoded = net::quality_compress(&image)?;

    if let Err(err) = disk.write(&path, &encoded) {
        warn!("resolve: could not cache {} to disk: {}", photo.url, err);
    } else if let Err(err) = index.add_if_absent(
        &photo.author,
        &photo.url,
        photo.width,
        photo.height,
        &path.to_string_lossy(),
    ) {
        warn!("resolve: could not index {}: {}", photo.url, err);
    }

    Ok(Arc::new(image))
}
