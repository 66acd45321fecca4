use image::RgbaImage;
use log::debug;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// Bytes per pixel of the decoded representation (RGBA8)
pub const BYTES_PER_PIXEL: usize = 4;

/// Max number of evicted images kept around as decode reuse candidates.
/// The pool is a fixed slot set: when it is full the oldest candidate is
/// dropped for real.
const MAX_REUSE_CANDIDATES: usize = 16;

/// Byte size of a decoded image, computed from its pixel buffer
pub fn image_byte_size(image: &RgbaImage) -> usize {
    image.as_raw().len()
}

/// In-memory tier: a byte-bounded LRU over decoded images, keyed by the
/// image's source URL.
///
/// Evicted images are not destroyed immediately; they move into a reuse pool
/// so a later decode of similar size can take over their pixel allocation
/// instead of allocating fresh (see [`MemoryCache::find_reusable`]).
pub struct MemoryCache {
    inner: Mutex<Inner>,
    max_bytes: usize,
}

struct Inner {
    entries: HashMap<String, Arc<RgbaImage>>,
    /// LRU order: front = oldest, back = most recently used
    lru: Vec<String>,
    total_bytes: usize,
    /// Release candidates from eviction. A candidate whose `Arc` is still
    /// held by a consumer is skipped by scans until that holder drops it.
    reusable: Vec<Arc<RgbaImage>>,
}

impl MemoryCache {
    /// Create the cache with a maximum resident byte budget (decoded pixel
    /// bytes, not compressed size).
    pub fn new(max_bytes: usize) -> Self {
        debug!("MemoryCache: budget is {} KB", max_bytes / 1024);
        MemoryCache {
            inner: Mutex::new(Inner {
                entries: HashMap::new(),
                lru: Vec::new(),
                total_bytes: 0,
                reusable: Vec::new(),
            }),
            max_bytes,
        }
    }

    /// Look up a decoded image and mark it most recently used
    pub fn get(&self, key: &str) -> Option<Arc<RgbaImage>> {
        let mut inner = self.inner.lock().unwrap();
        let image = inner.entries.get(key).cloned()?;
        inner.lru.retain(|k| k.as_str() != key);
        inner.lru.push(key.to_string());
        Some(image)
    }

    /// Insert a decoded image. First writer wins: if the key is already
    /// resident the new value is discarded without error. Inserting may evict
    /// least-recently-used entries until the byte budget holds again.
    pub fn put(&self, key: &str, image: Arc<RgbaImage>) {
        let mut inner = self.inner.lock().unwrap();
        if inner.entries.contains_key(key) {
            return;
        }
        let bytes = image_byte_size(&image);
        inner.entries.insert(key.to_string(), image);
        inner.lru.push(key.to_string());
        inner.total_bytes += bytes;

        while inner.total_bytes > self.max_bytes && !inner.lru.is_empty() {
            let oldest = inner.lru.remove(0);
            if let Some(evicted) = inner.entries.remove(&oldest) {
                inner.total_bytes -= image_byte_size(&evicted);
                debug!("MemoryCache: evicted {} as reuse candidate", oldest);
                if inner.reusable.len() >= MAX_REUSE_CANDIDATES {
                    inner.reusable.remove(0);
                }
                inner.reusable.push(evicted);
            }
        }
        debug!(
            "MemoryCache: resident {} KB in {} entries",
            inner.total_bytes / 1024,
            inner.entries.len()
        );
    }

    /// Hand out an evicted pixel allocation that can hold a decode of
    /// `width`×`height` at the given sample factor.
    ///
    /// A candidate is eligible when nothing outside the pool still holds it
    /// and its allocation is at least as large as the target needs — a
    /// smaller target may reuse a larger buffer, never the reverse. The
    /// selected candidate leaves the pool, so at most one decode reuses it.
    pub fn find_reusable(
        &self,
        width: u32,
        height: u32,
        sample: u32,
        bytes_per_pixel: usize,
    ) -> Option<Vec<u8>> {
        let sample = sample.max(1);
        let required =
            (width / sample) as usize * (height / sample) as usize * bytes_per_pixel;
        let mut inner = self.inner.lock().unwrap();
        let mut i = 0;
        while i < inner.reusable.len() {
            let sole_owner = Arc::strong_count(&inner.reusable[i]) == 1;
            let large_enough = inner.reusable[i].as_raw().capacity() >= required;
            if sole_owner && large_enough {
                let candidate = inner.reusable.remove(i);
                match Arc::try_unwrap(candidate) {
                    Ok(image) => {
                        debug!("MemoryCache: reuse candidate found ({} bytes)", required);
                        return Some(image.into_raw());
                    }
                    // A consumer cloned the Arc between the count check and
                    // the unwrap; put it back and keep scanning.
                    Err(shared) => inner.reusable.insert(i, shared),
                }
            }
            i += 1;
        }
        None
    }

    /// Drop all entries and all reuse candidates
    pub fn clear(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.entries.clear();
        inner.lru.clear();
        inner.reusable.clear();
        inner.total_bytes = 0;
    }

    /// Current resident byte total
    pub fn total_bytes(&self) -> usize {
        self.inner.lock().unwrap().total_bytes
    }

    /// Number of resident entries
    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[cfg(test)]
    fn reuse_candidates(&self) -> usize {
        self.inner.lock().unwrap().reusable.len()
    }
}
