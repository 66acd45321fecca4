use crate::cache::memory::{MemoryCache, BYTES_PER_PIXEL};
use crate::error::LoadError;
use image::{ColorType, ImageDecoder, ImageReader, RgbaImage};
use log::debug;
use std::fs;
use std::path::{Path, PathBuf};
use url::form_urlencoded::byte_serialize;

/// Default subdirectory for cached image files
pub const DEFAULT_CACHE_DIR: &str = "imgCache";

/// The cache file name is derived from everything after the last occurrence
/// of this character in the URL. Feed URLs carry their numeric identity after
/// `/id/`, e.g. `https://picsum.photos/id/0/5616/3744` -> `056163744`.
const SEGMENT_MARKER: char = 'd';

/// Disk tier: a single flat directory of re-encoded image files whose names
/// derive deterministically from the source URL. File existence is the source
/// of truth for disk-cache hits; no mapping table is needed to find a file
/// again.
pub struct FileCache {
    dir: PathBuf,
}

impl FileCache {
    /// Create the cache rooted at `dir`, creating the directory if needed.
    /// Failure to create it is fatal for the instance.
    pub fn new(dir: PathBuf) -> Result<Self, LoadError> {
        fs::create_dir_all(&dir)
            .map_err(|e| LoadError::Persistence(format!("create {}: {}", dir.display(), e)))?;
        Ok(FileCache { dir })
    }

    /// Open the cache in the platform cache directory,
    /// e.g. ~/.cache/photofeed/imgCache on Linux
    pub fn open_default() -> Result<Self, LoadError> {
        let mut dir = dirs_next::cache_dir()
            .or_else(dirs_next::home_dir)
            .ok_or_else(|| LoadError::State("could not determine cache directory".into()))?;
        dir.push("photofeed");
        dir.push(DEFAULT_CACHE_DIR);
        Self::new(dir)
    }

    /// Derive the cache file name for a URL: the trailing segment after the
    /// last marker, path separators stripped, percent-encoded. Pure and
    /// stable across runs, so the same key always maps to the same file.
    pub fn file_name(url: &str) -> Result<String, LoadError> {
        let marker = url
            .rfind(SEGMENT_MARKER)
            .ok_or_else(|| LoadError::State(format!("cannot derive cache name from {:?}", url)))?;
        let segment: String = url[marker + SEGMENT_MARKER.len_utf8()..]
            .chars()
            .filter(|c| *c != '/')
            .collect();
        if segment.is_empty() {
            return Err(LoadError::State(format!(
                "cannot derive cache name from {:?}",
                url
            )));
        }
        Ok(byte_serialize(segment.as_bytes()).collect())
    }

    /// Full path the given URL caches to
    pub fn path_for(&self, url: &str) -> Result<PathBuf, LoadError> {
        Ok(self.dir.join(Self::file_name(url)?))
    }

    /// Whether a cached file exists for the URL
    pub fn contains(&self, url: &str) -> bool {
        self.path_for(url).map(|p| p.exists()).unwrap_or(false)
    }

    /// Decode a cached file, reusing an evicted pixel allocation when the
    /// memory cache has a fitting candidate.
    ///
    /// The decoder's header is read first (bounds and color type, no pixel
    /// allocation) so the reuse pool can be consulted before the decode. With
    /// a candidate in hand the pixels are read straight into its allocation;
    /// eight-bit RGB (the JPEG cache files) widens to RGBA in place. A
    /// missing or corrupt file is a decode error; the caller treats it as a
    /// miss and falls back to the network.
    pub fn decode(&self, path: &Path, memory: &MemoryCache) -> Result<RgbaImage, LoadError> {
        let bad = |e: String| LoadError::Decode(format!("{}: {}", path.display(), e));
        let decoder = ImageReader::open(path)
            .map_err(|e| bad(e.to_string()))?
            .with_guessed_format()
            .map_err(|e| bad(e.to_string()))?
            .into_decoder()
            .map_err(|e| bad(e.to_string()))?;
        let (width, height) = decoder.dimensions();
        let color = decoder.color_type();

        // A candidate only helps when the decoder's native layout fits an
        // RGBA allocation without an intermediate image.
        let reuse = match color {
            ColorType::Rgb8 | ColorType::Rgba8 => {
                memory.find_reusable(width, height, 1, BYTES_PER_PIXEL)
            }
            _ => None,
        };

        match reuse {
            Some(mut buf) => {
                debug!("FileCache: decoding {} into reused buffer", path.display());
                let total = decoder.total_bytes() as usize;
                buf.clear();
                buf.resize(total, 0);
                decoder
                    .read_image(&mut buf)
                    .map_err(|e| bad(e.to_string()))?;
                if color == ColorType::Rgb8 {
                    widen_rgb_in_place(&mut buf, width as usize * height as usize);
                }
                RgbaImage::from_raw(width, height, buf)
                    .ok_or_else(|| bad("buffer size mismatch".into()))
            }
            None => Ok(image::DynamicImage::from_decoder(decoder)
                .map_err(|e| bad(e.to_string()))?
                .into_rgba8()),
        }
    }

    /// Persist encoded bytes at `path`
    pub fn write(&self, path: &Path, bytes: &[u8]) -> Result<(), LoadError> {
        fs::write(path, bytes)
            .map_err(|e| LoadError::Persistence(format!("write {}: {}", path.display(), e)))
    }

    /// Remove every cached file. Returns how many files were deleted.
    pub fn clear(&self) -> std::io::Result<usize> {
        let mut removed = 0;
        for entry in fs::read_dir(&self.dir)? {
            let entry = entry?;
            if entry.file_type()?.is_file() {
                fs::remove_file(entry.path())?;
                removed += 1;
            }
        }
        Ok(removed)
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

/// Widen packed RGB bytes to RGBA in the same allocation, alpha opaque.
/// Walks the pixels backward so a write never lands on unread input.
fn widen_rgb_in_place(buf: &mut Vec<u8>, pixels: usize) {
    buf.resize(pixels * 4, 0);
    for i in (0..pixels).rev() {
        let (r, g, b) = (buf[i * 3], buf[i * 3 + 1], buf[i * 3 + 2]);
        buf[i * 4] = r;
        buf[i * 4 + 1] = g;
        buf[i * 4 + 2] = b;
        buf[i * 4 + 3] = 255;
    }
}
