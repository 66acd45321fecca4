//! End-to-end scenarios for the tiered loader: fresh fetch, dedup, disk-only
//! resolution and offline rehydration, driven through a mock fetcher.

use image::codecs::png::PngEncoder;
use image::{ImageEncoder, RgbaImage};
use photofeed::error::LoadError;
use photofeed::net::{HttpFetcher, ImageFetcher};
use photofeed::{DisplaySlot, FileCache, ImageLoader, LoaderConfig, Photo, PhotoIndex};
use std::io::Write;
use std::net::TcpListener;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{mpsc, Arc};
use std::time::Duration;

/// Pipe crate logs into the test harness when RUST_LOG is set
fn init_logs() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn png_bytes(w: u32, h: u32) -> Vec<u8> {
    let img = RgbaImage::from_pixel(w, h, image::Rgba([200, 100, 50, 255]));
    let mut bytes = Vec::new();
    PngEncoder::new(&mut bytes)
        .write_image(img.as_raw(), w, h, image::ExtendedColorType::Rgba8)
        .unwrap();
    bytes
}

/// Serves a fixed PNG for any URL and counts the fetches
struct CountingFetcher {
    calls: AtomicUsize,
    width: u32,
    height: u32,
}

impl CountingFetcher {
    fn new(width: u32, height: u32) -> Arc<Self> {
        Arc::new(CountingFetcher {
            calls: AtomicUsize::new(0),
            width,
            height,
        })
    }
}

impl ImageFetcher for CountingFetcher {
    fn fetch(&self, _url: &str) -> Result<Vec<u8>, LoadError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(png_bytes(self.width, self.height))
    }
}

fn loader_with(fetcher: Arc<dyn ImageFetcher>, dir: &std::path::Path) -> ImageLoader {
    init_logs();
    ImageLoader::new(
        LoaderConfig {
            memory_budget_bytes: 16 * 1024 * 1024,
            worker_threads: 3,
            target_width: 100,
            target_height: 75,
        },
        FileCache::new(dir.to_path_buf()).unwrap(),
        PhotoIndex::open_in_memory().unwrap(),
        fetcher,
    )
}

#[test]
fn fresh_key_fetches_once_and_populates_every_tier() {
    let tmp = tempfile::tempdir().unwrap();
    let fetcher = CountingFetcher::new(800, 600);
    let loader = loader_with(fetcher.clone(), tmp.path());

    let url = "https://host/id/42/800/600";
    let photo = Photo::new("author", 800, 600, url);
    let slot = DisplaySlot::new();

    let (tx, rx) = mpsc::channel();
    let immediate = loader.request(&photo, &slot, move |result| {
        tx.send(result).unwrap();
    });
    assert!(immediate.is_none());

    let delivered = rx.recv_timeout(Duration::from_secs(10)).unwrap().unwrap();
    // 800x600 downsampled by 8 to the 100x75 target, never past it
    assert!(delivered.width() <= 800);
    assert_eq!(delivered.dimensions(), (100, 75));

    assert_eq!(fetcher.calls.load(Ordering::SeqCst), 1);
    assert!(loader.disk().contains(url));
    assert!(loader.index().exists(url).unwrap());
    assert_eq!(loader.memory().len(), 1);
    assert!(loader.memory().get(url).is_some());

    // The cached file respects the re-encode size budget
    let path = loader.disk().path_for(url).unwrap();
    assert!(std::fs::metadata(path).unwrap().len() <= 50 * 1024);
}

#[test]
fn rapid_repeat_requests_fetch_once() {
    let tmp = tempfile::tempdir().unwrap();
    let fetcher = CountingFetcher::new(200, 150);
    let loader = loader_with(fetcher.clone(), tmp.path());
    let photo = Photo::new("author", 200, 150, "https://host/id/7/200/150");

    let (tx, rx) = mpsc::channel();
    for _ in 0..2 {
        let slot = DisplaySlot::new();
        let tx = tx.clone();
        loader.request(&photo, &slot, move |result| {
            tx.send(result.is_ok()).unwrap();
        });
    }
    drop(tx);

    // At least the owning request's sink fires; the other either joined the
    // in-flight task (no sink) or hit memory after completion (sink fires).
    assert!(rx.recv_timeout(Duration::from_secs(10)).unwrap());
    while rx.recv_timeout(Duration::from_secs(1)).is_ok() {}
    assert_eq!(fetcher.calls.load(Ordering::SeqCst), 1);
}

#[test]
fn disk_hit_avoids_the_network() {
    let tmp = tempfile::tempdir().unwrap();
    let url = "https://host/id/9/64/48";

    // Seed the disk tier out of band
    {
        let disk = FileCache::new(tmp.path().to_path_buf()).unwrap();
        let path = disk.path_for(url).unwrap();
        disk.write(&path, &png_bytes(64, 48)).unwrap();
    }

    struct RefusingFetcher(AtomicUsize);
    impl ImageFetcher for RefusingFetcher {
        fn fetch(&self, url: &str) -> Result<Vec<u8>, LoadError> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Err(LoadError::network(url, "offline"))
        }
    }

    let fetcher = Arc::new(RefusingFetcher(AtomicUsize::new(0)));
    let loader = loader_with(fetcher.clone(), tmp.path());
    let photo = Photo::new("author", 64, 48, url);
    let slot = DisplaySlot::new();

    let (tx, rx) = mpsc::channel();
    loader.request(&photo, &slot, move |result| {
        tx.send(result).unwrap();
    });
    let delivered = rx.recv_timeout(Duration::from_secs(10)).unwrap().unwrap();
    assert_eq!(delivered.dimensions(), (64, 48));
    assert_eq!(fetcher.0.load(Ordering::SeqCst), 0);
    assert!(loader.memory().get(url).is_some());
}

#[test]
fn offline_rehydration_uses_the_index_path() {
    init_logs();
    let tmp = tempfile::tempdir().unwrap();
    let url = "https://host/id/13/32/32";

    let disk = FileCache::new(tmp.path().to_path_buf()).unwrap();
    let path = disk.path_for(url).unwrap();
    disk.write(&path, &png_bytes(32, 32)).unwrap();

    let index = PhotoIndex::open_in_memory().unwrap();
    index
        .add_if_absent("author", url, 32, 32, &path.to_string_lossy())
        .unwrap();

    struct NoFetcher;
    impl ImageFetcher for NoFetcher {
        fn fetch(&self, url: &str) -> Result<Vec<u8>, LoadError> {
            Err(LoadError::network(url, "should not be called"))
        }
    }

    let loader = ImageLoader::new(
        LoaderConfig {
            memory_budget_bytes: 4 * 1024 * 1024,
            worker_threads: 2,
            target_width: 100,
            target_height: 100,
        },
        disk,
        index,
        Arc::new(NoFetcher),
    );

    let slot = DisplaySlot::new();
    let (tx, rx) = mpsc::channel();
    loader.load_cached(url, &slot, move |result| {
        tx.send(result).unwrap();
    });
    let delivered = rx.recv_timeout(Duration::from_secs(10)).unwrap().unwrap();
    assert_eq!(delivered.dimensions(), (32, 32));
}

#[test]
fn release_clears_memory_and_stops_workers() {
    let tmp = tempfile::tempdir().unwrap();
    let fetcher = CountingFetcher::new(32, 32);
    let loader = loader_with(fetcher.clone(), tmp.path());
    let photo = Photo::new("author", 32, 32, "https://host/id/3/32/32");
    let slot = DisplaySlot::new();

    let (tx, rx) = mpsc::channel();
    loader.request(&photo, &slot, move |r| tx.send(r).unwrap());
    rx.recv_timeout(Duration::from_secs(10)).unwrap().unwrap();

    loader.release();
    assert!(loader.memory().is_empty());
    // Requests after release schedule nothing and deliver nothing
    let (tx, rx) = mpsc::channel::<bool>();
    let slot = DisplaySlot::new();
    let other = Photo::new("author", 32, 32, "https://host/id/4/32/32");
    loader.request(&other, &slot, move |_| {
        let _ = tx.send(true);
    });
    assert!(rx.recv_timeout(Duration::from_millis(300)).is_err());
}

#[test]
fn http_fetcher_reads_bytes_from_a_live_server() {
    init_logs();
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    let body = png_bytes(8, 8);
    let expected = body.clone();

    let server = std::thread::spawn(move || {
        let (mut stream, _) = listener.accept().unwrap();
        let header = format!(
            "HTTP/1.1 200 OK\r\nContent-Type: image/png\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
            body.len()
        );
        stream.write_all(header.as_bytes()).unwrap();
        stream.write_all(&body).unwrap();
    });

    let fetcher = HttpFetcher::new(Duration::from_secs(3));
    let bytes = fetcher.fetch(&format!("http://{}/id/1/8/8", addr)).unwrap();
    assert_eq!(bytes, expected);
    server.join().unwrap();
}

#[test]
fn http_fetcher_surfaces_non_2xx_as_network_error() {
    init_logs();
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();

    let server = std::thread::spawn(move || {
        let (mut stream, _) = listener.accept().unwrap();
        stream
            .write_all(b"HTTP/1.1 404 Not Found\r\nContent-Length: 0\r\nConnection: close\r\n\r\n")
            .unwrap();
    });

    let fetcher = HttpFetcher::new(Duration::from_secs(3));
    let result = fetcher.fetch(&format!("http://{}/missing", addr));
    assert!(matches!(result, Err(LoadError::Network { .. })));
    server.join().unwrap();
}
