//! Content fingerprints for comparisons that size and time cannot settle.
//!
//! Hashing goes through a small fixed pool of worker threads so the number
//! of files read at once stays bounded no matter how many comparisons the
//! planner asks for.

use crossbeam_channel::{Receiver, Sender};
use parking_lot::Mutex;
use std::fmt;
use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread::JoinHandle;
use tracing::{debug, info, warn};

pub const DEFAULT_DIGEST_WORKERS: usize = 4;

/// BLAKE3 hash of a file's full contents
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Fingerprint(blake3::Hash);

impl Fingerprint {
    pub fn of_bytes(data: &[u8]) -> Self {
        Self(blake3::hash(data))
    }

    pub fn to_hex(&self) -> String {
        self.0.to_hex().to_string()
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.to_hex())
    }
}

impl fmt::Debug for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Fingerprint({})", &self.0.to_hex()[..16])
    }
}

/// Anything that can fingerprint a file by absolute path
pub trait ContentDigest {
    fn digest(&self, path: &Path) -> io::Result<Fingerprint>;
}

impl<F> ContentDigest for F
where
    F: Fn(&Path) -> io::Result<Fingerprint>,
{
    fn digest(&self, path: &Path) -> io::Result<Fingerprint> {
        self(path)
    }
}

/// Stream a file through BLAKE3 on the calling thread.
pub fn hash_file(path: &Path) -> io::Result<Fingerprint> {
    let file = File::open(path)?;
    let mut hasher = blake3::Hasher::new();
    hasher.update_reader(file)?;
    Ok(Fingerprint(hasher.finalize()))
}

/// Hash function run by pool workers
pub type HashFn = Arc<dyn Fn(&Path) -> io::Result<Fingerprint> + Send + Sync>;

struct DigestJob {
    path: PathBuf,
    reply: Sender<io::Result<Fingerprint>>,
}

/// Fixed-size hashing pool with an explicit lifecycle.
///
/// Callers block in [`DigestPool::digest`] until a worker has hashed their
/// file. [`DigestPool::shutdown`] drains queued jobs and joins the workers;
/// dropping the pool does the same.
pub struct DigestPool {
    jobs: Mutex<Option<Sender<DigestJob>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    size: usize,
}

impl DigestPool {
    pub fn start(workers: usize) -> io::Result<Self> {
        Self::start_with(workers, Arc::new(hash_file))
    }

    /// Start `workers` threads that fingerprint with `hasher`.
    pub fn start_with(workers: usize, hasher: HashFn) -> io::Result<Self> {
        let size = workers.max(1);
        let (tx, rx) = crossbeam_channel::bounded::<DigestJob>(size * 2);

        let mut handles = Vec::with_capacity(size);
        for index in 0..size {
            let rx = rx.clone();
            let hasher = hasher.clone();
            let handle = std::thread::Builder::new()
                .name(format!("digest-{index}"))
                .spawn(move || worker_loop(rx, hasher))?;
            handles.push(handle);
        }

        info!("Started {} digest workers", size);
        Ok(Self {
            jobs: Mutex::new(Some(tx)),
            workers: Mutex::new(handles),
            size,
        })
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn is_running(&self) -> bool {
        self.jobs.lock().is_some()
    }

    /// Stop accepting work, let queued jobs finish, join the workers.
    pub fn shutdown(&self) {
        let Some(sender) = self.jobs.lock().take() else {
            return;
        };
        drop(sender);

        let handles: Vec<_> = self.workers.lock().drain(..).collect();
        for handle in handles {
            if handle.join().is_err() {
                warn!("A digest worker panicked");
            }
        }
        info!("Stopped digest workers");
    }
}

impl ContentDigest for DigestPool {
    fn digest(&self, path: &Path) -> io::Result<Fingerprint> {
        let sender = self
            .jobs
            .lock()
            .clone()
            .ok_or_else(|| io::Error::other("digest pool has been shut down"))?;

        let (reply_tx, reply_rx) = crossbeam_channel::bounded(1);
        sender
            .send(DigestJob {
                path: path.to_path_buf(),
                reply: reply_tx,
            })
            .map_err(|_| io::Error::other("digest pool is not accepting work"))?;

        reply_rx
            .recv()
            .map_err(|_| io::Error::other("digest worker exited before replying"))?
    }
}

impl Drop for DigestPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn worker_loop(jobs: Receiver<DigestJob>, hasher: HashFn) {
    for job in jobs.iter() {
        let result = hasher(&job.path);
        if let Err(e) = &result {
            debug!("Digest failed for {}: {}", job.path.display(), e);
        }
        let _ = job.reply.send(result);
    }
}
