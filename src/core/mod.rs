pub mod digest;
pub mod engine;
pub mod entry;
pub mod error;
pub mod exclude;
pub mod executor;
pub mod planner;
pub mod progress;
pub mod scanner;

pub use digest::{hash_file, ContentDigest, DigestPool, Fingerprint, HashFn};
pub use engine::{validate_roots, SyncAnalysis, SyncConfig, SyncEngine, SyncReport};
pub use entry::{Entry, Mapping};
pub use error::{ActionError, ComparisonWarning, ScanError, ScanWarning, SetupError, SyncError};
pub use exclude::{IgnoreFileOnly, IgnoreMatcher, IgnorePredicate, NoIgnore, IGNORE_FILE_NAME};
pub use executor::{ApplyResult, Executor, ExecutorConfig};
pub use planner::{Action, ActionKind, CompareConfig, FileRelation, Plan, PlanOutcome, Planner};
pub use progress::{NoProgress, ProgressObserver, SyncStatus, TransferSnapshot, TransferStats};
pub use scanner::{ScanConfig, ScanOutcome, ScanRole, TreeScanner};
