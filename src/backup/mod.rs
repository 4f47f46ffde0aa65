// Backup Catalog and Integrity Verification
// Read-mostly access to backup sets produced by the external backup scheduler

pub mod catalog;
pub mod storage;
pub mod types;
pub mod verifier;

pub use catalog::{BackupCatalog, ResolvedBackup};
pub use storage::{BackupStorage, FileBackupStorage, MemoryBackupStorage, PayloadReader};
pub use types::{Artifact, ArtifactFailure, BackupError, BackupId, BackupSet};
pub use verifier::{checksum, digest_payload, IntegrityVerifier, VerificationReport};
