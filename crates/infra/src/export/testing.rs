//! Payload builder driven by its parameters, for export tests.

use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};

use serde::{Deserialize, Serialize};

use dwh_core::JobId;

use crate::payload::{BuildError, Payload, PayloadBuilder, TempArtifact};
use crate::portal::UploadBody;

/// What the builder does for a job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Behavior {
    Empty,
    /// In-memory payload with that many records.
    Bytes(usize),
    /// Archive file in the staging directory with that many records.
    Archive(usize),
    BuildFailure,
    Panic,
}

#[derive(Default)]
pub struct TestBuilder {
    retain: bool,
    builds: AtomicUsize,
}

impl TestBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn retaining(mut self) -> Self {
        self.retain = true;
        self
    }

    pub fn build_count(&self) -> usize {
        self.builds.load(Ordering::SeqCst)
    }
}

impl PayloadBuilder for TestBuilder {
    type Params = Behavior;

    fn build(&self, params: &Behavior, staging_dir: &Path) -> Result<Option<Payload>, BuildError> {
        self.builds.fetch_add(1, Ordering::SeqCst);
        match params {
            Behavior::Empty => Ok(None),
            Behavior::Bytes(n) => Ok(Some(Payload {
                record_count: *n,
                body: UploadBody::Bytes {
                    file_name: "payload.tsv".to_string(),
                    content: b"payload".to_vec(),
                },
                artifact: None,
            })),
            Behavior::Archive(n) => {
                let path = staging_dir.join(format!("{}.zip", JobId::new()));
                let artifact = TempArtifact::new(&path, self.retain);
                std::fs::write(&path, b"PK").map_err(|e| BuildError::io(&path, e))?;
                Ok(Some(Payload {
                    record_count: *n,
                    body: UploadBody::File(path),
                    artifact: Some(artifact),
                }))
            }
            Behavior::BuildFailure => Err(BuildError::DuplicateVariable("main".to_string())),
            Behavior::Panic => panic!("builder bug"),
        }
    }
}
