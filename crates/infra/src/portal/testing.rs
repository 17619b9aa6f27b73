//! Scripted portal used by the export and watcher tests.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Instant;

use dwh_core::RemoteJobId;

use super::{PortalClient, PortalError, RemoteJobStatus, Upload, UploadReceipt, UploadTarget};

type UploadReply = Result<UploadReceipt, PortalError>;
type StatusReply = Result<RemoteJobStatus, PortalError>;

/// Answers uploads from a script and job statuses from a per-id table.
///
/// When the upload script runs dry every further upload fails with a
/// transport error.
#[derive(Default)]
pub struct ScriptedPortal {
    uploads: Mutex<VecDeque<UploadReply>>,
    statuses: Mutex<HashMap<RemoteJobId, VecDeque<StatusReply>>>,
    upload_calls: Mutex<Vec<(UploadTarget, Instant)>>,
    status_calls: Mutex<Vec<RemoteJobId>>,
}

impl ScriptedPortal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn accepting(remote_job_id: Option<&str>) -> Self {
        let portal = Self::new();
        portal.push_upload(Ok(receipt(remote_job_id)));
        portal
    }

    pub fn push_upload(&self, reply: UploadReply) {
        self.uploads.lock().unwrap().push_back(reply);
    }

    pub fn push_status(&self, id: &str, reply: StatusReply) {
        self.statuses
            .lock()
            .unwrap()
            .entry(RemoteJobId::new(id).unwrap())
            .or_default()
            .push_back(reply);
    }

    pub fn upload_count(&self) -> usize {
        self.upload_calls.lock().unwrap().len()
    }

    pub fn upload_instants(&self) -> Vec<Instant> {
        self.upload_calls.lock().unwrap().iter().map(|(_, t)| *t).collect()
    }

    pub fn upload_targets(&self) -> Vec<UploadTarget> {
        self.upload_calls.lock().unwrap().iter().map(|(t, _)| *t).collect()
    }

    pub fn status_calls(&self) -> Vec<RemoteJobId> {
        self.status_calls.lock().unwrap().clone()
    }
}

pub fn receipt(remote_job_id: Option<&str>) -> UploadReceipt {
    UploadReceipt {
        message: Some("accepted".to_string()),
        remote_job_id: remote_job_id.map(|id| RemoteJobId::new(id).unwrap()),
    }
}

pub fn http_error(status: u16) -> PortalError {
    PortalError::Http {
        status,
        reason: "Service Unavailable".to_string(),
        body: String::new(),
    }
}

impl PortalClient for ScriptedPortal {
    fn upload(&self, upload: &Upload<'_>) -> Result<UploadReceipt, PortalError> {
        self.upload_calls
            .lock()
            .unwrap()
            .push((upload.target, Instant::now()));
        self.uploads
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(PortalError::Transport("connection refused".to_string())))
    }

    fn job_status(&self, id: &RemoteJobId) -> Result<RemoteJobStatus, PortalError> {
        self.status_calls.lock().unwrap().push(id.clone());
        self.statuses
            .lock()
            .unwrap()
            .get_mut(id)
            .and_then(VecDeque::pop_front)
            .unwrap_or(Ok(RemoteJobStatus::InProgress { code: 1 }))
    }
}
