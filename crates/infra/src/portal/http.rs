//! Portal client over HTTPS (blocking `reqwest`, basic authentication).

use reqwest::blocking::multipart::{Form, Part};
use reqwest::blocking::{Client, Response};
use serde::Deserialize;

use dwh_core::RemoteJobId;

use super::{
    PortalClient, PortalError, RemoteJobStatus, Upload, UploadBody, UploadReceipt, UploadTarget,
};
use crate::config::{JOB_ID_PLACEHOLDER, ProcessConfig, SITE_CODE_PLACEHOLDER};

pub struct HttpPortalClient {
    client: Client,
    login: String,
    password: String,
    data_upload_url: String,
    cfg_upload_url: String,
    job_status_url: String,
    site_code: String,
}

impl std::fmt::Debug for HttpPortalClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpPortalClient")
            .field("login", &self.login)
            .field("data_upload_url", &self.data_upload_url)
            .field("cfg_upload_url", &self.cfg_upload_url)
            .field("job_status_url", &self.job_status_url)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Deserialize)]
struct UploadReply {
    #[serde(default)]
    message: Option<String>,
    #[serde(rename = "jobID", default)]
    job_id: Option<JobIdValue>,
}

// The portal has been seen answering with both forms.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum JobIdValue {
    Number(serde_json::Number),
    Text(String),
}

impl JobIdValue {
    fn into_remote_id(self) -> Option<RemoteJobId> {
        let text = match self {
            JobIdValue::Number(n) => n.to_string(),
            JobIdValue::Text(s) => s,
        };
        RemoteJobId::new(text).ok()
    }
}

#[derive(Debug, Deserialize)]
struct StatusReply {
    code: i64,
    #[serde(default)]
    status: Option<String>,
}

impl HttpPortalClient {
    /// Build a client from the process configuration.
    pub fn new(config: &ProcessConfig) -> Result<Self, PortalError> {
        let client = Client::builder()
            .connect_timeout(config.server.connect_timeout())
            .timeout(config.server.request_timeout())
            .build()
            .map_err(|e| PortalError::Transport(e.to_string()))?;

        Ok(Self {
            client,
            login: config.server.login.clone(),
            password: config.server.password.clone(),
            data_upload_url: config.server.data_upload_url.clone(),
            cfg_upload_url: config.server.cfg_upload_url.clone(),
            job_status_url: config.server.job_status_url.clone(),
            site_code: config.site_code.clone(),
        })
    }

    fn upload_url(&self, target: UploadTarget) -> String {
        let template = match target {
            UploadTarget::Series => &self.data_upload_url,
            UploadTarget::VariableDefinitions => &self.cfg_upload_url,
        };
        expand_url(template, &self.site_code, None)
    }

    fn form(upload: &Upload<'_>) -> Result<Form, PortalError> {
        let field = upload.target.form_field();
        match upload.body {
            UploadBody::File(path) => Form::new().file(field, path).map_err(|source| {
                PortalError::Payload {
                    path: path.clone(),
                    source,
                }
            }),
            UploadBody::Bytes { file_name, content } => Ok(Form::new().part(
                field,
                Part::bytes(content.clone()).file_name(file_name.clone()),
            )),
        }
    }
}

/// Substitute the site code and (optionally) the job id into a URL template.
///
/// Both values are percent-encoded so each stays within its path segment.
pub fn expand_url(template: &str, site_code: &str, job_id: Option<&str>) -> String {
    let url = template.replace(SITE_CODE_PLACEHOLDER, &urlencoding::encode(site_code));
    match job_id {
        Some(id) => url.replace(JOB_ID_PLACEHOLDER, &urlencoding::encode(id)),
        None => url,
    }
}

fn check_status(resp: Response) -> Result<Response, PortalError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let reason = status.canonical_reason().unwrap_or("unknown").to_string();
    let body = resp.text().unwrap_or_default();
    Err(PortalError::Http {
        status: status.as_u16(),
        reason,
        body,
    })
}

/// Interpret the body of an accepted upload.
///
/// The upload is accepted no matter what the body says: a body we cannot
/// read only means there is no remote job to follow.
fn parse_upload_reply(body: &str) -> UploadReceipt {
    match serde_json::from_str::<UploadReply>(body) {
        Ok(reply) => {
            let remote_job_id = reply.job_id.and_then(JobIdValue::into_remote_id);
            if remote_job_id.is_none() {
                tracing::warn!(body, "upload accepted without a job id");
            }
            UploadReceipt {
                message: reply.message,
                remote_job_id,
            }
        }
        Err(e) => {
            tracing::warn!(error = %e, body, "upload accepted but reply is not understood");
            UploadReceipt::default()
        }
    }
}

fn parse_status_reply(body: &str) -> Result<RemoteJobStatus, PortalError> {
    let reply: StatusReply = serde_json::from_str(body)
        .map_err(|e| PortalError::InvalidResponse(format!("{e}: {body}")))?;
    Ok(RemoteJobStatus::from_reply(reply.code, reply.status))
}

impl PortalClient for HttpPortalClient {
    fn upload(&self, upload: &Upload<'_>) -> Result<UploadReceipt, PortalError> {
        let url = self.upload_url(upload.target);
        let form = Self::form(upload)?;

        tracing::info!(url = %url, target = ?upload.target, "uploading payload");
        let resp = self
            .client
            .post(&url)
            .basic_auth(&self.login, Some(&self.password))
            .multipart(form)
            .send()
            .map_err(|e| PortalError::Transport(e.to_string()))?;

        let resp = check_status(resp)?;
        let body = resp
            .text()
            .map_err(|e| PortalError::Transport(e.to_string()))?;
        Ok(parse_upload_reply(&body))
    }

    fn job_status(&self, id: &RemoteJobId) -> Result<RemoteJobStatus, PortalError> {
        let url = expand_url(&self.job_status_url, &self.site_code, Some(id.as_str()));

        tracing::debug!(url = %url, remote_job_id = %id, "requesting job status");
        let resp = self
            .client
            .get(&url)
            .basic_auth(&self.login, Some(&self.password))
            .send()
            .map_err(|e| PortalError::Transport(e.to_string()))?;

        let resp = check_status(resp)?;
        let body = resp
            .text()
            .map_err(|e| PortalError::Transport(e.to_string()))?;
        tracing::debug!(remote_job_id = %id, body = %body, "got status reply");
        parse_status_reply(&body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::portal::RemoteFailure;
    use std::io::{Read, Write};
    use std::net::{TcpListener, TcpStream};
    use std::thread;

    /// Answers the first request on a local port with a canned response and
    /// hands back the raw request.
    fn serve_once(status: &str, body: &str) -> (String, thread::JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let base = format!("http://{}", listener.local_addr().unwrap());
        let response = format!(
            "HTTP/1.1 {status}\r\ncontent-type: application/json\r\n\
             content-length: {}\r\nconnection: close\r\n\r\n{body}",
            body.len()
        );
        let server = thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            let request = read_request(&mut stream);
            stream.write_all(response.as_bytes()).unwrap();
            request
        });
        (base, server)
    }

    fn read_request(stream: &mut TcpStream) -> String {
        let mut data = Vec::new();
        let mut buf = [0u8; 4096];
        while !request_complete(&data) {
            let n = stream.read(&mut buf).unwrap();
            if n == 0 {
                break;
            }
            data.extend_from_slice(&buf[..n]);
        }
        String::from_utf8_lossy(&data).into_owned()
    }

    fn request_complete(data: &[u8]) -> bool {
        let Some(head_end) = data.windows(4).position(|w| w == b"\r\n\r\n") else {
            return false;
        };
        let head = String::from_utf8_lossy(&data[..head_end]).to_ascii_lowercase();
        let body = &data[head_end + 4..];
        if head.contains("transfer-encoding: chunked") {
            return body.ends_with(b"0\r\n\r\n");
        }
        let length = head
            .lines()
            .find_map(|l| l.strip_prefix("content-length:"))
            .and_then(|v| v.trim().parse::<usize>().ok())
            .unwrap_or(0);
        body.len() >= length
    }

    fn header<'r>(request: &'r str, name: &str) -> Option<&'r str> {
        request.lines().find_map(|line| {
            let (key, value) = line.split_once(':')?;
            key.eq_ignore_ascii_case(name).then(|| value.trim())
        })
    }

    fn client(base: &str) -> HttpPortalClient {
        let config = ProcessConfig::from_toml_str(&format!(
            "site_code = \"SITE01\"\n\
             [server]\n\
             login = \"user\"\n\
             password = \"secret\"\n\
             data_upload_url = \"{base}/sites/{{site_code}}/series\"\n\
             cfg_upload_url = \"{base}/sites/{{site_code}}/variables\"\n\
             job_status_url = \"{base}/sites/{{site_code}}/jobs/{{job_id}}\"\n"
        ))
        .unwrap();
        HttpPortalClient::new(&config).unwrap()
    }

    #[test]
    fn series_upload_posts_the_archive_with_credentials() {
        let dir = tempfile::tempdir().unwrap();
        let archive = dir.path().join("SITE01-series.zip");
        std::fs::write(&archive, b"PK-archive-content").unwrap();
        let (base, server) = serve_once("200 OK", r#"{"message": "queued", "jobID": 7}"#);

        let body = UploadBody::File(archive);
        let receipt = client(&base)
            .upload(&Upload {
                target: UploadTarget::Series,
                body: &body,
            })
            .unwrap();
        let request = server.join().unwrap();

        assert_eq!(receipt.remote_job_id.unwrap().as_str(), "7");
        assert_eq!(receipt.message.as_deref(), Some("queued"));
        assert!(request.starts_with("POST /sites/SITE01/series HTTP/1.1\r\n"));
        // base64("user:secret")
        assert_eq!(header(&request, "authorization"), Some("Basic dXNlcjpzZWNyZXQ="));
        assert!(request.contains(r#"name="zip"; filename="SITE01-series.zip""#));
        assert!(request.contains("PK-archive-content"));
    }

    #[test]
    fn definitions_upload_uses_the_metadata_field() {
        let (base, server) = serve_once("200 OK", r#"{"message": "ok", "jobID": "cfg-1"}"#);

        let body = UploadBody::Bytes {
            file_name: "SITE01-variables.tsv".to_string(),
            content: b"varname\tlabel".to_vec(),
        };
        let receipt = client(&base)
            .upload(&Upload {
                target: UploadTarget::VariableDefinitions,
                body: &body,
            })
            .unwrap();
        let request = server.join().unwrap();

        assert_eq!(receipt.remote_job_id.unwrap().as_str(), "cfg-1");
        assert!(request.starts_with("POST /sites/SITE01/variables HTTP/1.1\r\n"));
        assert!(request.contains(r#"name="metadata"; filename="SITE01-variables.tsv""#));
        assert!(request.contains("varname\tlabel"));
    }

    #[test]
    fn rejected_upload_is_an_http_error() {
        let (base, server) = serve_once("503 Service Unavailable", "busy");

        let body = UploadBody::Bytes {
            file_name: "x.tsv".to_string(),
            content: b"x".to_vec(),
        };
        let err = client(&base)
            .upload(&Upload {
                target: UploadTarget::VariableDefinitions,
                body: &body,
            })
            .unwrap_err();
        server.join().unwrap();

        match err {
            PortalError::Http {
                status,
                reason,
                body,
            } => {
                assert_eq!(status, 503);
                assert_eq!(reason, "Service Unavailable");
                assert_eq!(body, "busy");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn accepted_upload_with_unreadable_reply_has_no_job_id() {
        let (base, server) = serve_once("200 OK", "<html>thanks</html>");

        let body = UploadBody::Bytes {
            file_name: "x.tsv".to_string(),
            content: b"x".to_vec(),
        };
        let receipt = client(&base)
            .upload(&Upload {
                target: UploadTarget::VariableDefinitions,
                body: &body,
            })
            .unwrap();
        server.join().unwrap();

        assert_eq!(receipt, UploadReceipt::default());
    }

    #[test]
    fn job_status_requests_the_expanded_url() {
        let (base, server) = serve_once("200 OK", r#"{"code": -3, "status": "unknown var"}"#);

        let id = RemoteJobId::new("a/b?c").unwrap();
        let status = client(&base).job_status(&id).unwrap();
        let request = server.join().unwrap();

        assert!(request.starts_with("GET /sites/SITE01/jobs/a%2Fb%3Fc HTTP/1.1\r\n"));
        assert_eq!(header(&request, "authorization"), Some("Basic dXNlcjpzZWNyZXQ="));
        assert_eq!(
            status,
            RemoteJobStatus::Failed {
                failure: RemoteFailure::UnknownVariableName,
                status: Some("unknown var".into()),
            }
        );
    }

    #[test]
    fn job_status_http_failure_is_reported() {
        let (base, server) = serve_once("500 Internal Server Error", "");

        let err = client(&base)
            .job_status(&RemoteJobId::new("42").unwrap())
            .unwrap_err();
        server.join().unwrap();

        assert!(matches!(err, PortalError::Http { status: 500, .. }));
    }

    #[test]
    fn unreachable_portal_is_a_transport_error() {
        // Grab a free port, then close it.
        let base = {
            let listener = TcpListener::bind("127.0.0.1:0").unwrap();
            format!("http://{}", listener.local_addr().unwrap())
        };

        let err = client(&base)
            .job_status(&RemoteJobId::new("42").unwrap())
            .unwrap_err();

        assert!(matches!(err, PortalError::Transport(_)));
        assert!(err.is_retryable());
    }

    #[test]
    fn expands_url_placeholders() {
        let url = expand_url(
            "https://portal/sites/{site_code}/jobs/{job_id}",
            "SITE01",
            Some("42"),
        );
        assert_eq!(url, "https://portal/sites/SITE01/jobs/42");
    }

    #[test]
    fn placeholders_are_percent_encoded() {
        let url = expand_url(
            "https://portal/sites/{site_code}/jobs/{job_id}",
            "SITE 01",
            Some("a/b?c#d"),
        );
        assert_eq!(url, "https://portal/sites/SITE%2001/jobs/a%2Fb%3Fc%23d");
    }

    #[test]
    fn numeric_job_id_is_accepted() {
        let receipt = parse_upload_reply(r#"{"message": "queued", "jobID": 1234}"#);
        assert_eq!(receipt.message.as_deref(), Some("queued"));
        assert_eq!(receipt.remote_job_id.unwrap().as_str(), "1234");
    }

    #[test]
    fn textual_job_id_is_accepted() {
        let receipt = parse_upload_reply(r#"{"message": "ok", "jobID": "abc-9"}"#);
        assert_eq!(receipt.remote_job_id.unwrap().as_str(), "abc-9");
    }

    #[test]
    fn unreadable_success_body_yields_no_job_id() {
        let receipt = parse_upload_reply("<html>ok</html>");
        assert_eq!(receipt, UploadReceipt::default());

        let receipt = parse_upload_reply(r#"{"message": "ok"}"#);
        assert!(receipt.remote_job_id.is_none());
    }

    #[test]
    fn status_reply_is_classified() {
        assert_eq!(
            parse_status_reply(r#"{"code": 0}"#).unwrap(),
            RemoteJobStatus::Completed
        );
        assert_eq!(
            parse_status_reply(r#"{"code": -6, "status": "invalid data"}"#).unwrap(),
            RemoteJobStatus::Failed {
                failure: RemoteFailure::InvalidData,
                status: Some("invalid data".into()),
            }
        );
        assert!(matches!(
            parse_status_reply("{}").unwrap_err(),
            PortalError::InvalidResponse(_)
        ));
    }

    #[test]
    fn client_builds_from_configuration() {
        let config = ProcessConfig::from_toml_str(
            "site_code = \"S1\"\n[server]\nlogin = \"l\"\npassword = \"p\"\n",
        )
        .unwrap();
        let client = HttpPortalClient::new(&config).unwrap();

        assert_eq!(
            client.upload_url(UploadTarget::VariableDefinitions),
            "https://api.dwh.example/v1/users/current/sites/S1/variables"
        );
        assert!(!format!("{client:?}").contains("\"p\""));
    }
}
