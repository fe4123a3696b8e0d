//! Gist-backed remote store driven through the `gh` CLI
//!
//! Authentication is delegated entirely to `gh`: profsync never sees a
//! token. Every operation is one `gh api` invocation and is not retried.
//!
//! Large gist files come back from `GET /gists/{id}` with `truncated: true`
//! and a `raw_url`; the transfer protocol then calls [`RemoteStore::fetch_raw`]
//! with that URL.

use crate::error::{ProfsyncError, Result};
use crate::store::{RemoteEntry, RemoteStore, SlotId};
use serde::Deserialize;
use serde_json::json;
use std::collections::BTreeMap;
use std::io::Write;
use std::process::{Command, Stdio};
use tracing::{debug, trace};

/// Gists listed per page when searching by description
const PAGE_SIZE: usize = 100;
/// Upper bound on pages scanned when searching by description
const MAX_PAGES: usize = 30;
/// Entry every newly created gist starts with; gists cannot be empty
pub const PLACEHOLDER_ENTRY: &str = "README.md";

#[derive(Debug, Deserialize)]
struct GistSummary {
    id: String,
    #[serde(default)]
    description: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GistDetail {
    #[serde(default)]
    files: BTreeMap<String, Option<GistFile>>,
}

#[derive(Debug, Deserialize)]
struct GistFile {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    truncated: bool,
    #[serde(default)]
    raw_url: Option<String>,
    #[serde(default)]
    size: u64,
}

/// Remote store on GitHub gists
#[derive(Debug, Clone)]
pub struct GistStore {
    gh: String,
}

impl GistStore {
    /// Use the given `gh` executable
    pub fn new(gh_binary: impl Into<String>) -> Self {
        Self {
            gh: gh_binary.into(),
        }
    }

    fn api(&self, method: &str, endpoint: &str, input: Option<&[u8]>) -> Result<Vec<u8>> {
        let mut command = Command::new(&self.gh);
        command.args(["api", "--method", method, endpoint]);
        if input.is_some() {
            command.args(["--input", "-"]);
        }
        command
            .stdin(if input.is_some() { Stdio::piped() } else { Stdio::null() })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        trace!("gh api --method {} {}", method, endpoint);
        let mut child = command.spawn().map_err(|e| {
            ProfsyncError::transport(format!("cannot run '{}': {}", self.gh, e))
        })?;

        let output = std::thread::scope(|scope| {
            if let (Some(input), Some(mut stdin)) = (input, child.stdin.take()) {
                scope.spawn(move || {
                    if let Err(e) = stdin.write_all(input) {
                        debug!("Writing request body to gh failed: {}", e);
                    }
                });
            }
            child.wait_with_output()
        })
        .map_err(|e| ProfsyncError::transport(format!("gh did not finish: {}", e)))?;

        if output.status.success() {
            Ok(output.stdout)
        } else {
            let stderr = String::from_utf8_lossy(&output.stderr);
            Err(classify_failure(stderr.trim()))
        }
    }

    fn api_json<T: for<'de> Deserialize<'de>>(
        &self,
        method: &str,
        endpoint: &str,
        body: Option<serde_json::Value>,
    ) -> Result<T> {
        let body = body.map(|b| serde_json::to_vec(&b)).transpose()?;
        let stdout = self.api(method, endpoint, body.as_deref())?;
        serde_json::from_slice(&stdout).map_err(|e| {
            ProfsyncError::transport(format!("unexpected response from {}: {}", endpoint, e))
        })
    }

    fn gist(&self, slot: &str) -> Result<GistDetail> {
        self.api_json("GET", &format!("/gists/{}", slot), None)
    }
}

/// Map `gh` error output to an error class
pub fn classify_failure(stderr: &str) -> ProfsyncError {
    let lower = stderr.to_ascii_lowercase();
    if lower.contains("http 404") || lower.contains("not found") {
        ProfsyncError::ProfileNotFound(stderr.to_string())
    } else if lower.contains("http 401")
        || lower.contains("http 403")
        || lower.contains("gh auth login")
        || lower.contains("authentication")
        || lower.contains("scope")
    {
        ProfsyncError::PermissionDenied(stderr.to_string())
    } else if stderr.is_empty() {
        ProfsyncError::transport("gh exited unsuccessfully")
    } else {
        ProfsyncError::transport(stderr.to_string())
    }
}

fn placeholder_content() -> String {
    let host = hostname::get()
        .map(|h| h.to_string_lossy().into_owned())
        .unwrap_or_else(|_| "unknown host".to_string());
    format!(
        "# profsync profiles\n\nConfiguration profiles stored by profsync.\n\
         Created from {} on {}.\n",
        host,
        chrono::Utc::now().format("%Y-%m-%d %H:%M UTC")
    )
}

impl RemoteStore for GistStore {
    fn create(&self, description: &str) -> Result<SlotId> {
        #[derive(Deserialize)]
        struct Created {
            id: String,
        }

        let body = json!({
            "description": description,
            "public": false,
            "files": { PLACEHOLDER_ENTRY: { "content": placeholder_content() } },
        });
        let created: Created = self.api_json("POST", "/gists", Some(body))?;
        debug!("Created gist {}", created.id);
        Ok(created.id)
    }

    fn find_by_description(&self, description: &str) -> Result<Option<SlotId>> {
        for page in 1..=MAX_PAGES {
            let endpoint = format!("/gists?per_page={}&page={}", PAGE_SIZE, page);
            let gists: Vec<GistSummary> = self.api_json("GET", &endpoint, None)?;
            if let Some(found) = gists
                .iter()
                .find(|g| g.description.as_deref() == Some(description))
            {
                return Ok(Some(found.id.clone()));
            }
            if gists.len() < PAGE_SIZE {
                break;
            }
        }
        Ok(None)
    }

    fn list_entry_names(&self, slot: &str) -> Result<Vec<String>> {
        Ok(self.gist(slot)?.files.into_keys().collect())
    }

    fn read_entry(&self, slot: &str, name: &str) -> Result<Option<RemoteEntry>> {
        let mut gist = self.gist(slot)?;
        let Some(Some(file)) = gist.files.remove(name) else {
            return Ok(None);
        };
        Ok(Some(RemoteEntry {
            content: file.content.unwrap_or_default(),
            truncated: file.truncated,
            raw_locator: file.raw_url,
            size_bytes: file.size,
        }))
    }

    fn fetch_raw(&self, locator: &str) -> Result<Vec<u8>> {
        self.api("GET", locator, None)
    }

    fn write_entry(&self, slot: &str, name: &str, content: &str) -> Result<()> {
        let body = json!({ "files": { name: { "content": content } } });
        let _: serde_json::Value =
            self.api_json("PATCH", &format!("/gists/{}", slot), Some(body))?;
        Ok(())
    }

    fn delete_entry(&self, slot: &str, name: &str) -> Result<()> {
        let body = json!({ "files": { name: null } });
        let _: serde_json::Value =
            self.api_json("PATCH", &format!("/gists/{}", slot), Some(body))?;
        Ok(())
    }
}
