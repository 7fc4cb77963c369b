use std::thread;
use std::time::Duration;

use serde::Deserialize;
use tracing::{debug, warn};

use crate::error::{Error, Result};

const API_BASE: &str = "https://api.bitbucket.org/2.0/repositories";
const CREDENTIALS_FILE: &str = ".config/prmend/credentials.toml";
const MAX_RETRIES: u32 = 3;
const INITIAL_BACKOFF_MS: u64 = 500;

/// Pull request metadata as the core consumes it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PullRequest {
    pub id: u64,
    pub title: String,
    pub description: String,
    pub source_branch: String,
    pub destination_branch: String,
    pub author: String,
    pub link: String,
}

/// A review comment on a PR; inline comments carry their anchor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReviewComment {
    pub id: u64,
    pub body: String,
    pub path: Option<String>,
    pub line: Option<u32>,
}

/// Operations the core needs from the hosting platform.
pub trait PlatformClient {
    fn get_pull_request(&self, id: u64) -> Result<PullRequest>;

    /// Unified diff of the PR, as text.
    fn get_diff(&self, id: u64) -> Result<String>;

    fn list_comments(&self, id: u64) -> Result<Vec<ReviewComment>>;

    fn post_comment(&self, id: u64, body: &str) -> Result<()>;

    /// Zero or one open PR whose source branch matches.
    fn find_open_pr_by_source(&self, branch: &str) -> Result<Option<PullRequest>>;

    /// Whether the branch exists on the remote repository.
    fn branch_exists(&self, branch: &str) -> Result<bool>;

    fn create_pull_request(
        &self,
        title: &str,
        description: &str,
        source_branch: &str,
        destination_branch: &str,
        close_source_branch: bool,
    ) -> Result<PullRequest>;
}

/// Resolve the API token: env var first, then the credentials file.
fn resolve_token(token_env: &str) -> Result<String> {
    if let Ok(token) = std::env::var(token_env)
        && !token.is_empty()
    {
        return Ok(token);
    }

    if let Some(home) = std::env::var_os("HOME") {
        let creds_path = std::path::Path::new(&home).join(CREDENTIALS_FILE);
        if let Ok(contents) = std::fs::read_to_string(&creds_path)
            && let Ok(table) = contents.parse::<toml::Table>()
            && let Some(token) = table.get("token").and_then(|v| v.as_str())
        {
            debug!("using Bitbucket token from credentials file");
            return Ok(token.to_string());
        }
    }

    Err(Error::Transport(format!(
        "Bitbucket access token not found in ${token_env} or ~/{CREDENTIALS_FILE}"
    )))
}

/// Parse `workspace/repo_slug` out of an origin remote URL.
///
/// Understands `git@bitbucket.org:ws/repo.git` and
/// `https://bitbucket.org/ws/repo(.git)` forms.
pub fn workspace_repo_from_url(url: &str) -> Option<(String, String)> {
    let tail = url
        .strip_prefix("git@bitbucket.org:")
        .or_else(|| {
            url.split_once("bitbucket.org/")
                .map(|(_, tail)| tail)
        })?;
    let tail = tail.trim_end_matches('/').trim_end_matches(".git");
    let (workspace, slug) = tail.split_once('/')?;
    if workspace.is_empty() || slug.is_empty() || slug.contains('/') {
        return None;
    }
    Some((workspace.to_string(), slug.to_string()))
}

/// Bitbucket Cloud 2.0 REST client.
pub struct BitbucketClient {
    base_url: String,
    token: String,
}

impl BitbucketClient {
    pub fn new(workspace: &str, repo_slug: &str) -> Result<Self> {
        let token = resolve_token("BITBUCKET_ACCESS_TOKEN")?;
        Ok(Self {
            base_url: format!("{API_BASE}/{workspace}/{repo_slug}"),
            token,
        })
    }

    fn auth_header(&self) -> String {
        format!("Bearer {}", self.token)
    }

    /// GET returning JSON, with retry on rate limits, server errors, and
    /// transport failures.
    fn get_json(&self, path: &str, query: &[(&str, &str)]) -> Result<serde_json::Value> {
        let response = self.with_retry(|| {
            let mut req = ureq::get(&format!("{}{path}", self.base_url))
                .set("Authorization", &self.auth_header());
            for (key, value) in query {
                req = req.query(key, value);
            }
            req.call()
        })?;
        response
            .into_json()
            .map_err(|e| Error::Transport(format!("failed to parse Bitbucket response: {e}")))
    }

    fn get_text(&self, path: &str) -> Result<String> {
        let response = self.with_retry(|| {
            ureq::get(&format!("{}{path}", self.base_url))
                .set("Authorization", &self.auth_header())
                .call()
        })?;
        response
            .into_string()
            .map_err(|e| Error::Transport(format!("failed to read Bitbucket response: {e}")))
    }

    fn post_json(&self, path: &str, body: &serde_json::Value) -> Result<serde_json::Value> {
        let response = self.with_retry(|| {
            ureq::post(&format!("{}{path}", self.base_url))
                .set("Authorization", &self.auth_header())
                .send_json(body)
        })?;
        response
            .into_json()
            .map_err(|e| Error::Transport(format!("failed to parse Bitbucket response: {e}")))
    }

    /// Run a request closure with exponential backoff. The closure returns
    /// `Err(ureq::Error)` for HTTP/transport failures so retryability can be
    /// judged from the status code.
    fn with_retry<T>(
        &self,
        f: impl Fn() -> std::result::Result<T, ureq::Error>,
    ) -> Result<T> {
        let mut backoff_ms = INITIAL_BACKOFF_MS;
        for attempt in 1..=MAX_RETRIES {
            match f() {
                Ok(val) => return Ok(val),
                Err(ref e) if attempt < MAX_RETRIES && is_retryable(e) => {
                    warn!(
                        attempt,
                        error = %e,
                        backoff_ms,
                        "retrying Bitbucket API after transient error"
                    );
                    thread::sleep(Duration::from_millis(backoff_ms));
                    backoff_ms *= 2;
                }
                Err(e) => {
                    return Err(Error::Transport(format!(
                        "Bitbucket API request failed: {e}"
                    )));
                }
            }
        }
        unreachable!()
    }
}

/// Only retry rate-limits (429), server errors (5xx), and transport errors.
fn is_retryable(err: &ureq::Error) -> bool {
    match err {
        ureq::Error::Status(code, _) => *code == 429 || *code >= 500,
        ureq::Error::Transport(_) => true,
    }
}

impl PlatformClient for BitbucketClient {
    fn get_pull_request(&self, id: u64) -> Result<PullRequest> {
        let json = self.get_json(&format!("/pullrequests/{id}"), &[])?;
        parse_pull_request(&json)
    }

    fn get_diff(&self, id: u64) -> Result<String> {
        self.get_text(&format!("/pullrequests/{id}/diff"))
    }

    fn list_comments(&self, id: u64) -> Result<Vec<ReviewComment>> {
        let json = self.get_json(
            &format!("/pullrequests/{id}/comments"),
            &[("pagelen", "100")],
        )?;
        parse_comments(&json)
    }

    fn post_comment(&self, id: u64, body: &str) -> Result<()> {
        let payload = serde_json::json!({ "content": { "raw": body } });
        self.post_json(&format!("/pullrequests/{id}/comments"), &payload)?;
        Ok(())
    }

    fn find_open_pr_by_source(&self, branch: &str) -> Result<Option<PullRequest>> {
        let query = format!(r#"source.branch.name = "{branch}" AND state = "OPEN""#);
        let json = self.get_json("/pullrequests", &[("q", &query)])?;
        let values = json
            .get("values")
            .and_then(|v| v.as_array())
            .ok_or_else(|| {
                Error::Transport("Bitbucket PR list response missing values".to_string())
            })?;
        match values.first() {
            Some(pr) => Ok(Some(parse_pull_request(pr)?)),
            None => Ok(None),
        }
    }

    fn branch_exists(&self, branch: &str) -> Result<bool> {
        let url = format!("{}/refs/branches/{branch}", self.base_url);
        match ureq::get(&url)
            .set("Authorization", &self.auth_header())
            .call()
        {
            Ok(_) => Ok(true),
            Err(ureq::Error::Status(404, _)) => Ok(false),
            Err(e) => Err(Error::Transport(format!(
                "Bitbucket branch lookup failed: {e}"
            ))),
        }
    }

    fn create_pull_request(
        &self,
        title: &str,
        description: &str,
        source_branch: &str,
        destination_branch: &str,
        close_source_branch: bool,
    ) -> Result<PullRequest> {
        let payload = serde_json::json!({
            "title": title,
            "description": description,
            "source": { "branch": { "name": source_branch } },
            "destination": { "branch": { "name": destination_branch } },
            "close_source_branch": close_source_branch,
        });
        let json = self.post_json("/pullrequests", &payload)?;
        parse_pull_request(&json)
    }
}

// --- REST payload shapes ---

#[derive(Debug, Deserialize)]
struct PrPayload {
    id: u64,
    title: String,
    #[serde(default)]
    description: String,
    source: RefPayload,
    destination: RefPayload,
    author: Option<AuthorPayload>,
    links: Option<LinksPayload>,
}

#[derive(Debug, Deserialize)]
struct RefPayload {
    branch: BranchPayload,
}

#[derive(Debug, Deserialize)]
struct BranchPayload {
    name: String,
}

#[derive(Debug, Deserialize)]
struct AuthorPayload {
    display_name: String,
}

#[derive(Debug, Deserialize)]
struct LinksPayload {
    html: Option<HrefPayload>,
}

#[derive(Debug, Deserialize)]
struct HrefPayload {
    href: String,
}

#[derive(Debug, Deserialize)]
struct CommentsPayload {
    values: Vec<CommentPayload>,
}

#[derive(Debug, Deserialize)]
struct CommentPayload {
    id: u64,
    content: ContentPayload,
    inline: Option<InlinePayload>,
}

#[derive(Debug, Deserialize)]
struct ContentPayload {
    #[serde(default)]
    raw: String,
}

#[derive(Debug, Deserialize)]
struct InlinePayload {
    path: String,
    to: Option<u32>,
}

fn parse_pull_request(json: &serde_json::Value) -> Result<PullRequest> {
    let payload: PrPayload = serde_json::from_value(json.clone())
        .map_err(|e| Error::Transport(format!("failed to parse pull request: {e}")))?;
    Ok(PullRequest {
        id: payload.id,
        title: payload.title,
        description: payload.description,
        source_branch: payload.source.branch.name,
        destination_branch: payload.destination.branch.name,
        author: payload
            .author
            .map(|a| a.display_name)
            .unwrap_or_default(),
        link: payload
            .links
            .and_then(|l| l.html)
            .map(|h| h.href)
            .unwrap_or_default(),
    })
}

fn parse_comments(json: &serde_json::Value) -> Result<Vec<ReviewComment>> {
    let payload: CommentsPayload = serde_json::from_value(json.clone())
        .map_err(|e| Error::Transport(format!("failed to parse comments: {e}")))?;
    Ok(payload
        .values
        .into_iter()
        .map(|c| ReviewComment {
            id: c.id,
            body: c.content.raw,
            path: c.inline.as_ref().map(|i| i.path.clone()),
            line: c.inline.and_then(|i| i.to),
        })
        .collect())
}
