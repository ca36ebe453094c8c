use crate::error::{Result, UpdaterError};

/// 将来源 URL 简写解析为可直接拉取的 raw 文件地址。
///
/// 支持的简写：
/// - `github:owner/repo@branch/path/to/file`
/// - `codeberg:owner/repo@branch/path/to/file`
/// - `gitlab:owner/repo@branch/path/to/file`
/// - `gitea:owner/repo@branch/path/to/file`（需要配置 gitea base url）
/// - `http(s)://...` 原样返回
#[derive(Debug, Clone, Default)]
pub struct UrlResolver {
    gitea_base_url: Option<String>,
}

impl UrlResolver {
    pub fn new(gitea_base_url: Option<String>) -> Self {
        Self {
            gitea_base_url: gitea_base_url.filter(|u| !u.is_empty()),
        }
    }

    pub fn resolve(&self, url: &str) -> Result<String> {
        if url.starts_with("http://") || url.starts_with("https://") {
            return Ok(url.to_string());
        }

        let (host, rest) = url.split_once(':').ok_or_else(|| {
            UpdaterError::ValidationError(format!("missing host prefix: {url}"))
        })?;

        // owner/repo@branch/path
        let (repo_path, branch_and_file) = rest.split_once('@').ok_or_else(|| {
            UpdaterError::ValidationError(format!("missing @branch: {url}"))
        })?;
        let (branch, file_path) = branch_and_file.split_once('/').ok_or_else(|| {
            UpdaterError::ValidationError(format!("missing file path after branch: {url}"))
        })?;
        let (owner, repo) = repo_path.split_once('/').unwrap_or((repo_path, ""));

        match host {
            "github" => Ok(format!(
                "https://raw.githubusercontent.com/{owner}/{repo}/{branch}/{file_path}"
            )),
            "codeberg" => Ok(format!(
                "https://codeberg.org/{owner}/{repo}/raw/branch/{branch}/{file_path}"
            )),
            "gitlab" => Ok(format!(
                "https://gitlab.com/{owner}/{repo}/-/raw/{branch}/{file_path}"
            )),
            "gitea" => {
                let base = self.gitea_base_url.as_deref().ok_or_else(|| {
                    UpdaterError::ConfigurationError(
                        "settingsUpdater.giteaBaseUrl must be set for gitea: URLs".to_string(),
                    )
                })?;
                Ok(format!(
                    "{}/{owner}/{repo}/raw/branch/{branch}/{file_path}",
                    base.trim_end_matches('/')
                ))
            }
            other => Err(UpdaterError::ValidationError(format!(
                "unknown URL host shorthand: {other}. Use github, codeberg, gitlab, gitea, or a full https:// URL."
            ))),
        }
    }
}
