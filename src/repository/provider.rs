//! Origin hosting-provider recognition.
//!
//! Test merges fetch pull-request head refs, whose layout is provider
//! specific; the provider is derived from the origin URL when a working
//! copy is opened and gates which operations are legal.

/// Recognized hosting providers for the origin remote.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RemoteProvider {
    GitHub,
    GitLab,
    /// Anything else: self-hosted, local path, ssh without a known host.
    Unknown,
}

impl RemoteProvider {
    /// Derive the provider from a remote URL.
    ///
    /// Handles scheme URLs (`https://github.com/foo/bar`) and scp-style ssh
    /// (`git@github.com:foo/bar.git`).
    pub fn detect(url: &str) -> Self {
        let host = host_of(url);
        if host == "github.com" || host.ends_with(".github.com") {
            RemoteProvider::GitHub
        } else if host == "gitlab.com" || host.ends_with(".gitlab.com") {
            RemoteProvider::GitLab
        } else {
            RemoteProvider::Unknown
        }
    }

    /// Whether pull-request operations are legal against this origin.
    pub fn is_hosted(self) -> bool {
        !matches!(self, RemoteProvider::Unknown)
    }

    /// The remote ref where this provider exposes a pull request's head.
    pub(crate) fn pull_request_ref(self, number: u64) -> Option<String> {
        match self {
            RemoteProvider::GitHub => Some(format!("refs/pull/{number}/head")),
            RemoteProvider::GitLab => Some(format!("refs/merge-requests/{number}/head")),
            RemoteProvider::Unknown => None,
        }
    }
}

/// Extract the host portion of a remote URL, empty when there is none.
fn host_of(url: &str) -> &str {
    let u = url.trim();

    // SSH scp-style: git@host:path
    if !u.contains("://") {
        if let Some((userhost, _)) = u.split_once(':') {
            return userhost.rsplit('@').next().unwrap_or("");
        }
        return "";
    }

    // Scheme URLs: strip scheme, optional userinfo, then take up to '/'.
    let after_scheme = match u.split_once("://") {
        Some((_, rest)) => rest,
        None => return "",
    };
    let authority = after_scheme.split('/').next().unwrap_or("");
    authority.rsplit('@').next().unwrap_or("")
}
