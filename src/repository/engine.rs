//! The working-copy engine.
//!
//! One [`WorkingCopy`] wraps exactly one on-disk checkout. Operations are
//! cooperatively cancellable: the token is checked at safe points between
//! discrete steps, and network transfers poll it from progress callbacks
//! every tick. Ephemeral objects (the throwaway remote, fetched PR branches,
//! the temporary push branch) never outlive the operation that created them,
//! on any exit path.
//!
//! The on-disk checkout is single-writer: one engine instance per working
//! copy, one operation in flight at a time by convention of the caller.

use std::path::Path;
use std::sync::Arc;

use git2::build::CheckoutBuilder;
use git2::{
    Branch, BranchType, Cred, FetchOptions, FetchPrune, Oid, PushOptions, RemoteCallbacks,
    Repository, Signature,
};
use tracing::{debug, info, warn};

use crate::cancellation::CancellationToken;
use crate::repository::copier::DirectoryCopier;
use crate::repository::error::RepositoryError;
use crate::repository::events::{EventSink, RepositoryEvent, UNKNOWN_REFERENCE};
use crate::repository::provider::RemoteProvider;

const ORIGIN: &str = "origin";
const GIT_DIR: &str = ".git";

/// Name of the throwaway remote used for authenticated fetches and pushes.
/// Created and removed within the scope of a single operation.
const EPHEMERAL_REMOTE: &str = "hangar-ephemeral";

/// Well-known ephemeral branch name used to expose a local test-merge result
/// to external build consumers without mutating the tracked branch.
pub const TEMPORARY_BRANCH: &str = "hangar-temp";

/// Committer identity for merge commits.
#[derive(Clone, Debug)]
pub struct GitIdentity {
    pub name: String,
    pub email: String,
}

impl GitIdentity {
    pub fn new(name: impl Into<String>, email: impl Into<String>) -> Self {
        GitIdentity {
            name: name.into(),
            email: email.into(),
        }
    }

    fn signature(&self) -> Result<Signature<'static>, git2::Error> {
        Signature::now(&self.name, &self.email)
    }
}

/// Embed an access token as userinfo in an HTTPS URL.
///
/// An empty/absent token returns the URL unchanged. A non-empty token with
/// any other scheme is an invalid-operation error: tokens must never travel
/// over cleartext or ambiguous transports.
pub fn authenticated_url(
    url: &str,
    access_token: Option<&str>,
) -> Result<String, RepositoryError> {
    match access_token {
        None | Some("") => Ok(url.to_string()),
        Some(token) => {
            let rest = url
                .strip_prefix("https://")
                .ok_or_else(|| RepositoryError::NonHttpsUrl(url.to_string()))?;
            Ok(format!("https://{token}@{rest}"))
        }
    }
}

fn checked(ct: &CancellationToken) -> Result<(), RepositoryError> {
    if ct.is_cancelled() {
        return Err(RepositoryError::Cancelled);
    }
    Ok(())
}

/// The translation adapter wrapped around every network call: the native
/// library raises its own "user aborted from callback" signal when a
/// progress callback returns false, which must surface as the standard
/// cancellation outcome rather than a generic failure.
fn network_error(ct: &CancellationToken, err: git2::Error) -> RepositoryError {
    if ct.is_cancelled() || err.code() == git2::ErrorCode::User {
        RepositoryError::Cancelled
    } else {
        RepositoryError::Git(err)
    }
}

/// Callbacks for fetch/push: poll the token every progress tick, answer
/// credential challenges with the access token (or the userinfo already
/// embedded in the URL), and fail pushes whose per-ref status was rejected.
fn network_callbacks(
    ct: &CancellationToken,
    access_token: Option<&str>,
) -> RemoteCallbacks<'static> {
    let mut callbacks = RemoteCallbacks::new();

    let poll = ct.clone();
    callbacks.transfer_progress(move |_| !poll.is_cancelled());
    let poll = ct.clone();
    callbacks.sideband_progress(move |_| !poll.is_cancelled());

    let access = access_token.map(String::from);
    callbacks.credentials(move |_url, username_from_url, _allowed| {
        if let Some(token) = access.as_deref() {
            return Cred::userpass_plaintext(token, "");
        }
        if let Some(user) = username_from_url {
            return Cred::userpass_plaintext(user, "");
        }
        Cred::default()
    });

    callbacks.push_update_reference(|refname, status| match status {
        Some(message) => Err(git2::Error::from_str(&format!(
            "push of {refname} rejected: {message}"
        ))),
        None => Ok(()),
    });

    callbacks
}

/// One version-controlled working copy and the operations the fleet manager
/// runs against it.
pub struct WorkingCopy {
    repo: Repository,
    sink: Arc<dyn EventSink>,
    origin_url: Option<String>,
    provider: RemoteProvider,
}

impl WorkingCopy {
    /// Open an existing checkout. The hosting provider is derived from the
    /// origin remote's URL.
    pub fn open(path: &Path, sink: Arc<dyn EventSink>) -> Result<Self, RepositoryError> {
        let repo = Repository::open(path)?;
        let origin_url = repo
            .find_remote(ORIGIN)
            .ok()
            .and_then(|remote| remote.url().map(String::from));
        let provider = origin_url
            .as_deref()
            .map(RemoteProvider::detect)
            .unwrap_or(RemoteProvider::Unknown);
        Ok(WorkingCopy {
            repo,
            sink,
            origin_url,
            provider,
        })
    }

    /// Open with an explicit provider instead of URL detection. For mirrors
    /// of hosted repositories whose origin URL doesn't betray the provider.
    pub fn open_with_provider(
        path: &Path,
        sink: Arc<dyn EventSink>,
        provider: RemoteProvider,
    ) -> Result<Self, RepositoryError> {
        let mut copy = Self::open(path, sink)?;
        copy.provider = provider;
        Ok(copy)
    }

    /// Current head commit sha.
    pub fn head_sha(&self) -> Result<String, RepositoryError> {
        Ok(self.repo.head()?.peel_to_commit()?.id().to_string())
    }

    /// Shorthand name of the current branch, `None` when detached.
    pub fn reference_name(&self) -> Result<Option<String>, RepositoryError> {
        let head = self.repo.head()?;
        if head.is_branch() {
            Ok(head.shorthand().map(String::from))
        } else {
            Ok(None)
        }
    }

    pub fn origin_url(&self) -> Option<&str> {
        self.origin_url.as_deref()
    }

    pub fn provider(&self) -> RemoteProvider {
        self.provider
    }

    /// Whether origin is a recognized hosting provider, which gates the
    /// pull-request operations.
    pub fn origin_is_hosted(&self) -> bool {
        self.provider.is_hosted()
    }

    /// Fetch all of origin's configured refspecs with pruning enabled.
    pub fn fetch_origin(
        &self,
        access_token: Option<&str>,
        ct: &CancellationToken,
    ) -> Result<(), RepositoryError> {
        self.sink.handle_event(RepositoryEvent::Fetch, ct);
        checked(ct)?;

        info!("fetching origin");
        let mut remote = self
            .repo
            .find_remote(ORIGIN)
            .map_err(|_| RepositoryError::NoOrigin)?;
        let refspecs: Vec<String> = remote
            .fetch_refspecs()?
            .iter()
            .flatten()
            .map(String::from)
            .collect();
        let refspec_strs: Vec<&str> = refspecs.iter().map(String::as_str).collect();

        let mut opts = FetchOptions::new();
        opts.prune(FetchPrune::On);
        opts.remote_callbacks(network_callbacks(ct, access_token));
        remote
            .fetch(&refspec_strs, Some(&mut opts), None)
            .map_err(|err| network_error(ct, err))?;
        checked(ct)?;
        Ok(())
    }

    /// Forced checkout of `committish` followed by removal of untracked
    /// files. Not cancellable mid-checkout; the token is observed only
    /// before and after.
    pub fn checkout_object(
        &self,
        committish: &str,
        ct: &CancellationToken,
    ) -> Result<(), RepositoryError> {
        self.sink.handle_event(
            RepositoryEvent::Checkout {
                target: committish.to_string(),
            },
            ct,
        );
        checked(ct)?;

        info!(target = committish, "forced checkout");
        self.raw_checkout(committish)?;
        self.purge_untracked()?;
        checked(ct)?;
        Ok(())
    }

    /// Merge a pull request's head into HEAD without touching the tracked
    /// branch.
    ///
    /// Legal only against a recognized hosting provider. Fetches the PR head
    /// through a throwaway authenticated remote (both removed again before
    /// anything else happens, success or failure), then performs a
    /// no-fast-forward merge of `target_sha`. Returns the merge commit sha,
    /// or `None` after a conflict — the working copy is rolled back to the
    /// original head and a merge-conflict event is emitted first. Conflicts
    /// are an expected outcome, not a fault.
    pub fn add_test_merge(
        &self,
        number: u64,
        target_sha: &str,
        committer: &GitIdentity,
        access_token: Option<&str>,
        merged_by: &str,
        ct: &CancellationToken,
    ) -> Result<Option<String>, RepositoryError> {
        if !self.origin_is_hosted() {
            return Err(RepositoryError::NotHostedOrigin);
        }
        let pr_ref = self
            .provider
            .pull_request_ref(number)
            .ok_or(RepositoryError::NotHostedOrigin)?;
        let origin_url = self.origin_url.clone().ok_or(RepositoryError::NoOrigin)?;
        let url = authenticated_url(&origin_url, access_token)?;
        checked(ct)?;

        info!(pr = number, target = target_sha, "fetching pull request head");
        let local_branch = format!("pr-{number}");
        let refspec = format!("+{pr_ref}:refs/heads/{local_branch}");
        let fetched = self.with_ephemeral_remote(&url, |remote| {
            let mut opts = FetchOptions::new();
            opts.remote_callbacks(network_callbacks(ct, access_token));
            remote
                .fetch(&[refspec.as_str()], Some(&mut opts), None)
                .map_err(|err| network_error(ct, err))
        });
        // The fetched branch only exists to pin objects past the fetch; the
        // merge works from the target sha directly. Removed unconditionally,
        // and cancellation propagates after cleanup, not before.
        self.delete_local_branch(&local_branch);
        fetched?;
        checked(ct)?;

        let target = Oid::from_str(target_sha)?;
        let message = format!("Test merge of pull request #{number} by {merged_by}");
        self.merge_into_head(target, &local_branch, committer, &message, false, ct)
    }

    /// Publish HEAD under [`TEMPORARY_BRANCH`] on origin so an external
    /// build consumer can fetch a local test-merge result. The local branch
    /// and the throwaway remote are removed afterward regardless of outcome;
    /// only the remote-side ref survives.
    pub fn push_head_to_temporary_branch(
        &self,
        access_token: Option<&str>,
        ct: &CancellationToken,
    ) -> Result<(), RepositoryError> {
        let origin_url = self.origin_url.clone().ok_or(RepositoryError::NoOrigin)?;
        let url = authenticated_url(&origin_url, access_token)?;
        checked(ct)?;

        info!(branch = TEMPORARY_BRANCH, "pushing HEAD to temporary branch");
        let head_commit = self.repo.head()?.peel_to_commit()?;
        self.repo.branch(TEMPORARY_BRANCH, &head_commit, true)?;

        let refspec = format!("+refs/heads/{TEMPORARY_BRANCH}:refs/heads/{TEMPORARY_BRANCH}");
        let pushed = self.with_ephemeral_remote(&url, |remote| {
            let mut opts = PushOptions::new();
            opts.remote_callbacks(network_callbacks(ct, access_token));
            remote
                .push(&[refspec.as_str()], Some(&mut opts))
                .map_err(|err| network_error(ct, err))
        });
        self.delete_local_branch(TEMPORARY_BRANCH);
        pushed
    }

    /// Force-checkout onto the tracked branch's tip and purge untracked
    /// files. Legal only when HEAD tracks a remote branch. Returns the new
    /// head sha.
    pub fn reset_to_origin(&self, ct: &CancellationToken) -> Result<String, RepositoryError> {
        let (tip, tracked_name) = self.tracked_branch()?;
        self.sink.handle_event(
            RepositoryEvent::ResetToOrigin {
                branch: tracked_name.clone(),
                sha: tip.to_string(),
            },
            ct,
        );
        checked(ct)?;

        info!(branch = %tracked_name, "resetting onto tracked branch");
        self.raw_checkout(&tracked_name)?;
        self.purge_untracked()?;
        checked(ct)?;
        self.head_sha()
    }

    /// Fast-forward-preferred merge of the tracked branch into HEAD.
    ///
    /// Same precondition as [`Self::reset_to_origin`]. Returns the new head
    /// sha, or `None` after a conflict rollback (same shape as
    /// [`Self::add_test_merge`]).
    pub fn merge_origin(
        &self,
        committer: &GitIdentity,
        ct: &CancellationToken,
    ) -> Result<Option<String>, RepositoryError> {
        let (tip, tracked_name) = self.tracked_branch()?;
        checked(ct)?;

        info!(branch = %tracked_name, "merging tracked branch into HEAD");
        let message = format!("Merge remote-tracking branch '{tracked_name}'");
        self.merge_into_head(tip, &tracked_name, committer, &message, true, ct)
    }

    /// Push local commits produced during the pre-synchronize event out to
    /// the tracked branch.
    ///
    /// The event sink is notified first and may veto (aborts without error)
    /// or commit to the working copy before returning. If HEAD is unchanged
    /// from the snapshot taken before the notification, or HEAD does not
    /// track a remote branch, this is a silent no-op. Returns whether a push
    /// happened.
    pub fn synchronize(
        &self,
        access_token: Option<&str>,
        ct: &CancellationToken,
    ) -> Result<bool, RepositoryError> {
        let head_before = self.head_sha()?;
        if !self
            .sink
            .handle_event(RepositoryEvent::PreSynchronize, ct)
        {
            debug!("synchronize vetoed by event sink");
            return Ok(false);
        }
        checked(ct)?;

        let head = self.repo.head()?;
        if !head.is_branch() {
            return Ok(false);
        }
        let local_refname = match head.name() {
            Some(name) => name.to_string(),
            None => return Ok(false),
        };
        let branch = Branch::wrap(head);
        let upstream = match branch.upstream() {
            Ok(upstream) => upstream,
            Err(_) => return Ok(false),
        };
        let upstream_name = match upstream.name()? {
            Some(name) => name.to_string(),
            None => return Ok(false),
        };

        if self.head_sha()? == head_before {
            debug!("head unchanged by pre-synchronize, nothing to push");
            return Ok(false);
        }

        let origin_url = self.origin_url.clone().ok_or(RepositoryError::NoOrigin)?;
        let url = authenticated_url(&origin_url, access_token)?;
        // "origin/main" → the remote's own branch name.
        let remote_branch = upstream_name
            .split_once('/')
            .map(|(_, branch)| branch.to_string())
            .unwrap_or(upstream_name);
        let refspec = format!("+{local_refname}:refs/heads/{remote_branch}");

        info!(%refspec, "synchronizing tracked branch");
        self.with_ephemeral_remote(&url, |remote| {
            let mut opts = PushOptions::new();
            opts.remote_callbacks(network_callbacks(ct, access_token));
            remote
                .push(&[refspec.as_str()], Some(&mut opts))
                .map_err(|err| network_error(ct, err))
        })?;
        Ok(true)
    }

    /// Materialize a snapshot of the working tree at `dest`, excluding the
    /// version-control metadata directory.
    pub fn snapshot_to(
        &self,
        dest: &Path,
        copier: &dyn DirectoryCopier,
        ct: &CancellationToken,
    ) -> Result<(), RepositoryError> {
        let workdir = self.repo.workdir().ok_or_else(|| {
            RepositoryError::Git(git2::Error::from_str("bare repository has no working tree"))
        })?;
        copier
            .copy(workdir, dest, &[GIT_DIR], ct)
            .map_err(|err| {
                if err.kind() == std::io::ErrorKind::Interrupted {
                    RepositoryError::Cancelled
                } else {
                    RepositoryError::Copy(err)
                }
            })
    }

    /// The tracked branch's (tip, shorthand name), or `NotTracking` when
    /// HEAD is detached or has no upstream.
    fn tracked_branch(&self) -> Result<(Oid, String), RepositoryError> {
        let head = self.repo.head()?;
        if !head.is_branch() {
            return Err(RepositoryError::NotTracking);
        }
        let branch = Branch::wrap(head);
        let upstream = branch
            .upstream()
            .map_err(|_| RepositoryError::NotTracking)?;
        let name = upstream
            .name()?
            .ok_or_else(|| RepositoryError::Git(git2::Error::from_str("upstream name is not utf-8")))?
            .to_string();
        let tip = upstream.get().target().ok_or_else(|| {
            RepositoryError::Git(git2::Error::from_str("upstream branch has no target"))
        })?;
        Ok((tip, name))
    }

    /// Merge `target` into HEAD, committing on success and rolling back on
    /// conflict. The conflict path restores the original head (by canonical
    /// name when one exists, else by sha), purges untracked files, emits the
    /// merge-conflict event, and returns `None`.
    fn merge_into_head(
        &self,
        target: Oid,
        target_reference: &str,
        committer: &GitIdentity,
        message: &str,
        allow_fast_forward: bool,
        ct: &CancellationToken,
    ) -> Result<Option<String>, RepositoryError> {
        let original_sha = self.head_sha()?;
        let original_reference = self.reference_name()?;
        let annotated = self.repo.find_annotated_commit(target)?;

        if allow_fast_forward {
            let (analysis, _) = self.repo.merge_analysis(&[&annotated])?;
            if analysis.is_up_to_date() {
                return Ok(Some(original_sha));
            }
            if analysis.is_fast_forward() {
                let refname = {
                    let head = self.repo.head()?;
                    head.name().map(String::from).ok_or_else(|| {
                        RepositoryError::Git(git2::Error::from_str("HEAD name is not utf-8"))
                    })?
                };
                let mut reference = self.repo.find_reference(&refname)?;
                reference.set_target(target, "fast-forward merge of tracked branch")?;
                self.repo.set_head(&refname)?;
                let mut checkout = CheckoutBuilder::new();
                checkout.force();
                self.repo.checkout_head(Some(&mut checkout))?;
                self.purge_untracked()?;
                return Ok(Some(target.to_string()));
            }
        }

        checked(ct)?;
        let mut checkout = CheckoutBuilder::new();
        checkout.force();
        self.repo.merge(&[&annotated], None, Some(&mut checkout))?;

        if self.repo.index()?.has_conflicts() {
            warn!(target = %target, "merge conflicted, rolling back");
            self.repo.cleanup_state()?;
            let rollback = original_reference
                .clone()
                .unwrap_or_else(|| original_sha.clone());
            self.raw_checkout(&rollback)?;
            self.purge_untracked()?;
            self.sink.handle_event(
                RepositoryEvent::MergeConflict {
                    original_sha,
                    target_sha: target.to_string(),
                    original_reference: original_reference
                        .unwrap_or_else(|| UNKNOWN_REFERENCE.to_string()),
                    target_reference: target_reference.to_string(),
                },
                ct,
            );
            return Ok(None);
        }

        let tree_oid = self.repo.index()?.write_tree()?;
        let tree = self.repo.find_tree(tree_oid)?;
        let signature = committer.signature()?;
        let head_commit = self.repo.find_commit(Oid::from_str(&original_sha)?)?;
        let target_commit = self.repo.find_commit(target)?;
        let merge_oid = self.repo.commit(
            Some("HEAD"),
            &signature,
            &signature,
            message,
            &tree,
            &[&head_commit, &target_commit],
        )?;
        self.repo.cleanup_state()?;
        self.purge_untracked()?;
        Ok(Some(merge_oid.to_string()))
    }

    /// Forced checkout of a committish, moving HEAD to the branch when the
    /// committish names one and detaching otherwise.
    fn raw_checkout(&self, refish: &str) -> Result<(), RepositoryError> {
        let (object, reference) = self.repo.revparse_ext(refish)?;
        let mut checkout = CheckoutBuilder::new();
        checkout.force();
        self.repo.checkout_tree(&object, Some(&mut checkout))?;
        match reference {
            Some(ref reference) if reference.is_branch() => {
                let name = reference.name().ok_or_else(|| {
                    RepositoryError::Git(git2::Error::from_str("reference name is not utf-8"))
                })?;
                self.repo.set_head(name)?;
            }
            _ => self.repo.set_head_detached(object.id())?,
        }
        Ok(())
    }

    /// Remove untracked files left behind by a checkout or merge.
    fn purge_untracked(&self) -> Result<(), RepositoryError> {
        let mut checkout = CheckoutBuilder::new();
        checkout.force().remove_untracked(true);
        self.repo.checkout_head(Some(&mut checkout))?;
        Ok(())
    }

    /// Run `f` against a throwaway remote pointed at `url`, removing the
    /// remote afterward on every exit path. A stale remote left by a crashed
    /// prior process is replaced silently.
    fn with_ephemeral_remote<T>(
        &self,
        url: &str,
        f: impl FnOnce(&mut git2::Remote<'_>) -> Result<T, RepositoryError>,
    ) -> Result<T, RepositoryError> {
        let _ = self.repo.remote_delete(EPHEMERAL_REMOTE);
        let mut remote = self.repo.remote(EPHEMERAL_REMOTE, url)?;
        let result = f(&mut remote);
        drop(remote);
        if let Err(err) = self.repo.remote_delete(EPHEMERAL_REMOTE) {
            warn!(%err, "failed to remove ephemeral remote");
        }
        result
    }

    /// Delete a local branch if it exists, logging (not failing) on error:
    /// cleanup must never mask the operation's own outcome.
    fn delete_local_branch(&self, name: &str) {
        if let Ok(mut branch) = self.repo.find_branch(name, BranchType::Local) {
            if let Err(err) = branch.delete() {
                warn!(branch = name, %err, "failed to remove ephemeral branch");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn authenticated_url_embeds_token_as_userinfo() {
        let url = authenticated_url("https://github.com/foo/bar.git", Some("tok3n")).unwrap();
        assert_eq!(url, "https://tok3n@github.com/foo/bar.git");
    }

    #[test]
    fn authenticated_url_passes_through_without_token() {
        assert_eq!(
            authenticated_url("ssh://git@host/foo", None).unwrap(),
            "ssh://git@host/foo"
        );
        assert_eq!(
            authenticated_url("https://github.com/foo", Some("")).unwrap(),
            "https://github.com/foo"
        );
    }

    #[test]
    fn authenticated_url_rejects_non_https_schemes() {
        let err = authenticated_url("http://github.com/foo", Some("tok")).unwrap_err();
        assert!(matches!(err, RepositoryError::NonHttpsUrl(_)));
        let err = authenticated_url("git@github.com:foo/bar.git", Some("tok")).unwrap_err();
        assert!(matches!(err, RepositoryError::NonHttpsUrl(_)));
    }
}
