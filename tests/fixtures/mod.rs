#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use git2::build::RepoBuilder;
use git2::{Commit, Oid, Repository, RepositoryInitOptions, Signature};
use tempfile::TempDir;

use hangar::{CancellationToken, EventSink, RepositoryEvent};

/// A bare "origin" repository plus a clone of it whose `main` tracks
/// `origin/main`, both inside one temp directory.
pub struct GitScratch {
    _temp: TempDir,
    pub origin_dir: PathBuf,
    pub clone_dir: PathBuf,
}

impl GitScratch {
    pub fn new() -> Result<Self, String> {
        let temp = TempDir::new().map_err(|err| format!("tempdir failed: {err}"))?;
        let origin_dir = temp.path().join("origin.git");
        let clone_dir = temp.path().join("clone");

        let mut init = RepositoryInitOptions::new();
        init.bare(true).initial_head("main");
        Repository::init_opts(&origin_dir, &init)
            .map_err(|err| format!("git init --bare failed for {origin_dir:?}: {err}"))?;

        // Seed origin/main through a throwaway working repo.
        let seed_dir = temp.path().join("seed");
        let mut init = RepositoryInitOptions::new();
        init.initial_head("main");
        let seed = Repository::init_opts(&seed_dir, &init)
            .map_err(|err| format!("git init failed for {seed_dir:?}: {err}"))?;
        configure_test_repo(&seed)?;
        commit_file(&seed, "README.md", "scratch repository\n", "initial commit")?;
        let origin_url = path_str(&origin_dir)?;
        let mut remote = seed
            .remote("origin", origin_url)
            .map_err(|err| format!("git remote add origin failed: {err}"))?;
        remote
            .push(&["refs/heads/main:refs/heads/main"], None)
            .map_err(|err| format!("seed push failed: {err}"))?;
        drop(remote);

        let clone = RepoBuilder::new()
            .clone(origin_url, &clone_dir)
            .map_err(|err| format!("clone failed for {clone_dir:?}: {err}"))?;
        configure_test_repo(&clone)?;

        Ok(Self {
            _temp: temp,
            origin_dir,
            clone_dir,
        })
    }

    pub fn origin(&self) -> Result<Repository, String> {
        Repository::open(&self.origin_dir)
            .map_err(|err| format!("open origin failed: {err}"))
    }

    pub fn clone_repo(&self) -> Result<Repository, String> {
        Repository::open(&self.clone_dir)
            .map_err(|err| format!("open clone failed: {err}"))
    }

    pub fn origin_head(&self, branch: &str) -> Result<Oid, String> {
        let origin = self.origin()?;
        let reference = origin
            .find_reference(&format!("refs/heads/{branch}"))
            .map_err(|err| format!("find origin branch {branch} failed: {err}"))?;
        reference
            .target()
            .ok_or_else(|| format!("origin branch {branch} has no target"))
    }

    pub fn origin_has_ref(&self, refname: &str) -> Result<bool, String> {
        Ok(self.origin()?.find_reference(refname).is_ok())
    }

    /// Advance origin's `main` by one commit without touching the clone,
    /// simulating upstream movement.
    pub fn advance_origin_main(&self, file: &str, content: &str) -> Result<Oid, String> {
        let origin = self.origin()?;
        let parent = self.origin_head("main")?;
        let oid = bare_commit(&origin, parent, file, content, "upstream commit")?;
        origin
            .reference("refs/heads/main", oid, true, "advance main")
            .map_err(|err| format!("move origin main failed: {err}"))?;
        Ok(oid)
    }

    /// Create a pull-request head ref in the bare origin: one commit on top
    /// of `base` touching `file`, pointed at by `refs/pull/<number>/head`.
    pub fn create_pull_request_head(
        &self,
        number: u64,
        base: Oid,
        file: &str,
        content: &str,
    ) -> Result<Oid, String> {
        let origin = self.origin()?;
        let oid = bare_commit(&origin, base, file, content, &format!("pr {number}"))?;
        origin
            .reference(&format!("refs/pull/{number}/head"), oid, true, "pr head")
            .map_err(|err| format!("create pr ref failed: {err}"))?;
        Ok(oid)
    }
}

pub fn path_str(path: &Path) -> Result<&str, String> {
    path.to_str()
        .ok_or_else(|| format!("path is not utf8: {path:?}"))
}

pub fn configure_test_repo(repo: &Repository) -> Result<(), String> {
    let mut cfg = repo
        .config()
        .map_err(|err| format!("open repo config failed: {err}"))?;
    cfg.set_str("user.name", "Test")
        .map_err(|err| format!("set user.name failed: {err}"))?;
    cfg.set_str("user.email", "test@test.com")
        .map_err(|err| format!("set user.email failed: {err}"))?;
    Ok(())
}

/// Write `content` to `name` in the working tree, stage it, and commit on
/// HEAD. Returns the new commit id.
pub fn commit_file(
    repo: &Repository,
    name: &str,
    content: &str,
    message: &str,
) -> Result<Oid, String> {
    let workdir = repo
        .workdir()
        .ok_or_else(|| "repository has no working tree".to_string())?;
    std::fs::write(workdir.join(name), content)
        .map_err(|err| format!("write {name} failed: {err}"))?;
    let mut index = repo
        .index()
        .map_err(|err| format!("open index failed: {err}"))?;
    index
        .add_path(Path::new(name))
        .map_err(|err| format!("stage {name} failed: {err}"))?;
    index
        .write()
        .map_err(|err| format!("write index failed: {err}"))?;
    let tree_id = index
        .write_tree()
        .map_err(|err| format!("write tree failed: {err}"))?;
    let tree = repo
        .find_tree(tree_id)
        .map_err(|err| format!("find tree failed: {err}"))?;
    let sig = test_signature()?;
    let parent = repo.head().ok().and_then(|head| head.peel_to_commit().ok());
    let parents: Vec<&Commit> = parent.iter().collect();
    repo.commit(Some("HEAD"), &sig, &sig, message, &tree, &parents)
        .map_err(|err| format!("commit failed: {err}"))
}

/// Create a commit directly in a bare repository: `file` replaced with
/// `content` on top of `parent`'s tree. No refs are moved.
fn bare_commit(
    repo: &Repository,
    parent: Oid,
    file: &str,
    content: &str,
    message: &str,
) -> Result<Oid, String> {
    let parent_commit = repo
        .find_commit(parent)
        .map_err(|err| format!("find parent commit failed: {err}"))?;
    let parent_tree = parent_commit
        .tree()
        .map_err(|err| format!("read parent tree failed: {err}"))?;
    let blob = repo
        .blob(content.as_bytes())
        .map_err(|err| format!("write blob failed: {err}"))?;
    let mut builder = repo
        .treebuilder(Some(&parent_tree))
        .map_err(|err| format!("open treebuilder failed: {err}"))?;
    builder
        .insert(file, blob, 0o100644)
        .map_err(|err| format!("insert {file} failed: {err}"))?;
    let tree_id = builder
        .write()
        .map_err(|err| format!("write tree failed: {err}"))?;
    let tree = repo
        .find_tree(tree_id)
        .map_err(|err| format!("find tree failed: {err}"))?;
    let sig = test_signature()?;
    repo.commit(None, &sig, &sig, message, &tree, &[&parent_commit])
        .map_err(|err| format!("commit failed: {err}"))
}

fn test_signature() -> Result<Signature<'static>, String> {
    Signature::now("Test", "test@test.com").map_err(|err| format!("signature failed: {err}"))
}

/// Event sink that records everything it sees. Pre-synchronize is answered
/// from `allow_synchronize`; every other event is informational.
#[derive(Default)]
pub struct RecordingSink {
    pub events: Mutex<Vec<RepositoryEvent>>,
    pub veto_synchronize: AtomicBool,
}

impl RecordingSink {
    pub fn vetoing() -> Self {
        let sink = Self::default();
        sink.veto_synchronize.store(true, Ordering::SeqCst);
        sink
    }

    pub fn events(&self) -> Vec<RepositoryEvent> {
        self.events.lock().unwrap().clone()
    }
}

impl EventSink for RecordingSink {
    fn handle_event(&self, event: RepositoryEvent, _ct: &CancellationToken) -> bool {
        let veto = matches!(event, RepositoryEvent::PreSynchronize)
            && self.veto_synchronize.load(Ordering::SeqCst);
        self.events.lock().unwrap().push(event);
        !veto
    }
}

/// Event sink that commits a file into the working copy when the
/// pre-synchronize event fires, standing in for a consumer that pushes
/// generated changes back upstream.
pub struct CommitOnSynchronizeSink {
    pub repo_dir: PathBuf,
}

impl EventSink for CommitOnSynchronizeSink {
    fn handle_event(&self, event: RepositoryEvent, _ct: &CancellationToken) -> bool {
        if matches!(event, RepositoryEvent::PreSynchronize) {
            let repo = Repository::open(&self.repo_dir).expect("open working copy");
            commit_file(&repo, "generated.txt", "generated\n", "pre-synchronize commit")
                .expect("pre-synchronize commit");
        }
        true
    }
}
