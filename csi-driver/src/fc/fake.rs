//! In-memory test doubles for the probing, mount and command capabilities.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::thread::{self, ThreadId};
use std::time::Duration;

use super::io::{FileKind, IoHandler};
use crate::error::{FcError, Result};
use crate::platform::{CommandRunner, Mounter};

#[derive(Default)]
struct Tree {
    dirs: BTreeMap<PathBuf, BTreeSet<String>>,
    symlinks: HashMap<PathBuf, PathBuf>,
    files: HashMap<PathBuf, String>,
    failing_writes: HashSet<PathBuf>,
    writes: Vec<(PathBuf, String)>,
    read_dirs: Vec<PathBuf>,
    threads: Vec<ThreadId>,
}

impl Tree {
    fn add_parents(&mut self, path: &Path) {
        let mut child = path.to_path_buf();
        while let Some(parent) = child.parent() {
            if let Some(name) = child.file_name() {
                self.dirs
                    .entry(parent.to_path_buf())
                    .or_default()
                    .insert(name.to_string_lossy().into_owned());
            }
            child = parent.to_path_buf();
        }
    }
}

/// In-memory [`IoHandler`]. Paths are absolute; parents are created implicitly.
#[derive(Default)]
pub struct FakeIo {
    tree: Mutex<Tree>,
}

impl FakeIo {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_dir(&self, path: impl AsRef<Path>) -> &Self {
        let mut tree = self.tree.lock().unwrap();
        tree.dirs.entry(path.as_ref().to_path_buf()).or_default();
        tree.add_parents(path.as_ref());
        self
    }

    pub fn add_file(&self, path: impl AsRef<Path>, content: &str) -> &Self {
        let mut tree = self.tree.lock().unwrap();
        tree.files
            .insert(path.as_ref().to_path_buf(), content.to_string());
        tree.add_parents(path.as_ref());
        self
    }

    pub fn add_symlink(&self, link: impl AsRef<Path>, target: impl AsRef<Path>) -> &Self {
        let mut tree = self.tree.lock().unwrap();
        tree.symlinks
            .insert(link.as_ref().to_path_buf(), target.as_ref().to_path_buf());
        tree.add_parents(link.as_ref());
        self
    }

    /// A discovery link to a device node, with the node itself present.
    pub fn add_device(&self, link: impl AsRef<Path>, device: impl AsRef<Path>) -> &Self {
        self.add_file(device.as_ref(), "").add_symlink(link, device)
    }

    pub fn fail_writes_to(&self, path: impl AsRef<Path>) -> &Self {
        self.tree
            .lock()
            .unwrap()
            .failing_writes
            .insert(path.as_ref().to_path_buf());
        self
    }

    /// Every successful or attempted `write_file`, in order.
    pub fn writes(&self) -> Vec<(PathBuf, String)> {
        self.tree.lock().unwrap().writes.clone()
    }

    /// Threads that listed, read or wrote through this handler.
    pub fn io_threads(&self) -> Vec<ThreadId> {
        self.tree.lock().unwrap().threads.clone()
    }

    /// How many times `dir` was listed.
    pub fn read_dir_count(&self, dir: impl AsRef<Path>) -> usize {
        self.tree
            .lock()
            .unwrap()
            .read_dirs
            .iter()
            .filter(|d| d.as_path() == dir.as_ref())
            .count()
    }
}

fn not_found(path: &Path) -> io::Error {
    io::Error::new(io::ErrorKind::NotFound, format!("{}: no such file", path.display()))
}

impl IoHandler for FakeIo {
    fn read_dir(&self, dir: &Path) -> io::Result<Vec<String>> {
        let mut tree = self.tree.lock().unwrap();
        tree.threads.push(thread::current().id());
        tree.read_dirs.push(dir.to_path_buf());
        tree.dirs
            .get(dir)
            .map(|names| names.iter().cloned().collect())
            .ok_or_else(|| not_found(dir))
    }

    fn lstat(&self, path: &Path) -> io::Result<FileKind> {
        let tree = self.tree.lock().unwrap();
        if tree.symlinks.contains_key(path) {
            Ok(FileKind::Symlink)
        } else if tree.dirs.contains_key(path) {
            Ok(FileKind::Dir)
        } else if tree.files.contains_key(path) {
            Ok(FileKind::File)
        } else {
            Err(not_found(path))
        }
    }

    fn eval_symlinks(&self, path: &Path) -> io::Result<PathBuf> {
        let tree = self.tree.lock().unwrap();
        let mut current = path.to_path_buf();
        for _ in 0..16 {
            match tree.symlinks.get(&current) {
                Some(target) => current = target.clone(),
                None if tree.dirs.contains_key(&current) || tree.files.contains_key(&current) => {
                    return Ok(current);
                }
                // dangling, as canonicalize reports it
                None => return Err(not_found(&current)),
            }
        }
        Err(io::Error::other("too many levels of symbolic links"))
    }

    fn write_file(&self, path: &Path, data: &[u8]) -> io::Result<()> {
        let mut tree = self.tree.lock().unwrap();
        tree.threads.push(thread::current().id());
        let content = String::from_utf8_lossy(data).into_owned();
        tree.writes.push((path.to_path_buf(), content.clone()));
        if tree.failing_writes.contains(path) {
            return Err(io::Error::new(
                io::ErrorKind::PermissionDenied,
                format!("{}: permission denied", path.display()),
            ));
        }
        tree.files.insert(path.to_path_buf(), content);
        Ok(())
    }

    fn read_to_string(&self, path: &Path) -> io::Result<String> {
        let mut tree = self.tree.lock().unwrap();
        tree.threads.push(thread::current().id());
        tree.files.get(path).cloned().ok_or_else(|| not_found(path))
    }
}

/// A call observed by [`FakeMounter`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MountCall {
    Mount {
        source: String,
        target: String,
        fs_type: String,
        options: Vec<String>,
    },
    FormatAndMount {
        device: String,
        target: String,
        fs_type: String,
        options: Vec<String>,
    },
    Unmount(String),
}

#[derive(Default)]
struct MounterState {
    calls: Vec<MountCall>,
    mount_points: HashSet<String>,
    unmount_failures: HashMap<String, String>,
    mount_failure: Option<String>,
}

/// Recording [`Mounter`]; successful mounts become mount points.
#[derive(Default)]
pub struct FakeMounter {
    state: Mutex<MounterState>,
}

impl FakeMounter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_mount_point(self, target: &str) -> Self {
        self.state
            .lock()
            .unwrap()
            .mount_points
            .insert(target.to_string());
        self
    }

    pub fn fail_unmount(self, target: &str, message: &str) -> Self {
        self.state
            .lock()
            .unwrap()
            .unmount_failures
            .insert(target.to_string(), message.to_string());
        self
    }

    pub fn fail_mounts(self, message: &str) -> Self {
        self.state.lock().unwrap().mount_failure = Some(message.to_string());
        self
    }

    pub fn calls(&self) -> Vec<MountCall> {
        self.state.lock().unwrap().calls.clone()
    }
}

#[tonic::async_trait]
impl Mounter for FakeMounter {
    async fn is_mount_point(&self, target: &str) -> Result<bool> {
        Ok(self.state.lock().unwrap().mount_points.contains(target))
    }

    async fn mount(
        &self,
        source: &str,
        target: &str,
        fs_type: &str,
        options: &[String],
    ) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(MountCall::Mount {
            source: source.to_string(),
            target: target.to_string(),
            fs_type: fs_type.to_string(),
            options: options.to_vec(),
        });
        if let Some(msg) = &state.mount_failure {
            return Err(FcError::Device(msg.clone()));
        }
        state.mount_points.insert(target.to_string());
        Ok(())
    }

    async fn unmount(&self, target: &str) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(MountCall::Unmount(target.to_string()));
        if let Some(msg) = state.unmount_failures.get(target) {
            return Err(FcError::Device(msg.clone()));
        }
        if !state.mount_points.remove(target) {
            return Err(FcError::NotMounted(target.to_string()));
        }
        Ok(())
    }

    async fn format_and_mount(
        &self,
        device: &str,
        target: &str,
        fs_type: &str,
        options: &[String],
    ) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(MountCall::FormatAndMount {
            device: device.to_string(),
            target: target.to_string(),
            fs_type: fs_type.to_string(),
            options: options.to_vec(),
        });
        if let Some(msg) = &state.mount_failure {
            return Err(FcError::Device(msg.clone()));
        }
        state.mount_points.insert(target.to_string());
        Ok(())
    }
}

/// A command observed by [`FakeRunner`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandCall {
    pub program: String,
    pub args: Vec<String>,
    pub timeout: Option<Duration>,
}

/// Recording [`CommandRunner`]. Commands succeed unless told otherwise.
#[derive(Default)]
pub struct FakeRunner {
    calls: Mutex<Vec<CommandCall>>,
    failure: Mutex<Option<String>>,
}

impl FakeRunner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing(message: &str) -> Self {
        let runner = Self::default();
        *runner.failure.lock().unwrap() = Some(message.to_string());
        runner
    }

    pub fn calls(&self) -> Vec<CommandCall> {
        self.calls.lock().unwrap().clone()
    }
}

#[tonic::async_trait]
impl CommandRunner for FakeRunner {
    async fn run(&self, program: &str, args: &[&str], timeout: Option<Duration>) -> Result<String> {
        self.calls.lock().unwrap().push(CommandCall {
            program: program.to_string(),
            args: args.iter().map(|a| a.to_string()).collect(),
            timeout,
        });
        match self.failure.lock().unwrap().as_ref() {
            Some(msg) => Err(FcError::Device(msg.clone())),
            None => Ok(String::new()),
        }
    }
}
