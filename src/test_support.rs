//! Fake [`CommandRunner`] for tests.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use crate::process::{CommandOutput, CommandRunner, Invocation};

type Handler = Box<dyn Fn(&Invocation) -> io::Result<CommandOutput> + Send + Sync>;

/// Records every invocation and answers with a handler.
pub(crate) struct FakeRunner {
    handler: Handler,
    calls: Mutex<Vec<Invocation>>,
}

impl FakeRunner {
    pub(crate) fn new(
        handler: impl Fn(&Invocation) -> io::Result<CommandOutput> + Send + Sync + 'static,
    ) -> Self {
        Self {
            handler: Box::new(handler),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn calls(&self) -> Vec<Invocation> {
        self.calls.lock().unwrap().clone()
    }

    pub(crate) fn programs(&self) -> Vec<String> {
        self.calls().into_iter().map(|c| c.program).collect()
    }
}

impl CommandRunner for FakeRunner {
    fn run(&self, invocation: &Invocation) -> io::Result<CommandOutput> {
        self.calls.lock().unwrap().push(invocation.clone());
        (self.handler)(invocation)
    }
}

pub(crate) fn ok(stdout: &str) -> CommandOutput {
    CommandOutput {
        code: Some(0),
        stdout: stdout.to_string(),
        ..Default::default()
    }
}

pub(crate) fn failed(code: i32, stderr: &str) -> CommandOutput {
    CommandOutput {
        code: Some(code),
        stderr: stderr.to_string(),
        ..Default::default()
    }
}

/// Path following `-o` in an image tool invocation.
pub(crate) fn output_arg(invocation: &Invocation) -> Option<PathBuf> {
    let pos = invocation.args.iter().position(|a| a == "-o")?;
    invocation.args.get(pos + 1).map(PathBuf::from)
}

/// Stand-in for xorriso: writes a file listing the staged tree to `-o`.
///
/// Like the real tool, it resolves its path arguments against its own
/// working directory and fails when the staging root it was given is not
/// `staging_root`.
pub(crate) fn fake_image(invocation: &Invocation, staging_root: &Path) -> io::Result<CommandOutput> {
    let Some(output) = output_arg(invocation) else {
        return Ok(failed(2, "no -o"));
    };
    let output = invocation.working_dir.join(output);
    let given_root = invocation
        .args
        .iter()
        .position(|a| a == "-o")
        .and_then(|pos| pos.checked_sub(1))
        .map(|pos| invocation.working_dir.join(&invocation.args[pos]));
    if given_root.as_deref() != Some(staging_root) || !staging_root.is_dir() {
        return Ok(failed(5, "xorriso : FAILURE : staging root not found"));
    }
    let mut listing = Vec::new();
    for entry in walkdir::WalkDir::new(staging_root).sort_by_file_name() {
        let entry = entry.map_err(io::Error::other)?;
        if entry.file_type().is_file() {
            listing.push(entry.path().strip_prefix(staging_root).unwrap().display().to_string());
            listing.push(fs::read_to_string(entry.path()).unwrap_or_default());
        }
    }
    fs::write(output, listing.join("\n"))?;
    Ok(ok(""))
}
