//! Bootable ISO creation.
//!
//! Wraps `xorriso` (hybrid BIOS + UEFI image, Rock Ridge and Joliet) and
//! `limine bios-install`. Both are black boxes: their exit code is the only
//! success signal and the produced image is never inspected.

use sha2::{Digest, Sha256};
use std::fs::{self, File};
use std::io::{BufReader, Read};
use std::path::{Path, PathBuf};

use crate::error::{AssembleError, Result};
use crate::paths::absolute;
use crate::process::{CommandRunner, Invocation};

pub const ISO_CHECKSUM_SUFFIX: &str = "sha256";

/// Image tool settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IsoOptions {
    /// Image tool binary.
    pub program: String,
    /// BIOS El Torito boot image, relative to the staging root.
    pub bios_boot: String,
    /// UEFI boot image, relative to the staging root.
    pub uefi_boot: String,
}

impl Default for IsoOptions {
    fn default() -> Self {
        Self {
            program: "xorriso".to_string(),
            bios_boot: "boot/limine/limine-bios-cd.bin".to_string(),
            uefi_boot: "boot/limine/limine-uefi-cd.bin".to_string(),
        }
    }
}

/// Bootloader installer settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BootloaderOptions {
    pub program: String,
}

impl Default for BootloaderOptions {
    fn default() -> Self {
        Self {
            program: "limine".to_string(),
        }
    }
}

/// Build the image tool invocation writing `staging_root` to `output`.
pub fn xorriso_invocation(staging_root: &Path, output: &Path, options: &IsoOptions) -> Invocation {
    Invocation::new(&options.program, working_dir_for(output))
        .args(["-as", "mkisofs", "-R", "-J"])
        .args(["-b", options.bios_boot.as_str()])
        .args(["-no-emul-boot", "-boot-load-size", "4", "-boot-info-table"])
        .args(["--efi-boot", options.uefi_boot.as_str()])
        .args(["-efi-boot-part", "--efi-boot-image", "--protective-msdos-label"])
        .arg_path(staging_root)
        .arg("-o")
        .arg_path(output)
}

/// Synthesize the image from the completed staging tree.
///
/// The tool writes `<output>.partial`, which is moved to `output` only on
/// success, so a failed run never leaves a half-written image at `output`.
/// The checksum of a previous image is removed first; it is written again
/// only once the new image is complete.
pub fn assemble_image<R: CommandRunner>(
    runner: &R,
    staging_root: &Path,
    output: &Path,
    options: &IsoOptions,
) -> Result<()> {
    let staging_root = absolute(staging_root);
    let output = absolute(output);
    let output = output.as_path();

    let output_dir = working_dir_for(output);
    fs::create_dir_all(&output_dir)
        .map_err(|e| AssembleError::io("creating output directory", &output_dir, e))?;

    remove_if_present(&checksum_path(output), "removing stale checksum")?;
    let partial = partial_path(output);
    remove_if_present(&partial, "removing stale partial image")?;

    let invocation = xorriso_invocation(&staging_root, &partial, options);
    tracing::info!(command = %invocation.command_line(), "building ISO");

    if let Err(e) = run_tool(runner, &invocation) {
        let _ = fs::remove_file(&partial);
        return Err(e);
    }
    if !partial.is_file() {
        return Err(AssembleError::ExternalTool {
            tool: options.program.clone(),
            reason: format!("finished but produced no image at '{}'", partial.display()),
        });
    }

    move_into_place(&partial, output)?;
    tracing::info!(image = %output.display(), "ISO written");
    Ok(())
}

/// Embed BIOS boot code into an existing image.
///
/// On failure the image is left where it is; it exists but may not boot.
pub fn install_bootloader<R: CommandRunner>(
    runner: &R,
    image: &Path,
    options: &BootloaderOptions,
) -> Result<()> {
    let image = absolute(image);
    let invocation = Invocation::new(&options.program, working_dir_for(&image))
        .arg("bios-install")
        .arg_path(&image);
    tracing::info!(command = %invocation.command_line(), "installing bootloader");
    run_tool(runner, &invocation)
}

/// Write `<image>.sha256` in `sha256sum -c` format.
///
/// Only the file name goes into the checksum line so it can be verified with
/// `cd <output dir> && sha256sum -c <image>.sha256`.
pub fn write_image_checksum(image: &Path) -> Result<PathBuf> {
    let hash = sha256_file(image)?;
    let filename = image
        .file_name()
        .ok_or_else(|| AssembleError::Staging {
            path: image.to_path_buf(),
            reason: "image path has no file name".to_string(),
        })?
        .to_string_lossy();

    let checksum_path = checksum_path(image);
    fs::write(&checksum_path, format!("{hash}  {filename}\n"))
        .map_err(|e| AssembleError::io("writing checksum", &checksum_path, e))?;

    let short = format!("{}...{}", &hash[..8], &hash[hash.len() - 8..]);
    tracing::info!(
        sha256 = %short,
        path = %checksum_path.display(),
        "checksum written"
    );
    Ok(checksum_path)
}

pub fn checksum_path(image: &Path) -> PathBuf {
    let mut name = image.as_os_str().to_owned();
    name.push(".");
    name.push(ISO_CHECKSUM_SUFFIX);
    PathBuf::from(name)
}

fn partial_path(output: &Path) -> PathBuf {
    let mut name = output.as_os_str().to_owned();
    name.push(".partial");
    PathBuf::from(name)
}

fn working_dir_for(path: &Path) -> PathBuf {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    }
}

fn run_tool<R: CommandRunner>(runner: &R, invocation: &Invocation) -> Result<()> {
    let output = runner
        .run(invocation)
        .map_err(|e| AssembleError::ExternalTool {
            tool: invocation.program.clone(),
            reason: format!("could not launch '{}': {e}", invocation.command_line()),
        })?;
    if !output.success() {
        return Err(AssembleError::ExternalTool {
            tool: invocation.program.clone(),
            reason: output.failure_reason(invocation.timeout),
        });
    }
    Ok(())
}

fn remove_if_present(path: &Path, context: &'static str) -> Result<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(AssembleError::io(context, path, e)),
    }
}

/// Rename into place, falling back to copy + delete across filesystems.
fn move_into_place(src: &Path, dst: &Path) -> Result<()> {
    if fs::rename(src, dst).is_ok() {
        return Ok(());
    }
    fs::copy(src, dst).map_err(|e| AssembleError::io("copying image into place", dst, e))?;
    fs::remove_file(src).map_err(|e| AssembleError::io("removing partial image", src, e))?;
    Ok(())
}

fn sha256_file(path: &Path) -> Result<String> {
    let file = File::open(path).map_err(|e| AssembleError::io("opening image", path, e))?;
    let mut reader = BufReader::new(file);
    let mut hasher = Sha256::new();
    let mut buf = [0u8; 64 * 1024];
    loop {
        let n = reader
            .read(&mut buf)
            .map_err(|e| AssembleError::io("reading image", path, e))?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(format!("{:x}", hasher.finalize()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{failed, fake_image, ok, output_arg, FakeRunner};
    use tempfile::TempDir;

    #[test]
    fn xorriso_arguments_follow_the_hybrid_contract() {
        let inv = xorriso_invocation(
            Path::new("/work/cache/iso_root"),
            Path::new("/work/build/live.iso"),
            &IsoOptions::default(),
        );
        assert_eq!(inv.program, "xorriso");
        assert_eq!(inv.working_dir, PathBuf::from("/work/build"));
        assert_eq!(
            inv.args,
            vec![
                "-as",
                "mkisofs",
                "-R",
                "-J",
                "-b",
                "boot/limine/limine-bios-cd.bin",
                "-no-emul-boot",
                "-boot-load-size",
                "4",
                "-boot-info-table",
                "--efi-boot",
                "boot/limine/limine-uefi-cd.bin",
                "-efi-boot-part",
                "--efi-boot-image",
                "--protective-msdos-label",
                "/work/cache/iso_root",
                "-o",
                "/work/build/live.iso",
            ]
        );
    }

    #[test]
    fn successful_build_moves_partial_into_place() {
        let temp = TempDir::new().unwrap();
        let staging = temp.path().join("iso_root");
        fs::create_dir_all(&staging).unwrap();
        fs::write(staging.join("README"), "hi").unwrap();
        let output = temp.path().join("build/live.iso");

        let root = staging.clone();
        let runner = FakeRunner::new(move |inv| fake_image(inv, &root));
        assemble_image(&runner, &staging, &output, &IsoOptions::default()).unwrap();

        assert!(output.is_file());
        assert!(!temp.path().join("build/live.iso.partial").exists());
        let calls = runner.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(
            output_arg(&calls[0]).unwrap(),
            temp.path().join("build/live.iso.partial")
        );
    }

    #[test]
    fn failed_build_leaves_no_image() {
        let temp = TempDir::new().unwrap();
        let output = temp.path().join("build/live.iso");
        let runner = FakeRunner::new(|inv| {
            // half-written output before the failure
            fs::write(output_arg(inv).unwrap(), "garbage")?;
            Ok(failed(5, "xorriso : FAILURE : Cannot find boot image"))
        });

        let err = assemble_image(&runner, temp.path(), &output, &IsoOptions::default()).unwrap_err();

        assert!(matches!(err, AssembleError::ExternalTool { ref tool, .. } if tool == "xorriso"));
        assert!(err.to_string().contains("Cannot find boot image"));
        assert!(!output.exists());
        assert!(!temp.path().join("build/live.iso.partial").exists());
    }

    #[test]
    fn failed_build_removes_the_previous_checksum() {
        let temp = TempDir::new().unwrap();
        let output = temp.path().join("build/live.iso");
        fs::create_dir_all(output.parent().unwrap()).unwrap();
        fs::write(&output, "old image").unwrap();
        let old_checksum = write_image_checksum(&output).unwrap();

        let runner = FakeRunner::new(|_| Ok(failed(5, "xorriso : FAILURE")));
        assemble_image(&runner, temp.path(), &output, &IsoOptions::default()).unwrap_err();

        assert!(!old_checksum.exists());
    }

    #[test]
    fn relative_paths_reach_the_tools_as_absolute() {
        let temp = tempfile::Builder::new()
            .prefix("iso-relative")
            .tempdir_in(".")
            .unwrap();
        let name = Path::new(temp.path().file_name().unwrap()).to_path_buf();
        let staging = name.join("cache/iso_root");
        fs::create_dir_all(&staging).unwrap();
        fs::write(staging.join("README"), "hi").unwrap();
        let output = name.join("build/live.iso");

        let root = absolute(&staging);
        let runner = FakeRunner::new(move |inv| {
            if inv.program == "limine" {
                let image = inv.working_dir.join(inv.args.last().unwrap());
                return Ok(if image.is_file() { ok("") } else { failed(1, "no image") });
            }
            fake_image(inv, &root)
        });
        assemble_image(&runner, &staging, &output, &IsoOptions::default()).unwrap();
        install_bootloader(&runner, &output, &BootloaderOptions::default()).unwrap();

        assert!(output.is_file());
        for call in runner.calls() {
            let last = PathBuf::from(call.args.last().unwrap());
            assert!(last.is_absolute(), "{}", call.command_line());
        }
    }

    #[test]
    fn tool_that_writes_nothing_is_an_error() {
        let temp = TempDir::new().unwrap();
        let output = temp.path().join("live.iso");
        let runner = FakeRunner::new(|_| Ok(ok("")));
        let err = assemble_image(&runner, temp.path(), &output, &IsoOptions::default()).unwrap_err();
        assert!(err.to_string().contains("produced no image"));
    }

    #[test]
    fn launch_failure_is_an_external_tool_error() {
        let temp = TempDir::new().unwrap();
        let runner = FakeRunner::new(|_| {
            Err(std::io::Error::new(std::io::ErrorKind::NotFound, "No such file"))
        });
        let err = install_bootloader(
            &runner,
            &temp.path().join("live.iso"),
            &BootloaderOptions::default(),
        )
        .unwrap_err();
        assert!(matches!(err, AssembleError::ExternalTool { ref tool, .. } if tool == "limine"));
    }

    #[test]
    fn bootloader_failure_keeps_the_image() {
        let temp = TempDir::new().unwrap();
        let image = temp.path().join("live.iso");
        fs::write(&image, "iso").unwrap();
        let runner = FakeRunner::new(|_| Ok(failed(1, "limine: not an ISO")));

        let err = install_bootloader(&runner, &image, &BootloaderOptions::default()).unwrap_err();
        assert!(err.to_string().contains("limine"));
        assert!(image.exists());

        let call = &runner.calls()[0];
        assert_eq!(call.program, "limine");
        assert_eq!(call.args, vec!["bios-install".to_string(), image.display().to_string()]);
    }

    #[test]
    fn checksum_file_uses_bare_filename() {
        let temp = TempDir::new().unwrap();
        let image = temp.path().join("live.iso");
        fs::write(&image, "abc").unwrap();

        let path = write_image_checksum(&image).unwrap();
        assert_eq!(path, temp.path().join("live.iso.sha256"));
        assert_eq!(
            fs::read_to_string(path).unwrap(),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad  live.iso\n"
        );
    }
}
