use std::path::{Path, PathBuf};
use std::process::Command;

use anyhow::{Context, Result};

/// The classifier crate under `crates/ebpf-programs`.
const PROGRAM: &str = "tc-flows";

const BPF_TARGET: &str = "bpfel-unknown-none";

/// Build the classifier for the BPF target and stage the object where
/// the agent's development fallback looks for it
/// (`target/bpfel-unknown-none/release/tc-flows`).
pub fn build_all() -> Result<()> {
    let crates_dir = crates_dir()?;
    let program_dir = crates_dir.join("ebpf-programs").join(PROGRAM);
    println!("building {PROGRAM} for {BPF_TARGET}");

    // out-of-workspace crate: nightly + build-std, BTF debug info for
    // the verifier and CO-RE
    let status = Command::new("cargo")
        .args(["+nightly", "build", "--release"])
        .args(["-Z", "build-std=core"])
        .args(["--target", BPF_TARGET])
        .env(
            "CARGO_ENCODED_RUSTFLAGS",
            "-C\x1fdebuginfo=2\x1f-C\x1flink-arg=--btf",
        )
        .current_dir(&program_dir)
        .status()
        .with_context(|| format!("failed to run cargo in {}", program_dir.display()))?;
    if !status.success() {
        anyhow::bail!("eBPF build failed for {PROGRAM}");
    }

    let built = program_dir
        .join("target")
        .join(BPF_TARGET)
        .join("release")
        .join(PROGRAM);
    let staged_dir = workspace_root(&crates_dir)
        .join("target")
        .join(BPF_TARGET)
        .join("release");
    std::fs::create_dir_all(&staged_dir)
        .with_context(|| format!("failed to create {}", staged_dir.display()))?;
    let staged = staged_dir.join(PROGRAM);
    std::fs::copy(&built, &staged)
        .with_context(|| format!("failed to copy {} -> {}", built.display(), staged.display()))?;

    println!("  -> {}", staged.display());
    Ok(())
}

fn crates_dir() -> Result<PathBuf> {
    let manifest_dir = std::env::var("CARGO_MANIFEST_DIR")
        .map(PathBuf::from)
        .context("CARGO_MANIFEST_DIR not set, run via `cargo xtask`")?;
    manifest_dir
        .parent()
        .map(Path::to_path_buf)
        .context("xtask manifest has no parent directory")
}

fn workspace_root(crates_dir: &Path) -> PathBuf {
    crates_dir
        .parent()
        .map_or_else(|| crates_dir.to_path_buf(), Path::to_path_buf)
}
