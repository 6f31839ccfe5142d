use chrono::Utc;
use std::process::Command;

fn git(args: &[&str]) -> Option<String> {
    let output = Command::new("git").args(args).output().ok()?;
    output
        .status
        .success()
        .then(|| String::from_utf8_lossy(&output.stdout).trim().to_string())
}

fn main() {
    let commit = git(&["rev-parse", "--short", "HEAD"]).unwrap_or_else(|| "unknown".to_string());

    // Tracked-file changes only; untracked scrape output in data/ is ignored
    let dirty = git(&["status", "--porcelain", "--untracked-files=no"])
        .map(|s| !s.is_empty())
        .unwrap_or(false);

    let mut build_hash = if dirty {
        format!("{commit}-dirty-{}", Utc::now().format("%Y%m%d-%H%M%S"))
    } else {
        commit
    };

    // Feature flags Cargo exposes to build scripts
    if std::env::var_os("CARGO_FEATURE_ONNX").is_some() {
        build_hash.push_str("+onnx");
    }

    println!("cargo:rustc-env=BUILD_HASH={build_hash}");
    println!("cargo:rerun-if-changed=../../.git/HEAD");
    println!("cargo:rerun-if-changed=../../.git/index");
}
