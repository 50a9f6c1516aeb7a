use std::env;
use std::process::Command;

const HASH_OVERRIDE: &str = "BIRDBOARD_GIT_HASH";

fn main() {
    let build_date = chrono::Utc::now().format("%Y-%m-%d %H:%M:%S UTC");
    println!("cargo:rustc-env=BIRDBOARD_BUILD_DATE={build_date}");

    // Container builds have no .git; let them pass the hash in.
    let git_hash = env::var(HASH_OVERRIDE)
        .ok()
        .filter(|value| !value.trim().is_empty())
        .or_else(short_head)
        .unwrap_or_else(|| "unknown".to_string());
    println!("cargo:rustc-env=BIRDBOARD_GIT_HASH={git_hash}");

    println!("cargo:rerun-if-env-changed={HASH_OVERRIDE}");
    println!("cargo:rerun-if-changed=.git/HEAD");
    println!("cargo:rerun-if-changed=.git/refs/heads/");
}

fn short_head() -> Option<String> {
    let output = Command::new("git")
        .args(["rev-parse", "--short", "HEAD"])
        .output()
        .ok()?;
    output
        .status
        .success()
        .then(|| String::from_utf8_lossy(&output.stdout).trim().to_string())
}
