use std::process::Command;

/// Build metadata exposed to the binary via `env!`.
///
/// Values set by the build pipeline win over locally computed ones.
fn main() {
    let now = chrono::Utc::now();

    let timestamp = env_override("BUILD_TIMESTAMP")
        .filter(|ts| ts.parse::<i64>().is_ok())
        .unwrap_or_else(|| now.timestamp().to_string());
    let datetime = env_override("BUILD_DATETIME")
        .unwrap_or_else(|| now.format("%Y-%m-%d %H:%M:%S UTC").to_string());
    let git_hash = env_override("BUILD_GIT_HASH")
        .or_else(git_describe)
        .unwrap_or_else(|| "unknown".to_string());

    for (name, value) in [
        ("BUILD_TIMESTAMP", timestamp),
        ("BUILD_DATETIME", datetime),
        ("BUILD_GIT_HASH", git_hash),
    ] {
        println!("cargo:rustc-env={name}={value}");
        println!("cargo:rerun-if-env-changed={name}");
    }
    println!("cargo:rerun-if-changed=build.rs");
}

fn env_override(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|value| !value.is_empty())
}

/// Short commit hash, suffixed with `-dirty` for a modified working tree
fn git_describe() -> Option<String> {
    let output = Command::new("git")
        .args(["rev-parse", "--short", "HEAD"])
        .output()
        .ok()
        .filter(|output| output.status.success())?;
    let hash = String::from_utf8(output.stdout).ok()?;

    let dirty = Command::new("git")
        .args(["diff", "--quiet"])
        .status()
        .is_ok_and(|status| !status.success());

    Some(if dirty {
        format!("{}-dirty", hash.trim())
    } else {
        hash.trim().to_string()
    })
}
