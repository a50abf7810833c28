use std::process::Command;

// APP_VERSION is the crate version, suffixed with the git revision when known
fn main() {
    let version = env!("CARGO_PKG_VERSION");
    let app_version = match revision() {
        Some(rev) => format!("{}+{}", version, rev),
        None => version.to_string(),
    };

    println!("cargo:rustc-env=APP_VERSION={}", app_version);
    println!("cargo:rerun-if-env-changed=GIT_SHA");
    println!("cargo:rerun-if-changed=.git/HEAD");
}

/// Revision from `GIT_SHA` (CI builds without a checkout) or the working tree
fn revision() -> Option<String> {
    if let Ok(sha) = std::env::var("GIT_SHA")
        && !sha.is_empty()
    {
        return Some(sha);
    }

    let output = Command::new("git")
        .args(["rev-parse", "--short", "HEAD"])
        .output()
        .ok()?;
    if !output.status.success() {
        return None;
    }

    let sha = String::from_utf8_lossy(&output.stdout).trim().to_string();
    (!sha.is_empty()).then_some(sha)
}
