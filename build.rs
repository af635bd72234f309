use std::process::Command;

fn git(args: &[&str]) -> Option<String> {
    Command::new("git")
        .args(args)
        .output()
        .ok()
        .filter(|o| o.status.success())
        .and_then(|o| String::from_utf8(o.stdout).ok())
        .map(|s| s.trim().to_string())
}

fn main() {
    let cargo_version = env!("CARGO_PKG_VERSION");

    let git_hash = git(&["rev-parse", "--short", "HEAD"]).unwrap_or_else(|| "unknown".to_string());
    let dirty = git(&["status", "--porcelain"]).is_some_and(|s| !s.is_empty());

    // v0.3.0 (abc1234) or v0.3.0-dev (abc1234)
    let version = if dirty {
        format!("v{}-dev ({})", cargo_version, git_hash)
    } else {
        format!("v{} ({})", cargo_version, git_hash)
    };

    println!("cargo:rustc-env=TASKDASH_GIT_HASH={}", git_hash);
    println!("cargo:rustc-env=TASKDASH_VERSION={}", version);

    println!("cargo:rerun-if-changed=.git/HEAD");
    println!("cargo:rerun-if-changed=.git/index");
}
