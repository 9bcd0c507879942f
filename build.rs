use std::process::Command;

fn main() {
    // Embed the source commit for the version endpoint
    let sha = Command::new("git")
        .args(["rev-parse", "--short", "HEAD"])
        .output()
        .ok()
        .filter(|output| output.status.success())
        .and_then(|output| String::from_utf8(output.stdout).ok())
        .map(|sha| sha.trim().to_string())
        .filter(|sha| !sha.is_empty())
        .unwrap_or_else(|| "unknown".to_string());

    println!("cargo:rustc-env=CTLGATE_BUILD_SHA={}", sha);
    println!("cargo:rerun-if-changed=.git/HEAD");
}
