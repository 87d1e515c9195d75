use std::fs;
use std::path::{Path, PathBuf};

/// Backend generators are seeded only through `seed_all`
const ALLOWED_BACKEND_SEEDERS: &[&str] = &["src/seed.rs"];

/// The optimizer and its moment-decay rates live in the executor only
const ALLOWED_OPTIMIZER_BUILDERS: &[&str] = &["src/executor/mod.rs"];

fn collect_rust_files(root: &Path, out: &mut Vec<PathBuf>) {
    let Ok(entries) = fs::read_dir(root) else {
        return;
    };
    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_dir() {
            collect_rust_files(&path, out);
            continue;
        }
        if path.extension().and_then(|s| s.to_str()) == Some("rs") {
            out.push(path);
        }
    }
}

fn offenders(pattern: &str, allowed: &[&str]) -> Vec<String> {
    let repo_root = Path::new(env!("CARGO_MANIFEST_DIR"));
    let mut files = Vec::new();
    collect_rust_files(&repo_root.join("src"), &mut files);

    let mut offenders = Vec::new();
    for file in files {
        let rel = file
            .strip_prefix(repo_root)
            .unwrap_or(&file)
            .to_string_lossy()
            .replace('\\', "/");
        if allowed.iter().any(|allowed| *allowed == rel) {
            continue;
        }
        let content = fs::read_to_string(&file).unwrap_or_default();
        for (idx, line) in content.lines().enumerate() {
            let trimmed = line.trim();
            if trimmed.starts_with("//") || !trimmed.contains(pattern) {
                continue;
            }
            offenders.push(format!("{rel}:{}: {}", idx + 1, trimmed));
        }
    }
    offenders
}

#[test]
fn backend_seeding_goes_through_seed_all() {
    let offenders = offenders("::seed(", ALLOWED_BACKEND_SEEDERS);
    assert!(
        offenders.is_empty(),
        "backend generator seeded outside seed_all:\n{}",
        offenders.join("\n")
    );
}

#[test]
fn optimizer_is_built_by_the_executor_only() {
    let offenders = offenders("AdamConfig", ALLOWED_OPTIMIZER_BUILDERS);
    assert!(
        offenders.is_empty(),
        "optimizer constructed outside the executor:\n{}",
        offenders.join("\n")
    );
}
