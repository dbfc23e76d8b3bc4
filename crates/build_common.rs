// README-to-rustdoc conversion shared by the workspace crates.
// Include in build.rs with: include!("../build_common.rs");
//
// The including file must import:
//   use std::env;
//   use std::fs;
//   use std::path::Path;

/// Render `README.md` of `crate_dir` into `$OUT_DIR/README_GENERATED.md`.
///
/// Links into `src/` become intra-doc module links and the workspace README
/// link points at the repository URL from the root `Cargo.toml`.
fn process_readme_for_rustdoc(crate_dir: &str) {
    println!("cargo:rerun-if-changed=README.md");
    println!("cargo:rerun-if-changed=../../Cargo.toml");

    let Ok(out_dir) = env::var("OUT_DIR") else {
        return;
    };
    let dest = Path::new(&out_dir).join("README_GENERATED.md");

    let content = fs::read_to_string(Path::new(crate_dir).join("README.md")).unwrap_or_default();
    let mut rendered = rewrite_source_links(&content);
    if let Some(url) = workspace_repository(crate_dir) {
        rendered = rendered.replace("](../../README.md", &format!("]({url}"));
    }

    if let Err(e) = fs::write(&dest, rendered) {
        println!("cargo:warning=could not write {}: {e}", dest.display());
    }
}

/// `](src/pipeline/mod.rs)` -> `](crate::pipeline)`,
/// `](src/tts.rs)` -> `](crate::tts)`.
fn rewrite_source_links(content: &str) -> String {
    const OPEN: &str = "](src/";

    let mut out = String::with_capacity(content.len());
    let mut rest = content;
    while let Some(start) = rest.find(OPEN) {
        out.push_str(&rest[..start]);
        let after = &rest[start + OPEN.len()..];
        let Some(end) = after.find(')') else {
            out.push_str(&rest[start..]);
            return out;
        };
        let target = &after[..end];
        let module = target
            .strip_suffix(".rs")
            .map(|path| path.strip_suffix("/mod").unwrap_or(path))
            .filter(|path| *path != "lib");
        match module {
            Some(path) => {
                out.push_str("](crate::");
                out.push_str(&path.replace('/', "::"));
                out.push(')');
            }
            None => out.push_str("](crate)"),
        }
        rest = &after[end + 1..];
    }
    out.push_str(rest);
    out
}

/// `repository = "..."` from the workspace `Cargo.toml`, if present.
fn workspace_repository(crate_dir: &str) -> Option<String> {
    let manifest = Path::new(crate_dir).parent()?.parent()?.join("Cargo.toml");
    let content = fs::read_to_string(manifest).ok()?;

    content.lines().map(str::trim).find_map(|line| {
        let value = line.strip_prefix("repository")?.trim_start().strip_prefix('=')?;
        let value = value.trim().strip_prefix('"')?;
        value.split('"').next().map(str::to_string)
    })
}
