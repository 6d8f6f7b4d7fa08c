//! Project discovery into a component tree

use std::fs;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::error::{MutationError, Result};
use crate::frontend::SourceFrontEnd;
use crate::tree::{ComponentTree, FileNode, TreeBuilder};

const SKIP_NAMES: &[&str] = &["target", "node_modules"];

fn should_skip(name: &str) -> bool {
    name.starts_with('.') || SKIP_NAMES.contains(&name)
}

/// Read and parse every source file under `<root>/src`
pub fn discover_project<F: SourceFrontEnd>(
    root: &Path,
    front_end: &F,
) -> Result<ComponentTree<F::Ast>> {
    let src = root.join("src");
    if !src.is_dir() {
        return Err(MutationError::ConfigError {
            message: format!("No src directory under '{}'", root.display()),
        });
    }

    let mut paths = Vec::new();
    collect_files(&src, front_end, &mut paths)?;

    let mut builder = TreeBuilder::new(root);
    for full_path in paths {
        let relative_path = full_path
            .strip_prefix(root)
            .map(Path::to_path_buf)
            .unwrap_or_else(|_| full_path.clone());
        let source = fs::read_to_string(&full_path).map_err(|e| MutationError::FileReadError {
            file: full_path.clone(),
            error: e.to_string(),
        })?;
        let ast = front_end.parse(&relative_path, &source)?;
        builder.add_file(FileNode {
            full_path,
            relative_path,
            source,
            ast,
        })?;
    }

    let tree = builder.build();
    debug!(files = tree.file_count(), root = %root.display(), "discovered project");
    Ok(tree)
}

fn collect_files<F: SourceFrontEnd>(
    dir: &Path,
    front_end: &F,
    out: &mut Vec<PathBuf>,
) -> Result<()> {
    let mut entries = fs::read_dir(dir)?.collect::<std::io::Result<Vec<_>>>()?;
    entries.sort_by_key(|entry| entry.file_name());

    for entry in entries {
        let name = entry.file_name();
        if should_skip(&name.to_string_lossy()) {
            continue;
        }
        let path = entry.path();
        let file_type = entry.file_type()?;
        if file_type.is_dir() {
            collect_files(&path, front_end, out)?;
        } else if file_type.is_file() && front_end.accepts(&path) {
            out.push(path);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codegen::RustFrontEnd;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    #[test]
    fn test_discovers_sorted_rust_files() {
        let dir = TempDir::new().unwrap();
        let root = dir.path();
        fs::create_dir_all(root.join("src").join("util")).unwrap();
        fs::create_dir_all(root.join("src").join(".cache")).unwrap();
        fs::write(root.join("src").join("lib.rs"), "pub mod util;").unwrap();
        fs::write(root.join("src").join("util").join("math.rs"), "pub fn one() -> i32 { 1 }").unwrap();
        fs::write(root.join("src").join("notes.txt"), "not rust").unwrap();
        fs::write(root.join("src").join(".cache").join("junk.rs"), "fn x() {}").unwrap();

        let tree = discover_project(root, &RustFrontEnd).unwrap();
        let files: Vec<_> = tree.files().map(|f| f.relative_path.clone()).collect();
        assert_eq!(
            files,
            vec![
                PathBuf::from("src/lib.rs"),
                PathBuf::from("src/util/math.rs"),
            ]
        );
    }

    #[test]
    fn test_parse_failure_is_fatal() {
        let dir = TempDir::new().unwrap();
        fs::create_dir_all(dir.path().join("src")).unwrap();
        fs::write(dir.path().join("src").join("lib.rs"), "fn (").unwrap();

        assert!(matches!(
            discover_project(dir.path(), &RustFrontEnd),
            Err(MutationError::ParseError { .. })
        ));
    }

    #[test]
    fn test_missing_src() {
        let dir = TempDir::new().unwrap();
        assert!(discover_project(dir.path(), &RustFrontEnd).is_err());
    }
}
