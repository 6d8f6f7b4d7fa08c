//! Project component tree
//!
//! Folders own their children in discovery order; files own their source text and
//! the front end's parsed representation. Traversal is a depth-first walk in
//! insertion order and can be restarted any number of times.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

use crate::error::{MutationError, Result};

/// A source file in the project
#[derive(Debug)]
pub struct FileNode<A> {
    pub full_path: PathBuf,
    /// Path relative to the project root, unique within the tree
    pub relative_path: PathBuf,
    pub source: String,
    /// Parsed representation supplied by the source front end
    pub ast: A,
}

/// A folder and its children, in insertion order
#[derive(Debug)]
pub struct FolderNode<A> {
    pub full_path: PathBuf,
    pub relative_path: PathBuf,
    children: Vec<ComponentNode<A>>,
}

#[derive(Debug)]
pub enum ComponentNode<A> {
    Folder(FolderNode<A>),
    File(FileNode<A>),
}

impl<A> FolderNode<A> {
    pub fn new(full_path: impl Into<PathBuf>, relative_path: impl Into<PathBuf>) -> Self {
        Self {
            full_path: full_path.into(),
            relative_path: relative_path.into(),
            children: Vec::new(),
        }
    }

    /// Append a child without tree-level checks; use [`ComponentTree::add_folder`]
    /// to attach the finished subtree.
    pub fn add(&mut self, child: ComponentNode<A>) {
        self.children.push(child);
    }

    pub fn children(&self) -> &[ComponentNode<A>] {
        &self.children
    }

    pub fn name(&self) -> Option<&str> {
        self.relative_path.file_name().and_then(|n| n.to_str())
    }

    /// True if any file lives somewhere below this folder
    pub fn has_files(&self) -> bool {
        self.children.iter().any(|child| match child {
            ComponentNode::File(_) => true,
            ComponentNode::Folder(folder) => folder.has_files(),
        })
    }

    fn files(&self) -> Files<'_, A> {
        Files {
            stack: vec![self.children.iter()],
        }
    }
}

/// Depth-first iterator over the files of a folder
pub struct Files<'a, A> {
    stack: Vec<std::slice::Iter<'a, ComponentNode<A>>>,
}

impl<'a, A> Iterator for Files<'a, A> {
    type Item = &'a FileNode<A>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let top = self.stack.last_mut()?;
            match top.next() {
                Some(ComponentNode::File(file)) => return Some(file),
                Some(ComponentNode::Folder(folder)) => {
                    self.stack.push(folder.children.iter());
                }
                None => {
                    self.stack.pop();
                }
            }
        }
    }
}

/// Root of a project's component tree
#[derive(Debug)]
pub struct ComponentTree<A> {
    root: FolderNode<A>,
    paths: HashSet<PathBuf>,
}

impl<A> ComponentTree<A> {
    pub fn new(project_root: impl Into<PathBuf>) -> Self {
        Self {
            root: FolderNode::new(project_root, PathBuf::new()),
            paths: HashSet::new(),
        }
    }

    pub fn root(&self) -> &FolderNode<A> {
        &self.root
    }

    /// Add a file directly under the root
    pub fn add_file(&mut self, node: FileNode<A>) -> Result<()> {
        self.claim(&node.relative_path)?;
        self.root.add(ComponentNode::File(node));
        Ok(())
    }

    /// Attach a folder subtree under the root. Fails without modifying the tree if
    /// any file inside collides with an existing path.
    pub fn add_folder(&mut self, node: FolderNode<A>) -> Result<()> {
        let mut incoming = HashSet::new();
        for file in node.files_including_empty() {
            if self.paths.contains(&file.relative_path) || !incoming.insert(file.relative_path.clone()) {
                return Err(MutationError::DuplicateComponent {
                    path: file.relative_path.clone(),
                });
            }
        }
        self.paths.extend(incoming);
        self.root.add(ComponentNode::Folder(node));
        Ok(())
    }

    /// Lazy depth-first sequence of files in insertion order
    pub fn files(&self) -> Files<'_, A> {
        self.root.files()
    }

    pub fn for_each_file(&self, mut visitor: impl FnMut(&FileNode<A>)) {
        for file in self.files() {
            visitor(file);
        }
    }

    pub fn file_count(&self) -> usize {
        self.paths.len()
    }

    pub fn contains(&self, relative_path: &Path) -> bool {
        self.paths.contains(relative_path)
    }

    fn claim(&mut self, relative_path: &Path) -> Result<()> {
        if !self.paths.insert(relative_path.to_path_buf()) {
            return Err(MutationError::DuplicateComponent {
                path: relative_path.to_path_buf(),
            });
        }
        Ok(())
    }

    /// Folder reached by following child indices from the root; `None` if the route
    /// leaves the tree or passes through a file
    fn folder_mut(&mut self, route: &[usize]) -> Option<&mut FolderNode<A>> {
        let mut folder = &mut self.root;
        for &index in route {
            folder = match folder.children.get_mut(index)? {
                ComponentNode::Folder(child) => child,
                ComponentNode::File(_) => return None,
            };
        }
        Some(folder)
    }
}

impl<A> FolderNode<A> {
    fn files_including_empty(&self) -> impl Iterator<Item = &FileNode<A>> {
        let mut out = Vec::new();
        let mut stack = vec![self];
        while let Some(folder) = stack.pop() {
            for child in &folder.children {
                match child {
                    ComponentNode::File(file) => out.push(file),
                    ComponentNode::Folder(sub) => stack.push(sub),
                }
            }
        }
        out.into_iter()
    }
}

/// Per-build context that places files into their folders.
///
/// Owns the folder lookup table for a single build invocation, so two builds in the
/// same process never share state.
pub struct TreeBuilder<A> {
    tree: ComponentTree<A>,
    /// Folder relative path -> child indices from the root
    folders: HashMap<PathBuf, Vec<usize>>,
}

impl<A> TreeBuilder<A> {
    pub fn new(project_root: impl Into<PathBuf>) -> Self {
        let mut folders = HashMap::new();
        folders.insert(PathBuf::new(), Vec::new());
        Self {
            tree: ComponentTree::new(project_root),
            folders,
        }
    }

    /// Create (if needed) every folder on the way to `relative_dir`
    pub fn ensure_folder(&mut self, relative_dir: &Path) -> Result<Vec<usize>> {
        if let Some(route) = self.folders.get(relative_dir) {
            return Ok(route.clone());
        }
        let parent = relative_dir.parent().unwrap_or_else(|| Path::new(""));
        let mut route = self.ensure_folder(parent)?;

        let full_path = self.tree.root.full_path.join(relative_dir);
        let parent_folder = self.folder_at(&route, parent)?;
        parent_folder.add(ComponentNode::Folder(FolderNode::new(
            full_path,
            relative_dir.to_path_buf(),
        )));
        route.push(parent_folder.children.len() - 1);

        self.folders.insert(relative_dir.to_path_buf(), route.clone());
        Ok(route)
    }

    fn folder_at(&mut self, route: &[usize], relative_dir: &Path) -> Result<&mut FolderNode<A>> {
        self.tree
            .folder_mut(route)
            .ok_or_else(|| MutationError::DuplicateComponent {
                path: relative_dir.to_path_buf(),
            })
    }

    /// Place a file under its parent folder, creating folders as needed
    pub fn add_file(&mut self, file: FileNode<A>) -> Result<()> {
        self.tree.claim(&file.relative_path)?;
        let dir = file
            .relative_path
            .parent()
            .unwrap_or_else(|| Path::new(""))
            .to_path_buf();
        let route = self.ensure_folder(&dir)?;
        self.folder_at(&route, &dir)?.add(ComponentNode::File(file));
        Ok(())
    }

    pub fn build(self) -> ComponentTree<A> {
        self.tree
    }
}
