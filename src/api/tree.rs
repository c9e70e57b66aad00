use std::collections::BTreeMap;

use serde::Serialize;

/// One node of the corpus file tree. Directory nodes aggregate the chunk
/// ids of every passage beneath them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TreeNode {
    pub name: String,
    pub path: String,
    pub is_dir: bool,
    pub chunk_ids: Vec<i64>,
    pub children: Vec<TreeNode>,
}

#[derive(Debug, Default)]
struct DirBuilder {
    chunk_ids: Vec<i64>,
    dirs: BTreeMap<String, DirBuilder>,
    files: BTreeMap<String, Vec<i64>>,
}

impl DirBuilder {
    fn insert(&mut self, components: &[&str], chunk_id: i64) {
        self.chunk_ids.push(chunk_id);
        match components {
            [] => {}
            [file] => self
                .files
                .entry((*file).to_string())
                .or_default()
                .push(chunk_id),
            [dir, rest @ ..] => self
                .dirs
                .entry((*dir).to_string())
                .or_default()
                .insert(rest, chunk_id),
        }
    }

    fn build(self, name: String, path: String) -> TreeNode {
        let mut children = Vec::with_capacity(self.dirs.len() + self.files.len());
        for (dir_name, builder) in self.dirs {
            let child_path = join_path(&path, &dir_name);
            children.push(builder.build(dir_name, child_path));
        }
        for (file_name, chunk_ids) in self.files {
            let child_path = join_path(&path, &file_name);
            children.push(TreeNode {
                name: file_name,
                path: child_path,
                is_dir: false,
                chunk_ids,
                children: Vec::new(),
            });
        }
        TreeNode {
            name,
            path,
            is_dir: true,
            chunk_ids: self.chunk_ids,
            children,
        }
    }
}

fn join_path(base: &str, name: &str) -> String {
    if base.is_empty() {
        name.to_string()
    } else {
        format!("{base}/{name}")
    }
}

/// Group `(file_path, chunk_id)` rows into a directory trie. Children are
/// sorted by name, directories before files at each level.
pub fn build_file_tree(rows: &[(String, i64)]) -> TreeNode {
    let mut root = DirBuilder::default();
    for (path, chunk_id) in rows {
        let components: Vec<&str> = path.split('/').filter(|c| !c.is_empty()).collect();
        root.insert(&components, *chunk_id);
    }
    root.build(String::new(), String::new())
}

#[cfg(test)]
mod tree_tests {
    use super::*;

    fn rows(data: &[(&str, i64)]) -> Vec<(String, i64)> {
        data.iter().map(|(p, id)| (p.to_string(), *id)).collect()
    }

    #[test]
    fn flat_files_sorted_by_name() {
        let tree = build_file_tree(&rows(&[("b.md", 2), ("a.md", 1)]));
        assert!(tree.is_dir);
        assert_eq!(tree.chunk_ids, vec![2, 1]);
        let names: Vec<&str> = tree.children.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["a.md", "b.md"]);
    }

    #[test]
    fn directories_aggregate_descendant_chunks() {
        let tree = build_file_tree(&rows(&[
            ("dir/sub/a.md", 1),
            ("dir/sub/a.md", 2),
            ("dir/b.md", 3),
            ("top.md", 4),
        ]));

        let dir = tree.children.iter().find(|c| c.name == "dir").unwrap();
        assert!(dir.is_dir);
        assert_eq!(dir.chunk_ids.len(), 3);

        let sub = dir.children.iter().find(|c| c.name == "sub").unwrap();
        assert_eq!(sub.path, "dir/sub");
        let file = sub.children.iter().find(|c| c.name == "a.md").unwrap();
        assert_eq!(file.chunk_ids, vec![1, 2]);
        assert!(!file.is_dir);
    }

    #[test]
    fn directories_precede_files() {
        let tree = build_file_tree(&rows(&[("z.md", 1), ("a/inner.md", 2)]));
        assert_eq!(tree.children[0].name, "a");
        assert!(tree.children[0].is_dir);
        assert_eq!(tree.children[1].name, "z.md");
    }

    #[test]
    fn empty_corpus_is_empty_root() {
        let tree = build_file_tree(&[]);
        assert!(tree.children.is_empty());
        assert!(tree.chunk_ids.is_empty());
    }
}
