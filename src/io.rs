//! File-system helpers shared by the stages.

use std::collections::BTreeSet;
use std::fs;
use std::path::Path;
use std::process;
use std::sync::atomic::{AtomicUsize, Ordering};

use anyhow::Context;
use camino::{Utf8Path, Utf8PathBuf};
use glob::{Pattern, glob};

/// Expands glob patterns into a sorted, de-duplicated list of files,
/// skipping anything matched by `exclude`.
pub fn expand(patterns: &[String], exclude: &[String]) -> anyhow::Result<Vec<Utf8PathBuf>> {
    let exclude = exclude
        .iter()
        .map(|p| Pattern::new(p).with_context(|| format!("invalid pattern '{p}'")))
        .collect::<anyhow::Result<Vec<_>>>()?;

    let mut paths = BTreeSet::new();
    for pattern in patterns {
        for path in glob(pattern).with_context(|| format!("invalid pattern '{pattern}'"))? {
            let path = Utf8PathBuf::try_from(path?)?;
            if !path.is_file() {
                continue;
            }
            if exclude.iter().any(|p| p.matches_path(path.as_std_path())) {
                continue;
            }
            paths.insert(path);
        }
    }

    Ok(paths.into_iter().collect())
}

/// Writes `data` to `path`, creating parent directories as needed.
///
/// The data goes to a sibling file first and is renamed into place, so a
/// concurrent reader sees either the old or the new contents in full.
pub fn write(path: &Utf8Path, data: impl AsRef<[u8]>) -> anyhow::Result<()> {
    static COUNTER: AtomicUsize = AtomicUsize::new(0);

    if let Some(dir) = path.parent() {
        fs::create_dir_all(dir).with_context(|| format!("couldn't create directory {dir}"))?;
    }

    let name = path.file_name().unwrap_or("out");
    let n = COUNTER.fetch_add(1, Ordering::Relaxed);
    let temp = path.with_file_name(format!(".{name}.{}-{n}.tmp", process::id()));

    fs::write(&temp, data).with_context(|| format!("couldn't write {temp}"))?;
    fs::rename(&temp, path).map_err(|e| {
        fs::remove_file(&temp).ok();
        anyhow::Error::new(e).context(format!("couldn't move {temp} to {path}"))
    })
}

/// Copies `src` to `dst`, creating parent directories as needed.
pub fn copy(src: &Utf8Path, dst: &Utf8Path) -> anyhow::Result<()> {
    if let Some(dir) = dst.parent() {
        fs::create_dir_all(dir).with_context(|| format!("couldn't create directory {dir}"))?;
    }
    fs::copy(src, dst).with_context(|| format!("couldn't copy {src} to {dst}"))?;
    Ok(())
}

/// Lists every file below `root`, recursively.
pub fn walk(root: &Utf8Path) -> anyhow::Result<Vec<Utf8PathBuf>> {
    fn walk_rec(dir: &Path, acc: &mut Vec<Utf8PathBuf>) -> anyhow::Result<()> {
        for entry in fs::read_dir(dir)? {
            let entry = entry?;
            if entry.file_type()?.is_dir() {
                walk_rec(&entry.path(), acc)?;
            } else {
                acc.push(Utf8PathBuf::try_from(entry.path())?);
            }
        }
        Ok(())
    }

    let mut acc = Vec::new();
    walk_rec(root.as_std_path(), &mut acc).with_context(|| format!("couldn't read {root}"))?;
    acc.sort();
    Ok(acc)
}

/// Maps a file below the public root to the URL it is served under.
pub fn href(path: &Utf8Path, root: &Utf8Path) -> String {
    let relative = path.strip_prefix(root).unwrap_or(path);
    let mut href = String::from("/");
    href.push_str(
        &relative
            .components()
            .map(|c| c.as_str())
            .collect::<Vec<_>>()
            .join("/"),
    );
    href
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tree() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        fs::create_dir_all(root.join("templates/_includes")).unwrap();
        fs::write(root.join("templates/index.html"), "index").unwrap();
        fs::write(root.join("templates/about.html"), "about").unwrap();
        fs::write(root.join("templates/_includes/nav.html"), "nav").unwrap();
        dir
    }

    fn pattern(dir: &tempfile::TempDir, suffix: &str) -> String {
        format!("{}/{suffix}", dir.path().display())
    }

    #[test]
    fn expand_sorts_and_excludes() {
        let dir = tree();
        let files = expand(
            &[pattern(&dir, "templates/**/*.html")],
            &[pattern(&dir, "templates/_includes/*")],
        )
        .unwrap();

        let names: Vec<_> = files.iter().map(|p| p.file_name().unwrap()).collect();
        assert_eq!(names, ["about.html", "index.html"]);
    }

    #[test]
    fn expand_deduplicates_overlapping_patterns() {
        let dir = tree();
        let files = expand(
            &[
                pattern(&dir, "templates/*.html"),
                pattern(&dir, "templates/index.html"),
            ],
            &[],
        )
        .unwrap();
        assert_eq!(files.len(), 2);
    }

    #[test]
    fn write_creates_parents_and_walk_finds_it() {
        let dir = tempfile::tempdir().unwrap();
        let root = Utf8PathBuf::try_from(dir.path().to_path_buf()).unwrap();

        write(&root.join("a/b/c.txt"), "hello").unwrap();
        write(&root.join("a/d.txt"), "world").unwrap();

        let files = walk(&root).unwrap();
        assert_eq!(files, [root.join("a/b/c.txt"), root.join("a/d.txt")]);
    }

    #[test]
    fn write_leaves_no_temporary_files() {
        let dir = tempfile::tempdir().unwrap();
        let root = Utf8PathBuf::try_from(dir.path().to_path_buf()).unwrap();

        write(&root.join("index.html"), "one").unwrap();
        write(&root.join("index.html"), "two").unwrap();

        assert_eq!(walk(&root).unwrap(), [root.join("index.html")]);
        assert_eq!(fs::read_to_string(root.join("index.html")).unwrap(), "two");
    }

    #[test]
    fn concurrent_readers_never_see_partial_writes() {
        const SIZE: usize = 1 << 20;

        let dir = tempfile::tempdir().unwrap();
        let page = Utf8PathBuf::try_from(dir.path().join("index.html")).unwrap();
        write(&page, vec![b'a'; SIZE]).unwrap();

        let done = std::sync::atomic::AtomicBool::new(false);
        let torn = std::thread::scope(|s| {
            s.spawn(|| {
                for i in 0..50 {
                    let byte = if i % 2 == 0 { b'b' } else { b'a' };
                    write(&page, vec![byte; SIZE]).unwrap();
                }
                done.store(true, Ordering::SeqCst);
            });

            let reader = s.spawn(|| {
                let mut torn = 0;
                while !done.load(Ordering::SeqCst) {
                    let data = fs::read(&page).unwrap();
                    let whole = data.len() == SIZE && data.iter().all(|b| *b == data[0]);
                    if !whole {
                        torn += 1;
                    }
                }
                torn
            });

            reader.join().unwrap()
        });

        assert_eq!(torn, 0);
    }

    #[test]
    fn href_is_relative_to_root() {
        assert_eq!(
            href(Utf8Path::new("dist/assets/css/style.css"), Utf8Path::new("dist")),
            "/assets/css/style.css"
        );
        assert_eq!(
            href(Utf8Path::new("dist/index.html"), Utf8Path::new("dist")),
            "/index.html"
        );
    }
}
