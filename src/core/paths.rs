//! 路径映射工具

use std::path::{Component, Path, PathBuf};

/// 归档目录后缀
pub const INGESTED_SUFFIX: &str = "-INGESTED";

/// `<parent>/<name>` -> `<parent>-INGESTED/<name>`
///
/// 没有上级目录或文件名时返回 `None`。
pub fn to_ingested_path(path: impl AsRef<Path>) -> Option<PathBuf> {
    let path = path.as_ref();
    let name = path.file_name()?;
    let parent = path.parent()?;
    let parent_name = parent.file_name()?;

    let mut archived = parent_name.to_os_string();
    archived.push(INGESTED_SUFFIX);
    Some(parent.with_file_name(archived).join(name))
}

/// 数据对象所属运行文件夹的远程集合
///
/// `path` 是源目录 `root` 下的本地文件，`target` 是该文件对应的远程对象路径。
/// 去掉运行文件夹内的相对路径后缀即为集合路径。
pub fn run_collection_for(path: &Path, root: &Path, target: &str) -> Option<String> {
    let relative = path.strip_prefix(root).ok()?;
    let mut components = relative.components().filter(|c| matches!(c, Component::Normal(_)));
    components.next()?;

    let suffix = components
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/");
    if suffix.is_empty() {
        // 事件落在运行文件夹本身
        return Some(target.trim_end_matches('/').to_string());
    }

    target
        .trim_end_matches('/')
        .strip_suffix(&suffix)
        .and_then(|rest| rest.strip_suffix('/'))
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_to_ingested_path() {
        assert_eq!(
            to_ingested_path("foo/bar"),
            Some(PathBuf::from("foo-INGESTED/bar"))
        );
        assert_eq!(
            to_ingested_path(PathBuf::from("/data/runs/RUN1")),
            Some(PathBuf::from("/data/runs-INGESTED/RUN1"))
        );
        assert_eq!(to_ingested_path("bar"), None);
    }

    #[test]
    fn test_run_collection_for() {
        let root = Path::new("/data/runs");
        assert_eq!(
            run_collection_for(
                Path::new("/data/runs/RUN1/Data/x.bcl"),
                root,
                "/zone/runs/RUN1/Data/x.bcl"
            ),
            Some("/zone/runs/RUN1".to_string())
        );
        assert_eq!(
            run_collection_for(Path::new("/data/runs/RUN1"), root, "/zone/runs/RUN1"),
            Some("/zone/runs/RUN1".to_string())
        );
        assert_eq!(
            run_collection_for(Path::new("/elsewhere/x"), root, "/zone/x"),
            None
        );
    }
}
