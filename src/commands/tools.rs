//! 外部命令检查

use tracing::{debug, warn};

/// 返回 PATH 中找不到的命令
pub fn check_executables(names: &[&str]) -> Vec<String> {
    names
        .iter()
        .filter(|name| match which::which(name) {
            Ok(path) => {
                debug!("找到 {}: {}", name, path.display());
                false
            }
            Err(_) => {
                warn!("未找到外部命令: {}", name);
                true
            }
        })
        .map(|name| name.to_string())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_executable_reported() {
        let missing = check_executables(&["runsync-no-such-tool-xyz"]);
        assert_eq!(missing, vec!["runsync-no-such-tool-xyz".to_string()]);
        assert!(check_executables(&[]).is_empty());
    }
}
