use std::path::{Path, PathBuf};

const DEFAULT_CONF_DIR_NAME: &str = ".polychat";

/// Absolute configuration directory: `--conf-dir` when given (a leading
/// `~` component is the home directory), otherwise `~/.polychat`.
pub fn resolve_conf_dir(conf_dir: Option<&Path>) -> Result<PathBuf, String> {
    let path = resolve_with_home(conf_dir, home_dir())?;
    if path.is_absolute() {
        return Ok(path);
    }
    std::env::current_dir()
        .map(|cwd| cwd.join(&path))
        .map_err(|error| format!("resolve conf dir {} failed: {error}", path.display()))
}

fn resolve_with_home(conf_dir: Option<&Path>, home: Option<PathBuf>) -> Result<PathBuf, String> {
    let require_home =
        || home.clone().ok_or_else(|| "cannot locate home directory; pass --conf-dir".to_string());

    match conf_dir {
        None => Ok(require_home()?.join(DEFAULT_CONF_DIR_NAME)),
        Some(path) => match path.strip_prefix("~") {
            Ok(rest) if rest.as_os_str().is_empty() => require_home(),
            Ok(rest) => Ok(require_home()?.join(rest)),
            Err(_) => Ok(path.to_path_buf()),
        },
    }
}

fn home_dir() -> Option<PathBuf> {
    ["HOME", "USERPROFILE"]
        .into_iter()
        .filter_map(std::env::var_os)
        .find(|value| !value.is_empty())
        .map(PathBuf::from)
}
