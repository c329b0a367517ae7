use directories::ProjectDirs;
use std::path::{Path, PathBuf};

pub const APP_QUALIFIER: &str = "com";
pub const APP_ORG: &str = "darklock";
pub const APP_NAME: &str = "custody";

pub const DATA_DIR_ENV: &str = "CUSTODY_DATA_DIR";

pub const STORE_FILE: &str = "custody.json";
pub const SETTINGS_FILE: &str = "settings.json";

pub fn data_dir() -> anyhow::Result<PathBuf> {
    if let Ok(override_path) = std::env::var(DATA_DIR_ENV) {
        return Ok(PathBuf::from(override_path));
    }
    let dirs = ProjectDirs::from(APP_QUALIFIER, APP_ORG, APP_NAME)
        .ok_or_else(|| anyhow::anyhow!("cannot determine data directory"))?;
    Ok(dirs.data_dir().to_path_buf())
}

pub fn store_path_in(dir: &Path) -> PathBuf {
    dir.join(STORE_FILE)
}

pub fn settings_path_in(dir: &Path) -> PathBuf {
    dir.join(SETTINGS_FILE)
}

pub fn store_path() -> anyhow::Result<PathBuf> {
    Ok(store_path_in(&data_dir()?))
}

pub fn settings_path() -> anyhow::Result<PathBuf> {
    Ok(settings_path_in(&data_dir()?))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn files_live_in_the_data_dir() {
        let dir = Path::new("/tmp/custody");
        assert_eq!(store_path_in(dir), dir.join("custody.json"));
        assert_eq!(settings_path_in(dir), dir.join("settings.json"));
    }
}
