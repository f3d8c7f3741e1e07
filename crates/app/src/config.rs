//! Settings persistence and file locations.

use directories::ProjectDirs;
use shared::settings::ChatSettings;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Overrides the budget file location.
pub const BUDGET_FILE_ENV: &str = "DUAL_CHAT_BUDGET_FILE";
/// Overrides the completion API base URL.
pub const BASE_URL_ENV: &str = "OPENAI_BASE_URL";

fn project_dirs() -> Option<ProjectDirs> {
    ProjectDirs::from("com.local", "Dual Chat", "DualLLMChat")
}

pub fn config_path() -> Option<PathBuf> {
    let proj = project_dirs()?;
    let _ = fs::create_dir_all(proj.config_dir());
    Some(proj.config_dir().join("settings.json"))
}

pub fn load_settings_or_default() -> ChatSettings {
    config_path()
        .and_then(|path| load_settings_from(&path))
        .unwrap_or_default()
}

/// Read settings from `path`. Returns `None` if the file is missing or
/// can't be parsed.
pub fn load_settings_from(path: &Path) -> Option<ChatSettings> {
    let bytes = fs::read(path).ok()?;
    match serde_json::from_slice::<ChatSettings>(&bytes) {
        Ok(mut settings) => {
            settings.normalize();
            debug!("loaded settings from {}", path.display());
            Some(settings)
        }
        Err(e) => {
            warn!("ignoring unreadable settings file {}: {}", path.display(), e);
            None
        }
    }
}

/// Save settings to disk
pub fn save_settings(settings: &ChatSettings) {
    if let Some(path) = config_path() {
        if let Err(e) = save_settings_to(&path, settings) {
            warn!("could not save settings: {}", e);
        }
    }
}

pub fn save_settings_to(path: &Path, settings: &ChatSettings) -> anyhow::Result<()> {
    let bytes = serde_json::to_vec_pretty(settings)?;
    fs::write(path, bytes)?;
    Ok(())
}

pub fn apply_env_overrides(settings: &mut ChatSettings) {
    if let Some(url) = non_empty_env(BASE_URL_ENV) {
        settings.openai_base_url = Some(url);
    }
    if let Some(path) = non_empty_env(BUDGET_FILE_ENV) {
        settings.budget.file = Some(PathBuf::from(path));
    }
}

fn non_empty_env(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

/// Where the budget ledger lives: explicit setting, else the per-user
/// data dir, else the working directory.
pub fn budget_file(settings: &ChatSettings) -> PathBuf {
    if let Some(path) = &settings.budget.file {
        return path.clone();
    }
    match project_dirs() {
        Some(proj) => proj.data_dir().join("budget.json"),
        None => PathBuf::from("budget.json"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_save_then_load() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("settings.json");
        let mut settings = ChatSettings::default();
        settings.selected_cloud = "gpt-3.5-turbo".into();
        settings.local_enabled = false;
        save_settings_to(&path, &settings).unwrap();

        let loaded = load_settings_from(&path).unwrap();
        assert_eq!(loaded.selected_cloud, "gpt-3.5-turbo");
        assert!(!loaded.local_enabled);
    }

    #[test]
    fn test_garbage_file_is_ignored() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("settings.json");
        fs::write(&path, b"{{{").unwrap();
        assert!(load_settings_from(&path).is_none());
        assert!(load_settings_from(&dir.path().join("missing.json")).is_none());
    }

    #[test]
    fn test_loaded_settings_are_normalized() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("settings.json");
        let mut settings = ChatSettings::default();
        settings.max_tokens = 99_999;
        settings.temperature = -2.0;
        save_settings_to(&path, &settings).unwrap();

        let loaded = load_settings_from(&path).unwrap();
        assert_eq!(loaded.max_tokens, 3000);
        assert_eq!(loaded.temperature, 0.0);
    }

    #[test]
    fn test_explicit_budget_file_wins() {
        let mut settings = ChatSettings::default();
        settings.budget.file = Some(PathBuf::from("/tmp/my-budget.json"));
        assert_eq!(budget_file(&settings), PathBuf::from("/tmp/my-budget.json"));
    }
}
