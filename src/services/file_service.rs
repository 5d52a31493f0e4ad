use std::fs;
use std::path::{Path, PathBuf};

use crate::models::User;

const USER_FILE: &str = "user.json";

pub fn get_app_data_dir() -> Result<PathBuf, String> {
    let data_dir = dirs::data_dir()
        .ok_or("Could not find data directory")?
        .join("AnimaGen");

    if !data_dir.exists() {
        fs::create_dir_all(&data_dir).map_err(|e| e.to_string())?;
    }

    Ok(data_dir)
}

/// Parse a persisted identity, insisting on the minimal shape (a string id and a
/// boolean guest flag). Anything else counts as corruption.
pub fn parse_user(content: &str) -> Option<User> {
    serde_json::from_str::<User>(content).ok()
}

/// Read the persisted identity from `dir`. A missing file yields `None`; a
/// corrupted file is deleted and also yields `None`, never an error.
pub fn load_user_from(dir: &Path) -> Option<User> {
    let user_path = dir.join(USER_FILE);
    if !user_path.exists() {
        return None;
    }

    let content = match fs::read_to_string(&user_path) {
        Ok(content) => content,
        Err(e) => {
            tracing::warn!(error = %e, "Failed to read stored user");
            return None;
        }
    };

    match parse_user(&content) {
        Some(user) => Some(user),
        None => {
            tracing::warn!("Stored user is corrupted, discarding");
            let _ = fs::remove_file(&user_path);
            None
        }
    }
}

/// Write the identity wholesale, replacing whatever was stored before.
pub fn save_user_to(dir: &Path, user: &User) -> Result<(), String> {
    let content = serde_json::to_string_pretty(user)
        .map_err(|e| format!("Failed to serialize user: {}", e))?;
    fs::write(dir.join(USER_FILE), content)
        .map_err(|e| format!("Failed to write user: {}", e))
}

pub fn clear_user_in(dir: &Path) -> Result<(), String> {
    let user_path = dir.join(USER_FILE);
    if user_path.exists() {
        fs::remove_file(&user_path).map_err(|e| format!("Failed to remove user: {}", e))?;
    }
    Ok(())
}

pub fn load_user() -> Option<User> {
    load_user_from(&get_app_data_dir().ok()?)
}

pub fn save_user(user: &User) -> Result<(), String> {
    save_user_to(&get_app_data_dir()?, user)
}

pub fn clear_user() -> Result<(), String> {
    clear_user_in(&get_app_data_dir()?)
}
