use serde::{Serialize, de::DeserializeOwned};
use std::path::{Path, PathBuf};
use tokio::fs;

// STORAGE MANAGER

pub struct AsyncStorageManager {
    // Directory every artifact is written to (e.g., the site's public folder)
    pub base_dir: PathBuf,
}

impl AsyncStorageManager {
    /// **Constructor: new**
    /// Creates the directory immediately, so later saves never have to check
    /// whether it exists.
    pub async fn new<P: AsRef<Path>>(base_dir: P) -> anyhow::Result<Self> {
        let base_dir = base_dir.as_ref().to_path_buf();
        if !base_dir.exists() {
            fs::create_dir_all(&base_dir).await?;
        }
        Ok(Self { base_dir })
    }

    pub fn path_for(&self, filename: &str) -> PathBuf {
        self.base_dir.join(format!("{}.json", filename))
    }

    /// **Generic Save Function**
    /// Takes any struct that implements `Serialize` and saves it to a JSON file.
    /// Implements an "Atomic Write" strategy so the front-end never reads a
    /// half-written file.
    pub async fn save<T: Serialize>(&self, filename: &str, data: &T) -> anyhow::Result<PathBuf> {
        let final_path = self.path_for(filename);

        // We write to a .tmp file first. If the program crashes while writing,
        // the original file remains untouched and valid.
        let tmp_path = self.base_dir.join(format!("{}.json.tmp", filename));

        let json_bytes = serde_json::to_vec_pretty(data)?;

        // 1. Write data to the temporary file
        fs::write(&tmp_path, json_bytes).await?;

        // 2. Atomically rename the temp file to the final name.
        fs::rename(&tmp_path, &final_path).await?;

        Ok(final_path)
    }

    /// **Generic Load Function**
    /// Reads the file and deserializes it into `T`.
    pub async fn load<T: DeserializeOwned>(&self, filename: &str) -> anyhow::Result<T> {
        // Read directly into bytes (`Vec<u8>`) instead of a String;
        // serde_json validates UTF-8 while parsing anyway.
        let content = fs::read(self.path_for(filename)).await?;
        let data = serde_json::from_slice(&content)?;
        Ok(data)
    }
}
