use std::path::PathBuf;

use anyhow::Context;

/// Directory that receives episodes and season archives.
///
/// Falls back from the user's download directory to the working directory.
pub(crate) async fn get_save_directory(custom_save_directory: Option<PathBuf>) -> Result<PathBuf, anyhow::Error> {
    if let Some(directory) = custom_save_directory {
        tokio::fs::create_dir_all(&directory)
            .await
            .with_context(|| format!("failed to create output directory {}", directory.display()))?;
        return Ok(directory);
    }

    match dirs::download_dir() {
        Some(directory) if directory.is_dir() => Ok(directory),
        _ => std::env::current_dir().context("failed to get current working directory"),
    }
}
