use std::path::Path;

use stackgrid_provider::LocalProvider;
use stackgrid_state::StateStore;

pub mod scale;
pub mod stack;

const STATE_FILE: &str = "stackgrid.redb";

/// Open the local provider under `data_dir`, creating the directory.
pub fn open_provider(data_dir: &Path) -> anyhow::Result<LocalProvider> {
    std::fs::create_dir_all(data_dir)?;
    let store = StateStore::open(&data_dir.join(STATE_FILE))?;
    Ok(LocalProvider::new(store))
}

/// Parse `KEY=VALUE`.
pub fn parse_dimension(s: &str) -> Result<(String, String), String> {
    match s.split_once('=') {
        Some((key, value)) if !key.is_empty() => Ok((key.to_string(), value.to_string())),
        _ => Err(format!("expected KEY=VALUE, got {s:?}")),
    }
}
