use std::path::Path;

use afs::AppData;
use afs_core::StorageArchive;

pub fn run(app_data: &AppData, path: &str, dir: &Path) -> Result<(), Box<dyn std::error::Error>> {
    let (file_system, node) = app_data.resolve(path)?;
    let archived = StorageArchive::new(file_system.storage().as_ref()).archive(&node, dir)?;
    println!("Archived {} to {}", path, archived.display());
    Ok(())
}
