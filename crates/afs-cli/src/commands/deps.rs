use afs::AppData;

use super::display_path;

pub fn run(app_data: &AppData, path: &str) -> Result<(), Box<dyn std::error::Error>> {
    let (file_system, node) = app_data.resolve(path)?;
    let storage = file_system.storage();

    let dependencies = storage.dependencies(&node)?;
    let backward = storage.backward_dependencies(&node)?;
    if dependencies.is_empty() && backward.is_empty() {
        println!("(no dependencies)");
        return Ok(());
    }

    for dependency in dependencies {
        println!(
            "-> {:<16} {}",
            dependency.name,
            display_path(file_system, &dependency.node)
        );
    }
    for source in backward {
        println!("<- {:<16} {}", "", display_path(file_system, &source));
    }

    Ok(())
}
