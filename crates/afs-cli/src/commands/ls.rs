use afs::AppData;

use super::describe;

pub fn run(app_data: &AppData, path: &str) -> Result<(), Box<dyn std::error::Error>> {
    let (file_system, node) = app_data.resolve(path)?;
    let storage = file_system.storage();

    let children = storage.child_nodes(&node)?;
    if children.is_empty() {
        println!("(empty)");
        return Ok(());
    }

    for child in children {
        println!("{}", describe(&storage.node_info(&child)?));
    }

    Ok(())
}
