use afs::AppData;
use afs_core::{AppFileSystemStorage, NodeId};

pub fn run(
    app_data: &AppData,
    path: &str,
    max_depth: Option<usize>,
) -> Result<(), Box<dyn std::error::Error>> {
    let (file_system, node) = app_data.resolve(path)?;
    let max_depth = max_depth.unwrap_or(usize::MAX);

    println!("{}", path);
    print_tree(file_system.storage().as_ref(), &node, "", 0, max_depth)?;

    Ok(())
}

fn print_tree(
    storage: &dyn AppFileSystemStorage,
    node: &NodeId,
    prefix: &str,
    depth: usize,
    max_depth: usize,
) -> Result<(), Box<dyn std::error::Error>> {
    if depth >= max_depth {
        return Ok(());
    }

    let children = storage.child_nodes(node)?;
    let count = children.len();
    for (i, child) in children.iter().enumerate() {
        let is_last = i == count - 1;
        let connector = if is_last { "└── " } else { "├── " };
        let info = storage.node_info(child)?;

        if info.pseudo_class.is_folder() {
            println!("{}{}{}", prefix, connector, info.name);
        } else {
            println!("{}{}{} [{}]", prefix, connector, info.name, info.pseudo_class);
        }

        let new_prefix = format!("{}{}", prefix, if is_last { "    " } else { "│   " });
        print_tree(storage, child, &new_prefix, depth + 1, max_depth)?;
    }

    Ok(())
}
