use afs::AppData;

pub fn run(app_data: &AppData, path: &str) -> Result<(), Box<dyn std::error::Error>> {
    let (file_system, node) = app_data.resolve(path)?;
    let storage = file_system.storage();
    let info = storage.node_info(&node)?;

    println!("Id:          {}", info.id);
    println!("Name:        {}", info.name);
    println!("Class:       {}", info.pseudo_class);
    if !info.description.is_empty() {
        println!("Description: {}", info.description);
    }
    println!("Version:     {}", info.version);
    println!("Created:     {}", info.creation_time.format("%Y-%m-%d %H:%M:%S%.3f UTC"));
    println!("Modified:    {}", info.modification_time.format("%Y-%m-%d %H:%M:%S%.3f UTC"));
    println!("Writable:    {}", storage.is_writable(&node)?);

    if !info.metadata.is_empty() {
        println!("Metadata:    {}", serde_json::to_string(&info.metadata)?);
    }

    let data_names = storage.data_names(&node)?;
    if !data_names.is_empty() {
        println!("Data:");
        for name in data_names {
            let size = storage
                .read_binary_data(&node, &name)?
                .map(|bytes| bytes.len())
                .unwrap_or_default();
            println!("  {} ({} bytes)", name, size);
        }
    }

    Ok(())
}
