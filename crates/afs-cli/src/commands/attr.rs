use afs::AppData;

pub fn run(
    app_data: &AppData,
    path: &str,
    name: Option<&str>,
) -> Result<(), Box<dyn std::error::Error>> {
    let (file_system, node) = app_data.resolve(path)?;
    let storage = file_system.storage();

    match name {
        Some(name) => match storage.string_attribute(&node, name)? {
            Some(value) => println!("{}", value),
            None => return Err(format!("attribute '{}' is not set on {}", name, path).into()),
        },
        None => {
            for name in storage.string_attribute_names(&node)? {
                let value = storage.string_attribute(&node, &name)?.unwrap_or_default();
                println!("{} = {}", name, value);
            }
        }
    }

    Ok(())
}
