use afs::AppData;

pub fn run(app_data: &AppData) -> Result<(), Box<dyn std::error::Error>> {
    if app_data.file_system_names().is_empty() {
        println!("(no drives)");
        return Ok(());
    }

    for file_system in app_data.file_systems() {
        let remote = if file_system.is_remotely_accessible() {
            "remote"
        } else {
            "local"
        };
        let writable = if file_system
            .storage()
            .is_writable(&file_system.root_node())?
        {
            "rw"
        } else {
            "ro"
        };
        println!("{:<16} {}  {}", file_system.name(), writable, remote);
    }

    Ok(())
}
