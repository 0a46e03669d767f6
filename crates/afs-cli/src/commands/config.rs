use afs_config::AfsConfig;

pub fn run(config: &AfsConfig) -> Result<(), Box<dyn std::error::Error>> {
    config.validate_or_err()?;
    println!("{}", config.effective().to_yaml()?);
    Ok(())
}
