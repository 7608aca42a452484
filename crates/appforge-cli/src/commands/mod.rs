//! CLI command implementations.

pub mod builds;

use anyhow::Result;
use appforge_config::{SystemConfig, load_system_config};

pub fn validate(path: &str) -> Result<()> {
    match load_system_config(path) {
        Ok(config) => {
            println!("Configuration is valid");
            print_summary(&config);
            Ok(())
        }
        Err(e) => {
            println!("Configuration error: {}", e);
            std::process::exit(1);
        }
    }
}

fn print_summary(config: &SystemConfig) {
    println!("  listen:       {}", config.server.listen);
    println!("  artifacts:    {}", config.artifacts.root.display());
    println!("  reconcile:    every {:?}", config.reconciler.interval);
    match &config.image_build {
        Some(image) => println!("  image build:  {} -> {}", image.endpoint, image.repository),
        None => println!("  image build:  disabled"),
    }
    println!(
        "  deployer:     {}",
        config.deployer.endpoint.as_deref().unwrap_or("disabled")
    );
    println!(
        "  generator:    {} {}",
        config.generator.command,
        config.generator.args.join(" ")
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_validate_accepts_config_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"server listen="127.0.0.1:4000"
reconciler interval-secs=5
generator command="dsg""#
        )
        .unwrap();

        let path = file.path().to_str().unwrap().to_string();
        assert!(validate(&path).is_ok());
    }
}
