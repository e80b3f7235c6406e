//! `sloserve config` command implementation

use colored::Colorize;
use sloserve_kernel::SloServeConfig;

/// Execute the `sloserve config show` command
pub fn run_show(config: &SloServeConfig) -> anyhow::Result<()> {
    print!("{}", serde_yaml::to_string(config)?);
    Ok(())
}

/// Execute the `sloserve config validate` command
pub fn run_validate(config: &SloServeConfig) -> anyhow::Result<()> {
    match config.validate() {
        Ok(()) => {
            let variants: usize = config.applications.values().map(Vec::len).sum();
            println!(
                "{} {} application(s), {} local variant(s), placement {}",
                "valid".green().bold(),
                config.applications.len(),
                variants,
                serde_yaml::to_string(&config.placement)?.trim(),
            );
            Ok(())
        }
        Err(err) => {
            println!("{} {}", "invalid".red().bold(), err);
            Err(err.into())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::demo_config;

    #[test]
    fn test_validate_accepts_demo_config() {
        run_validate(&demo_config()).unwrap();
    }

    #[test]
    fn test_validate_rejects_empty_config() {
        assert!(run_validate(&SloServeConfig::default()).is_err());
    }

    #[test]
    fn test_show_round_trips_through_yaml() {
        let yaml = serde_yaml::to_string(&demo_config()).unwrap();
        let parsed: SloServeConfig = serde_yaml::from_str(&yaml).unwrap();
        assert_eq!(parsed, demo_config());
        run_show(&demo_config()).unwrap();
    }
}
