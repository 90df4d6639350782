use dynoscale::{AutoscaleConfig, FailureFallback, ProcessSettings, StoreConfig};

pub fn check(config: &AutoscaleConfig) -> anyhow::Result<()> {
    let settings = config.process_settings()?;
    let (update, shutdown) = config.poll_delays()?;

    println!("store: {}", describe_store(&config.store));
    println!(
        "poll: update {:?}/{:?}, shutdown {:?}/{:?}",
        update.before, update.after, shutdown.before, shutdown.after
    );
    for process in &settings {
        println!("{}", describe_process(process));
    }
    println!("✓ {} process(es) configured", settings.len());
    Ok(())
}

fn describe_store(store: &StoreConfig) -> String {
    match store {
        StoreConfig::Redis { url } => format!("redis ({url})"),
        StoreConfig::Redb { path } => format!("redb ({})", path.display()),
        StoreConfig::Memory => "memory (not shared)".to_string(),
    }
}

fn describe_process(process: &ProcessSettings) -> String {
    let fallback = match process.on_failure {
        FailureFallback::Zero => "zero",
        FailureFallback::Unchanged => "unchanged",
    };
    format!(
        "{}/{}: queues [{}], active {} dyno(s), throttle {:?}, quiet buffer {:?}, on failure {}",
        process.app_name,
        process.name,
        process.queues.join(", "),
        process.active_dynos,
        process.throttle_window,
        process.quiet_buffer,
        fallback,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use std::time::Duration;

    #[test]
    fn describes_process_settings() {
        let mut process = ProcessSettings::new("test-this", "worker").with_queues(["default", "mailers"]);
        process.throttle_window = Duration::from_secs(15);

        assert_eq!(
            describe_process(&process),
            "test-this/worker: queues [default, mailers], active 1 dyno(s), \
             throttle 15s, quiet buffer 10s, on failure zero"
        );
    }

    #[test]
    fn describes_sub_second_windows() {
        let mut process = ProcessSettings::new("test-this", "worker");
        process.throttle_window = Duration::from_millis(500);

        assert!(describe_process(&process).contains("throttle 500ms, quiet buffer 10s"));
    }

    #[test]
    fn check_accepts_config_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dynoscale.toml");
        std::fs::write(
            &path,
            "[[process]]\napp_name = \"test-this\"\nname = \"worker\"\nqueues = [\"default\"]\n",
        )
        .unwrap();

        let config = AutoscaleConfig::from_file(&path).unwrap();
        assert!(check(&config).is_ok());
    }

    #[test]
    fn describes_stores() {
        assert_eq!(
            describe_store(&StoreConfig::Redb {
                path: PathBuf::from("/tmp/x.redb")
            }),
            "redb (/tmp/x.redb)"
        );
        assert_eq!(describe_store(&StoreConfig::Memory), "memory (not shared)");
    }

    #[test]
    fn check_rejects_invalid_config() {
        let mut config = AutoscaleConfig::default();
        config.defaults.throttle = Some("whenever".into());
        assert!(check(&config).is_err());
    }
}
