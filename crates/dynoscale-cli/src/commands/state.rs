use anyhow::{Context, bail};
use serde_json::json;

use dynoscale::process::cache_key;
use dynoscale::{AutoscaleConfig, ProcessSettings};
use dynoscale_state::{Record, SharedStateStore};

const FIELDS: [&str; 4] = ["dynos", "quieted_to", "quieted_at", "updated_at"];

struct ProcessRecord {
    process: String,
    cache_key: String,
    record: Record,
}

pub async fn show(config: &AutoscaleConfig, only: Option<&str>, format: &str) -> anyhow::Result<()> {
    let settings = config.process_settings()?;
    let store = config.store.open().await.context("opening state store")?;
    let records = collect(store.as_ref(), &settings, only).await?;

    match format {
        "json" => {
            let out: Vec<_> = records
                .iter()
                .map(|r| json!({ "process": r.process, "cache_key": r.cache_key, "record": r.record }))
                .collect();
            println!("{}", serde_json::to_string_pretty(&out)?);
        }
        _ => {
            for r in &records {
                println!("{}", format_record(r));
            }
        }
    }
    Ok(())
}

pub async fn clear(config: &AutoscaleConfig, process: &str) -> anyhow::Result<()> {
    let settings = config.process_settings()?;
    let store = config.store.open().await.context("opening state store")?;
    let key = key_for(&settings, process)?;

    if store.clear(&key).await? {
        tracing::info!(%process, %key, "shared record cleared");
        println!("✓ Cleared {key}");
    } else {
        println!("No record at {key}");
    }
    Ok(())
}

fn key_for(settings: &[ProcessSettings], process: &str) -> anyhow::Result<String> {
    match settings.iter().find(|s| s.name == process) {
        Some(s) => Ok(cache_key(&s.app_name, &s.name)),
        None => bail!("no process named {process} in configuration"),
    }
}

async fn collect(
    store: &dyn SharedStateStore,
    settings: &[ProcessSettings],
    only: Option<&str>,
) -> anyhow::Result<Vec<ProcessRecord>> {
    if let Some(name) = only {
        key_for(settings, name)?;
    }

    let mut out = Vec::new();
    for s in settings.iter().filter(|s| only.is_none_or(|name| s.name == name)) {
        let key = cache_key(&s.app_name, &s.name);
        let record = store.read(&key).await?;
        out.push(ProcessRecord {
            process: s.name.clone(),
            cache_key: key,
            record,
        });
    }
    Ok(out)
}

fn format_record(r: &ProcessRecord) -> String {
    let fields: Vec<String> = FIELDS
        .iter()
        .map(|field| {
            let value = r.record.get(*field).map(String::as_str).unwrap_or("-");
            format!("{field}={value}")
        })
        .collect();
    format!("{} ({}): {}", r.process, r.cache_key, fields.join(" "))
}
