mod cli;

use crate::cli::{Command, StorageBackendArg, CLI};
use clap::Parser;
use detour_core::{AddRedirection, Redirection, RedirectionStorage, StatusCode};
use detour_engine::{EngineConfig, RedirectionEngine};
use detour_storage::{InMemoryRepository, MySqlRepository, Repository};
use std::error::Error;
use std::io::Write;
use std::path::Path;
use tracing::{debug, info};

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    let config = CLI::parse();
    detour_telemetry::init(config.log_format.into())?;

    info!(
        storage_backend = %config.storage,
        default_status_code = config.default_status_code,
        log_format = %config.log_format,
        "starting detour"
    );

    let engine_config = EngineConfig::builder()
        .default_status_code(StatusCode::new(config.default_status_code)?)
        .build();

    match config.storage {
        StorageBackendArg::InMemory => {
            run(InMemoryRepository::new(), engine_config, config).await?;
        }
        StorageBackendArg::Mysql => {
            let mysql_dsn = config
                .mysql_dsn
                .as_deref()
                .ok_or("mysql dsn is required when storage backend is mysql")?;
            let repository = MySqlRepository::connect(mysql_dsn).await?;
            repository.ensure_schema().await?;
            run(repository, engine_config, config).await?;
        }
    }

    Ok(())
}

async fn run<R: Repository>(
    repository: R,
    engine_config: EngineConfig,
    config: CLI,
) -> Result<(), Box<dyn Error>> {
    let engine = RedirectionEngine::with_config(repository, engine_config);

    if let Some(seed) = &config.seed {
        let imported = import(engine.repository(), seed).await?;
        engine.invalidate_host_cache();
        info!(path = %seed.display(), imported, "loaded seed file");
    }

    match config.command {
        Command::Add {
            source,
            target,
            status_code,
            hosts,
            comment,
            creator,
            start_at,
            end_at,
        } => {
            let params = AddRedirection {
                source,
                target,
                status_code,
                hosts,
                comment,
                creator,
                start_at,
                end_at,
            };
            print_lines(engine.add_redirection(params).await?)?;
        }
        Command::Resolve {
            path,
            host,
            count_hit,
        } => {
            let record = engine.resolve(&path, host.as_deref()).await?;
            if let (Some(record), true) = (&record, count_hit) {
                engine.increment_hit_count(record).await;
            }
            println!("{}", serde_json::to_string(&record)?);
        }
        Command::List { host } => {
            print_lines(engine.get_all(host.as_deref()).await?)?;
        }
        Command::Hosts => {
            for host in engine.get_distinct_hosts().await? {
                println!("{host}");
            }
        }
        Command::Remove { path, host, strict } => {
            if strict {
                engine.remove_existing(&path, host.as_deref()).await?;
            } else {
                engine.remove_one(&path, host.as_deref()).await?;
            }
        }
        Command::RemoveAll { host } => {
            engine.remove_all(host.as_deref()).await?;
        }
        Command::Export { host, output } => {
            let records = engine.get_all(host.as_deref()).await?;
            let exported = records.len();
            match output {
                Some(path) => {
                    let mut buf = Vec::new();
                    write_lines(&mut buf, records)?;
                    tokio::fs::write(&path, buf).await?;
                    info!(path = %path.display(), exported, "exported redirections");
                }
                None => print_lines(records)?,
            }
        }
        Command::Import { input } => {
            let imported = import(engine.repository(), &input).await?;
            engine.invalidate_host_cache();
            info!(path = %input.display(), imported, "imported redirections");
        }
    }

    Ok(())
}

/// Stores every record of a JSON-lines file as is, statistics included, without cascading.
async fn import<R: Repository>(repository: &R, path: &Path) -> Result<usize, Box<dyn Error>> {
    let content = tokio::fs::read_to_string(path).await?;
    let mut imported = 0;
    for (number, line) in content.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        let record: Redirection = serde_json::from_str(line)
            .map_err(|e| format!("{}:{}: {}", path.display(), number + 1, e))?;
        debug!(key = %record.key(), "importing redirection");
        repository.upsert(record).await?;
        imported += 1;
    }
    Ok(imported)
}

fn write_lines(
    mut out: impl Write,
    records: impl IntoIterator<Item = Redirection>,
) -> Result<(), Box<dyn Error>> {
    for record in records {
        serde_json::to_writer(&mut out, &record)?;
        out.write_all(b"\n")?;
    }
    out.flush()?;
    Ok(())
}

fn print_lines(records: impl IntoIterator<Item = Redirection>) -> Result<(), Box<dyn Error>> {
    write_lines(std::io::stdout().lock(), records)
}
