//! Command execution.

use crate::Commands;
use colored::Colorize;
use kinetic_client::operation::{DeleteArgs, PutArgs};
use kinetic_client::{Client, Entry, KeyRange, Payload};
use kinetic_protocol::{Acl, ReaderSource, Value};
use std::path::PathBuf;

/// Executes a command against the drive and returns the formatted output.
pub async fn execute(client: &Client, cmd: Commands) -> Result<String, Box<dyn std::error::Error>> {
    match cmd {
        Commands::CheckAcl { .. } => unreachable!(),

        Commands::Noop => {
            client.noop().await?;
            Ok("OK".green().to_string())
        }

        Commands::Put {
            key,
            value,
            new_version,
            db_version,
        } => {
            let key = parse_key(&key)?;
            let value = parse_value_arg(&value).await?;
            let size = value.len();

            let mut args = PutArgs::new(key.clone(), value);
            if let Some(version) = new_version {
                args = args.with_new_version(version);
            }
            args = match db_version {
                Some(version) => args.with_db_version(version),
                None => args.with_force(true),
            };
            client.put_with(args).await?;

            Ok(format!(
                "{} {} ({} bytes)",
                "Stored".green(),
                format_bytes(&key).cyan(),
                size
            ))
        }

        Commands::Get { key, output } => {
            let key = parse_key(&key)?;
            let Some(entry) = client.get(key.clone()).await? else {
                return Ok(not_found(&key));
            };
            match output {
                Some(path) => write_value(entry, path).await,
                None => {
                    let value = entry.into_value().await?.unwrap_or_default();
                    Ok(format_bytes(&value))
                }
            }
        }

        Commands::GetMetadata { key } => {
            let key = parse_key(&key)?;
            match client.get_metadata(key.clone()).await? {
                Some(entry) => Ok(format_metadata(&entry)),
                None => Ok(not_found(&key)),
            }
        }

        Commands::GetVersion { key } => {
            let key = parse_key(&key)?;
            match client.get_version(key.clone()).await? {
                Some(version) => Ok(format_bytes(&version)),
                None => Ok(not_found(&key)),
            }
        }

        Commands::Delete { key, db_version } => {
            let key = parse_key(&key)?;
            let args = match db_version {
                Some(version) => DeleteArgs::new(key.clone()).with_db_version(version),
                None => DeleteArgs::new(key.clone()).with_force(true),
            };
            if client.delete_with(args).await? {
                Ok(format!("{} {}", "Deleted".green(), format_bytes(&key).cyan()))
            } else {
                Ok(not_found(&key))
            }
        }

        Commands::GetNext { key } => {
            let key = parse_key(&key)?;
            match client.get_next(key).await? {
                Some(entry) => format_entry(entry).await,
                None => Ok("No following key".yellow().to_string()),
            }
        }

        Commands::GetPrevious { key } => {
            let key = parse_key(&key)?;
            match client.get_previous(key).await? {
                Some(entry) => format_entry(entry).await,
                None => Ok("No preceding key".yellow().to_string()),
            }
        }

        Commands::KeyRange {
            start,
            end,
            max,
            reverse,
            exclusive_start,
            exclusive_end,
        } => {
            let range = KeyRange::new(parse_key(&start)?, parse_key(&end)?)
                .with_start_inclusive(!exclusive_start)
                .with_end_inclusive(!exclusive_end);
            let keys = client.get_key_range(range, max, reverse).await?;
            if keys.is_empty() {
                return Ok("No keys in range".yellow().to_string());
            }
            let lines: Vec<String> = keys.iter().map(|k| format_bytes(k)).collect();
            Ok(lines.join("\n"))
        }

        Commands::Range {
            start,
            end,
            prefetch,
        } => {
            let range = KeyRange::new(parse_key(&start)?, parse_key(&end)?);
            let mut iter = client.get_range(range, prefetch)?;

            let mut lines = Vec::new();
            while let Some(entry) = iter.next().await? {
                lines.push(format_entry(entry).await?);
            }
            if lines.is_empty() {
                return Ok("No entries in range".yellow().to_string());
            }
            lines.push(
                format!("{} entries, {} listing requests", lines.len(), iter.queries())
                    .dimmed()
                    .to_string(),
            );
            Ok(lines.join("\n"))
        }
    }
}

/// Executes a command that needs no drive connection.
pub async fn execute_local(cmd: Commands) -> Result<String, Box<dyn std::error::Error>> {
    match cmd {
        Commands::CheckAcl { file } => {
            let json = tokio::fs::read_to_string(&file).await?;
            let acls = Acl::list_from_json(&json)?;

            let mut output = format!("{} {} ACL(s)\n", "Valid".green(), acls.len());
            for acl in &acls {
                output.push_str(&format!(
                    "  identity {} ({:?}, {} domain(s))\n",
                    acl.identity.to_string().cyan(),
                    acl.hmac_algorithm,
                    acl.domains.len()
                ));
                for domain in &acl.domains {
                    let roles: Vec<String> = domain.roles.iter().map(|r| format!("{:?}", r)).collect();
                    output.push_str(&format!(
                        "    roles: {}{}\n",
                        roles.join(", "),
                        if domain.tls_required { " (TLS)" } else { "" }
                    ));
                }
            }
            Ok(output.trim_end().to_string())
        }
        _ => unreachable!(),
    }
}

/// Parses a key argument. A `0x` prefix marks a hex-encoded key.
fn parse_key(arg: &str) -> Result<Vec<u8>, Box<dyn std::error::Error>> {
    match arg.strip_prefix("0x") {
        Some(encoded) => Ok(hex::decode(encoded)?),
        None => Ok(arg.as_bytes().to_vec()),
    }
}

/// Parses a value argument. `@path` streams the file at `path`.
async fn parse_value_arg(arg: &str) -> Result<Value, Box<dyn std::error::Error>> {
    match arg.strip_prefix('@') {
        Some(path) => {
            let file = tokio::fs::File::open(path).await?;
            let len = u32::try_from(file.metadata().await?.len())
                .map_err(|_| format!("{} is too large to store", path))?;
            Ok(Value::stream(ReaderSource::new(file, len)))
        }
        None => Ok(Value::from(arg)),
    }
}

async fn write_value(entry: Entry, path: PathBuf) -> Result<String, Box<dyn std::error::Error>> {
    let mut file = tokio::fs::File::create(&path).await?;
    let written = match entry.value {
        Some(Payload::Deferred(value)) => value.copy_to(&mut file).await?,
        Some(Payload::Buffered(bytes)) => {
            tokio::io::AsyncWriteExt::write_all(&mut file, &bytes).await?;
            bytes.len() as u64
        }
        None => 0,
    };
    Ok(format!(
        "{} {} bytes to {}",
        "Wrote".green(),
        written,
        path.display()
    ))
}

async fn format_entry(entry: Entry) -> Result<String, Box<dyn std::error::Error>> {
    let key = format_bytes(&entry.key);
    let value = entry.into_value().await?.unwrap_or_default();
    Ok(format!("{} = {}", key.cyan(), format_bytes(&value)))
}

fn format_metadata(entry: &Entry) -> String {
    let metadata = &entry.metadata;
    let mut output = format!("{}", format!("Key {}", format_bytes(&entry.key).cyan()).bold());
    output.push_str(&format!(
        "\n  Version: {}",
        metadata
            .version
            .as_deref()
            .map(format_bytes)
            .unwrap_or_else(|| "-".to_string())
    ));
    if let Some(ref tag) = metadata.tag {
        output.push_str(&format!("\n  Tag: {}", hex::encode(tag)));
    }
    if let Some(algorithm) = metadata.algorithm {
        output.push_str(&format!("\n  Algorithm: {:?}", algorithm));
    }
    output
}

fn not_found(key: &[u8]) -> String {
    format!("{} {}", "Not found:".yellow(), format_bytes(key))
}

/// Prints bytes as text when they are printable UTF-8, otherwise as hex.
fn format_bytes(bytes: &[u8]) -> String {
    match std::str::from_utf8(bytes) {
        Ok(s) if !s.chars().any(char::is_control) => s.to_string(),
        _ => format!("0x{}", hex::encode(bytes)),
    }
}
