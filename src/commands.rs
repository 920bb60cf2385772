// outline-keys - CLI for Outline VPN access keys
// Copyright (C) 2026 Mathias Uhl <mathiasuhl@gmx.de>
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with this program.  If not, see <https://www.gnu.org/licenses/>.

use crate::client::{AccessKey, KeyId, OutlineClient};
use anyhow::Result;
use clap::ValueEnum;
use std::io::Write;
use thiserror::Error;

pub const BYTES_PER_MB: u64 = 1024 * 1024;

const NAME_WIDTH: usize = 20;

#[derive(Clone, Copy, Debug, ValueEnum, PartialEq, Eq)]
pub enum OutputFormat {
    Pretty,
    Json,
}

#[derive(Debug, Error)]
pub enum KeyError {
    #[error("Key not found: {0}")]
    NotFound(KeyId),
    #[error(
        "key {id} was created but renaming it to \"{name}\" failed; it still has its default name (retry with `rename {id} <NAME>`)"
    )]
    RenameAfterCreate {
        id: KeyId,
        name: String,
        #[source]
        source: anyhow::Error,
    },
    #[error("{0} MB is not a usable data limit (must be at least 1 byte and fit in 64 bits)")]
    LimitOutOfRange(f64),
}

pub fn bytes_to_megabytes(bytes: u64) -> f64 {
    bytes as f64 / BYTES_PER_MB as f64
}

/// `None` when a positive value rounds to zero bytes or exceeds `u64`.
pub fn megabytes_to_bytes(megabytes: f64) -> Option<u64> {
    let bytes = (megabytes * BYTES_PER_MB as f64).round();
    // 2^64 is the first f64 that does not fit in a u64.
    if !bytes.is_finite() || bytes < 1.0 || bytes >= 18_446_744_073_709_551_616.0 {
        return None;
    }
    Some(bytes as u64)
}

/// clap value parser for the `limit` megabyte argument.
pub fn parse_megabytes(raw: &str) -> std::result::Result<f64, String> {
    let value: f64 = raw
        .trim()
        .parse()
        .map_err(|_| format!("`{raw}` is not a number of megabytes"))?;
    if !value.is_finite() || value < 0.0 {
        return Err(format!("`{raw}` must be zero or a positive number"));
    }
    if value > 0.0 && megabytes_to_bytes(value).is_none() {
        return Err(format!(
            "`{raw}` MB is outside the range of a data limit (1 byte to 2^64 - 1 bytes)"
        ));
    }
    Ok(value)
}

pub fn list(client: &OutlineClient, output: OutputFormat, out: &mut impl Write) -> Result<()> {
    let keys = client.list_keys()?;
    if output == OutputFormat::Json {
        writeln!(out, "{}", serde_json::to_string_pretty(&keys)?)?;
        return Ok(());
    }

    if keys.is_empty() {
        writeln!(out, "No access keys found")?;
        return Ok(());
    }

    writeln!(out, "{:<6} {:<20} {:<12} Access URL", "ID", "Name", "Usage (MB)")?;
    writeln!(out, "{:-<80}", "")?;
    for key in &keys {
        writeln!(
            out,
            "{:<6} {:<20} {:<12.1} {}",
            key.id.as_str(),
            fit_name(display_name(key)),
            bytes_to_megabytes(key.used_bytes),
            key.access_url
        )?;
    }
    Ok(())
}

pub fn show(
    client: &OutlineClient,
    id: &KeyId,
    output: OutputFormat,
    out: &mut impl Write,
) -> Result<()> {
    let key = client
        .list_keys()?
        .into_iter()
        .find(|key| key.id == *id)
        .ok_or_else(|| KeyError::NotFound(id.clone()))?;

    if output == OutputFormat::Json {
        writeln!(out, "{}", serde_json::to_string_pretty(&key)?)?;
        return Ok(());
    }

    let limit = key
        .data_limit_bytes
        .map(|bytes| format!("{:.1} MB", bytes_to_megabytes(bytes)))
        .unwrap_or_else(|| "none".to_string());

    writeln!(out, "ID:         {}", key.id)?;
    writeln!(out, "Name:       {}", display_name(&key))?;
    writeln!(out, "Usage:      {:.1} MB", bytes_to_megabytes(key.used_bytes))?;
    writeln!(out, "Data limit: {limit}")?;
    writeln!(out, "Access URL: {}", key.access_url)?;
    Ok(())
}

/// Creates a key and, when a name is given, renames it in a second call.
pub fn add(
    client: &OutlineClient,
    name: Option<&str>,
    output: OutputFormat,
    out: &mut impl Write,
) -> Result<()> {
    let mut key = client.create_key()?;
    log::info!("created access key {}", key.id);

    if let Some(name) = name {
        client
            .rename_key(&key.id, name)
            .map_err(|source| KeyError::RenameAfterCreate {
                id: key.id.clone(),
                name: name.to_string(),
                source,
            })?;
        key.name = name.to_string();
    }

    if output == OutputFormat::Json {
        writeln!(out, "{}", serde_json::to_string_pretty(&key)?)?;
        return Ok(());
    }
    writeln!(out, "Created key: {} - {}", key.id, display_name(&key))?;
    writeln!(out, "Access URL: {}", key.access_url)?;
    Ok(())
}

pub fn delete(client: &OutlineClient, id: &KeyId, out: &mut impl Write) -> Result<()> {
    require_key(client, id)?;
    client.delete_key(id)?;
    writeln!(out, "Deleted key: {id}")?;
    Ok(())
}

pub fn rename(
    client: &OutlineClient,
    id: &KeyId,
    new_name: &str,
    out: &mut impl Write,
) -> Result<()> {
    require_key(client, id)?;
    client.rename_key(id, new_name)?;
    writeln!(out, "Renamed key {id} to: {new_name}")?;
    Ok(())
}

/// Zero removes the limit; anything else is converted to bytes.
pub fn limit(
    client: &OutlineClient,
    id: &KeyId,
    megabytes: f64,
    out: &mut impl Write,
) -> Result<()> {
    require_key(client, id)?;
    if megabytes == 0.0 {
        client.remove_data_limit(id)?;
        writeln!(out, "Removed limit for key {id}")?;
    } else {
        let bytes =
            megabytes_to_bytes(megabytes).ok_or(KeyError::LimitOutOfRange(megabytes))?;
        log::debug!("limit {megabytes} MB = {bytes} bytes");
        client.set_data_limit(id, bytes)?;
        writeln!(out, "Set limit for key {id}: {megabytes} MB")?;
    }
    Ok(())
}

fn require_key(client: &OutlineClient, id: &KeyId) -> Result<()> {
    if client.contains_key(id)? {
        Ok(())
    } else {
        Err(KeyError::NotFound(id.clone()).into())
    }
}

fn display_name(key: &AccessKey) -> &str {
    if key.name.trim().is_empty() {
        "(unnamed)"
    } else {
        &key.name
    }
}

fn fit_name(name: &str) -> String {
    if name.chars().count() <= NAME_WIDTH {
        return name.to_string();
    }
    let mut fitted: String = name.chars().take(NAME_WIDTH - 1).collect();
    fitted.push('…');
    fitted
}
