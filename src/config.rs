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

use anyhow::{Context, Result};
use dirs::home_dir;
use std::{
    fs,
    path::{Path, PathBuf},
};
use thiserror::Error;

pub const API_URL_KEY: &str = "OUTLINE_API_URL";
pub const CERT_SHA256_KEY: &str = "OUTLINE_CERT_SHA256";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub api_url: String,
    pub cert_sha256: String,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not locate the home directory; pass --config <FILE>")]
    MissingHomeDir,
    #[error("both the API URL and the certificate SHA256 are required")]
    EmptyAnswer,
}

pub fn default_path() -> Result<PathBuf> {
    let home = home_dir().ok_or(ConfigError::MissingHomeDir)?;
    Ok(home.join(".outline").join("config.env"))
}

/// Reads the stored configuration. `Ok(None)` means the file is absent or
/// does not carry both keys yet.
pub fn load(path: &Path) -> Result<Option<Config>> {
    if !path.exists() {
        return Ok(None);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("reading {:?}", path))?;

    let mut api_url = None;
    let mut cert_sha256 = None;
    for (key, value) in contents.lines().filter_map(parse_line) {
        match key {
            API_URL_KEY => api_url = Some(value),
            CERT_SHA256_KEY => cert_sha256 = Some(value),
            _ => {}
        }
    }

    match (api_url, cert_sha256) {
        (Some(api_url), Some(cert_sha256)) if !api_url.is_empty() && !cert_sha256.is_empty() => {
            Ok(Some(Config {
                api_url,
                cert_sha256,
            }))
        }
        _ => Ok(None),
    }
}

/// Writes both keys to `path`, replacing earlier values in place and leaving
/// every other line untouched.
pub fn save(path: &Path, config: &Config) -> Result<()> {
    let existing = if path.exists() {
        fs::read_to_string(path).with_context(|| format!("reading {:?}", path))?
    } else {
        String::new()
    };

    let mut pending = vec![
        (API_URL_KEY, config.api_url.as_str()),
        (CERT_SHA256_KEY, config.cert_sha256.as_str()),
    ];
    let mut lines: Vec<String> = Vec::new();
    for line in existing.lines() {
        let replaced = parse_line(line).and_then(|(key, _)| {
            let idx = pending.iter().position(|(k, _)| *k == key)?;
            let (k, v) = pending.remove(idx);
            Some(format!("{k}={v}"))
        });
        lines.push(replaced.unwrap_or_else(|| line.to_string()));
    }
    lines.extend(pending.into_iter().map(|(k, v)| format!("{k}={v}")));

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).with_context(|| format!("creating {:?}", parent))?;
    }
    let mut serialized = lines.join("\n");
    serialized.push('\n');
    write_private(path, &serialized).with_context(|| format!("writing {:?}", path))?;
    Ok(())
}

/// Asks the operator for both values and persists them.
pub fn prompt_and_save<F>(path: &Path, mut prompt: F) -> Result<Config>
where
    F: FnMut(&str) -> Result<String>,
{
    let api_url = prompt("API URL (e.g., https://x.x.x.x:port/prefix)")?
        .trim()
        .to_string();
    let cert_sha256 = prompt("Certificate SHA256")?.trim().to_string();
    if api_url.is_empty() || cert_sha256.is_empty() {
        return Err(ConfigError::EmptyAnswer.into());
    }

    let config = Config {
        api_url,
        cert_sha256,
    };
    save(path, &config)?;
    log::info!("saved configuration to {:?}", path);
    Ok(config)
}

/// Combines command-line overrides with the stored file, prompting only when
/// the file cannot supply the missing values.
pub fn resolve<F>(
    path: &Path,
    api_url_override: Option<String>,
    cert_override: Option<String>,
    prompt: F,
) -> Result<Config>
where
    F: FnMut(&str) -> Result<String>,
{
    if let (Some(api_url), Some(cert_sha256)) = (&api_url_override, &cert_override) {
        return Ok(Config {
            api_url: api_url.trim().to_string(),
            cert_sha256: cert_sha256.trim().to_string(),
        });
    }

    let mut config = match load(path)? {
        Some(config) => config,
        None => {
            eprintln!("No Outline server configured; credentials will be saved to {}", path.display());
            prompt_and_save(path, prompt)?
        }
    };
    if let Some(url) = api_url_override {
        config.api_url = url.trim().to_string();
    }
    if let Some(cert) = cert_override {
        config.cert_sha256 = cert.trim().to_string();
    }
    Ok(config)
}

/// Interactive prompt on the controlling terminal.
pub fn prompt_terminal(label: &str) -> Result<String> {
    dialoguer::Input::<String>::new()
        .with_prompt(label)
        .interact_text()
        .with_context(|| format!("reading {label}"))
}

/// Mode 0600 on unix; an existing file with wider bits is tightened too.
#[cfg(unix)]
fn write_private(path: &Path, contents: &str) -> std::io::Result<()> {
    use std::io::Write;
    use std::os::unix::fs::{OpenOptionsExt, PermissionsExt};

    let mut file = fs::OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .mode(0o600)
        .open(path)?;
    file.set_permissions(fs::Permissions::from_mode(0o600))?;
    file.write_all(contents.as_bytes())
}

#[cfg(not(unix))]
fn write_private(path: &Path, contents: &str) -> std::io::Result<()> {
    fs::write(path, contents)
}

fn parse_line(line: &str) -> Option<(&str, String)> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return None;
    }
    let line = line.strip_prefix("export ").unwrap_or(line);
    let (key, value) = line.split_once('=')?;
    let value = value.trim();
    let unquoted = ['"', '\'']
        .iter()
        .find_map(|q| value.strip_prefix(*q).and_then(|v| v.strip_suffix(*q)))
        .unwrap_or(value);
    Some((key.trim(), unquoted.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;
    use tempfile::tempdir;

    fn sample() -> Config {
        Config {
            api_url: "https://203.0.113.7:8443/SeCrEt".into(),
            cert_sha256: "ABCDEF".into(),
        }
    }

    #[test]
    fn missing_file_is_not_found() {
        let dir = tempdir().unwrap();
        assert_eq!(load(&dir.path().join("config.env")).unwrap(), None);
    }

    #[test]
    fn incomplete_file_is_not_found() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.env");
        fs::write(&path, "OUTLINE_API_URL=https://example.test\nOUTLINE_CERT_SHA256=\n").unwrap();
        assert_eq!(load(&path).unwrap(), None);
    }

    #[test]
    fn reads_hand_edited_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.env");
        fs::write(
            &path,
            "# my server\n\nexport OUTLINE_API_URL=\"https://203.0.113.7:8443/SeCrEt\"\nOUTLINE_CERT_SHA256 = 'ABCDEF'\nOTHER=1\n",
        )
        .unwrap();
        assert_eq!(load(&path).unwrap(), Some(sample()));
    }

    #[test]
    fn save_preserves_unrelated_lines() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.env");
        fs::write(&path, "# keep me\nEDITOR=vim\nOUTLINE_API_URL=https://old.test\n").unwrap();

        save(&path, &sample()).unwrap();

        let written = fs::read_to_string(&path).unwrap();
        assert_eq!(
            written,
            "# keep me\nEDITOR=vim\nOUTLINE_API_URL=https://203.0.113.7:8443/SeCrEt\nOUTLINE_CERT_SHA256=ABCDEF\n"
        );
        assert_eq!(load(&path).unwrap(), Some(sample()));
    }

    #[cfg(unix)]
    #[test]
    fn save_restricts_permissions_to_owner() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempdir().unwrap();
        let path = dir.path().join("config.env");
        save(&path, &sample()).unwrap();
        let mode = fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);

        let shared = dir.path().join("shared.env");
        fs::write(&shared, "EDITOR=vim\n").unwrap();
        fs::set_permissions(&shared, fs::Permissions::from_mode(0o644)).unwrap();
        save(&shared, &sample()).unwrap();
        let mode = fs::metadata(&shared).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
        assert!(fs::read_to_string(&shared).unwrap().starts_with("EDITOR=vim\n"));
    }

    #[test]
    fn save_creates_parent_directory() {
        let dir = tempdir().unwrap();
        let path = dir.path().join(".outline").join("config.env");
        save(&path, &sample()).unwrap();
        assert_eq!(load(&path).unwrap(), Some(sample()));
    }

    #[test]
    fn save_reports_unwritable_location() {
        let dir = tempdir().unwrap();
        let blocker = dir.path().join("file");
        fs::write(&blocker, "").unwrap();
        let err = save(&blocker.join("config.env"), &sample()).unwrap_err();
        assert!(err.to_string().contains("creating"));
    }

    #[test]
    fn prompt_rejects_empty_answers() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.env");
        let err = prompt_and_save(&path, |_| Ok("  ".to_string())).unwrap_err();
        assert!(err.to_string().contains("required"));
        assert!(!path.exists());
    }

    #[test]
    fn prompts_once_then_reads_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.env");
        let mut asked = Vec::new();

        let answers = ["https://203.0.113.7:8443/SeCrEt ", "ABCDEF"];
        let first = resolve(&path, None, None, |label| {
            asked.push(label.to_string());
            Ok(answers[asked.len() - 1].to_string())
        })
        .unwrap();
        assert_eq!(first, sample());
        assert_eq!(asked.len(), 2);

        let second = resolve(&path, None, None, |_| Err(anyhow!("must not prompt"))).unwrap();
        assert_eq!(second, sample());
    }

    #[test]
    fn overrides_skip_file_and_prompt() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.env");
        let config = resolve(
            &path,
            Some("https://override.test/x".into()),
            Some("FF".into()),
            |_| Err(anyhow!("must not prompt")),
        )
        .unwrap();
        assert_eq!(config.api_url, "https://override.test/x");
        assert_eq!(config.cert_sha256, "FF");
        assert!(!path.exists());
    }

    #[test]
    fn single_override_applies_on_top_of_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.env");
        save(&path, &sample()).unwrap();
        let config = resolve(&path, Some("https://other.test/y".into()), None, |_| {
            Err(anyhow!("must not prompt"))
        })
        .unwrap();
        assert_eq!(config.api_url, "https://other.test/y");
        assert_eq!(config.cert_sha256, "ABCDEF");
    }
}
