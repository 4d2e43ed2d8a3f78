use super::{json_pretty, load_config, EXIT_SUCCESS};
use ferry_remote::{ClientConfig, RemoteConfig};
use std::path::Path;

fn save(config: &ClientConfig, path: &Path) -> Result<(), String> {
    config
        .save(path)
        .map_err(|e| format!("config error: failed to write {}: {e}", path.display()))
}

pub fn add(
    path: &Path,
    name: &str,
    url: &str,
    token: Option<&str>,
    certificate: Option<&Path>,
) -> Result<u8, String> {
    let mut config = load_config(path)?;
    let mut remote = RemoteConfig::new(url);
    if let Some(token) = token {
        remote = remote.with_token(token);
    }
    if let Some(certificate) = certificate {
        remote = remote.with_certificate(certificate);
    }
    config.add_remote(name, remote).map_err(|e| e.to_string())?;
    save(&config, path)?;
    println!("added remote '{name}'");
    Ok(EXIT_SUCCESS)
}

pub fn list(path: &Path, json: bool) -> Result<u8, String> {
    let config = load_config(path)?;
    if json {
        let remotes: Vec<_> = config
            .remotes
            .iter()
            .map(|(name, remote)| {
                serde_json::json!({
                    "name": name,
                    "url": remote.url,
                    "default": *name == config.default_remote,
                    "auth": remote.auth_token.is_some(),
                })
            })
            .collect();
        println!("{}", json_pretty(&remotes)?);
        return Ok(EXIT_SUCCESS);
    }

    println!("{:<16} {:<6} URL", "NAME", "AUTH");
    for (name, remote) in &config.remotes {
        let label = if *name == config.default_remote {
            console::style(format!("{name} *")).bold().to_string()
        } else {
            name.clone()
        };
        let auth = if remote.auth_token.is_some() {
            "token"
        } else {
            "-"
        };
        println!("{label:<16} {auth:<6} {}", remote.url);
    }
    Ok(EXIT_SUCCESS)
}

pub fn remove(path: &Path, name: &str) -> Result<u8, String> {
    let mut config = load_config(path)?;
    config.remove_remote(name).map_err(|e| e.to_string())?;
    save(&config, path)?;
    println!("removed remote '{name}'");
    Ok(EXIT_SUCCESS)
}

pub fn set_default(path: &Path, name: &str) -> Result<u8, String> {
    let mut config = load_config(path)?;
    config.set_default(name).map_err(|e| e.to_string())?;
    save(&config, path)?;
    println!("default remote is now '{name}'");
    Ok(EXIT_SUCCESS)
}
