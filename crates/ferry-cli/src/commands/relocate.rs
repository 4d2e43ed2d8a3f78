use super::{json_pretty, spin_fail, spin_ok, spinner, EXIT_SUCCESS};
use ferry_core::Engine;
use ferry_remote::ClientConfig;

pub fn run(config: ClientConfig, source: &str, destination: &str, json: bool) -> Result<u8, String> {
    let engine = Engine::new(config);

    let pb = spinner(&format!("moving {source}…"));
    let result = engine.relocate(source, destination).map_err(|e| {
        spin_fail(&pb, "move failed");
        e.to_string()
    })?;
    spin_ok(
        &pb,
        &format!("moved {source} to {}:{}", result.remote, result.name),
    );

    if json {
        let payload = serde_json::json!({
            "remote": result.remote,
            "name": result.name,
            "address": result.address,
        });
        println!("{}", json_pretty(&payload)?);
    }
    Ok(EXIT_SUCCESS)
}
