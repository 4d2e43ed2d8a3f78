use super::{json_pretty, spin_fail, spin_ok, spinner, EXIT_SUCCESS};
use ferry_core::{CopyRequest, Engine, Overrides};
use ferry_remote::ClientConfig;

pub struct CopyArgs<'a> {
    pub source: &'a str,
    pub destination: Option<&'a str>,
    pub profiles: &'a [String],
    pub config: &'a [String],
    pub ephemeral: bool,
    pub container_only: bool,
}

pub fn build_request(args: &CopyArgs<'_>) -> Result<CopyRequest, String> {
    let mut overrides = Overrides {
        profiles: args.profiles.to_vec(),
        ..Overrides::default()
    };
    for pair in args.config {
        overrides
            .config
            .push(Overrides::parse_config(pair).map_err(|e| e.to_string())?);
    }
    let mut request = CopyRequest::new(args.source)
        .with_overrides(overrides)
        .with_ephemeral(args.ephemeral);
    request.destination = args.destination.map(str::to_owned);
    request.container_only = args.container_only;
    Ok(request)
}

pub fn run(config: ClientConfig, args: &CopyArgs<'_>, json: bool) -> Result<u8, String> {
    let request = build_request(args)?;
    let engine = Engine::new(config);

    let pb = spinner(&format!("copying {}…", args.source));
    let result = engine.copy(&request).map_err(|e| {
        spin_fail(&pb, "copy failed");
        e.to_string()
    })?;
    spin_ok(
        &pb,
        &format!("copied {} to {}:{}", args.source, result.remote, result.name),
    );

    if result.name_generated {
        if json {
            let payload = serde_json::json!({ "name": result.name });
            println!("{}", json_pretty(&payload)?);
        } else {
            println!("{}", result.name);
        }
    }
    Ok(EXIT_SUCCESS)
}
