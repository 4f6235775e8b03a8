use anyhow::Result;
use chrono::{TimeDelta, Utc};
use mustlink::{Client, DataOptions, InfoMode};
use tracing_subscriber::EnvFilter;

fn main() -> Result<()> {
    // Example program that calls the library API.
    // Credentials come from mustlink.yml; set RUST_LOG=mustlink=debug to see requests.
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let mut client = Client::from_env()?;
    println!("logged in as {}", client.user().login);
    println!("providers: {}", client.providers().join(", "));

    let provider = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "BEPICRUISE".to_string());
    client.set_default_provider(&provider)?;

    let param = "NCADAF41";
    let info = client.param_info(None, param, InfoMode::Complex)?;
    println!(
        "{}: {} [{}]",
        param,
        info.description().unwrap_or("?"),
        info.unit().unwrap_or("-")
    );
    if let Some(limits) = info.limits {
        println!("limits: {limits:?}");
    }

    let opts = DataOptions {
        start: Some(Utc::now() - TimeDelta::hours(6)),
        calibrated: true,
        ..Default::default()
    };
    let data = client.data(None, &[param], &opts)?;
    println!("{} samples", data.len());
    print!("{}", data.to_csv()?);

    Ok(())
}
