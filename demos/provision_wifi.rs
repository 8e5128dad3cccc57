//! Example: Scan for networks from a device and provision it
//!
//! Run with:
//!   cargo run --example provision_wifi -- <device> <pop> <ssid> <passphrase> [security]

use esp_ble_prov::{
    ProofOfPossession, ProvisionConfig, Provisioner, ProvisioningOutcome, Result, SecurityLevel,
};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("esp_ble_prov=info".parse().unwrap()),
        )
        .init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    if args.len() < 4 {
        eprintln!("usage: provision_wifi <device> <pop> <ssid> <passphrase> [security]");
        std::process::exit(2);
    }

    let device = &args[0];
    let pop = ProofOfPossession::from(args[1].as_str());
    let ssid = &args[2];
    let passphrase = &args[3];
    let security = SecurityLevel::from_option(args.get(4).map(String::as_str));

    let provisioner = Provisioner::ble(ProvisionConfig::default());

    println!("Networks visible to {} ({}):", device, security);
    for network in provisioner
        .list_wifi_networks_detailed(device, &pop, security)
        .await?
    {
        println!(
            "  {:<32} {:>4} dBm  ch {:>2}  {}",
            network.ssid, network.rssi, network.channel, network.auth
        );
    }

    println!("\nProvisioning {} onto {:?}...", device, ssid);
    match provisioner
        .apply_wifi_credentials(device, &pop, ssid, passphrase, security)
        .await?
    {
        ProvisioningOutcome::Success => println!("Device joined the network."),
        ProvisioningOutcome::Failure(reason) => println!("Provisioning failed: {}", reason),
        ProvisioningOutcome::ConfigApplied => unreachable!("intermediate outcome"),
    }

    Ok(())
}
