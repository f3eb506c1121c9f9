//! Example: dial a device, run a command, save config, and close.
//!
//! Not a workspace member — a narrative example of the facade's surface,
//! analogous to the teacher's `examples/firewall_workflow.rs` but driven
//! against `Client::run`/`SaveConfig` instead of a transaction DSL, since
//! transaction/rollback ownership belongs to the external resource
//! wrappers this core hands bytes back to, not to the core itself.

use rtx_client_core::client::Client;
use rtx_client_core::config::Config;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let mut config = Config::new("192.168.1.1", 22, "admin", "password")?;
    config.admin_password = Some("enable-secret".to_string());

    let client = Client::new(config);
    client.dial().await?;

    let output = client.run("show interface status").await?;
    println!("{}", String::from_utf8_lossy(&output));

    client.run("ip filter 1 permit any").await?;
    client.mark_config_dirty().await;
    client.save_config().await?;

    client.close().await?;
    Ok(())
}
