use anyhow::Result;

use crate::config::Config;
use crate::mcp::McpClient;

/// List configured sources and probe the remote server's health.
pub async fn list_sources(config: &Config) -> Result<()> {
    let mut client = McpClient::new(&config.mcp)?;
    let health = client.health_check().await;

    println!("Server:   {}", health.server_url);
    if health.healthy {
        println!("Status:   healthy ({:.2} ms)", health.response_time_ms);
    } else {
        println!(
            "Status:   unhealthy ({})",
            health.error.as_deref().unwrap_or("unknown error")
        );
    }
    println!();

    println!("{:<10} {:<40} TOOL", "SOURCE", "CACHE");
    println!(
        "{:<10} {:<40} {}",
        "issues",
        config.cache.issues_db.display().to_string(),
        config.tools.issue_search
    );
    println!(
        "{:<10} {:<40} {}",
        "pages",
        config.cache.pages_db.display().to_string(),
        config.tools.page_search
    );

    Ok(())
}
