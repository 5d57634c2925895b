//! `cofounder server` - Start the co-founder HTTP backend server.

pub async fn run(host: String, port: u16, db_path: String) -> Result<(), String> {
    let config = cofounder_server::ServerConfig {
        host: host.clone(),
        port,
        db_path,
    };

    println!("Starting co-founder server on {}:{}...", host, port);

    let addr = cofounder_server::start_server(config).await?;
    println!("Co-founder server listening on http://{}", addr);

    // Keep the process running until interrupted
    tokio::signal::ctrl_c()
        .await
        .map_err(|e| format!("Failed to listen for Ctrl+C: {}", e))?;

    println!("\nShutting down...");
    Ok(())
}
