use sqlshell_guard::fixture::Fixture;
use sqlshell_guard::server::CliServer;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    let mut filter = EnvFilter::from_default_env();
    if let Ok(directive) = "sqlshell_guard=info".parse() {
        filter = filter.add_directive(directive);
    }
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let addr = std::env::var("SQLSHELL_FIXTURE_ADDR").unwrap_or_else(|_| "127.0.0.1:9300".to_string());
    let db_path = std::env::var("SQLSHELL_FIXTURE_DB").unwrap_or_else(|_| ":memory:".to_string());

    println!("fixture-server - line-protocol SQL backend for security scenarios");
    println!("Database: {}", db_path);

    let fixture = match Fixture::open(&db_path) {
        Ok(fixture) => fixture,
        Err(e) => {
            eprintln!("Failed to create fixture: {}", e);
            std::process::exit(1);
        }
    };
    let server = CliServer::new(&addr, fixture.backend, fixture.policy);
    if let Err(e) = server.run().await {
        eprintln!("Server error: {}", e);
        std::process::exit(1);
    }
}
