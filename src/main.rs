use sqlshell_guard::config::ConnectionConfig;
use sqlshell_guard::client::pagination::parse_command;
use sqlshell_guard::protocol::messages::Command;
use sqlshell_guard::Session;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    let mut filter = EnvFilter::from_default_env();
    if let Ok(directive) = "sqlshell_guard=info".parse() {
        filter = filter.add_directive(directive);
    }
    tracing_subscriber::fmt().with_env_filter(filter).with_writer(std::io::stderr).init();

    if let Err(e) = run().await {
        eprintln!("sqlshell: {}", e);
        std::process::exit(1);
    }
}

async fn run() -> sqlshell_guard::Result<()> {
    let config = ConnectionConfig::from_env()?;
    println!("sqlshell - connected to {} as {}", config.endpoint, config.security.principal);

    let mut session = Session::open(&config).await?;
    let result = repl(&mut session).await;
    session.close().await;
    result
}

async fn repl(session: &mut Session) -> sqlshell_guard::Result<()> {
    let mut stdin = BufReader::new(tokio::io::stdin()).lines();
    loop {
        let line = match stdin.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => return Ok(()),
            Err(e) => {
                tracing::warn!("stdin read failed: {}", e);
                return Ok(());
            }
        };
        let command = match parse_command(&line) {
            Ok(command) => command,
            Err(e) => {
                eprintln!("{}", e);
                continue;
            }
        };
        match command {
            Command::Quit => return Ok(()),
            Command::Query(ref sql) if sql.is_empty() => continue,
            _ => {}
        }
        for line in session.execute(&command).await?.into_lines() {
            println!("{}", line);
        }
    }
}
