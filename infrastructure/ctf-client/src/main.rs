use clap::{Parser, Subcommand};
use ctf_client::ChallengeClient;

#[derive(Parser)]
#[command(author, version, about)]
pub struct Cli {
    /// Root url of the challenge service
    #[arg(short, long, default_value = "http://localhost:3000")]
    endpoint: String,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Show status, wallet and contract address
    Details,
    /// Check the challenge and print the flag when solved
    Solve,
    /// Redeploy the challenge with a fresh wallet
    Reset,
    /// Print the challenge source files
    Source,
}

#[tokio::main]
async fn main() -> Result<(), anyhow::Error> {
    env_logger::init();
    let cli = Cli::parse();

    let client = ChallengeClient::connect(cli.endpoint.as_str())?;

    match cli.command {
        Command::Details => {
            let details = client.challenge().await?;
            println!("{}", serde_json::to_string_pretty(&details)?);
        }
        Command::Solve => println!("{}", client.solve().await?),
        Command::Reset => println!("{}", client.reset().await?),
        Command::Source => {
            for source in client.sources().await? {
                println!("{}", source);
            }
        }
    }

    Ok(())
}
