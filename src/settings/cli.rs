use super::Parser;
use clap::Subcommand;

#[derive(Parser, Debug)]
#[command(name = "talentbridge", about = "Session and live-progress client")]
pub struct Cli {
    #[arg(long)]
    pub settings: Option<String>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Show the stored user and make sure a valid access token is available
    Status,
    /// Authenticated GET against the API, printing the JSON body
    Get { path: String },
    /// Follow analysis progress events
    Watch {
        /// Stop once this analysis request completes or fails
        #[arg(long)]
        analysis: Option<String>,
    },
    /// End the session on the server and locally
    Logout,
}
