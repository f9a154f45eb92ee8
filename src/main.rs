use serde_json::Value;
use std::sync::Arc;
use talentbridge::application_port::*;
use talentbridge::client::*;
use talentbridge::domain_model::*;
use talentbridge::logger::*;
use talentbridge::settings::*;
use tokio::signal;
use tokio::sync::Notify;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let logger = Logger::new_bootstrap();

    let project_settings = parse_settings(cli.settings.as_deref())?;
    debug!(?project_settings);
    let logger_config = LogConfig {
        filter: project_settings.log.filter.clone(),
    };
    logger.reload_from_config(&logger_config)?;

    let client = Client::try_new(&project_settings).await?;

    let result = match cli.command.unwrap_or(Command::Status) {
        Command::Status => status(&client).await,
        Command::Get { path } => get(&client, &path).await,
        Command::Watch { analysis } => watch(&client, analysis.map(AnalysisRequestId)).await,
        Command::Logout => {
            client.session.logout().await;
            println!("signed out");
            Ok(())
        }
    };

    let shutdown_timeout = std::time::Duration::from_secs(5);
    match tokio::time::timeout(shutdown_timeout, client.shutdown()).await {
        Ok(_) => info!("client shutdown successfully"),
        Err(_) => error!("client shutdown timed out"),
    }

    result
}

async fn status(client: &Client) -> anyhow::Result<()> {
    let Some(user) = client.session.current_user() else {
        println!("not signed in");
        return Ok(());
    };
    println!("{} <{}> {:?}", user.id, user.email, user.role);

    match client.session.get_valid_token().await {
        Ok(token) => match DecodedClaims::decode(&token.0).ok().and_then(|c| c.expires_at()) {
            Some(expires_at) => println!("session valid until {}", expires_at.to_rfc3339()),
            None => println!("session valid"),
        },
        Err(e) if e.is_session_expired() => println!("session expired, sign in again"),
        Err(e) => return Err(e.into()),
    }
    Ok(())
}

async fn get(client: &Client, path: &str) -> anyhow::Result<()> {
    let body: Value = client.session.request_json(ApiRequest::get(path)).await?;
    println!("{}", serde_json::to_string_pretty(&body)?);
    Ok(())
}

async fn watch(client: &Client, analysis: Option<AnalysisRequestId>) -> anyhow::Result<()> {
    // Refresh up front so the channel finds a fresh token.
    client.session.get_valid_token().await?;

    let done = Arc::new(Notify::new());
    let done_signal = done.clone();
    let _progress = client.channel.on_analysis_progress(move |progress| {
        println!(
            "{} {:?} {}%",
            progress.analysis_request_id.0, progress.status, progress.progress
        );
        if analysis.as_ref() == Some(&progress.analysis_request_id) && progress.status.is_terminal()
        {
            done_signal.notify_one();
        }
    });

    client.channel.connect().await;
    if client.channel.state() != ChannelState::Connected {
        return Err(anyhow::anyhow!("could not open realtime channel"));
    }

    let mut states = client.channel.state_changes();
    let channel_closed = async {
        loop {
            if states.changed().await.is_err() {
                break;
            }
            if *states.borrow_and_update() == ChannelState::Disconnected {
                break;
            }
        }
    };

    tokio::select! {
        _ = done.notified() => info!("analysis finished"),
        _ = channel_closed => warn!("realtime channel gave up reconnecting"),
        _ = signal::ctrl_c() => info!("interrupted"),
    }
    Ok(())
}
