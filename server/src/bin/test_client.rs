use clap::Parser;
use log::{error, info, warn};
use serde_json::to_string;
use shared::{read_frame, write_frame, LoginStatus, Request, Response, DEFAULT_PORT};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::net::TcpStream;

#[derive(Parser, Debug)]
#[clap(author, version, about = "Terminal chat client")]
struct Args {
    #[clap(short = 'H', long, default_value = "127.0.0.1")]
    host: String,
    #[clap(short, long, default_value_t = DEFAULT_PORT)]
    port: u16,
    /// Name to log in as
    #[clap(short, long)]
    name: String,
}

#[derive(Debug, PartialEq, Eq)]
enum Command {
    Send(Request),
    Quit,
    Nothing,
}

/// Turns one line of input into a request
fn parse_command(line: &str) -> Command {
    let line = line.trim_end();
    if line.is_empty() {
        return Command::Nothing;
    }
    let Some(rest) = line.strip_prefix('/') else {
        return Command::Send(Request::Exchange {
            message: line.to_string(),
        });
    };

    let (verb, arg) = match rest.split_once(' ') {
        Some((verb, arg)) => (verb, arg.trim().to_string()),
        None => (rest, String::new()),
    };
    match verb {
        "connect" => Command::Send(Request::Connect { target: arg }),
        "disconnect" => Command::Send(Request::Disconnect),
        "list" => Command::Send(Request::List),
        "time" => Command::Send(Request::Time),
        "poem" => Command::Send(Request::Poem { target: arg }),
        "search" => Command::Send(Request::Search { target: arg }),
        "quit" => Command::Quit,
        _ => Command::Send(Request::Exchange {
            message: line.to_string(),
        }),
    }
}

fn render(response: &Response) -> String {
    match response {
        Response::Login { status } => format!("login: {:?}", status),
        Response::Connect { msg, .. } => msg.clone(),
        Response::Exchange { from, message } => format!("[{}] {}", from, message),
        Response::Disconnect { msg, .. } => msg.clone(),
        Response::List { results } => format!("online: {}", results),
        Response::Poem { results } if results.is_empty() => "no such poem".to_string(),
        Response::Poem { results } => results.join("\n"),
        Response::Time { results } => results.clone(),
        Response::Search { results } if results.is_empty() => "no matches".to_string(),
        Response::Search { results } => results.trim_end().to_string(),
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let stream = TcpStream::connect((args.host.as_str(), args.port)).await?;
    info!("Connected to {}", stream.peer_addr()?);
    let (read_half, mut write_half) = stream.into_split();
    let mut reader = BufReader::new(read_half);

    let login = Request::Login {
        name: args.name.clone(),
    };
    write_frame(&mut write_half, &to_string(&login)?).await?;
    match read_frame(&mut reader).await? {
        Some(payload) => match serde_json::from_str::<Response>(&payload)? {
            Response::Login {
                status: LoginStatus::Ok,
            } => info!("Logged in as {}", args.name),
            Response::Login {
                status: LoginStatus::Duplicate,
            } => {
                error!("{} is already online", args.name);
                return Ok(());
            }
            other => {
                error!("Unexpected reply to login: {:?}", other);
                return Ok(());
            }
        },
        None => {
            error!("Server closed the connection during login");
            return Ok(());
        }
    }

    // Print whatever the server sends while we read stdin
    tokio::spawn(async move {
        loop {
            match read_frame(&mut reader).await {
                Ok(Some(payload)) => match serde_json::from_str::<Response>(&payload) {
                    Ok(response) => println!("{}", render(&response)),
                    Err(e) => warn!("Unreadable message from server: {}", e),
                },
                Ok(None) => {
                    info!("Server closed the connection");
                    break;
                }
                Err(e) => {
                    error!("Connection error: {}", e);
                    break;
                }
            }
        }
    });

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        match parse_command(&line) {
            Command::Send(request) => write_frame(&mut write_half, &to_string(&request)?).await?,
            Command::Quit => {
                info!("Quitting");
                break;
            }
            Command::Nothing => {}
        }
    }

    Ok(())
}
