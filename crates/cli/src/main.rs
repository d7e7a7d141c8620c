use std::collections::HashMap;
use std::io::{self, Write};
use std::path::PathBuf;

use becky::client::{ChatClient, OutboundFile};
use becky::forms::{FormKind, FormSubmission};
use becky::router::UiEffect;
use becky::session::Sender;
use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "becky")]
#[command(about = "Becky CLI", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Show version
    Version,

    /// Create the configuration directory and default files (config with a generated session secret, logs directory).
    Init {
        /// Config file path (default: BECKY_CONFIG_PATH or ~/.becky/config.json)
        #[arg(long, short, value_name = "PATH")]
        config: Option<PathBuf>,
    },

    /// Run the gateway (chat relay to the inference service, stored chats, bug reports).
    Gateway {
        /// Config file path (default: BECKY_CONFIG_PATH or ~/.becky/config.json)
        #[arg(long, short, value_name = "PATH")]
        config: Option<PathBuf>,

        /// HTTP port (default from config or 5000)
        #[arg(long, short)]
        port: Option<u16>,
    },

    /// Mint a session token for a user, signed with the configured secret. Registers the user in the document store if missing.
    Token {
        /// Config file path (default: BECKY_CONFIG_PATH or ~/.becky/config.json)
        #[arg(long, short, value_name = "PATH")]
        config: Option<PathBuf>,

        /// User the token is issued for.
        #[arg(long, default_value = becky::gateway::DEFAULT_USER)]
        email: String,
    },

    /// Chat with Becky via the gateway (interactive).
    Chat {
        /// Config file path (default: BECKY_CONFIG_PATH or ~/.becky/config.json)
        #[arg(long, short, value_name = "PATH")]
        config: Option<PathBuf>,

        /// Session token (default: BECKY_SESSION_TOKEN, else one minted for the default user).
        #[arg(long, value_name = "JWT")]
        token: Option<String>,

        /// Optional stored chat id to continue.
        #[arg(long, value_name = "ID")]
        chat_id: Option<String>,
    },
}

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    let cli = Cli::parse();

    match cli.command {
        Some(Commands::Version) => {
            println!("becky {}", env!("CARGO_PKG_VERSION"));
        }
        Some(Commands::Init { config }) => {
            if let Err(e) = run_init(config) {
                log::error!("init failed: {}", e);
                std::process::exit(1);
            }
        }
        Some(Commands::Gateway { config, port }) => {
            if let Err(e) = run_gateway(config, port).await {
                log::error!("gateway failed: {:#}", e);
                std::process::exit(1);
            }
        }
        Some(Commands::Token { config, email }) => match run_token(config, &email).await {
            Ok(token) => println!("{}", token),
            Err(e) => {
                log::error!("token failed: {:#}", e);
                std::process::exit(1);
            }
        },
        Some(Commands::Chat {
            config,
            token,
            chat_id,
        }) => {
            if let Err(e) = run_chat(config, token, chat_id).await {
                log::error!("chat failed: {:#}", e);
                std::process::exit(1);
            }
        }
        None => {
            println!("Run with --help for usage");
        }
    }
}

fn run_init(config_path: Option<PathBuf>) -> anyhow::Result<()> {
    let path = config_path.unwrap_or_else(becky::config::default_config_path);
    let dir = becky::init::init_config_dir(&path)?;
    println!("initialized configuration at {}", dir.display());
    Ok(())
}

async fn run_gateway(config_path: Option<PathBuf>, port: Option<u16>) -> anyhow::Result<()> {
    let (mut config, path) = becky::config::load_config(config_path)?;
    if let Some(p) = port {
        config.gateway.port = p;
    }
    log::info!("starting gateway on {}:{}", config.gateway.bind, config.gateway.port);
    becky::gateway::run_gateway(config, path).await
}

/// Registers `email` in the document store when it is missing, then mints its token.
async fn run_token(config_path: Option<PathBuf>, email: &str) -> anyhow::Result<String> {
    let (config, path) = becky::config::load_config(config_path.clone())?;
    becky::init::require_initialized(&path, &config)?;
    if becky::init::register_user(&config, &path, email).await? {
        eprintln!("registered {}", email);
    }
    mint_session_token(config_path, email)
}

fn mint_session_token(config_path: Option<PathBuf>, email: &str) -> anyhow::Result<String> {
    let (config, _) = becky::config::load_config(config_path)?;
    let secret = becky::config::resolve_jwt_secret(&config)
        .ok_or_else(|| anyhow::anyhow!("no session secret configured; run `becky init` first"))?;
    Ok(becky::gateway::mint_token(
        &secret,
        email,
        config.auth.token_lifetime_hours,
    )?)
}

/// Prints effects as they arrive. Streamed text is printed as the suffix it adds.
#[derive(Default)]
struct Printer {
    printed: HashMap<usize, String>,
    pending_form: Option<(FormKind, serde_json::Value)>,
}

impl Printer {
    fn effect(&mut self, effect: &UiEffect) {
        match effect {
            UiEffect::MessageAppended { index, message } => {
                if message.sender == Sender::Assistant {
                    print!("< {}", message.content);
                    self.printed.insert(*index, message.content.clone());
                }
            }
            UiEffect::MessageUpdated { index, content } => {
                let before = self.printed.entry(*index).or_default();
                match content.strip_prefix(before.as_str()) {
                    Some(suffix) => print!("{}", suffix),
                    None => print!("\n< {}", content),
                }
                *before = content.clone();
            }
            UiEffect::LoadingChanged(false) => println!(),
            UiEffect::LoadingChanged(true) => {}
            UiEffect::FormOpened { kind, document } => {
                self.pending_form = Some((*kind, document.clone()));
            }
            UiEffect::TitleChanged(title) => {
                println!();
                println!("[title: {}]", title);
            }
            UiEffect::SessionReset { chat_id } => {
                self.printed.clear();
                println!("[chat {}]", chat_id);
            }
        }
        let _ = io::stdout().flush();
    }
}

fn prompt(label: &str) -> io::Result<Option<String>> {
    let mut stdout = io::stdout();
    write!(stdout, "{}", label)?;
    stdout.flush()?;
    let mut line = String::new();
    if io::stdin().read_line(&mut line)? == 0 {
        return Ok(None);
    }
    Ok(Some(line.trim().to_string()))
}

fn print_help() {
    println!("commands:");
    println!("  /new              start a new chat");
    println!("  /load <chat id>   load a stored chat");
    println!("  /history          list stored chats");
    println!("  /saved            show chats recorded by the gateway");
    println!("  /clear-all        delete chats recorded by the gateway");
    println!("  /attach <path>    attach a file to the next message");
    println!("  /bug <text>       send a bug report");
    println!("  /exit             quit");
}

async fn run_chat(
    config_path: Option<PathBuf>,
    token: Option<String>,
    chat_id: Option<String>,
) -> anyhow::Result<()> {
    let (config, _) = becky::config::load_config(config_path.clone())?;
    let token = match token.or_else(|| std::env::var("BECKY_SESSION_TOKEN").ok()) {
        Some(t) => t,
        None => mint_session_token(config_path, becky::gateway::DEFAULT_USER)?,
    };
    let mut client = ChatClient::from_config(&config, Some(token));
    let mut printer = Printer::default();

    if let Some(id) = chat_id {
        if !client.load_messages(&id, &mut |e: &UiEffect| printer.effect(e)).await? {
            println!("no stored messages for {}", id);
        }
    }
    for message in &client.session().messages {
        let marker = if message.is_user() { ">" } else { "<" };
        println!("{} {}", marker, message.content);
    }
    println!("(type /help for commands)");

    let mut attachments: Vec<OutboundFile> = Vec::new();
    while let Some(input) = prompt("> ")? {
        if input.is_empty() {
            continue;
        }
        let (command, arg) = match input.split_once(' ') {
            Some((c, a)) => (c, a.trim()),
            None => (input.as_str(), ""),
        };
        match command {
            "/exit" | "/quit" => break,
            "/help" => print_help(),
            "/new" => {
                attachments.clear();
                client.new_chat(&mut |e: &UiEffect| printer.effect(e));
                if let Some(greeting) = client.session().messages.first() {
                    println!("< {}", greeting.content);
                }
            }
            "/load" if !arg.is_empty() => {
                match client.load_messages(arg, &mut |e: &UiEffect| printer.effect(e)).await {
                    Ok(true) => {
                        for message in &client.session().messages {
                            let marker = if message.is_user() { ">" } else { "<" };
                            println!("{} {}", marker, message.content);
                        }
                    }
                    Ok(false) => println!("no stored messages for {}", arg),
                    Err(e) => eprintln!("load error: {}", e),
                }
            }
            "/history" => match client.history().await {
                Ok(list) if list.is_empty() => println!("no stored chats"),
                Ok(list) => {
                    for chat in list {
                        println!("  {}  {}", chat.id, chat.title);
                    }
                }
                Err(e) => eprintln!("history error: {}", e),
            },
            "/saved" => match client.saved(None).await {
                Ok(Some(saved)) => println!(
                    "{}",
                    serde_json::to_string_pretty(&saved).unwrap_or_else(|_| saved.to_string())
                ),
                Ok(None) => println!("nothing recorded yet"),
                Err(e) => eprintln!("saved error: {}", e),
            },
            "/clear-all" => match client.delete_all().await {
                Ok(()) => println!("recorded chats deleted"),
                Err(e) => eprintln!("delete error: {}", e),
            },
            "/attach" if !arg.is_empty() => match OutboundFile::from_path(arg).await {
                Ok(file) => {
                    println!("attached {}", file.name);
                    attachments.push(file);
                }
                Err(e) => eprintln!("attach error: {}", e),
            },
            "/bug" if !arg.is_empty() => {
                let metadata = serde_json::json!({
                    "client": "becky-cli",
                    "version": env!("CARGO_PKG_VERSION"),
                    "chatId": client.session().chat_id,
                });
                match client.report_bug(arg, metadata).await {
                    Ok(()) => println!("bug report sent"),
                    Err(e) => eprintln!("bug report error: {}", e),
                }
            }
            c if c.starts_with('/') => {
                println!("unknown or incomplete command: {}", input);
                print_help();
            }
            _ => {
                let files = std::mem::take(&mut attachments);
                if let Err(e) = client
                    .send_text(&input, files, &mut |e: &UiEffect| printer.effect(e))
                    .await
                {
                    eprintln!("chat error: {}", e);
                }
                while let Some((kind, document)) = printer.pending_form.take() {
                    let submission = FormSubmission::new(kind, document);
                    println!("[{} form]", kind.tag());
                    println!("{}", submission.summary_markdown());
                    let answer = prompt("submit it unchanged? [y/N] ")?;
                    if !matches!(answer.as_deref(), Some("y") | Some("Y") | Some("yes")) {
                        break;
                    }
                    if let Err(e) = client
                        .submit_form(&submission, &mut |e: &UiEffect| printer.effect(e))
                        .await
                    {
                        eprintln!("chat error: {}", e);
                    }
                }
            }
        }
    }

    Ok(())
}
