//! CLI commands

use anyhow::{Result, bail};
use clap::Subcommand;
use servicegpt_http::types::{Message, RegisterRequest};
use servicegpt_http::{ApiClient, ClientError, FileStorage, SessionStore};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};

use crate::config::{self, Settings};

/// Session file inside the data directory
const SESSION_FILE: &str = "session.json";

#[derive(Subcommand)]
pub enum Commands {
    #[command(flatten)]
    Api(ApiCommands),

    /// Manage configuration files
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
}

/// Commands that talk to the API
#[derive(Subcommand)]
pub enum ApiCommands {
    /// Log in and store the session
    Login {
        #[arg(short, long)]
        email: String,

        /// Password (prompted for when omitted)
        #[arg(short, long, env = "SERVICEGPT_PASSWORD", hide_env_values = true)]
        password: Option<String>,
    },

    /// Create an account
    Register {
        #[arg(short, long)]
        email: String,

        /// Password (prompted for, with confirmation, when omitted)
        #[arg(short, long, env = "SERVICEGPT_PASSWORD", hide_env_values = true)]
        password: Option<String>,

        /// Repeat the password
        #[arg(long)]
        confirm: Option<String>,

        /// Display name
        #[arg(long)]
        fullname: Option<String>,
    },

    /// Forget the stored session
    Logout,

    /// Show the logged-in account
    Whoami,

    /// List chats
    Chats,

    /// Print the messages of a chat
    Messages {
        chat_id: i64,
    },

    /// Send a message, starting a new chat unless --chat is given
    Send {
        #[arg(short, long)]
        chat: Option<i64>,

        #[arg(required = true, trailing_var_arg = true)]
        text: Vec<String>,
    },

    /// Delete a chat
    Delete {
        chat_id: i64,
    },

    /// Interactive chat session
    Chat {
        /// Continue an existing chat
        #[arg(short, long)]
        chat: Option<i64>,
    },
}

#[derive(Subcommand)]
pub enum ConfigCommands {
    /// Generate a default configuration file
    Init {
        /// Output file path (defaults to SERVICEGPT_STATE_DIR/config.toml)
        output: Option<PathBuf>,
    },
}

/// Resolve the data directory with default fallback
pub fn data_dir(explicit: Option<PathBuf>) -> PathBuf {
    explicit.unwrap_or_else(|| {
        // Check environment variable first, then fall back to system data dir
        if let Ok(state_dir) = std::env::var("SERVICEGPT_STATE_DIR") {
            PathBuf::from(state_dir)
        } else {
            dirs::data_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("servicegpt")
        }
    })
}

impl Commands {
    pub async fn execute(self, settings: Settings, data_dir: PathBuf) -> Result<()> {
        match self {
            Self::Config { command } => command.execute(&data_dir),
            Self::Api(command) => {
                let client = build_client(&settings, &data_dir)?;
                command.execute(&client).await
            }
        }
    }
}

impl ApiCommands {
    pub async fn execute(self, client: &ApiClient) -> Result<()> {
        match self {
            Self::Login { email, password } => {
                let password = match password {
                    Some(password) => password,
                    None => prompt("Password")?,
                };
                client.login(&email, &password).await?;
                println!("Logged in as {email}");
            }
            Self::Register {
                email,
                password,
                confirm,
                fullname,
            } => {
                let (password, confirm) = match password {
                    Some(password) => (password, confirm),
                    None => {
                        let password = prompt("Password")?;
                        let confirm = match confirm {
                            Some(confirm) => confirm,
                            None => prompt("Confirm password")?,
                        };
                        (password, Some(confirm))
                    }
                };
                check_confirmation(&password, confirm.as_deref())?;
                let user = client
                    .register(&RegisterRequest {
                        email,
                        password,
                        fullname,
                    })
                    .await?;
                println!("Registered {} (id {})", user.email, user.id);
            }
            Self::Logout => {
                client.logout()?;
                println!("Logged out");
            }
            Self::Whoami => {
                let user = client.current_user().await?;
                match user.fullname {
                    Some(name) => println!("{name} <{}>", user.email),
                    None => println!("{}", user.email),
                }
            }
            Self::Chats => {
                let chats = client.list_chats().await?;
                if chats.is_empty() {
                    println!("No chats yet");
                }
                for chat in chats {
                    println!("{}\t{}", chat.id, chat.title);
                }
            }
            Self::Messages { chat_id } => {
                for message in client.chat_messages(chat_id).await? {
                    print_message(&message);
                }
            }
            Self::Send { chat, text } => {
                let text = text.join(" ");
                if let Some(chat_id) = chat {
                    let reply = client.send_message(chat_id, text).await?;
                    print_message(&reply);
                } else {
                    let reply = client.start_chat(text).await?;
                    println!("Started chat {}", reply.chat_id);
                    for message in client.chat_messages(reply.chat_id).await? {
                        print_message(&message);
                    }
                }
            }
            Self::Delete { chat_id } => {
                client.delete_chat(chat_id).await?;
                println!("Deleted chat {chat_id}");
            }
            Self::Chat { chat } => interactive(client, chat).await?,
        }
        Ok(())
    }
}

impl ConfigCommands {
    pub fn execute(self, data_dir: &Path) -> Result<()> {
        match self {
            Self::Init { output } => {
                let config_path = output.unwrap_or_else(|| data_dir.join("config.toml"));
                config::generate_default_config(&config_path)?;
                info!("Generated configuration at {}", config_path.display());
                println!("Configuration written to {}", config_path.display());
            }
        }
        Ok(())
    }
}

fn build_client(settings: &Settings, data_dir: &Path) -> Result<ApiClient> {
    let storage = FileStorage::open(data_dir.join(SESSION_FILE))?;
    let client = ApiClient::builder()
        .config(&settings.api)
        .session(SessionStore::new(Arc::new(storage)))
        .listener(|reason: &ClientError| {
            warn!(error = %reason, "Session expired");
            eprintln!("Your session has expired, please log in again with `servicegpt login`");
        })
        .build()?;
    Ok(client)
}

/// Chat loop: the first line starts a chat unless one was given
async fn interactive(client: &ApiClient, mut chat_id: Option<i64>) -> Result<()> {
    if let Some(id) = chat_id {
        for message in client.chat_messages(id).await? {
            print_message(&message);
        }
    }
    eprintln!("Type a message and press Enter, /quit to leave");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let text = line.trim();
        if text.is_empty() {
            continue;
        }
        if matches!(text, "/quit" | "/exit") {
            break;
        }

        let reply = match chat_id {
            Some(id) => client.send_message(id, text).await,
            None => client.start_chat(text).await,
        };
        match reply {
            Ok(reply) => {
                if chat_id.is_none() {
                    println!("Started chat {}", reply.chat_id);
                }
                chat_id = Some(reply.chat_id);
                print_message(&reply);
            }
            Err(e) if e.is_auth_expired() => return Err(e.into()),
            Err(e) => eprintln!("Error: {e}"),
        }
    }
    Ok(())
}

fn print_message(message: &Message) {
    let author = message.role.as_deref().unwrap_or("message");
    println!(
        "[{}] {author}: {}",
        message.timestamp.format("%Y-%m-%d %H:%M"),
        message.content
    );
}

fn check_confirmation(password: &str, confirm: Option<&str>) -> Result<()> {
    match confirm {
        Some(confirm) if confirm != password => bail!("Passwords do not match"),
        _ => Ok(()),
    }
}

fn prompt(label: &str) -> Result<String> {
    eprint!("{label}: ");
    std::io::stderr().flush()?;
    let mut line = String::new();
    std::io::stdin().read_line(&mut line)?;
    Ok(line.trim_end_matches(['\r', '\n']).to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[derive(Parser)]
    struct TestCli {
        #[command(subcommand)]
        command: Commands,
    }

    #[test]
    fn test_password_confirmation() {
        assert!(check_confirmation("secret", None).is_ok());
        assert!(check_confirmation("secret", Some("secret")).is_ok());
        assert!(check_confirmation("secret", Some("other")).is_err());
    }

    #[test]
    fn test_explicit_data_dir_wins() {
        let dir = PathBuf::from("/tmp/servicegpt-test");
        assert_eq!(data_dir(Some(dir.clone())), dir);
    }

    #[test]
    fn test_session_persists_between_clients() {
        let dir = tempfile::tempdir().unwrap();
        let settings = Settings::default();

        let first = build_client(&settings, dir.path()).unwrap();
        first
            .session()
            .set(&servicegpt_http::AccessToken::new("abc"))
            .unwrap();

        let second = build_client(&settings, dir.path()).unwrap();
        assert!(second.session().is_authenticated());
        assert!(dir.path().join(SESSION_FILE).exists());
    }

    #[test]
    fn test_register_password_is_optional() {
        let cli = TestCli::try_parse_from(["servicegpt", "register", "--email", "user@example.com"])
            .unwrap();
        assert!(matches!(
            cli.command,
            Commands::Api(ApiCommands::Register { ref email, .. }) if email == "user@example.com"
        ));
    }

    #[tokio::test]
    async fn test_config_init_does_not_open_session() {
        let dir = tempfile::tempdir().unwrap();
        // An unreadable session path would make any client construction fail
        std::fs::create_dir(dir.path().join(SESSION_FILE)).unwrap();
        assert!(build_client(&Settings::default(), dir.path()).is_err());

        let command = Commands::Config {
            command: ConfigCommands::Init { output: None },
        };
        command
            .execute(Settings::default(), dir.path().to_path_buf())
            .await
            .unwrap();
        assert!(dir.path().join("config.toml").exists());
    }
}
