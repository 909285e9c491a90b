//! Command line interface for archiving web documents to Nostr relays.
//! Supports fetching a document, publishing an archive of it, listing the
//! archives relays hold for a URL, verifying event files, and managing the
//! configured relay list.

use std::{
    fs,
    path::{Path, PathBuf},
};

use anyhow::{bail, Context};
use chronicl::{
    codec,
    config::{Settings, DEFAULT_RELAYS},
    fetch::{self, PassthroughExtractor},
    identity::{FileSecretStore, Keys, SecretStore},
    relay::ConnectionState,
    ArchiveEntry, Session,
};
use clap::{Parser, Subcommand};

/// Command line interface entry point.
#[derive(Parser)]
#[command(
    name = "chronicl",
    author,
    version,
    about = "Archive web documents to Nostr relays"
)]
struct Cli {
    /// Path to the `.env` configuration file.
    #[arg(long, default_value = ".env")]
    env: String,
    /// Subcommand to execute.
    #[command(subcommand)]
    command: Commands,
}

/// Supported CLI subcommands.
#[derive(Subcommand)]
enum Commands {
    /// Generate a signing identity, saving it to `KEY_FILE` when set.
    Keygen {
        /// Replace an existing key file.
        #[arg(long)]
        force: bool,
    },
    /// Fetch a document and print its extracted article.
    Read { url: String },
    /// Publish an archive of a document.
    Archive {
        url: String,
        /// Archive this file's contents instead of fetching the URL.
        #[arg(long)]
        body_file: Option<PathBuf>,
    },
    /// List archives of a URL, newest first.
    List {
        url: String,
        /// Only show archives whose signatures verify.
        #[arg(long)]
        strict: bool,
        /// Print entries as JSON.
        #[arg(long)]
        json: bool,
    },
    /// Check ids and signatures of event JSON files.
    Verify {
        #[arg(required = true)]
        files: Vec<String>,
    },
    /// Manage the configured relays.
    Relays {
        #[command(subcommand)]
        action: RelayAction,
    },
}

/// Operations available under `chronicl relays`.
#[derive(Subcommand)]
enum RelayAction {
    /// Add a relay after verifying connectivity.
    Add { url: String },
    /// Remove a relay from the configuration.
    Remove { url: String },
    /// Connect to every configured relay and report its state.
    Status,
}

/// Execute the selected CLI subcommand.
async fn run(cli: Cli) -> anyhow::Result<()> {
    ensure_env_file(&cli.env)?;
    let mut cfg = Settings::from_env(&cli.env)?;
    match cli.command {
        Commands::Keygen { force } => keygen(&cfg, force)?,
        Commands::Read { url } => {
            let client = fetch::http_client()?;
            let article = fetch::fetch_article(&client, &url, &PassthroughExtractor).await?;
            println!("{}", serde_json::to_string_pretty(&article)?);
        }
        Commands::Archive { url, body_file } => {
            fetch::parse_source_url(&url)?;
            let body = match body_file {
                Some(path) => fs::read_to_string(&path)
                    .with_context(|| format!("reading {}", path.display()))?,
                None => {
                    let client = fetch::http_client()?;
                    fetch::fetch_article(&client, &url, &PassthroughExtractor)
                        .await?
                        .body
                }
            };
            let session = Session::open(&cfg).await?;
            let result = session.archive(&url, &body).await;
            session.close().await;
            let entry = result?;
            println!("{} {}", entry.id, entry.created_at);
        }
        Commands::List { url, strict, json } => {
            cfg.require_valid_sig |= strict;
            let session = Session::open(&cfg).await?;
            let entries = session.list_archives(&url).await;
            session.close().await;
            if json {
                println!("{}", serde_json::to_string_pretty(&entries)?);
            } else if entries.is_empty() {
                eprintln!("no archives found for {url}");
            } else {
                for entry in &entries {
                    println!("{}", summary_line(entry));
                }
            }
        }
        Commands::Verify { files } => verify_files(&files)?,
        Commands::Relays { action } => handle_relays(action, &cli.env, &cfg).await?,
    }
    Ok(())
}

fn keygen(cfg: &Settings, force: bool) -> anyhow::Result<()> {
    let keys = Keys::generate();
    match &cfg.key_file {
        Some(path) => {
            if path.exists() && !force {
                bail!(
                    "key file already exists: {} (use --force to replace it)",
                    path.display()
                );
            }
            FileSecretStore::new(path).save(&keys.secret_hex())?;
            println!("pubkey {}", keys.public_key_hex());
        }
        None => {
            eprintln!("KEY_FILE is not set; the secret is printed but not saved");
            println!("pubkey {}", keys.public_key_hex());
            println!("secret {}", keys.secret_hex());
        }
    }
    Ok(())
}

fn summary_line(entry: &ArchiveEntry) -> String {
    format!(
        "{}  {}  {}  {}  {} bytes",
        entry.created_at,
        entry.id,
        entry.author,
        if entry.verified { "verified" } else { "unverified" },
        entry.body.len()
    )
}

fn verify_files(files: &[String]) -> anyhow::Result<()> {
    let mut failed = 0;
    for f in files {
        let data = fs::read_to_string(f).with_context(|| format!("reading {f}"))?;
        let val: serde_json::Value =
            serde_json::from_str(&data).with_context(|| format!("parsing {f}"))?;
        match codec::parse_untrusted(&val).and_then(|ev| codec::check(&ev).map(|()| ev)) {
            Ok(ev) => println!("{f}: ok {}", ev.id),
            Err(e) => {
                println!("{f}: {e}");
                failed += 1;
            }
        }
    }
    if failed > 0 {
        bail!("{failed} of {} event(s) failed verification", files.len());
    }
    Ok(())
}

/// Create a default `.env` file if one is not already present at `path`.
fn ensure_env_file(path: &str) -> anyhow::Result<()> {
    let env_path = Path::new(path);
    if env_path.exists() {
        return Ok(());
    }
    if let Some(parent) = env_path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    let mut content = String::new();
    content.push_str(&format!("RELAYS={}\n", DEFAULT_RELAYS.join(",")));
    content.push_str("CONNECT_TIMEOUT_MS=5000\n");
    content.push_str("PUBLISH_TIMEOUT_MS=5000\n");
    content.push_str("QUERY_WINDOW_MS=3000\n");
    content.push_str("REQUIRE_VALID_SIG=0\n");
    content.push_str("KEY_FILE=\n");
    content.push_str("TOR_SOCKS=\n");
    fs::write(env_path, content)?;
    Ok(())
}

async fn handle_relays(action: RelayAction, env_path: &str, cfg: &Settings) -> anyhow::Result<()> {
    match action {
        RelayAction::Add { url } => add_relay(env_path, cfg, url).await?,
        RelayAction::Remove { url } => remove_relay(env_path, cfg, url)?,
        RelayAction::Status => relay_status(cfg).await?,
    }
    Ok(())
}

async fn add_relay(env_path: &str, cfg: &Settings, url: String) -> anyhow::Result<()> {
    if cfg.relays.iter().any(|existing| existing == &url) {
        bail!("relay already configured: {url}");
    }
    let pool = chronicl::initialize(std::slice::from_ref(&url), cfg.relay_options())
        .await
        .with_context(|| format!("connecting to {url}"))?;
    pool.close().await;
    let mut relays = cfg.relays.clone();
    relays.push(url);
    write_relays_to_env(env_path, &relays)?;
    Ok(())
}

fn remove_relay(env_path: &str, cfg: &Settings, url: String) -> anyhow::Result<()> {
    let mut relays = cfg.relays.clone();
    let before = relays.len();
    relays.retain(|existing| existing != &url);
    if relays.len() == before {
        bail!("relay not configured: {url}");
    }
    if relays.is_empty() {
        bail!("cannot remove the last configured relay: {url}");
    }
    write_relays_to_env(env_path, &relays)?;
    Ok(())
}

async fn relay_status(cfg: &Settings) -> anyhow::Result<()> {
    let pool = chronicl::initialize(&cfg.relays, cfg.relay_options()).await?;
    for (url, state) in pool.relays() {
        match state {
            ConnectionState::Failed => {
                let reason = pool
                    .failures()
                    .iter()
                    .find(|(failed, _)| failed == &url)
                    .map(|(_, e)| e.to_string())
                    .unwrap_or_default();
                println!("{url}  failed  {reason}");
            }
            state => println!("{url}  {}", format!("{state:?}").to_lowercase()),
        }
    }
    pool.close().await;
    Ok(())
}

fn write_relays_to_env(env_path: &str, relays: &[String]) -> anyhow::Result<()> {
    let content = fs::read_to_string(env_path)?;
    let relays_joined = relays.join(",");
    let mut new_content = String::new();
    let mut replaced = false;
    for line in content.lines() {
        if line.starts_with("RELAYS=") {
            new_content.push_str(&format!("RELAYS={relays_joined}\n"));
            replaced = true;
        } else {
            new_content.push_str(line);
            new_content.push('\n');
        }
    }
    if !replaced {
        new_content.push_str(&format!("RELAYS={relays_joined}\n"));
    }
    fs::write(env_path, new_content)?;
    std::env::set_var("RELAYS", relays_joined);
    Ok(())
}

#[cfg(not(test))]
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
    let cli = Cli::parse();
    run(cli).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::{SinkExt, StreamExt};
    use std::sync::Mutex;
    use tempfile::TempDir;
    use tokio::{net::TcpListener, task};
    use tokio_tungstenite::{accept_async, tungstenite::Message as TMsg};

    static ENV_MUTEX: Mutex<()> = Mutex::new(());

    const VARS: [&str; 7] = [
        "RELAYS",
        "CONNECT_TIMEOUT_MS",
        "PUBLISH_TIMEOUT_MS",
        "QUERY_WINDOW_MS",
        "REQUIRE_VALID_SIG",
        "KEY_FILE",
        "TOR_SOCKS",
    ];

    fn clear_env() {
        for v in VARS {
            std::env::remove_var(v);
        }
    }

    fn write_env(dir: &TempDir, extra: &str) -> String {
        let env_path = dir.path().join(".env");
        let content = format!("CONNECT_TIMEOUT_MS=500\nQUERY_WINDOW_MS=300\n{extra}");
        fs::write(&env_path, content).unwrap();
        env_path.to_str().unwrap().into()
    }

    /// Relay that accepts one connection and acknowledges every event.
    async fn spawn_relay() -> (String, task::JoinHandle<()>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = task::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut ws = accept_async(stream).await.unwrap();
            while let Some(Ok(msg)) = ws.next().await {
                match msg {
                    TMsg::Text(txt) => {
                        let val: serde_json::Value = serde_json::from_str(&txt).unwrap();
                        if val[0] == "EVENT" {
                            let ok = serde_json::json!(["OK", val[1]["id"], true, ""]);
                            ws.send(TMsg::Text(ok.to_string())).await.unwrap();
                        } else if val[0] == "REQ" {
                            let eose = serde_json::json!(["EOSE", val[1]]);
                            ws.send(TMsg::Text(eose.to_string())).await.unwrap();
                        }
                    }
                    TMsg::Close(_) => break,
                    _ => {}
                }
            }
        });
        (format!("ws://{addr}"), server)
    }

    #[tokio::test]
    async fn creates_default_env() {
        let _g = ENV_MUTEX.lock().unwrap_or_else(|e| e.into_inner());
        clear_env();
        let dir = TempDir::new().unwrap();
        let env_path = dir.path().join("conf/.env");
        run(Cli {
            env: env_path.to_string_lossy().into_owned(),
            command: Commands::Keygen { force: false },
        })
        .await
        .unwrap();

        let data = fs::read_to_string(&env_path).unwrap();
        assert!(data.contains("RELAYS=wss://relay.damus.io,wss://relay.nostr.band,wss://nos.lol"));
        assert!(data.contains("QUERY_WINDOW_MS=3000"));
        assert!(data.contains("KEY_FILE=\n"));
    }

    #[tokio::test]
    async fn keygen_saves_key_file_once() {
        let _g = ENV_MUTEX.lock().unwrap_or_else(|e| e.into_inner());
        clear_env();
        let dir = TempDir::new().unwrap();
        let key_path = dir.path().join("identity.hex");
        let env_file = write_env(&dir, &format!("KEY_FILE={}\n", key_path.display()));

        run(Cli {
            env: env_file.clone(),
            command: Commands::Keygen { force: false },
        })
        .await
        .unwrap();
        let first = fs::read_to_string(&key_path).unwrap();
        assert!(Keys::from_secret_hex(&first).is_ok());

        let err = run(Cli {
            env: env_file.clone(),
            command: Commands::Keygen { force: false },
        })
        .await
        .unwrap_err();
        assert!(err.to_string().contains("already exists"));

        run(Cli {
            env: env_file,
            command: Commands::Keygen { force: true },
        })
        .await
        .unwrap();
        assert_ne!(fs::read_to_string(&key_path).unwrap(), first);
    }

    #[tokio::test]
    async fn relays_add_validates_and_updates_env() {
        let _g = ENV_MUTEX.lock().unwrap_or_else(|e| e.into_inner());
        clear_env();
        let dir = TempDir::new().unwrap();
        let env_file = write_env(&dir, "RELAYS=ws://127.0.0.1:1\n");
        let (url, server) = spawn_relay().await;

        run(Cli {
            env: env_file.clone(),
            command: Commands::Relays {
                action: RelayAction::Add { url: url.clone() },
            },
        })
        .await
        .unwrap();
        server.await.unwrap();

        let data = fs::read_to_string(&env_file).unwrap();
        assert!(data.contains(&format!("RELAYS=ws://127.0.0.1:1,{url}")));
    }

    #[tokio::test]
    async fn relays_add_rejects_unreachable() {
        let _g = ENV_MUTEX.lock().unwrap_or_else(|e| e.into_inner());
        clear_env();
        let dir = TempDir::new().unwrap();
        let env_file = write_env(&dir, "RELAYS=ws://one\n");
        let err = run(Cli {
            env: env_file.clone(),
            command: Commands::Relays {
                action: RelayAction::Add {
                    url: "ws://127.0.0.1:1".into(),
                },
            },
        })
        .await
        .unwrap_err();
        assert!(err.to_string().contains("connecting to ws://127.0.0.1:1"));
        let data = fs::read_to_string(&env_file).unwrap();
        assert!(data.contains("RELAYS=ws://one\n"));
    }

    #[tokio::test]
    async fn relays_remove_updates_env() {
        let _g = ENV_MUTEX.lock().unwrap_or_else(|e| e.into_inner());
        clear_env();
        let dir = TempDir::new().unwrap();
        let env_file = write_env(&dir, "RELAYS=ws://one,ws://two\n");

        run(Cli {
            env: env_file.clone(),
            command: Commands::Relays {
                action: RelayAction::Remove {
                    url: "ws://one".into(),
                },
            },
        })
        .await
        .unwrap();

        let data = fs::read_to_string(&env_file).unwrap();
        assert!(data.contains("RELAYS=ws://two"));
        assert!(!data.contains("ws://one"));

        let err = run(Cli {
            env: env_file,
            command: Commands::Relays {
                action: RelayAction::Remove {
                    url: "ws://three".into(),
                },
            },
        })
        .await
        .unwrap_err();
        assert!(err.to_string().contains("not configured"));
    }

    #[tokio::test]
    async fn relays_remove_refuses_to_empty_list() {
        let _g = ENV_MUTEX.lock().unwrap_or_else(|e| e.into_inner());
        clear_env();
        let dir = TempDir::new().unwrap();
        let env_file = write_env(&dir, "RELAYS=ws://only\n");
        let before = fs::read_to_string(&env_file).unwrap();

        let err = run(Cli {
            env: env_file.clone(),
            command: Commands::Relays {
                action: RelayAction::Remove {
                    url: "ws://only".into(),
                },
            },
        })
        .await
        .unwrap_err();
        assert!(err.to_string().contains("last configured relay"));
        assert_eq!(fs::read_to_string(&env_file).unwrap(), before);
    }

    #[tokio::test]
    async fn archive_body_file_publishes() {
        let _g = ENV_MUTEX.lock().unwrap_or_else(|e| e.into_inner());
        clear_env();
        let dir = TempDir::new().unwrap();
        let (url, server) = spawn_relay().await;
        let env_file = write_env(&dir, &format!("RELAYS={url}\n"));
        let body_path = dir.path().join("body.html");
        fs::write(&body_path, "<p>saved</p>").unwrap();

        run(Cli {
            env: env_file,
            command: Commands::Archive {
                url: "https://example.com/saved".into(),
                body_file: Some(body_path),
            },
        })
        .await
        .unwrap();
        server.await.unwrap();
    }

    #[tokio::test]
    async fn archive_rejects_non_http_url() {
        let _g = ENV_MUTEX.lock().unwrap_or_else(|e| e.into_inner());
        clear_env();
        let dir = TempDir::new().unwrap();
        let env_file = write_env(&dir, "RELAYS=ws://127.0.0.1:1\n");
        let err = run(Cli {
            env: env_file,
            command: Commands::Archive {
                url: "ftp://example.com/file".into(),
                body_file: None,
            },
        })
        .await
        .unwrap_err();
        assert!(err.to_string().contains("invalid url"));
    }

    #[test]
    fn summary_line_marks_verification() {
        let entry = ArchiveEntry {
            id: "ab".repeat(32),
            created_at: 1_700_000_000,
            body: "<p>x</p>".into(),
            author: "cd".repeat(32),
            verified: false,
        };
        let line = summary_line(&entry);
        assert!(line.starts_with("1700000000  abab"));
        assert!(line.contains("unverified"));
        assert!(line.ends_with("8 bytes"));
    }
}
