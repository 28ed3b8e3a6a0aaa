use anyhow::{Context, bail};
use clap::Parser;
use coffer_crypto::{DownloadClaims, KeyMaterial};
use coffer_logging::CofferSubscriberBuilder;
use coffer_storage::WriteOutcome;
use coffer_vault::cli::{Cli, Command, TokenCommand};
use coffer_vault::{UploadPlan, Vault, VaultConfig};
use futures::{StreamExt, TryStreamExt};
use serde::Serialize;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio_util::io::ReaderStream;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // keygen needs neither config nor a backend
    if let Command::Keygen = cli.command {
        println!("{}", KeyMaterial::generate().to_hex());
        return Ok(());
    }

    let config = match &cli.config {
        Some(path) => VaultConfig::load(path)?,
        None => VaultConfig::from_env(),
    };

    let _log_guard = CofferSubscriberBuilder::new()
        .with_config(config.logging.clone())
        .init();

    let vault = Vault::from_config(&config).await?;

    match cli.command {
        Command::Keygen => {}
        Command::Put { file, key, mime } => {
            let handle = tokio::fs::File::open(&file)
                .await
                .with_context(|| format!("opening {}", file.display()))?;
            let body = ReaderStream::new(handle).boxed();

            match vault.begin_upload(body, &key, mime.as_deref()).await? {
                UploadPlan::Stored(outcome) => {
                    let report = StoredReport {
                        key: &key,
                        outcome: &outcome,
                    };
                    println!("{}", serde_json::to_string_pretty(&report)?);
                }
                UploadPlan::Direct(url) => {
                    println!("upload to {} (expires {})", url.url, url.expires_at);
                }
            }
        }
        Command::Get { key, out } => match out {
            Some(path) => {
                let file = tokio::fs::File::create(&path).await?;
                if let Err(e) = copy_object(&vault, &key, file).await {
                    let _ = tokio::fs::remove_file(&path).await;
                    return Err(e);
                }
            }
            None => copy_object(&vault, &key, tokio::io::stdout()).await?,
        },
        Command::Stat { key } => {
            println!("{}", vault.stat(&key).await?);
        }
        Command::Delete { key } => {
            if !vault.delete(&key).await? {
                bail!("no object stored under {key}");
            }
        }
        Command::Health => {
            if !vault.health().await {
                bail!("storage backend is unhealthy");
            }
            println!("ok");
        }
        Command::Token { action } => run_token(&vault, action)?,
    }

    Ok(())
}

fn run_token(vault: &Vault, action: TokenCommand) -> anyhow::Result<()> {
    let now = chrono::Utc::now().timestamp_millis();
    match action {
        TokenCommand::Issue {
            id,
            ttl_secs,
            password,
        } => {
            let mut claims = DownloadClaims::new(id).with_password(password);
            if let Some(ttl) = ttl_secs {
                claims = claims.with_ttl(now, chrono::Duration::seconds(ttl));
            }
            println!("{}", vault.issue_download_token(&claims)?);
        }
        TokenCommand::Verify { token } => match vault.verify_download_token(&token, now) {
            Some(claims) => println!("{}", serde_json::to_string_pretty(&claims)?),
            None => bail!("token is invalid or expired"),
        },
    }
    Ok(())
}

/// Stream an object into `sink`; a failed authentication surfaces as the
/// final item, after earlier chunks were already written
async fn copy_object<W>(vault: &Vault, key: &str, mut sink: W) -> anyhow::Result<()>
where
    W: AsyncWrite + Unpin,
{
    let mut stream = vault.download(key).await?;
    while let Some(chunk) = stream.try_next().await? {
        sink.write_all(&chunk).await?;
    }
    sink.flush().await?;
    Ok(())
}

/// What `put` prints for an object stored in-process
#[derive(Serialize)]
struct StoredReport<'a> {
    key: &'a str,
    #[serde(flatten)]
    outcome: &'a WriteOutcome,
}
