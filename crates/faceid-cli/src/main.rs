use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use faceid_core::wire;
use std::path::{Path, PathBuf};

#[derive(Parser)]
#[command(name = "faceid", about = "faceid gallery CLI")]
struct Cli {
    /// Talk to a daemon on the system bus instead of the session bus
    #[arg(long, global = true)]
    system: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Enroll the face in an image under a name
    Enroll {
        image: PathBuf,
        #[arg(short, long)]
        name: String,
    },
    /// Identify the face in an image
    Identify { image: PathBuf },
    /// Identify every face in an image
    RecognizeAll { image: PathBuf },
    /// Cosine distance between the faces of two images
    Compare { first: PathBuf, second: PathBuf },
    /// Deepfake likelihood for each face in an image
    Deepfake { image: PathBuf },
    /// Recompute demographic attributes of an enrolled identity
    UpdateAttributes {
        image: PathBuf,
        #[arg(long)]
        id: u64,
    },
    /// Delete every enrolled identity
    Reset,
    /// Render the 2-D gallery scatter plot
    Project,
    /// Print the embedding of the face in an image
    Features { image: PathBuf },
    /// Save the embedding of the face in an image to the daemon's export directory
    Export { image: PathBuf },
    /// Save the normalized face of an image for display
    Snapshot { image: PathBuf },
    /// Show daemon status
    Status,
}

#[zbus::proxy(
    interface = "org.faceid.Gallery1",
    default_service = "org.faceid.Gallery1",
    default_path = "/org/faceid/Gallery1"
)]
trait Gallery {
    fn enroll(&self, path: &str, name: &str) -> zbus::Result<Vec<u8>>;
    fn identify(&self, path: &str) -> zbus::Result<Vec<u8>>;
    fn recognize_all(&self, path: &str) -> zbus::Result<Vec<u8>>;
    fn compare(&self, first: &str, second: &str) -> zbus::Result<Vec<u8>>;
    fn deepfake(&self, path: &str) -> zbus::Result<Vec<u8>>;
    fn update_attributes(&self, path: &str, id: u64) -> zbus::Result<Vec<u8>>;
    fn reset(&self) -> zbus::Result<Vec<u8>>;
    fn project(&self) -> zbus::Result<Vec<u8>>;
    fn features(&self, path: &str) -> zbus::Result<Vec<u8>>;
    fn export(&self, path: &str) -> zbus::Result<Vec<u8>>;
    fn snapshot(&self, path: &str) -> zbus::Result<Vec<u8>>;
    fn status(&self) -> zbus::Result<String>;
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    let connection = if cli.system {
        zbus::Connection::system().await
    } else {
        zbus::Connection::session().await
    }
    .context("connecting to D-Bus")?;
    let proxy = GalleryProxy::new(&connection)
        .await
        .context("faceidd is not reachable")?;
    tracing::debug!(system_bus = cli.system, "connected to faceidd");

    match cli.command {
        Commands::Enroll { image, name } => {
            let buf = proxy.enroll(&absolute(&image)?, &name).await?;
            scalar(&buf)?;
            println!("Enrolled {name}");
        }
        Commands::Identify { image } => {
            let id = scalar(&proxy.identify(&absolute(&image)?).await?)?;
            println!("{}", describe_id(id));
        }
        Commands::RecognizeAll { image } => {
            let ids = decode(&proxy.recognize_all(&absolute(&image)?).await?)?;
            for (i, id) in ids.iter().enumerate() {
                println!("face {}: {}", i + 1, describe_id(*id));
            }
        }
        Commands::Compare { first, second } => {
            let distance = scalar(&proxy.compare(&absolute(&first)?, &absolute(&second)?).await?)?;
            println!("distance: {distance:.4}");
        }
        Commands::Deepfake { image } => {
            let scores = decode(&proxy.deepfake(&absolute(&image)?).await?)?;
            for (i, pct) in scores.iter().enumerate() {
                println!("face {}: {pct:.0}% likely fake", i + 1);
            }
        }
        Commands::UpdateAttributes { image, id } => {
            let status = scalar(&proxy.update_attributes(&absolute(&image)?, id).await?)?;
            if status == wire::SENTINEL {
                bail!("no identity with id {id}");
            }
            println!("Updated attributes of identity {id}");
        }
        Commands::Reset => {
            scalar(&proxy.reset().await?)?;
            println!("Gallery cleared");
        }
        Commands::Project => {
            if scalar(&proxy.project().await?)? == wire::SENTINEL {
                bail!("projection failed (see daemon log)");
            }
            println!("Projection rendered");
        }
        Commands::Features { image } => {
            let values = decode(&proxy.features(&absolute(&image)?).await?)?;
            println!("{}", serde_json::to_string(&values)?);
        }
        Commands::Export { image } => {
            let n = scalar(&proxy.export(&absolute(&image)?).await?)?;
            println!("Saved export {n}");
        }
        Commands::Snapshot { image } => {
            let n = scalar(&proxy.snapshot(&absolute(&image)?).await?)?;
            println!("Saved snapshot {n}");
        }
        Commands::Status => {
            let raw = proxy.status().await?;
            let value: serde_json::Value = serde_json::from_str(&raw)?;
            println!("{}", serde_json::to_string_pretty(&value)?);
        }
    }

    Ok(())
}

/// The daemon resolves paths itself, so send absolute ones.
fn absolute(path: &Path) -> Result<String> {
    let path = std::fs::canonicalize(path).with_context(|| format!("image {}", path.display()))?;
    Ok(path.display().to_string())
}

fn scalar(buf: &[u8]) -> Result<f32> {
    let values = decode(buf)?;
    match values.as_slice() {
        [v] => Ok(*v),
        other => bail!("expected one value, daemon returned {}", other.len()),
    }
}

fn decode(buf: &[u8]) -> Result<Vec<f32>> {
    let values = wire::decode(buf)?;
    tracing::debug!(bytes = buf.len(), values = values.len(), "decoded daemon reply");
    Ok(values)
}

fn describe_id(id: f32) -> String {
    if id == wire::SENTINEL {
        "unknown".to_string()
    } else {
        format!("identity {}", id as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scalar_requires_single_value() {
        assert_eq!(scalar(&wire::encode_scalar(3.0)).unwrap(), 3.0);
        assert!(scalar(&wire::encode(&[1.0, 2.0])).is_err());
        assert!(scalar(&[]).is_err());
    }

    #[test]
    fn test_decode_rejects_truncated_reply() {
        assert_eq!(decode(&wire::encode(&[2.0, -1.0])).unwrap(), vec![2.0, -1.0]);
        assert!(decode(&[0, 0, 128]).is_err());
    }

    #[test]
    fn test_describe_id() {
        assert_eq!(describe_id(wire::SENTINEL), "unknown");
        assert_eq!(describe_id(12.0), "identity 12");
    }

    #[test]
    fn test_cli_parses_update_attributes() {
        let cli = Cli::try_parse_from(["faceid", "--system", "update-attributes", "a.jpg", "--id", "3"]).unwrap();
        assert!(cli.system);
        assert!(matches!(cli.command, Commands::UpdateAttributes { id: 3, .. }));
    }
}
