//! # Coffer Vault
//!
//! Process-level wiring for Coffer: configuration from TOML and the
//! environment, keyring loading, backend selection, and the [`Vault`]
//! facade request handlers use.
//!
//! ## Example
//!
//! ```rust,ignore
//! use coffer_vault::{UploadPlan, Vault, VaultConfig};
//!
//! let config = VaultConfig::load("coffer.toml")?;
//! let vault = Vault::from_config(&config).await?;
//!
//! match vault.begin_upload(body, "object-1", Some("application/pdf")).await? {
//!     UploadPlan::Stored(outcome) => println!("sha256 {}", outcome.checksum),
//!     UploadPlan::Direct(url) => println!("upload to {}", url.url),
//! }
//! ```

pub mod cli;
pub mod config;
pub mod error;
pub mod vault;

// Re-exports
pub use config::{StorageConfig, VaultConfig};
pub use error::{VaultError, VaultResult};
pub use vault::{UploadPlan, Vault};
