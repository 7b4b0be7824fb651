use std::{collections::HashMap, fs, path::Path};

use log::info;
use thiserror::Error;

use crate::crypto::keys::{sanitize, Private, Public};

/// Wallet used for mining rewards, change outputs and signing sends
pub const MAIN_WALLET: &str = "main.key";

#[derive(Error, Debug)]
pub enum WalletError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Key file {0} is malformed")]
    BadKeyFile(String),
}

/// A named keypair loaded from a `*.key` file
#[derive(Clone)]
pub struct Wallet {
    pub name: String,
    pub private: Private,
    pub public: Public,
}

impl Wallet {
    pub fn address(&self) -> String {
        sanitize(&self.public)
    }
}

/// Load every `*.key` file of the node folder. The `main.key` wallet is
/// created on first run.
pub fn load_wallets(folder: &Path) -> Result<HashMap<String, Wallet>, WalletError> {
    fs::create_dir_all(folder)?;

    let mut wallets = HashMap::new();

    for entry in fs::read_dir(folder)? {
        let entry = entry?;
        let name = entry.file_name().to_string_lossy().into_owned();
        if !name.ends_with(".key") || !entry.path().is_file() {
            continue;
        }

        let raw = fs::read(entry.path())?;
        let buf: [u8; 32] = raw
            .as_slice()
            .try_into()
            .map_err(|_| WalletError::BadKeyFile(name.clone()))?;
        let private = Private::new_from_buf(buf);

        wallets.insert(
            name.clone(),
            Wallet {
                public: private.to_public(),
                private,
                name,
            },
        );
    }

    if !wallets.contains_key(MAIN_WALLET) {
        let private = Private::new_random();
        fs::write(folder.join(MAIN_WALLET), private.dump_buf())?;
        info!("Created wallet {MAIN_WALLET}");

        wallets.insert(
            MAIN_WALLET.to_string(),
            Wallet {
                name: MAIN_WALLET.to_string(),
                public: private.to_public(),
                private,
            },
        );
    }

    Ok(wallets)
}
