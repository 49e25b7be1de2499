//! Typed server/client construction options.
//!
//! Mirrors `opts.go` in the original: `ServerOpts`/`ClientOpts` are the
//! contract an external ini-file loader must produce. The typed options and
//! the ini-format loader both live here since `mqd`/`mq-client` need
//! something real to call.

use thiserror::Error;

/// A single pre-registered client credential, as read from an ini section.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyToken {
    pub key: String,
    pub token: String,
}

/// Construction options for a `Server`.
#[derive(Debug, Clone, Default)]
pub struct ServerOpts {
    /// The server's own 16-byte identity, sent back to clients on a
    /// successful handshake.
    pub name: String,
    /// `host:port` to listen on.
    pub location: String,
    /// Pre-registered clients, one per non-default ini section.
    pub clients: Vec<KeyToken>,
}

/// Construction options for a `Client`.
#[derive(Debug, Clone, Default)]
pub struct ClientOpts {
    pub name: String,
    pub token: String,
    pub location: String,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {0}: {1}")]
    ReadFailed(String, std::io::Error),
    #[error("failed to parse ini: {0}")]
    ParseFailed(#[from] ini::ParseError),
    #[error("client section is missing a name")]
    EmptyName,
    #[error("client section is missing a token")]
    EmptyToken,
}

/// Load `ServerOpts` from an ini-format file.
///
/// The default section supplies `name`/`location`; every other section is a
/// registered client, keyed by its own `name`/`token` keys. An empty name or
/// token on a client section is a hard error, matching `opts.go`'s
/// `ErrEmptyName`/`ErrEmptyToken`.
pub fn load_server_opts(path: &str) -> Result<ServerOpts, ConfigError> {
    let text = std::fs::read_to_string(path)
        .map_err(|e| ConfigError::ReadFailed(path.to_string(), e))?;
    let conf = ini::Ini::load_from_str(&text)?;

    let mut opts = ServerOpts::default();
    let default = conf.general_section();
    opts.name = default.get("name").unwrap_or_default().to_string();
    opts.location = default.get("location").unwrap_or_default().to_string();

    for (section, props) in conf.iter() {
        if section.is_none() {
            continue;
        }
        let key = props.get("name").unwrap_or_default().to_string();
        let token = props.get("token").unwrap_or_default().to_string();
        if key.is_empty() {
            return Err(ConfigError::EmptyName);
        }
        if token.is_empty() {
            return Err(ConfigError::EmptyToken);
        }
        opts.clients.push(KeyToken { key, token });
    }

    Ok(opts)
}

/// Load `ClientOpts` from an ini-format file. `name`/`token`/`location` live
/// in the default section.
pub fn load_client_opts(path: &str) -> Result<ClientOpts, ConfigError> {
    let text = std::fs::read_to_string(path)
        .map_err(|e| ConfigError::ReadFailed(path.to_string(), e))?;
    let conf = ini::Ini::load_from_str(&text)?;

    let default = conf.general_section();
    let opts = ClientOpts {
        name: default.get("name").unwrap_or_default().to_string(),
        token: default.get("token").unwrap_or_default().to_string(),
        location: default.get("location").unwrap_or_default().to_string(),
    };

    if opts.name.is_empty() {
        return Err(ConfigError::EmptyName);
    }
    if opts.token.is_empty() {
        return Err(ConfigError::EmptyToken);
    }

    Ok(opts)
}
