//! Server configuration, from the command-line or the environment.

use std::{net::SocketAddr, path::PathBuf, time::Duration};

use rsshd::{
    algorithm::{Catalog, HostKey, Key},
    side::{server::Server, Algorithms, Limits},
};
use rsshd_auth::{handler::password::Passwords, AuthorizedKeys};
use rsshd_sftp::Root;
use ssh_key::{Algorithm, Certificate, PrivateKey};

use crate::{Error, Result};

/// Room for the channel data header and the binary packet framing around a data payload.
const PACKET_OVERHEAD: usize = 1024;

/// The smallest transport packet every implementation must accept.
const MIN_PACKET_SIZE: usize = 35000;

/// The runtime configuration of the server, shared by all the connections.
#[derive(Debug, Clone)]
pub struct Config {
    /// The transport configuration: host keys, algorithms and limits.
    pub transport: Server,

    /// The keys and certificate authorities allowed to log in.
    pub authorized_keys: AuthorizedKeys,

    /// The passwords of the users, the `password` method being disabled when empty.
    pub passwords: Passwords,

    /// The number of failed authentication attempts tolerated per connection.
    pub max_auth_attempts: usize,

    /// A banner displayed before authentication.
    pub banner: Option<String>,

    /// The root directory files are served from.
    pub root: Root,

    /// Whether `scp` commands are served.
    pub allow_scp: bool,

    /// The signature algorithms accepted from users, by order of preference.
    pub signatures: Vec<Key>,

    /// The channel limits of each connection.
    pub connect: rsshd_connect::Config,
}

impl Config {
    /// Create a configuration serving `root` with the `transport` settings,
    /// accepting no user until keys or passwords are set.
    pub fn new(transport: Server, root: Root) -> Self {
        Self {
            transport,
            authorized_keys: Default::default(),
            passwords: Default::default(),
            max_auth_attempts: 6,
            banner: None,
            root,
            allow_scp: false,
            signatures: Key::enabled(false),
            connect: Default::default(),
        }
    }
}

/// The options of the server.
#[derive(Debug, Clone, clap::Args)]
pub struct Options {
    /// The address to listen on.
    #[arg(long, env = "RSSHD_LISTEN", default_value = "0.0.0.0:22")]
    pub listen: SocketAddr,

    /// A host private key file in the OpenSSH format, an ephemeral key being generated when none is set.
    #[arg(long = "host-key", env = "RSSHD_HOST_KEYS", value_delimiter = ',')]
    pub host_keys: Vec<PathBuf>,

    /// A certificate file for one of the host keys.
    #[arg(long = "host-cert", env = "RSSHD_HOST_CERTS", value_delimiter = ',')]
    pub host_certs: Vec<PathBuf>,

    /// The `authorized_keys` file of the users.
    #[arg(long, env = "RSSHD_AUTHORIZED_KEYS")]
    pub authorized_keys: Option<PathBuf>,

    /// The directory files are served from, which clients cannot escape.
    #[arg(long, env = "RSSHD_SFTP_ROOT", default_value = "/")]
    pub sftp_root: PathBuf,

    /// Serve `scp` commands in addition to the `sftp` subsystem.
    #[arg(long, env = "RSSHD_ALLOW_SCP")]
    pub allow_scp: bool,

    /// The maximum size of the data packets sent to us on channels.
    #[arg(long, env = "MAX_PKTSIZE", default_value_t = 32768)]
    pub max_pktsize: u32,

    /// The maximum count of channels opened at once on a connection.
    #[arg(long, env = "RSSHD_MAX_CHANNELS", default_value_t = 10)]
    pub max_channels: usize,

    /// The key-exchange algorithms, by order of preference.
    #[arg(long, env = "RSSHD_KEX_ALGS", value_delimiter = ',')]
    pub kex_algs: Vec<String>,

    /// The host key signature algorithms, by order of preference.
    #[arg(long, env = "RSSHD_SIGNATURE_ALGS", value_delimiter = ',')]
    pub signature_algs: Vec<String>,

    /// The encryption algorithms, by order of preference.
    #[arg(long, env = "RSSHD_ENCRYPTION_ALGS", value_delimiter = ',')]
    pub encryption_algs: Vec<String>,

    /// The MAC algorithms, by order of preference.
    #[arg(long, env = "RSSHD_MAC_ALGS", value_delimiter = ',')]
    pub mac_algs: Vec<String>,

    /// The compression algorithms, by order of preference.
    #[arg(long, env = "RSSHD_COMPRESSION_ALGS", value_delimiter = ',')]
    pub compression_algs: Vec<String>,

    /// Enable the legacy algorithms (CBC modes, 3DES, SHA-1 and MD5 MACs, `ssh-rsa`, `ssh-dss`, ...).
    #[arg(long, env = "RSSHD_LEGACY")]
    pub legacy: bool,

    /// The number of failed authentication attempts tolerated per connection.
    #[arg(long, env = "RSSHD_MAX_AUTH_ATTEMPTS", default_value_t = 6)]
    pub max_auth_attempts: usize,

    /// A `user:password` pair, enabling the `password` method.
    #[arg(
        long = "password",
        env = "RSSHD_PASSWORDS",
        value_delimiter = ',',
        value_parser = parse_password
    )]
    pub passwords: Vec<(String, String)>,

    /// A banner displayed to users before authentication.
    #[arg(long, env = "RSSHD_BANNER")]
    pub banner: Option<String>,

    /// The number of bytes after which the session keys are renewed.
    #[arg(long, env = "RSSHD_REKEY_BYTES")]
    pub rekey_bytes: Option<usize>,

    /// The number of seconds after which the session keys are renewed.
    #[arg(long, env = "RSSHD_REKEY_SECONDS")]
    pub rekey_seconds: Option<u64>,

    /// The number of seconds allowed for the handshake, and for each packet once started.
    #[arg(long, env = "RSSHD_LOGIN_TIMEOUT", default_value_t = 120)]
    pub login_timeout: u64,
}

fn parse_password(value: &str) -> Result<(String, String), String> {
    match value.split_once(':') {
        Some((user, password)) if !user.is_empty() => Ok((user.into(), password.into())),
        _ => Err("expected `user:password`".into()),
    }
}

impl Options {
    /// Load the files referenced by the options and build the [`Config`].
    pub async fn load(self) -> Result<Config> {
        let algorithms = Algorithms {
            kexs: select("key-exchange", &self.kex_algs, self.legacy)?,
            keys: select("signature", &self.signature_algs, self.legacy)?,
            ciphers: select("encryption", &self.encryption_algs, self.legacy)?,
            macs: select("MAC", &self.mac_algs, self.legacy)?,
            compressions: select("compression", &self.compression_algs, self.legacy)?,
        };

        let keys = host_keys(&self.host_keys, &self.host_certs)?;
        if !algorithms
            .keys
            .iter()
            .any(|algorithm| keys.iter().any(|key| key.supports(algorithm)))
        {
            return Err(Error::Config(
                "none of the signature algorithms can be used with the host keys".into(),
            ));
        }

        let mut limits = Limits {
            max_packet_size: (self.max_pktsize as usize + PACKET_OVERHEAD).max(MIN_PACKET_SIZE),
            ..Default::default()
        };
        if let Some(bytes) = self.rekey_bytes {
            limits.rekey_bytes = bytes;
        }
        if let Some(seconds) = self.rekey_seconds {
            limits.rekey_interval = Duration::from_secs(seconds);
        }

        let transport = Server {
            timeout: Duration::from_secs(self.login_timeout),
            keys,
            algorithms,
            limits,
            ..Default::default()
        };

        let authorized_keys = match &self.authorized_keys {
            Some(path) => {
                let keys = AuthorizedKeys::read(path)?;
                tracing::info!("Loaded {} authorized keys from `{}`", keys.len(), path.display());

                keys
            }
            None => {
                tracing::warn!("No authorized keys file set, `publickey` authentication will fail");

                Default::default()
            }
        };

        let mut passwords = Passwords::default();
        for (user, password) in self.passwords {
            passwords.insert(user, password);
        }

        let root = Root::new(&self.sftp_root).await?;
        tracing::info!("Serving files from `{}`", root.path().display());

        Ok(Config {
            authorized_keys,
            passwords,
            max_auth_attempts: self.max_auth_attempts,
            banner: self.banner,
            allow_scp: self.allow_scp,
            signatures: transport.algorithms.keys.clone(),
            connect: rsshd_connect::Config {
                max_channels: self.max_channels,
                window_size: self.max_pktsize.saturating_mul(64),
                maximum_packet_size: self.max_pktsize,
                ..Default::default()
            },
            ..Config::new(transport, root)
        })
    }
}

/// Pick the algorithms of a `category` from their `names`, in order,
/// skipping the unsupported ones and the legacy ones unless enabled.
fn select<A: Catalog>(category: &str, names: &[String], legacy: bool) -> Result<Vec<A>> {
    if names.is_empty() {
        return Ok(A::enabled(legacy));
    }

    let available = A::all();
    let mut selected: Vec<A> = Vec::new();

    for name in names {
        match available.iter().find(|algorithm| algorithm.as_ref() == name) {
            Some(algorithm) if algorithm.is_legacy() && !legacy => {
                tracing::warn!("Skipped the legacy {category} algorithm `{name}`, legacy algorithms are disabled");
            }
            Some(algorithm) => {
                if !selected.iter().any(|known| known.as_ref() == name) {
                    selected.push(algorithm.clone());
                }
            }
            None => {
                tracing::warn!("Skipped the unsupported {category} algorithm `{name}`");
            }
        }
    }

    if selected.is_empty() {
        Err(Error::Config(format!("no supported {category} algorithm")))
    } else {
        Ok(selected)
    }
}

/// Read the host keys at `paths`, and attach them the certificates at `certs`.
fn host_keys(paths: &[PathBuf], certs: &[PathBuf]) -> Result<Vec<HostKey>> {
    let mut keys = paths
        .iter()
        .map(|path| {
            let key = PrivateKey::read_openssh_file(path)?;

            if key.is_encrypted() {
                return Err(Error::Config(format!(
                    "the host key `{}` is encrypted",
                    path.display()
                )));
            }

            tracing::info!("Loaded the `{}` host key from `{}`", key.algorithm(), path.display());

            Ok(HostKey::from(key))
        })
        .collect::<Result<Vec<_>>>()?;

    if keys.is_empty() {
        tracing::warn!("No host key set, generating an ephemeral `ssh-ed25519` key");

        keys.push(PrivateKey::random(&mut rand::thread_rng(), Algorithm::Ed25519)?.into());
    }

    for path in certs {
        let certificate = Certificate::read_file(path)?;

        let Some(key) = keys
            .iter_mut()
            .find(|key| certificate.public_key() == key.key.public_key().key_data())
        else {
            return Err(Error::Config(format!(
                "the certificate `{}` matches none of the host keys",
                path.display()
            )));
        };

        *key = key.clone().with_certificate(certificate)?;
    }

    Ok(keys)
}

#[cfg(test)]
mod tests {
    use clap::Parser;
    use rsshd::algorithm::{Cipher, Hmac, Kex};

    use super::*;

    #[derive(Debug, Parser)]
    struct Cli {
        #[command(flatten)]
        options: Options,
    }

    fn names(names: &[&str]) -> Vec<String> {
        names.iter().map(ToString::to_string).collect()
    }

    #[test]
    fn unsupported_algorithms_are_skipped() {
        let kexs: Vec<Kex> = select(
            "key-exchange",
            &names(&["made-up-kex", "curve25519-sha256", "curve25519-sha256"]),
            false,
        )
        .unwrap();

        assert_eq!(kexs.len(), 1);
        assert_eq!(kexs[0].as_ref(), "curve25519-sha256");
    }

    #[test]
    fn legacy_algorithms_need_to_be_enabled() {
        let list = names(&["arcfour", "none", "3des-cbc", "aes128-ctr"]);

        let ciphers: Vec<Cipher> = select("encryption", &list, false).unwrap();
        assert_eq!(
            ciphers.iter().map(AsRef::as_ref).collect::<Vec<_>>(),
            ["aes128-ctr"]
        );

        let ciphers: Vec<Cipher> = select("encryption", &list, true).unwrap();
        assert_eq!(
            ciphers.iter().map(AsRef::as_ref).collect::<Vec<_>>(),
            ["3des-cbc", "aes128-ctr"]
        );
    }

    #[test]
    fn an_empty_category_is_an_error() {
        assert!(matches!(
            select::<Hmac>("MAC", &names(&["hmac-md5"]), false),
            Err(Error::Config(_))
        ));
        assert!(!select::<Hmac>("MAC", &[], false).unwrap().is_empty());
    }

    #[test]
    fn options_are_parsed() {
        let Cli { options } = Cli::parse_from([
            "rsshd",
            "--listen",
            "127.0.0.1:2222",
            "--kex-algs",
            "curve448-sha512,curve25519-sha256",
            "--password",
            "alice:s3:cret",
            "--allow-scp",
        ]);

        assert_eq!(options.listen.port(), 2222);
        assert_eq!(options.kex_algs, ["curve448-sha512", "curve25519-sha256"]);
        assert_eq!(options.passwords, [("alice".into(), "s3:cret".into())]);
        assert!(options.allow_scp);
        assert_eq!(options.max_pktsize, 32768);
        assert_eq!(options.sftp_root, PathBuf::from("/"));

        assert!(Cli::try_parse_from(["rsshd", "--password", "nobody"]).is_err());
    }

    #[tokio::test]
    async fn options_are_loaded() {
        let dir = tempfile::tempdir().unwrap();
        let Cli { mut options } = Cli::parse_from(["rsshd", "--signature-algs", "ssh-ed25519"]);
        options.sftp_root = dir.path().into();

        let config = options.load().await.unwrap();
        assert_eq!(config.transport.keys.len(), 1);
        assert_eq!(config.root.path(), std::fs::canonicalize(dir.path()).unwrap());
        assert!(config.passwords.is_empty());

        let Cli { mut options } = Cli::parse_from(["rsshd", "--signature-algs", "ecdsa-sha2-nistp256"]);
        options.sftp_root = dir.path().into();
        assert!(matches!(options.load().await, Err(Error::Config(_))));
    }

    #[tokio::test]
    async fn packet_size_and_signatures_reach_the_layers() {
        let dir = tempfile::tempdir().unwrap();
        let Cli { mut options } = Cli::parse_from([
            "rsshd",
            "--max-pktsize",
            "65536",
            "--signature-algs",
            "ssh-ed25519,rsa-sha2-512",
        ]);
        options.sftp_root = dir.path().into();

        let config = options.load().await.unwrap();
        assert_eq!(config.transport.limits.max_packet_size, 65536 + PACKET_OVERHEAD);
        assert_eq!(config.connect.maximum_packet_size, 65536);
        assert_eq!(config.connect.window_size, 64 * 65536);
        assert_eq!(config.signatures, [Key::Ed25519, Key::RsaSha512]);

        let Cli { mut options } = Cli::parse_from(["rsshd", "--max-pktsize", "1024"]);
        options.sftp_root = dir.path().into();

        let config = options.load().await.unwrap();
        assert_eq!(config.transport.limits.max_packet_size, MIN_PACKET_SIZE);
    }
}
