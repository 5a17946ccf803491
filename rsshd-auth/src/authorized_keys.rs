//! Parsing and lookup of OpenSSH `authorized_keys` files.
//!
//! Each line of the file has the format:
//! ```text
//! [options] keytype base64-key [comment]
//! ```
//!
//! The supported options are `cert-authority`, `principals="..."`, `command="..."`,
//! `subsystem="..."`, `restrict`, `no-pty` and `pty`. The forwarding-related options are
//! accepted and ignored since forwarding is never permitted, any other option is refused.

use std::{path::Path, str::FromStr, sync::Arc, time::SystemTime};

use ssh_key::{certificate::CertType, public::KeyData, Algorithm, Certificate, HashAlg, PublicKey};

use crate::{Error, Restrictions, Result};

/// Options that restrict features this server never provides.
const IGNORED_OPTIONS: &[&str] = &[
    "no-port-forwarding",
    "no-agent-forwarding",
    "no-x11-forwarding",
    "no-user-rc",
    "port-forwarding",
    "agent-forwarding",
    "x11-forwarding",
    "user-rc",
];

#[derive(Debug, Clone)]
struct Entry {
    key: KeyData,
    comment: String,

    /// Whether the key is trusted to sign user certificates.
    authority: bool,

    /// Principals a certificate must carry one of, instead of the user name.
    principals: Option<Vec<String>>,

    restrictions: Restrictions,
}

/// An immutable store of authorized keys and certificate authorities,
/// meant to be loaded at startup and shared across sessions, clones referring to the same entries.
#[derive(Debug, Clone, Default)]
pub struct AuthorizedKeys {
    entries: Arc<Vec<Entry>>,
}

impl AuthorizedKeys {
    /// Load the authorized keys from the file at `path`.
    pub fn read(path: impl AsRef<Path>) -> Result<Self> {
        Self::from_str(&std::fs::read_to_string(path)?)
    }

    /// The number of entries in the store.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the store has no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Look up whether the `key` (and its `certificate`, if any) may log in as `user`,
    /// returning the restrictions applying to the login.
    pub fn authorize(
        &self,
        user: &str,
        key: &KeyData,
        certificate: Option<&Certificate>,
    ) -> Option<Restrictions> {
        let now = SystemTime::now()
            .duration_since(SystemTime::UNIX_EPOCH)
            .map(|elapsed| elapsed.as_secs())
            .unwrap_or_default();

        self.authorize_at(user, key, certificate, now)
    }

    fn authorize_at(
        &self,
        user: &str,
        key: &KeyData,
        certificate: Option<&Certificate>,
        now: u64,
    ) -> Option<Restrictions> {
        match certificate {
            None => self
                .entries
                .iter()
                .find(|entry| !entry.authority && entry.key == *key)
                .map(|entry| entry.restrictions.clone()),
            Some(certificate) => self
                .entries
                .iter()
                .filter(|entry| entry.authority && entry.key == *certificate.signature_key())
                .find_map(|entry| {
                    let fingerprint = entry.key.fingerprint(HashAlg::Sha256);

                    if let Err(err) = certificate.validate_at(now, [&fingerprint]) {
                        tracing::debug!(
                            "Certificate `{}` refused by authority `{}`: {err}",
                            certificate.key_id(),
                            entry.comment,
                        );

                        return None;
                    }
                    if certificate.cert_type() != CertType::User {
                        return None;
                    }

                    let principals = certificate.valid_principals();
                    let permitted = match &entry.principals {
                        Some(allowed) => principals.iter().any(|name| allowed.contains(name)),
                        None => principals.iter().any(|name| name == user),
                    };
                    if !permitted {
                        tracing::debug!(
                            "Certificate `{}` carries no principal allowed for `{user}`",
                            certificate.key_id(),
                        );

                        return None;
                    }

                    Some(entry.restrictions.clone().merge(Restrictions {
                        command: certificate.critical_options().get("force-command").cloned(),
                        subsystems: None,
                        no_pty: !certificate.extensions().contains_key("permit-pty"),
                    }))
                }),
        }
    }
}

impl FromStr for AuthorizedKeys {
    type Err = Error;

    fn from_str(content: &str) -> Result<Self> {
        let entries = content
            .lines()
            .enumerate()
            .map(|(idx, line)| (idx + 1, line.trim()))
            .filter(|(_, line)| !line.is_empty() && !line.starts_with('#'))
            .map(|(line, content)| parse_line(line, content))
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            entries: entries.into(),
        })
    }
}

fn parse_line(line: usize, content: &str) -> Result<Entry> {
    let (first, rest) = split_field(content);

    let (options, key) = if Algorithm::from_str(first).is_ok() {
        ("", content)
    } else {
        (first, rest)
    };

    let key = PublicKey::from_openssh(key).map_err(|source| Error::Key { line, source })?;

    let mut entry = Entry {
        comment: key.comment().to_string(),
        key: key.key_data().clone(),
        authority: false,
        principals: None,
        restrictions: Default::default(),
    };

    for option in split_list(options) {
        let invalid = || Error::Option {
            line,
            option: option.to_string(),
        };

        let (name, value) = match option.split_once('=') {
            Some((name, value)) => (name, Some(unquote(value).ok_or_else(invalid)?)),
            None => (option, None),
        };

        match (name.to_ascii_lowercase().as_str(), value) {
            ("cert-authority", None) => entry.authority = true,
            ("restrict" | "no-pty", None) => entry.restrictions.no_pty = true,
            ("pty", None) => entry.restrictions.no_pty = false,
            ("command", Some(command)) => entry.restrictions.command = Some(command),
            ("principals", Some(list)) => {
                entry.principals = Some(list.split(',').map(str::to_string).collect())
            }
            ("subsystem", Some(list)) => {
                entry.restrictions.subsystems = Some(list.split(',').map(str::to_string).collect())
            }
            (name, None) if IGNORED_OPTIONS.contains(&name) => (),
            _ => return Err(invalid()),
        }
    }

    Ok(entry)
}

/// Split the first whitespace-delimited field of `line`, double-quotes protecting whitespace.
fn split_field(line: &str) -> (&str, &str) {
    let mut quoted = false;

    for (idx, c) in line.char_indices() {
        match c {
            '"' => quoted = !quoted,
            c if c.is_whitespace() && !quoted => return (&line[..idx], line[idx..].trim_start()),
            _ => (),
        }
    }

    (line, "")
}

/// Split a comma-separated list of options, double-quotes protecting commas.
fn split_list(options: &str) -> impl Iterator<Item = &str> {
    let mut quoted = false;

    options
        .split(move |c| match c {
            '"' => {
                quoted = !quoted;
                false
            }
            ',' => !quoted,
            _ => false,
        })
        .filter(|option| !option.is_empty())
}

fn unquote(value: &str) -> Option<String> {
    value
        .strip_prefix('"')
        .and_then(|value| value.strip_suffix('"'))
        .map(|value| value.replace("\\\"", "\""))
}
