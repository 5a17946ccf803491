//! The programs run on `session` channels, once requested by the peer.

use std::sync::Arc;

use rsshd_auth::{Principal, Restrictions};
use rsshd::packet::connect::ChannelRequestContext;
use rsshd_connect::Channel;
use rsshd_sftp::{Scp, Sftp, SUBSYSTEM};

use crate::{Config, Result};

/// The program forced in place of `sftp` requests by OpenSSH configurations.
const INTERNAL_SFTP: &str = "internal-sftp";

#[derive(Debug, PartialEq, Eq)]
pub(crate) enum Program {
    Sftp,
    Scp(Scp),
}

#[derive(Debug, PartialEq, Eq)]
pub(crate) enum Decision {
    Accept,
    Start(Program),
    Reject,
}

/// Decide how to answer the request, with the `restrictions` of the user.
pub(crate) fn decide(
    cx: &ChannelRequestContext,
    restrictions: &Restrictions,
    allow_scp: bool,
) -> Decision {
    if !cx.is_program() {
        return match cx {
            ChannelRequestContext::Env { .. } => Decision::Accept,
            _ => Decision::Reject,
        };
    }

    if let Some(forced) = &restrictions.command {
        return command(forced, allow_scp);
    }

    match cx {
        ChannelRequestContext::Exec { command: line } => {
            command(&String::from_utf8_lossy(line), allow_scp)
        }
        ChannelRequestContext::Subsystem { name }
            if name == SUBSYSTEM && restrictions.allows_subsystem(name) =>
        {
            Decision::Start(Program::Sftp)
        }
        _ => Decision::Reject,
    }
}

fn command(line: &str, allow_scp: bool) -> Decision {
    if line.trim() == INTERNAL_SFTP {
        return Decision::Start(Program::Sftp);
    }

    match Scp::parse(line) {
        Ok(scp) if allow_scp => Decision::Start(Program::Scp(scp)),
        Ok(_) => {
            tracing::debug!("Refused `{line}`, scp is disabled");

            Decision::Reject
        }
        Err(_) => Decision::Reject,
    }
}

/// Serve the requests of the `channel` until its program ends, then report its exit status.
pub(crate) async fn run(mut channel: Channel, config: Arc<Config>, principal: Arc<Principal>) {
    let id = channel.id();

    match serve(&mut channel, &config, &principal).await {
        Ok(Some(code)) => {
            tracing::debug!("Program on channel #{id} exited with status {code}");

            if let Err(err) = channel.exit(code) {
                tracing::debug!("Unable to report the exit status on channel #{id}: {err}");
            }
        }
        Ok(None) => tracing::debug!("Channel #{id} closed before starting a program"),
        Err(err) => tracing::warn!("Channel #{id} of user `{}` failed: {err}", principal.user),
    }
}

async fn serve(channel: &mut Channel, config: &Config, principal: &Principal) -> Result<Option<u32>> {
    let id = channel.id();

    let program = loop {
        let Some(request) = channel.request().await? else {
            return Ok(None);
        };

        match decide(request.cx(), &principal.restrictions, config.allow_scp) {
            Decision::Accept => request.accept()?,
            Decision::Reject => {
                tracing::warn!(
                    "Rejected a `{}` request of user `{}` on channel #{id}",
                    request.cx().name(),
                    principal.user
                );

                request.reject()?;
            }
            Decision::Start(program) => {
                tracing::info!(
                    "Starting {program:?} for user `{}` on channel #{id}",
                    principal.user
                );

                request.accept()?;

                break program;
            }
        }
    };

    let code = match program {
        Program::Sftp => match Sftp::new(config.root.clone()).serve(channel).await {
            Ok(()) => 0,
            Err(err) => {
                tracing::warn!("SFTP session of user `{}` failed: {err}", principal.user);

                1
            }
        },
        Program::Scp(scp) => match scp.run(&config.root, channel).await {
            Ok(code) => code,
            Err(err) => {
                tracing::warn!("scp of user `{}` failed: {err}", principal.user);

                1
            }
        },
    };

    Ok(Some(code))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn exec(command: &str) -> ChannelRequestContext {
        ChannelRequestContext::Exec {
            command: command.as_bytes().to_vec(),
        }
    }

    fn subsystem(name: &str) -> ChannelRequestContext {
        ChannelRequestContext::Subsystem { name: name.into() }
    }

    #[test]
    fn sftp_is_started_as_a_subsystem() {
        let open = Restrictions::default();
        let restricted = Restrictions {
            subsystems: Some(vec!["other".into()]),
            ..Default::default()
        };

        assert_eq!(
            decide(&subsystem("sftp"), &open, false),
            Decision::Start(Program::Sftp)
        );
        assert_eq!(decide(&subsystem("sftp"), &restricted, false), Decision::Reject);
        assert_eq!(decide(&subsystem("netconf"), &open, false), Decision::Reject);
    }

    #[test]
    fn scp_needs_to_be_allowed() {
        let open = Restrictions::default();

        assert_eq!(decide(&exec("scp -t /"), &open, false), Decision::Reject);
        assert!(matches!(
            decide(&exec("scp -t /"), &open, true),
            Decision::Start(Program::Scp(_))
        ));
        assert_eq!(decide(&exec("rm -rf /"), &open, true), Decision::Reject);
        assert_eq!(decide(&ChannelRequestContext::Shell, &open, true), Decision::Reject);
    }

    #[test]
    fn forced_commands_replace_the_request() {
        let forced = Restrictions {
            command: Some("internal-sftp".into()),
            ..Default::default()
        };

        assert_eq!(
            decide(&ChannelRequestContext::Shell, &forced, false),
            Decision::Start(Program::Sftp)
        );
        assert_eq!(
            decide(&exec("scp -f /etc/shadow"), &forced, true),
            Decision::Start(Program::Sftp)
        );

        let forced = Restrictions {
            command: Some("/bin/date".into()),
            ..Default::default()
        };
        assert_eq!(decide(&subsystem("sftp"), &forced, true), Decision::Reject);
    }

    #[test]
    fn only_the_environment_is_accepted_besides_programs() {
        let open = Restrictions::default();

        assert_eq!(
            decide(
                &ChannelRequestContext::Env {
                    name: "LANG".into(),
                    value: "C".into()
                },
                &open,
                false
            ),
            Decision::Accept
        );
        assert_eq!(
            decide(
                &ChannelRequestContext::Pty {
                    term: "xterm".into(),
                    width_chars: 80,
                    height_rows: 24,
                    width_px: 0,
                    height_px: 0,
                    modes: Vec::new(),
                },
                &open,
                false
            ),
            Decision::Reject
        );
    }
}
