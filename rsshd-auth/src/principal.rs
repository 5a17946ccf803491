use crate::Method;

/// Restrictions attached to an authorized key or certificate,
/// checked by the connection layer once authenticated.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Restrictions {
    /// A command forced in place of whatever the user requests.
    pub command: Option<String>,

    /// The subsystems the user is allowed to start, all of them when `None`.
    pub subsystems: Option<Vec<String>>,

    /// Whether the allocation of a pseudo-terminal is refused.
    pub no_pty: bool,
}

impl Restrictions {
    /// Whether the subsystem `name` may be started.
    pub fn allows_subsystem(&self, name: &str) -> bool {
        self.subsystems
            .as_ref()
            .map_or(true, |subsystems| subsystems.iter().any(|allowed| allowed == name))
    }

    /// Merge the `other` restrictions, keeping the most restrictive of both.
    pub fn merge(mut self, other: Restrictions) -> Self {
        if other.command.is_some() {
            self.command = other.command;
        }

        self.subsystems = match (self.subsystems, other.subsystems) {
            (Some(ours), Some(theirs)) => Some(
                ours.into_iter()
                    .filter(|subsystem| theirs.contains(subsystem))
                    .collect(),
            ),
            (ours, theirs) => ours.or(theirs),
        };
        self.no_pty |= other.no_pty;

        self
    }
}

/// An authenticated user, recorded for the authorization checks of the session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Principal {
    /// The name the user logged in as.
    pub user: String,

    /// The method that authenticated the user.
    pub method: Method,

    /// The restrictions that apply to the user in this session.
    pub restrictions: Restrictions,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn merge_keeps_the_most_restrictive() {
        let key = Restrictions {
            subsystems: Some(vec!["sftp".into(), "echo".into()]),
            ..Default::default()
        };
        let certificate = Restrictions {
            command: Some("internal-sftp".into()),
            subsystems: Some(vec!["sftp".into()]),
            no_pty: true,
        };

        let merged = key.merge(certificate);

        assert_eq!(merged.command.as_deref(), Some("internal-sftp"));
        assert!(merged.allows_subsystem("sftp"));
        assert!(!merged.allows_subsystem("echo"));
        assert!(merged.no_pty);
    }

    #[test]
    fn everything_is_allowed_by_default() {
        assert!(Restrictions::default().allows_subsystem("anything"));
    }
}
